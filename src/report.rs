//! Outcome records and the sinks that receive them.
//!
//! A [`ReportRecord`] is the only structure that leaves the pipeline. Sinks
//! decide how records are rendered; [`RunSummary`] derives tallies from any
//! slice of records.

use std::collections::BTreeMap;
use std::fmt;
use std::io::{self, Write};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{ActionKind, OutcomeStatus, ResourceKind};

/// One outcome for one resource, or for a whole pair when `resource_id` is
/// absent.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct ReportRecord {
    /// Account name.
    pub account: String,
    /// Region or zone.
    pub region: String,
    /// Resource identifier; `None` for pair-level faults.
    pub resource_id: Option<String>,
    /// Resource display name.
    pub resource_name: Option<String>,
    /// Resource kind.
    pub resource_kind: Option<ResourceKind>,
    /// State before the action.
    pub previous_state: Option<String>,
    /// State after the action (verified when verification ran).
    pub new_state: Option<String>,
    /// Action attempted.
    pub action: ActionKind,
    /// Time the record was produced.
    pub timestamp: DateTime<Utc>,
    /// Final status.
    pub status: OutcomeStatus,
    /// Failure detail.
    pub error: Option<String>,
}

impl ReportRecord {
    /// Builds a failed record covering a whole account/region pair.
    #[must_use]
    pub fn pair_failure(
        account: &str,
        region: &str,
        action: ActionKind,
        error: impl Into<String>,
    ) -> Self {
        Self {
            account: account.to_owned(),
            region: region.to_owned(),
            resource_id: None,
            resource_name: None,
            resource_kind: None,
            previous_state: None,
            new_state: None,
            action,
            timestamp: Utc::now(),
            status: OutcomeStatus::Failed,
            error: Some(error.into()),
        }
    }

    /// Returns true for records describing a pair rather than a resource.
    #[must_use]
    pub const fn is_pair_level(&self) -> bool {
        self.resource_id.is_none()
    }
}

/// Raised when a sink cannot accept a record.
#[derive(Debug, Error)]
pub enum SinkError {
    /// Writing to the destination failed.
    #[error("failed to write report record: {0}")]
    Io(#[from] io::Error),
    /// The record could not be serialised.
    #[error("failed to encode report record: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Destination for report records.
pub trait ResultSink {
    /// Accepts one record.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError`] when the record cannot be stored or written.
    fn add_result(&mut self, record: ReportRecord) -> Result<(), SinkError>;

    /// Flushes buffered output. The default does nothing.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError`] when flushing fails.
    fn finish(&mut self) -> Result<(), SinkError> {
        Ok(())
    }
}

/// Keeps every record in memory.
#[derive(Clone, Debug, Default)]
pub struct MemorySink {
    records: Vec<ReportRecord>,
}

impl MemorySink {
    /// Records received so far, in arrival order.
    #[must_use]
    pub fn records(&self) -> &[ReportRecord] {
        &self.records
    }

    /// Consumes the sink, returning its records.
    #[must_use]
    pub fn into_records(self) -> Vec<ReportRecord> {
        self.records
    }
}

impl ResultSink for MemorySink {
    fn add_result(&mut self, record: ReportRecord) -> Result<(), SinkError> {
        self.records.push(record);
        Ok(())
    }
}

/// Writes one JSON object per line.
#[derive(Debug)]
pub struct JsonLinesSink<W: Write> {
    writer: W,
}

impl<W: Write> JsonLinesSink<W> {
    /// Wraps `writer`.
    pub const fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Returns the wrapped writer.
    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> ResultSink for JsonLinesSink<W> {
    fn add_result(&mut self, record: ReportRecord) -> Result<(), SinkError> {
        serde_json::to_writer(&mut self.writer, &record)?;
        self.writer.write_all(b"\n")?;
        Ok(())
    }

    fn finish(&mut self) -> Result<(), SinkError> {
        self.writer.flush()?;
        Ok(())
    }
}

/// Count of records by outcome.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize)]
pub struct Tally {
    /// Records seen.
    pub total: usize,
    /// Records that succeeded.
    pub successful: usize,
    /// Records that failed or timed out.
    pub failed: usize,
}

impl Tally {
    const fn add(&mut self, status: OutcomeStatus) {
        self.total += 1;
        if status.is_success() {
            self.successful += 1;
        } else {
            self.failed += 1;
        }
    }
}

impl fmt::Display for Tally {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.total, self.successful, self.failed)
    }
}

/// Totals derived from a run's records.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
pub struct RunSummary {
    /// Totals across every record.
    pub overall: Tally,
    /// Totals per action.
    pub by_action: BTreeMap<ActionKind, Tally>,
    /// Totals per account name.
    pub by_account: BTreeMap<String, Tally>,
}

impl RunSummary {
    /// Tallies `records`. Timed-out records count as failures.
    #[must_use]
    pub fn from_records(records: &[ReportRecord]) -> Self {
        let mut summary = Self::default();
        for record in records {
            summary.overall.add(record.status);
            summary
                .by_action
                .entry(record.action)
                .or_default()
                .add(record.status);
            summary
                .by_account
                .entry(record.account.clone())
                .or_default()
                .add(record.status);
        }
        summary
    }

    /// Returns true when every record succeeded.
    #[must_use]
    pub const fn all_succeeded(&self) -> bool {
        self.overall.failed == 0
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "total={} successful={} failed={}",
            self.overall.total, self.overall.successful, self.overall.failed
        )?;
        for (action, tally) in &self.by_action {
            write!(f, " {action}={tally}")?;
        }
        for (account, tally) in &self.by_account {
            write!(f, " account:{account}={tally}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::{fixture, rstest};

    fn record(account: &str, action: ActionKind, status: OutcomeStatus) -> ReportRecord {
        ReportRecord {
            account: account.to_owned(),
            region: String::from("fr-par-1"),
            resource_id: Some(format!("srv-{account}")),
            resource_name: Some(format!("{account}-web")),
            resource_kind: Some(ResourceKind::Instance),
            previous_state: Some(String::from("running")),
            new_state: Some(String::from("stopped")),
            action,
            timestamp: Utc::now(),
            status,
            error: None,
        }
    }

    #[fixture]
    fn three_records() -> Vec<ReportRecord> {
        let mut failed = record("dev", ActionKind::Start, OutcomeStatus::Failed);
        failed.error = Some(String::from("Instance in invalid state"));
        vec![
            record("prod", ActionKind::Stop, OutcomeStatus::Succeeded),
            failed,
            record("prod", ActionKind::Start, OutcomeStatus::Succeeded),
        ]
    }

    fn tally(total: usize, successful: usize, failed: usize) -> Tally {
        Tally {
            total,
            successful,
            failed,
        }
    }

    #[rstest]
    fn summary_tallies_actions_and_accounts(three_records: Vec<ReportRecord>) {
        let summary = RunSummary::from_records(&three_records);

        assert_eq!(summary.overall, tally(3, 2, 1));
        assert_eq!(summary.by_action[&ActionKind::Stop], tally(1, 1, 0));
        assert_eq!(summary.by_action[&ActionKind::Start], tally(2, 1, 1));
        assert_eq!(summary.by_account["prod"], tally(2, 2, 0));
        assert_eq!(summary.by_account["dev"], tally(1, 0, 1));
        assert!(!summary.all_succeeded());
    }

    #[rstest]
    fn timed_out_counts_as_failed() {
        let records = [record("prod", ActionKind::Start, OutcomeStatus::TimedOut)];
        let summary = RunSummary::from_records(&records);
        assert_eq!(summary.overall, tally(1, 0, 1));
    }

    #[rstest]
    fn summary_line_lists_every_tally(three_records: Vec<ReportRecord>) {
        let line = RunSummary::from_records(&three_records).to_string();
        assert_eq!(
            line,
            "total=3 successful=2 failed=1 start=2/1/1 stop=1/1/0 account:dev=1/0/1 account:prod=2/2/0"
        );
    }

    #[rstest]
    fn json_lines_sink_writes_one_object_per_record(three_records: Vec<ReportRecord>) {
        let mut sink = JsonLinesSink::new(Vec::new());
        for record in three_records {
            sink.add_result(record).expect("write to memory");
        }
        sink.finish().expect("flush memory");

        let output = String::from_utf8(sink.into_inner()).expect("utf-8 output");
        let lines: Vec<&str> = output.lines().collect();
        assert_eq!(lines.len(), 3);
        let decoded: serde_json::Value = serde_json::from_str(lines[1]).expect("valid json");
        assert_eq!(decoded["account"], "dev");
        assert_eq!(decoded["action"], "start");
        assert_eq!(decoded["status"], "failed");
        assert_eq!(decoded["resource_kind"], "instance");
        assert_eq!(decoded["error"], "Instance in invalid state");
    }

    #[rstest]
    fn pair_failures_have_no_resource() {
        let record = ReportRecord::pair_failure("dev", "fr-par-2", ActionKind::Stop, "denied");
        assert!(record.is_pair_level());
        assert_eq!(record.status, OutcomeStatus::Failed);
        assert_eq!(record.error.as_deref(), Some("denied"));
    }
}
