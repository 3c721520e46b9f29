//! Binary entry point for the Nocturne scheduler CLI.

use std::env;
use std::io::{self, Write};
use std::process;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use thiserror::Error;
use tokio::time::Instant;
use tracing::info;

use nocturne::test_support::FakeCloud;
use nocturne::{
    Account, AccountRegionOrchestrator, AccountRegistry, AccountSelection, AccountsError,
    ActionKind, ConfigError, JsonLinesSink, ResourceKind, ResultSink, RunLog, RunPlan,
    RunSettings, RunSummary, ScalewayConfig, ScalewayProvider, SchedulerConfig, SessionFactory,
    SinkError, TagFilter, TelemetryError, init_subscriber,
};

mod cli;

use cli::{Cli, KindArg, ScheduleArgs};

/// Selects the in-memory demo cloud instead of Scaleway.
const FAKE_CLOUD_ENV: &str = "NOCTURNE_FAKE_CLOUD";
/// Zone used by the demo cloud.
const DEMO_ZONE: &str = "fr-par-1";

#[derive(Debug, Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("accounts error: {0}")]
    Accounts(#[from] AccountsError),
    #[error("logging error: {0}")]
    Telemetry(#[from] TelemetryError),
    #[error("output error: {0}")]
    Output(#[from] SinkError),
    #[error("invalid argument: {0}")]
    Usage(String),
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let exit_code = match dispatch(cli).await {
        Ok(code) => code,
        Err(err) => {
            report_error(&err);
            1
        }
    };

    process::exit(exit_code);
}

async fn dispatch(cli: Cli) -> Result<i32, CliError> {
    match cli {
        Cli::Start(args) => schedule(ActionKind::Start, false, &args).await,
        Cli::Stop(command) => schedule(ActionKind::Stop, command.force, &command.common).await,
    }
}

async fn schedule(action: ActionKind, force: bool, args: &ScheduleArgs) -> Result<i32, CliError> {
    let settings = apply_overrides(SchedulerConfig::load_without_cli_args()?.resolve()?, args)?;
    init_subscriber(&settings.log_level, settings.log_format)?;
    let Ok(selection) = args.accounts.parse::<AccountSelection>();

    if env::var(FAKE_CLOUD_ENV).is_ok_and(|mode| mode == "demo") {
        let cloud = FakeCloud::demo(&settings.tag.key, &settings.tag.value, DEMO_ZONE);
        let accounts = AccountRegistry::new(FakeCloud::demo_accounts()).select(&selection)?;
        let plan = build_plan(action, force, args, &settings, accounts, DEMO_ZONE);
        return execute(cloud, &plan, &settings, RunLog::new(), args.dry_run).await;
    }

    let scaleway = ScalewayConfig::load_without_cli_args()?;
    let log = RunLog::new();
    let provider = ScalewayProvider::new(&scaleway)?.with_retry(settings.retry, log.clone());
    let registry = AccountRegistry::resolve(
        settings.accounts_file.as_deref(),
        scaleway.default_project_id.as_deref(),
    )?;
    let accounts = registry.select(&selection)?;
    let plan = build_plan(
        action,
        force,
        args,
        &settings,
        accounts,
        &scaleway.default_zone,
    );
    execute(provider, &plan, &settings, log, args.dry_run).await
}

fn build_plan(
    action: ActionKind,
    force: bool,
    args: &ScheduleArgs,
    settings: &RunSettings,
    accounts: Vec<Account>,
    default_zone: &str,
) -> RunPlan {
    let regions = if args.regions.is_empty() {
        vec![default_zone.to_owned()]
    } else {
        args.regions.clone()
    };
    RunPlan {
        accounts,
        regions,
        tag: settings.tag.clone(),
        action,
        force,
        kinds: settings.kinds.clone(),
        verification: (!args.no_verify).then_some(settings.poll_window),
        deadline: settings
            .run_deadline
            .map(|budget| Instant::now() + budget),
    }
}

async fn execute<F: SessionFactory + 'static>(
    factory: F,
    plan: &RunPlan,
    settings: &RunSettings,
    log: RunLog,
    dry_run: bool,
) -> Result<i32, CliError> {
    if let Some(topic) = settings.notification_topic.as_deref() {
        info!(parent: log.span(), topic, "notification topic configured; delivery is disabled");
    }
    let orchestrator = AccountRegionOrchestrator::new(Arc::new(factory), settings.retry, log)
        .with_max_concurrency(settings.max_concurrency);

    if dry_run {
        let listings = orchestrator.discover(plan).await;
        let mut stdout = io::stdout().lock();
        for listing in &listings {
            serde_json::to_writer(&mut stdout, listing).map_err(SinkError::from)?;
            writeln!(stdout).map_err(SinkError::from)?;
        }
        let clean = listings.iter().all(|listing| listing.error.is_none());
        return Ok(if clean { 0 } else { 2 });
    }

    let records = orchestrator.run(plan).await;
    let summary = RunSummary::from_records(&records);
    let mut sink = JsonLinesSink::new(io::stdout().lock());
    for record in records {
        sink.add_result(record)?;
    }
    sink.finish()?;
    writeln!(io::stderr(), "{summary}").ok();
    Ok(if summary.all_succeeded() { 0 } else { 2 })
}

/// Layers command-line flags over the resolved configuration.
fn apply_overrides(mut settings: RunSettings, args: &ScheduleArgs) -> Result<RunSettings, CliError> {
    if args.tag_key.is_some() || args.tag_value.is_some() {
        let key = args.tag_key.as_deref().unwrap_or(&settings.tag.key).trim();
        let value = args
            .tag_value
            .as_deref()
            .unwrap_or(&settings.tag.value)
            .trim();
        if key.is_empty() || value.is_empty() {
            return Err(CliError::Usage(String::from(
                "--tag-key and --tag-value must not be empty",
            )));
        }
        settings.tag = TagFilter::new(key, value);
    }
    if !args.kinds.is_empty() {
        let mut kinds = Vec::new();
        for kind in args.kinds.iter().copied().map(resource_kind) {
            if !kinds.contains(&kind) {
                kinds.push(kind);
            }
        }
        settings.kinds = kinds;
    }
    if let Some(secs) = args.verify_timeout {
        settings.poll_window.timeout = Duration::from_secs(secs);
    }
    if let Some(secs) = args.check_interval {
        if secs == 0 {
            return Err(CliError::Usage(String::from(
                "--check-interval must be positive",
            )));
        }
        settings.poll_window.check_interval = Duration::from_secs(secs);
    }
    if let Some(limit) = args.max_concurrency {
        if limit == 0 {
            return Err(CliError::Usage(String::from(
                "--max-concurrency must be at least 1",
            )));
        }
        settings.max_concurrency = limit;
    }
    if let Some(secs) = args.deadline {
        if secs == 0 {
            return Err(CliError::Usage(String::from("--deadline must be positive")));
        }
        settings.run_deadline = Some(Duration::from_secs(secs));
    }
    Ok(settings)
}

const fn resource_kind(kind: KindArg) -> ResourceKind {
    match kind {
        KindArg::Instance => ResourceKind::Instance,
        KindArg::NodeGroup => ResourceKind::NodeGroup,
    }
}

fn report_error(err: &CliError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "{err}").ok();
}
