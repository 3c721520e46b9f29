//! Command-line interface definitions for the `nocturne` binary.
//!
//! This module centralises the clap parser structures so both the main binary
//! and the build script can reuse them when generating the manual page.

use clap::{Args, Parser, ValueEnum};

/// Top-level CLI for the `nocturne` binary.
#[derive(Debug, Parser)]
#[command(
    name = "nocturne",
    about = "Start or stop tagged cloud resources across accounts and zones",
    arg_required_else_help = true
)]
pub(crate) enum Cli {
    /// Start every tagged resource and wait until it runs.
    #[command(name = "start", about = "Start tagged resources and verify they run")]
    Start(ScheduleArgs),
    /// Stop every tagged resource and wait until it stops.
    #[command(name = "stop", about = "Stop tagged resources and verify they stop")]
    Stop(StopCommand),
}

/// Resource kinds accepted by `--kind`.
#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub(crate) enum KindArg {
    /// Compute instances.
    Instance,
    /// Kubernetes node groups (Kapsule pools).
    NodeGroup,
}

/// Arguments shared by `start` and `stop`.
#[derive(Debug, Args)]
pub(crate) struct ScheduleArgs {
    /// Accounts to process: `all` or a comma-separated list of names.
    #[arg(long, value_name = "NAMES", default_value = "all")]
    pub(crate) accounts: String,
    /// Zone to process; repeat for several. Defaults to the configured zone.
    #[arg(long = "region", value_name = "ZONE")]
    pub(crate) regions: Vec<String>,
    /// Resource kind to process; repeat for several. Overrides
    /// `NOCTURNE_RESOURCE_KINDS`.
    #[arg(long = "kind", value_enum, value_name = "KIND")]
    pub(crate) kinds: Vec<KindArg>,
    /// Tag key selecting scheduled resources.
    #[arg(long, value_name = "KEY")]
    pub(crate) tag_key: Option<String>,
    /// Tag value selecting scheduled resources.
    #[arg(long, value_name = "VALUE")]
    pub(crate) tag_value: Option<String>,
    /// Seconds to wait for each resource to reach its target state.
    #[arg(long, value_name = "SECS")]
    pub(crate) verify_timeout: Option<u64>,
    /// Seconds between state checks while verifying.
    #[arg(long, value_name = "SECS")]
    pub(crate) check_interval: Option<u64>,
    /// Report accepted actions without waiting for the target state.
    #[arg(long)]
    pub(crate) no_verify: bool,
    /// List matching resources without acting on them.
    #[arg(long)]
    pub(crate) dry_run: bool,
    /// Number of account/zone pairs processed at once.
    #[arg(long, value_name = "N")]
    pub(crate) max_concurrency: Option<usize>,
    /// Overall budget for the run in seconds.
    #[arg(long, value_name = "SECS")]
    pub(crate) deadline: Option<u64>,
}

/// Arguments for the `nocturne stop` subcommand.
#[derive(Debug, Args)]
pub(crate) struct StopCommand {
    #[command(flatten)]
    pub(crate) common: ScheduleArgs,
    /// Stop without a graceful shutdown where the provider supports it.
    #[arg(long)]
    pub(crate) force: bool,
}
