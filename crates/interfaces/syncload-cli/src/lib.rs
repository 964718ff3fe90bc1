pub mod commands;
pub mod scenario;
pub mod scheduler;
pub mod user;

use camino::Utf8PathBuf;
use clap::Args;

pub use scenario::{Scenario, ScenarioError, TaskSet, TaskSpec, WaitTime};
pub use user::{LoadDriver, LoadUser, UserConfig, UserError, UserState};

/// What to hit and how. Command-line values win over the scenario file.
#[derive(Args, Clone, Debug, Default)]
pub struct TargetArgs {
    /// Scenario file (JSON) with host, tasks and session settings
    #[arg(short, long)]
    pub scenario: Option<Utf8PathBuf>,
    /// rsync daemon host, optionally with :port (no scheme, no trailing '/')
    #[arg(long, env = "SYNCLOAD_HOST")]
    pub host: Option<String>,
    /// Task as NAME=RESOURCE or RESOURCE; repeatable
    #[arg(short, long = "task")]
    pub tasks: Vec<String>,
    /// rsync binary to run
    #[arg(long)]
    pub binary: Option<String>,
    /// Flags passed to rsync, as one shell-quoted string (e.g. "-rltz --delete")
    #[arg(long, allow_hyphen_values = true)]
    pub flags: Option<String>,
    /// Per-session timeout in seconds
    #[arg(long)]
    pub timeout_secs: Option<u64>,
    /// Staging root; a temporary directory is used when omitted
    #[arg(long)]
    pub staging: Option<Utf8PathBuf>,
    /// Maximum sessions in flight per user
    #[arg(long)]
    pub max_in_flight: Option<usize>,
    /// Maximum sessions started per second per user
    #[arg(long)]
    pub rate: Option<u32>,
    /// Write every metrics event as a JSON line to this file
    #[arg(long)]
    pub events: Option<Utf8PathBuf>,
}

/// Pause between two tasks of one user. Overrides the scenario values.
#[derive(Args, Clone, Debug, Default)]
pub struct WaitArgs {
    #[arg(long)]
    pub wait_min_ms: Option<u64>,
    #[arg(long)]
    pub wait_max_ms: Option<u64>,
}
