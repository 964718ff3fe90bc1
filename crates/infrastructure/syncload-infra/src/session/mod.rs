use std::time::{Duration, Instant};

use camino::Utf8Path;
use syncload_core::{
    OutcomeStatus, PathTraversalError, ResolveError, ResourceRequest, SessionConfig,
    StagingDirectory, SyncOutcome,
};
use thiserror::Error;
use tracing::{debug, info, warn};

mod process;
use process::{ProcessExit, ProcessOutput};

/// Hard failures of a single request. Environmental failures are outcomes instead.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Traversal(#[from] PathTraversalError),
    #[error("session task aborted: {0}")]
    Aborted(String),
}

/// Runs one synchronization session to completion.
#[async_trait::async_trait]
pub trait SessionRunner: Send + Sync {
    async fn run(
        &self,
        config: &SessionConfig,
        staging: &StagingDirectory,
        request: &ResourceRequest,
    ) -> Result<SyncOutcome, SessionError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ResolvedSyncCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl ResolvedSyncCommand {
    /// `binary [flags...] <address> <target>`
    pub(crate) fn new(config: &SessionConfig, address: &str, target: &Utf8Path) -> Self {
        let mut args = config.flags.clone();
        args.push(address.to_string());
        args.push(target.to_string());
        Self {
            program: config.binary.clone(),
            args,
        }
    }

    fn display(&self) -> String {
        let words = std::iter::once(self.program.as_str()).chain(self.args.iter().map(String::as_str));
        shlex::try_join(words).unwrap_or_else(|_| format!("{} {:?}", self.program, self.args))
    }
}

/// Session backed by a child process of the configured binary.
#[derive(Debug, Default, Clone)]
pub struct ProcessSession {
    drain_grace: Option<Duration>,
}

impl ProcessSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Override how long output pipes may stay open once the process is gone.
    pub fn with_drain_grace(mut self, grace: Duration) -> Self {
        self.drain_grace = Some(grace);
        self
    }

    fn grace(&self) -> Duration {
        self.drain_grace
            .unwrap_or(Duration::from_millis(syncload_config::OUTPUT_DRAIN_GRACE_MS))
    }
}

#[async_trait::async_trait]
impl SessionRunner for ProcessSession {
    async fn run(
        &self,
        config: &SessionConfig,
        staging: &StagingDirectory,
        request: &ResourceRequest,
    ) -> Result<SyncOutcome, SessionError> {
        let preparing = Instant::now();
        let target = match staging.resolve(request.name()) {
            Ok(target) => target,
            Err(ResolveError::Traversal(e)) => return Err(SessionError::Traversal(e)),
            Err(e @ ResolveError::Io { .. }) => {
                warn!("Could not prepare target for {}: {}", request.name(), e);
                return Ok(SyncOutcome {
                    status: OutcomeStatus::LaunchFailed,
                    output: e.to_string().into_bytes(),
                    elapsed: preparing.elapsed(),
                });
            }
        };

        let address = config.endpoint.address(request.name());
        info!("rsyncing {} to {}", address, target);

        let cmd = ResolvedSyncCommand::new(config, &address, &target);
        debug!("Running {}", cmd.display());

        // Latency covers the process only, not target preparation.
        let started = Instant::now();
        let ProcessOutput { exit, output } =
            process::run_with_deadline(&cmd, config.timeout, self.grace()).await;

        let status = match exit {
            ProcessExit::Exited(0) => OutcomeStatus::Success,
            ProcessExit::Exited(code) => OutcomeStatus::NonZeroExit(code),
            ProcessExit::TimedOut => OutcomeStatus::TimedOut,
            ProcessExit::LaunchFailed => OutcomeStatus::LaunchFailed,
        };
        let elapsed = started.elapsed();

        if !status.is_success() {
            warn!(
                name = request.name(),
                ?status,
                elapsed_ms = elapsed.as_millis() as u64,
                "rsync session failed"
            );
        }

        Ok(SyncOutcome {
            status,
            output,
            elapsed,
        })
    }
}
