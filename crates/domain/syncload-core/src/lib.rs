use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub mod endpoint;
pub mod path_utils;

pub use endpoint::{ConfigError, Endpoint};
pub use path_utils::{PathResolver, PathTraversalError, ResolveError, StagingDirectory};

/// Tag carried by every event produced by this crate family.
pub const OPERATION_KIND: &str = "rsync";

/// Error text reported for sessions that hit their deadline.
pub const TIMED_OUT_ERROR: &str = "timed out";

/// One named "get resource" call. Owned by the session that processes it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRequest {
    name: String,
    issued_at: DateTime<Utc>,
}

impl ResourceRequest {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            issued_at: Utc::now(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn issued_at(&self) -> DateTime<Utc> {
        self.issued_at
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "code")]
pub enum OutcomeStatus {
    Success,
    /// Exit code, or -1 when the process was terminated by a signal.
    NonZeroExit(i32),
    TimedOut,
    LaunchFailed,
}

impl OutcomeStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, OutcomeStatus::Success)
    }
}

/// Terminal result of one session. Produced exactly once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncOutcome {
    pub status: OutcomeStatus,
    /// Combined stdout and stderr. For launch failures, the error text.
    pub output: Vec<u8>,
    pub elapsed: Duration,
}

impl SyncOutcome {
    pub fn output_lossy(&self) -> String {
        String::from_utf8_lossy(&self.output).into_owned()
    }

    /// Human readable failure description; `None` for successful sessions.
    pub fn error_message(&self) -> Option<String> {
        let detail = self.output_lossy();
        let detail = detail.trim();
        match self.status {
            OutcomeStatus::Success => None,
            OutcomeStatus::TimedOut => Some(TIMED_OUT_ERROR.to_string()),
            OutcomeStatus::NonZeroExit(code) if detail.is_empty() => {
                Some(format!("process exited with {code}"))
            }
            OutcomeStatus::NonZeroExit(code) => {
                Some(format!("process exited with {code}: {detail}"))
            }
            OutcomeStatus::LaunchFailed if detail.is_empty() => Some("launch failed".to_string()),
            OutcomeStatus::LaunchFailed => Some(format!("launch failed: {detail}")),
        }
    }
}

/// Normalized event handed to a metrics sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsEvent {
    pub request_type: String,
    pub name: String,
    pub response_length: u64,
    pub response_time_ms: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub issued_at: DateTime<Utc>,
}

impl MetricsEvent {
    pub fn from_outcome(request: &ResourceRequest, outcome: &SyncOutcome) -> Self {
        Self {
            request_type: OPERATION_KIND.to_string(),
            name: request.name().to_string(),
            response_length: outcome.output.len() as u64,
            response_time_ms: outcome.elapsed.as_secs_f64() * 1000.0,
            error: outcome.error_message(),
            issued_at: request.issued_at(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Parameters shared read-only by every session of one pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub endpoint: Endpoint,
    pub binary: String,
    pub flags: Vec<String>,
    pub timeout: Duration,
}

impl SessionConfig {
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            binary: syncload_config::DEFAULT_RSYNC_BINARY.to_string(),
            flags: syncload_config::default_flags(),
            timeout: Duration::from_secs(syncload_config::DEFAULT_TIMEOUT_SECS),
        }
    }

    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    pub fn with_flags(mut self, flags: Vec<String>) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Reject values that would make every session fail in the same way.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.binary.trim().is_empty() {
            return Err(ConfigError::Invalid("binary must not be empty".into()));
        }
        if self.timeout.is_zero() {
            return Err(ConfigError::Invalid("timeout must be greater than zero".into()));
        }
        Ok(())
    }
}
