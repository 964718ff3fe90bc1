//! Simulated user: owns a staging directory and a session pool for one host.

use std::sync::Arc;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use syncload_core::{
    ConfigError, Endpoint, MetricsEvent, PathTraversalError, ResourceRequest, SessionConfig,
    StagingDirectory,
};
use syncload_pipeline::{
    MetricsEmitter, MetricsSink, PoolOptions, ProcessSession, SessionError, SessionPool,
    SessionRunner,
};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserState {
    Uninitialized,
    Ready,
    Running,
    Stopped,
}

#[derive(Debug, Error)]
pub enum UserError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Traversal(#[from] PathTraversalError),
    #[error("user is {actual:?}, operation needs {expected}")]
    State {
        actual: UserState,
        expected: &'static str,
    },
    #[error("session aborted: {0}")]
    Aborted(String),
}

impl From<SessionError> for UserError {
    fn from(e: SessionError) -> Self {
        match e {
            SessionError::Traversal(t) => UserError::Traversal(t),
            SessionError::Aborted(msg) => UserError::Aborted(msg),
        }
    }
}

/// Construction-time settings. `None` keeps the built-in default.
#[derive(Debug, Clone, Default)]
pub struct UserConfig {
    pub host: String,
    /// Explicit staging root. A temporary directory is used otherwise.
    pub staging_root: Option<Utf8PathBuf>,
    pub binary: Option<String>,
    pub flags: Option<Vec<String>>,
    pub timeout: Option<Duration>,
    pub pool: PoolOptions,
}

impl UserConfig {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            ..Self::default()
        }
    }

    pub fn session_config(&self) -> Result<SessionConfig, ConfigError> {
        let mut config = SessionConfig::new(Endpoint::parse(&self.host)?);
        if let Some(binary) = &self.binary {
            config = config.with_binary(binary.clone());
        }
        if let Some(flags) = &self.flags {
            config = config.with_flags(flags.clone());
        }
        if let Some(timeout) = self.timeout {
            config = config.with_timeout(timeout);
        }
        config.validate()?;
        Ok(config)
    }
}

/// What a scheduler needs from a simulated user.
///
/// `configure` runs once before the user is handed to a scheduler, which then
/// calls `start`, any number of `run_operation`s, and `stop`.
#[async_trait::async_trait]
pub trait LoadDriver: Send + Sync {
    fn id(&self) -> Uuid;
    fn configure(&mut self) -> Result<(), ConfigError>;
    fn start(&mut self) -> Result<(), UserError>;
    fn stop(&mut self);
    async fn run_operation(&self, name: &str) -> Result<MetricsEvent, UserError>;
}

pub struct LoadUser {
    id: Uuid,
    config: UserConfig,
    state: UserState,
    runner: Arc<dyn SessionRunner>,
    emitter: MetricsEmitter,
    pool: Option<SessionPool>,
    shutdown: CancellationToken,
}

impl LoadUser {
    pub fn new(config: UserConfig, sink: Arc<dyn MetricsSink>) -> Self {
        Self {
            id: Uuid::new_v4(),
            config,
            state: UserState::Uninitialized,
            runner: Arc::new(ProcessSession::new()),
            emitter: MetricsEmitter::new(sink),
            pool: None,
            shutdown: CancellationToken::new(),
        }
    }

    /// Replace the process-backed session runner.
    pub fn with_runner(mut self, runner: Arc<dyn SessionRunner>) -> Self {
        self.runner = runner;
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> UserState {
        self.state
    }

    pub fn host(&self) -> &str {
        &self.config.host
    }

    pub fn staging_root(&self) -> Option<&Utf8Path> {
        self.pool.as_ref().map(|p| p.staging().root())
    }

    /// Token cancelled when the user stops; clone it to stop from elsewhere.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Uninitialized -> Ready. Validates the host and creates the staging directory.
    pub fn configure(&mut self) -> Result<(), ConfigError> {
        if self.state != UserState::Uninitialized {
            return Err(ConfigError::Invalid(format!(
                "user {} is already configured ({:?})",
                self.id, self.state
            )));
        }
        let session_config = self.config.session_config()?;

        let staging = match &self.config.staging_root {
            Some(root) => StagingDirectory::at(root),
            None => StagingDirectory::temporary(syncload_config::STAGING_PREFIX),
        }
        .map_err(|source| ConfigError::Staging {
            path: self
                .config
                .staging_root
                .as_ref()
                .map(|p| p.to_string())
                .unwrap_or_else(|| "<temporary>".into()),
            source,
        })?;

        info!(user = %self.id, host = %self.config.host, staging = %staging.root(), "user ready");

        self.pool = Some(SessionPool::new(
            self.runner.clone(),
            Arc::new(session_config),
            Arc::new(staging),
            self.config.pool,
        ));
        self.state = UserState::Ready;
        Ok(())
    }

    /// Ready -> Running.
    pub fn start(&mut self) -> Result<(), UserError> {
        match self.state {
            UserState::Ready => {
                self.state = UserState::Running;
                debug!(user = %self.id, "user running");
                Ok(())
            }
            actual => Err(UserError::State {
                actual,
                expected: "Ready",
            }),
        }
    }

    /// Running -> Stopped. Sessions already submitted are left to finish.
    pub fn stop(&mut self) {
        if matches!(self.state, UserState::Ready | UserState::Running) {
            self.state = UserState::Stopped;
            self.shutdown.cancel();
            debug!(user = %self.id, "user stopped");
        }
    }

    /// Fetch one resource and report it. Environmental failures come back as
    /// an event with `error` set; only traversal and lifecycle misuse are `Err`.
    pub async fn get(&self, name: &str) -> Result<MetricsEvent, UserError> {
        let pool = match (&self.pool, self.state) {
            (Some(pool), UserState::Ready | UserState::Running) => pool,
            (_, actual) => {
                return Err(UserError::State {
                    actual,
                    expected: "Ready or Running",
                })
            }
        };
        if self.shutdown.is_cancelled() {
            return Err(UserError::State {
                actual: UserState::Stopped,
                expected: "Ready or Running",
            });
        }

        let request = ResourceRequest::new(name);
        let outcome = pool.submit(request.clone()).await?;
        Ok(self.emitter.emit(&request, &outcome))
    }
}

#[async_trait::async_trait]
impl LoadDriver for LoadUser {
    fn id(&self) -> Uuid {
        self.id
    }

    fn configure(&mut self) -> Result<(), ConfigError> {
        LoadUser::configure(self)
    }

    fn start(&mut self) -> Result<(), UserError> {
        LoadUser::start(self)
    }

    fn stop(&mut self) {
        LoadUser::stop(self)
    }

    async fn run_operation(&self, name: &str) -> Result<MetricsEvent, UserError> {
        self.get(name).await
    }
}
