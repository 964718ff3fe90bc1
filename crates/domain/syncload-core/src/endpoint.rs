use syncload_config::RSYNC_SCHEME;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("host must not be empty")]
    EmptyHost,
    #[error("host should just contain the hostname, not a scheme: {0}")]
    SchemeInHost(String),
    #[error("host should not end with '/': {0}")]
    TrailingSeparator(String),
    #[error("host must not contain whitespace: {0:?}")]
    Whitespace(String),
    #[error("staging directory {path}: {source}")]
    Staging {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Validated daemon host, optionally with a port (`host:873`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    host: String,
}

impl Endpoint {
    pub fn parse(host: &str) -> Result<Self, ConfigError> {
        if host.is_empty() {
            return Err(ConfigError::EmptyHost);
        }
        if host.contains("://") {
            return Err(ConfigError::SchemeInHost(host.to_string()));
        }
        if host.ends_with('/') || host.ends_with('\\') {
            return Err(ConfigError::TrailingSeparator(host.to_string()));
        }
        if host.chars().any(char::is_whitespace) {
            return Err(ConfigError::Whitespace(host.to_string()));
        }
        Ok(Self {
            host: host.to_string(),
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// `rsync://{host}/{name}`; the first path segment of `name` is the module.
    pub fn address(&self, name: &str) -> String {
        format!("{RSYNC_SCHEME}://{}/{}", self.host, name.trim_start_matches('/'))
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.host)
    }
}
