//! Target descriptors: who to monitor, how to authenticate, and how hard to retry.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::error::ConnectionError;

/// A secret value. Never printed: `Debug` is redacted and there is no `Display`.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

/// Yields a password on demand. Implementations must not persist or log it.
pub trait SecretProvider: Send + Sync {
    fn secret(&self) -> Result<Secret, ConnectionError>;
}

/// A secret already held in memory (e.g. typed at startup).
pub struct StaticSecret(Secret);

impl StaticSecret {
    pub fn new(secret: Secret) -> Self {
        Self(secret)
    }
}

impl SecretProvider for StaticSecret {
    fn secret(&self) -> Result<Secret, ConnectionError> {
        Ok(self.0.clone())
    }
}

#[derive(Clone)]
pub enum Auth {
    Key { path: PathBuf },
    Password { secret: Arc<dyn SecretProvider> },
}

impl Auth {
    pub fn kind(&self) -> &'static str {
        match self {
            Auth::Key { .. } => "key",
            Auth::Password { .. } => "password",
        }
    }
}

impl fmt::Debug for Auth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Auth::Key { path } => f.debug_struct("Key").field("path", path).finish(),
            Auth::Password { .. } => f.write_str("Password { .. }"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Connection attempts per cycle before entering `Failed`.
    pub max_retries: u32,
    /// Pause between attempts inside one cycle.
    pub retry_delay: Duration,
    /// Pause after an exhausted cycle before the next one starts.
    pub failed_cooldown: Duration,
}

impl RetryPolicy {
    pub fn attempts_per_cycle(&self) -> u32 {
        self.max_retries.max(1)
    }

    /// The cooldown is never shorter than the intra-cycle delay.
    pub fn cooldown(&self) -> Duration {
        self.failed_cooldown.max(self.retry_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        MonitorSettings::default().retry_policy()
    }
}

/// One monitored host.
#[derive(Debug, Clone)]
pub struct TargetConfig {
    pub name: String,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub auth: Auth,
    pub connection_timeout: Duration,
    pub command_timeout: Duration,
    pub retry: RetryPolicy,
}

impl TargetConfig {
    /// Target on port 22 with timeouts and retry policy taken from `settings`.
    pub fn new(
        name: impl Into<String>,
        host: impl Into<String>,
        username: impl Into<String>,
        auth: Auth,
        settings: &MonitorSettings,
    ) -> Self {
        Self {
            name: name.into(),
            host: host.into(),
            port: 22,
            username: username.into(),
            auth,
            connection_timeout: settings.connection_timeout,
            command_timeout: settings.command_timeout,
            retry: settings.retry_policy(),
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// `user@host:port`, for logs and headers.
    pub fn address(&self) -> String {
        format!("{}@{}:{}", self.username, self.host, self.port)
    }
}

/// Global monitoring parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct MonitorSettings {
    pub poll_interval: Duration,
    pub ui_refresh_interval: Duration,
    pub connection_timeout: Duration,
    pub command_timeout: Duration,
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub failed_cooldown: Duration,
    pub history_capacity: usize,
    pub max_targets: usize,
}

impl MonitorSettings {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            retry_delay: self.retry_delay,
            failed_cooldown: self.failed_cooldown,
        }
    }
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            ui_refresh_interval: Duration::from_millis(500),
            connection_timeout: Duration::from_secs(10),
            command_timeout: Duration::from_secs(10),
            max_retries: 3,
            retry_delay: Duration::from_secs(5),
            failed_cooldown: Duration::from_secs(60),
            history_capacity: 60,
            max_targets: 64,
        }
    }
}
