//! YAML configuration: monitoring settings, display thresholds and the server list.
//! Default location: $XDG_CONFIG_HOME/sshtop/config.yaml (fallback ~/.config/sshtop/config.yaml)

use std::fs;
use std::io;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sshtop_engine::{Auth, MonitorSettings, SecretProvider, TargetConfig};
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("cannot parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml_ng::Error,
    },
    #[error("cannot write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("cannot serialize config: {0}")]
    Serialize(#[source] serde_yaml_ng::Error),
    #[error("{section}.{field}: {reason}")]
    Setting {
        section: &'static str,
        field: &'static str,
        reason: String,
    },
    #[error("server '{server}': {field}: {reason}")]
    Server {
        server: String,
        field: &'static str,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringSection {
    /// Seconds between polls of one server.
    pub poll_interval: f64,
    pub ui_refresh_interval: f64,
    pub connection_timeout: f64,
    pub command_timeout: f64,
    pub max_retries: u32,
    pub retry_delay: f64,
    pub failed_cooldown: f64,
    pub history_capacity: usize,
    pub max_targets: usize,
}

impl Default for MonitoringSection {
    fn default() -> Self {
        let d = MonitorSettings::default();
        Self {
            poll_interval: d.poll_interval.as_secs_f64(),
            ui_refresh_interval: d.ui_refresh_interval.as_secs_f64(),
            connection_timeout: d.connection_timeout.as_secs_f64(),
            command_timeout: d.command_timeout.as_secs_f64(),
            max_retries: d.max_retries,
            retry_delay: d.retry_delay.as_secs_f64(),
            failed_cooldown: d.failed_cooldown.as_secs_f64(),
            history_capacity: d.history_capacity,
            max_targets: d.max_targets,
        }
    }
}

fn seconds(field: &'static str, value: f64, allow_zero: bool) -> Result<Duration, ConfigError> {
    let bad = |reason: &str| ConfigError::Setting {
        section: "monitoring",
        field,
        reason: format!("{reason} (got {value})"),
    };
    if !value.is_finite() || value < 0.0 {
        return Err(bad("must be a non-negative number of seconds"));
    }
    if value == 0.0 && !allow_zero {
        return Err(bad("must be greater than zero"));
    }
    Duration::try_from_secs_f64(value).map_err(|_| bad("out of range"))
}

impl MonitoringSection {
    pub fn settings(&self) -> Result<MonitorSettings, ConfigError> {
        let positive = |field: &'static str, v: usize| {
            if v == 0 {
                Err(ConfigError::Setting {
                    section: "monitoring",
                    field,
                    reason: "must be at least 1".into(),
                })
            } else {
                Ok(v)
            }
        };
        Ok(MonitorSettings {
            poll_interval: seconds("poll_interval", self.poll_interval, false)?,
            ui_refresh_interval: seconds("ui_refresh_interval", self.ui_refresh_interval, false)?,
            connection_timeout: seconds("connection_timeout", self.connection_timeout, false)?,
            command_timeout: seconds("command_timeout", self.command_timeout, false)?,
            max_retries: self.max_retries,
            retry_delay: seconds("retry_delay", self.retry_delay, true)?,
            failed_cooldown: seconds("failed_cooldown", self.failed_cooldown, true)?,
            history_capacity: positive("history_capacity", self.history_capacity)?,
            max_targets: positive("max_targets", self.max_targets)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplaySection {
    /// Utilization below this is drawn green.
    pub low_threshold: f32,
    /// Below this (and above `low_threshold`) is yellow; anything higher is red.
    pub medium_threshold: f32,
    pub start_collapsed: bool,
}

impl Default for DisplaySection {
    fn default() -> Self {
        Self {
            low_threshold: 30.0,
            medium_threshold: 70.0,
            start_collapsed: false,
        }
    }
}

impl DisplaySection {
    fn validate(&self) -> Result<(), ConfigError> {
        let ok = (0.0..=100.0).contains(&self.low_threshold)
            && (0.0..=100.0).contains(&self.medium_threshold)
            && self.low_threshold <= self.medium_threshold;
        if ok {
            Ok(())
        } else {
            Err(ConfigError::Setting {
                section: "display",
                field: "low_threshold",
                reason: format!(
                    "thresholds must satisfy 0 <= low ({}) <= medium ({}) <= 100",
                    self.low_threshold, self.medium_threshold
                ),
            })
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMethod {
    #[default]
    Key,
    Password,
}

fn default_port() -> u16 {
    22
}

/// One `servers:` entry. Holds no secret material, so it is always safe to save.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerEntry {
    pub name: String,
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub username: String,
    #[serde(default)]
    pub auth: AuthMethod,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_path: Option<String>,
    /// Environment variable holding the password; prompted for when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_env: Option<String>,
}

impl ServerEntry {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let err = |field: &'static str, reason: String| ConfigError::Server {
            server: self.name.clone(),
            field,
            reason,
        };
        validate_server_name(&self.name).map_err(|r| err("name", r))?;
        validate_hostname(&self.host).map_err(|r| err("host", r))?;
        validate_port(self.port).map_err(|r| err("port", r))?;
        validate_username(&self.username).map_err(|r| err("username", r))?;
        if self.auth == AuthMethod::Key
            && self.key_path.as_deref().map_or(true, |p| p.trim().is_empty())
        {
            return Err(err("key_path", "required for key authentication".into()));
        }
        Ok(())
    }

    /// Build the engine's target. Password servers need `secret`.
    pub fn to_target(
        &self,
        settings: &MonitorSettings,
        secret: Option<Arc<dyn SecretProvider>>,
    ) -> Result<TargetConfig, ConfigError> {
        let auth = match self.auth {
            AuthMethod::Key => Auth::Key {
                path: expand_tilde(self.key_path.as_deref().unwrap_or_default()),
            },
            AuthMethod::Password => match secret {
                Some(secret) => Auth::Password { secret },
                None => {
                    return Err(ConfigError::Server {
                        server: self.name.clone(),
                        field: "password_env",
                        reason: "no password available".into(),
                    })
                }
            },
        };
        Ok(
            TargetConfig::new(&self.name, &self.host, &self.username, auth, settings)
                .with_port(self.port),
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub monitoring: MonitoringSection,
    #[serde(default)]
    pub display: DisplaySection,
    #[serde(default)]
    pub servers: Vec<ServerEntry>,
}

impl Config {
    pub fn from_yaml(text: &str, path: &Path) -> Result<Self, ConfigError> {
        let cfg: Config = serde_yaml_ng::from_str(text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let cfg = Self::from_yaml(&text, path)?;
        info!(path = %path.display(), servers = cfg.servers.len(), "configuration loaded");
        Ok(cfg)
    }

    /// Like [`Config::load`], but a file that does not exist yet is an empty config.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        match Self::load(path) {
            Err(ConfigError::Read { source, .. }) if source.kind() == io::ErrorKind::NotFound => {
                info!(path = %path.display(), "no configuration file yet, starting empty");
                Ok(Self::default())
            }
            other => other,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.monitoring.settings()?;
        self.display.validate()?;
        for (i, server) in self.servers.iter().enumerate() {
            server.validate()?;
            if self.servers[..i].iter().any(|s| s.name == server.name) {
                return Err(ConfigError::Server {
                    server: server.name.clone(),
                    field: "name",
                    reason: "duplicate server name".into(),
                });
            }
        }
        Ok(())
    }

    pub fn settings(&self) -> Result<MonitorSettings, ConfigError> {
        self.monitoring.settings()
    }

    /// Write the whole file, replacing it atomically.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let text = serde_yaml_ng::to_string(self).map_err(ConfigError::Serialize)?;
        let write_err = |source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(write_err)?;
        }
        let tmp = path.with_extension("yaml.tmp");
        fs::write(&tmp, text).map_err(write_err)?;
        fs::rename(&tmp, path).map_err(write_err)?;
        info!(path = %path.display(), servers = self.servers.len(), "configuration saved");
        Ok(())
    }

    pub fn add_server(&mut self, entry: ServerEntry) -> Result<(), ConfigError> {
        entry.validate()?;
        if self.servers.iter().any(|s| s.name == entry.name) {
            return Err(ConfigError::Server {
                server: entry.name,
                field: "name",
                reason: "duplicate server name".into(),
            });
        }
        self.servers.push(entry);
        Ok(())
    }

    pub fn remove_server(&mut self, name: &str) -> Option<ServerEntry> {
        let idx = self.servers.iter().position(|s| s.name == name)?;
        Some(self.servers.remove(idx))
    }
}

pub fn config_dir() -> PathBuf {
    if let Some(xdg) = std::env::var_os("XDG_CONFIG_HOME") {
        PathBuf::from(xdg).join("sshtop")
    } else {
        dirs_next::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("sshtop")
    }
}

pub fn default_path() -> PathBuf {
    config_dir().join("config.yaml")
}

pub fn expand_tilde(path: &str) -> PathBuf {
    match path.strip_prefix("~/") {
        Some(rest) => dirs_next::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| PathBuf::from(path)),
        None => PathBuf::from(path),
    }
}

// ---------- field validation (shared with the add-server form) ----------

pub fn validate_server_name(name: &str) -> Result<(), String> {
    let name = name.trim();
    if name.is_empty() {
        return Err("cannot be empty".into());
    }
    if name.chars().count() > 64 {
        return Err("too long (max 64 characters)".into());
    }
    if name.chars().any(|c| (c as u32) < 32) {
        return Err("contains control characters".into());
    }
    Ok(())
}

pub fn validate_hostname(host: &str) -> Result<(), String> {
    let host = host.trim();
    if host.is_empty() {
        return Err("cannot be empty".into());
    }
    if host.parse::<IpAddr>().is_ok() {
        return Ok(());
    }
    if host.len() > 253 {
        return Err("too long (max 253 characters)".into());
    }
    if host.chars().all(|c| c.is_ascii_digit() || c == '.') {
        return Err("invalid IP address".into());
    }
    for label in host.split('.') {
        if label.is_empty() || label.len() > 63 {
            return Err(format!("label '{label}' must be 1 to 63 characters"));
        }
        if !label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
            return Err(format!("label '{label}' may only hold letters, digits and hyphens"));
        }
        if label.starts_with('-') || label.ends_with('-') {
            return Err(format!("label '{label}' cannot start or end with a hyphen"));
        }
    }
    Ok(())
}

pub fn validate_username(user: &str) -> Result<(), String> {
    let user = user.trim();
    if user.is_empty() {
        return Err("cannot be empty".into());
    }
    if user.len() > 32 {
        return Err("too long (max 32 characters)".into());
    }
    let mut chars = user.chars();
    let first_ok = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    let rest_ok = chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
    if first_ok && rest_ok {
        Ok(())
    } else {
        Err("must start with a letter or underscore and hold only letters, digits, '.', '_' or '-'".into())
    }
}

pub fn validate_port(port: u16) -> Result<(), String> {
    if port == 0 {
        Err("must be between 1 and 65535".into())
    } else {
        Ok(())
    }
}
