//! Error types raised by the engine.
//!
//! Connection and command failures never leave a target's own task; only
//! registry and supervisor errors reach the presentation layer.

use std::time::Duration;
use thiserror::Error;

/// A failed attempt to establish a session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectionError {
    #[error("connection timed out after {0:?}")]
    Timeout(Duration),
    #[error("authentication failed: {0}")]
    AuthFailure(String),
    #[error("host unreachable: {0}")]
    Unreachable(String),
}

/// A remote command that ran but did not succeed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("`{command}` exited with status {status:?}: {stderr}")]
pub struct CommandError {
    pub command: String,
    pub status: Option<i32>,
    pub stderr: String,
}

/// Failure reported by a transport session for a single command.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("connection lost: {0}")]
    ConnectionLost(String),
    #[error(transparent)]
    Command(#[from] CommandError),
}

/// Failure of [`ConnectionManager::run_command`](crate::connection::ConnectionManager::run_command).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RunError {
    #[error("not connected")]
    NotConnected,
    #[error("connection lost: {0}")]
    ConnectionLost(String),
    #[error(transparent)]
    Command(#[from] CommandError),
}

/// Remote output that does not look like the expected procfs file.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("no per-core cpu lines in /proc/stat output")]
    NoCores,
    #[error("malformed /proc/stat line {line:?}: {reason}")]
    StatLine { line: String, reason: &'static str },
    #[error("duplicate core id {0} in /proc/stat output")]
    DuplicateCore(u32),
    #[error("/proc/meminfo is missing {0}")]
    MissingMemField(&'static str),
    #[error("malformed /proc/meminfo value for {key}: {value:?}")]
    MemValue { key: String, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("target '{0}' already exists")]
    DuplicateTarget(String),
    #[error("target '{0}' not found")]
    NotFound(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SupervisorError {
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error("cannot supervise '{name}': limit of {limit} targets reached")]
    Capacity { name: String, limit: usize },
    #[error("no tokio runtime available to spawn target tasks")]
    NoRuntime,
    #[error("supervisor has stopped")]
    Stopped,
}
