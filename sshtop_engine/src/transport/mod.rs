//! Remote execution capability consumed by the connection manager.
//!
//! The engine only needs "open a session to this target" and "run a command
//! in it and give me stdout"; everything protocol-specific lives behind these
//! traits so tests and demo mode can swap in a double.

pub mod simulated;

use async_trait::async_trait;

use crate::error::{ConnectionError, SessionError};
use crate::target::TargetConfig;

#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(&self, target: &TargetConfig) -> Result<Box<dyn Session>, ConnectionError>;
}

#[async_trait]
pub trait Session: Send {
    /// Run `command` and return its stdout.
    async fn run(&mut self, command: &str) -> Result<String, SessionError>;

    async fn close(&mut self) {}
}
