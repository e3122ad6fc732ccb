//! Per-target session lifecycle.
//!
//! ```text
//! Disconnected --connect--> Connecting
//! Connecting   --ok-------> Connected
//! Connecting   --err, attempts < max--> Reconnecting --retry_delay--> Connecting
//! Connecting   --err, attempts = max--> Failed       --cooldown-----> Connecting (attempts reset)
//! Connected    --connection lost------> Reconnecting
//! ```
//!
//! Only the owning polling loop drives the manager. Every transition is
//! published on a watch channel so the store can show the state without
//! touching the manager.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::watch;
use tokio::time::{sleep_until, timeout, Instant};
use tracing::{debug, info, warn};

use crate::error::{ConnectionError, RunError, SessionError};
use crate::target::TargetConfig;
use crate::transport::{Session, Transport};
use crate::types::{ConnectionState, ConnectionStatus};

pub struct ConnectionManager {
    target: Arc<TargetConfig>,
    transport: Arc<dyn Transport>,
    session: Option<Box<dyn Session>>,
    status: ConnectionStatus,
    // monotonic time of the last transition; drives backoff and cooldown
    since: Instant,
    publisher: watch::Sender<ConnectionStatus>,
}

impl ConnectionManager {
    pub fn new(target: Arc<TargetConfig>, transport: Arc<dyn Transport>) -> Self {
        let status = ConnectionStatus::new(target.retry.attempts_per_cycle());
        let (publisher, _) = watch::channel(status.clone());
        Self {
            target,
            transport,
            session: None,
            status,
            since: Instant::now(),
            publisher,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionStatus> {
        self.publisher.subscribe()
    }

    pub fn state(&self) -> ConnectionState {
        self.status.state
    }

    pub fn status(&self) -> &ConnectionStatus {
        &self.status
    }

    pub fn target(&self) -> &TargetConfig {
        &self.target
    }

    fn transition(&mut self, state: ConnectionState, error: Option<String>) {
        debug!(server = %self.target.name, from = self.status.state.label(), to = state.label(), "connection transition");
        self.status.state = state;
        self.status.changed_at = Utc::now();
        match (state, error) {
            (ConnectionState::Connected, _) => self.status.last_error = None,
            (_, Some(e)) => self.status.last_error = Some(e),
            _ => {}
        }
        self.since = Instant::now();
        self.publisher.send_replace(self.status.clone());
    }

    /// Drive the state machine until a session is up or the retry cycle is
    /// exhausted. Waits for backoff or cooldown first when one is pending.
    pub async fn ensure_connected(&mut self) -> Result<(), ConnectionError> {
        loop {
            match self.status.state {
                ConnectionState::Connected => return Ok(()),
                ConnectionState::Disconnected => self.transition(ConnectionState::Connecting, None),
                ConnectionState::Reconnecting => {
                    sleep_until(self.since + self.target.retry.retry_delay).await;
                    self.transition(ConnectionState::Connecting, None);
                }
                ConnectionState::Failed => {
                    sleep_until(self.since + self.target.retry.cooldown()).await;
                    info!(server = %self.target.name, "cooldown elapsed, starting a new retry cycle");
                    self.status.attempts = 0;
                    self.transition(ConnectionState::Connecting, None);
                }
                ConnectionState::Connecting => {
                    self.status.attempts += 1;
                    match self.attempt().await {
                        Ok(session) => {
                            info!(server = %self.target.name, address = %self.target.address(), "connected");
                            self.session = Some(session);
                            self.status.attempts = 0;
                            self.transition(ConnectionState::Connected, None);
                        }
                        Err(e) => {
                            let max = self.target.retry.attempts_per_cycle();
                            warn!(server = %self.target.name, attempt = self.status.attempts, max, error = %e, "connection attempt failed");
                            if self.status.attempts >= max {
                                warn!(
                                    server = %self.target.name,
                                    cooldown = ?self.target.retry.cooldown(),
                                    "retry cycle exhausted"
                                );
                                self.transition(ConnectionState::Failed, Some(e.to_string()));
                                return Err(e);
                            }
                            self.transition(ConnectionState::Reconnecting, Some(e.to_string()));
                        }
                    }
                }
            }
        }
    }

    async fn attempt(&mut self) -> Result<Box<dyn Session>, ConnectionError> {
        let limit = self.target.connection_timeout;
        info!(
            server = %self.target.name,
            attempt = self.status.attempts,
            max = self.target.retry.attempts_per_cycle(),
            "connecting to {}",
            self.target.address()
        );
        match timeout(limit, self.transport.connect(&self.target)).await {
            Ok(res) => res,
            Err(_) => Err(ConnectionError::Timeout(limit)),
        }
    }

    /// Run a command on the current session.
    ///
    /// `ConnectionLost` drops the session and moves to `Reconnecting`;
    /// a `Command` error leaves the state untouched.
    pub async fn run_command(&mut self, command: &str) -> Result<String, RunError> {
        if self.status.state != ConnectionState::Connected {
            return Err(RunError::NotConnected);
        }
        let Some(session) = self.session.as_mut() else {
            return Err(RunError::NotConnected);
        };
        let limit = self.target.command_timeout;
        let result = match timeout(limit, session.run(command)).await {
            Ok(r) => r,
            Err(_) => Err(SessionError::ConnectionLost(format!(
                "`{command}` timed out after {limit:?}"
            ))),
        };
        match result {
            Ok(out) => Ok(out),
            Err(SessionError::Command(e)) => {
                warn!(server = %self.target.name, error = %e, "remote command failed");
                Err(RunError::Command(e))
            }
            Err(SessionError::ConnectionLost(reason)) => {
                warn!(server = %self.target.name, %reason, "connection lost");
                // dead sessions are dropped, not closed: closing could block on the same broken link
                self.session = None;
                self.transition(ConnectionState::Reconnecting, Some(reason.clone()));
                Err(RunError::ConnectionLost(reason))
            }
        }
    }

    /// Close the session (bounded by the connection timeout) and go idle.
    pub async fn disconnect(&mut self) {
        if let Some(mut session) = self.session.take() {
            if timeout(self.target.connection_timeout, session.close()).await.is_err() {
                warn!(server = %self.target.name, "session close timed out");
            }
        }
        if self.status.state != ConnectionState::Disconnected {
            self.status.attempts = 0;
            self.transition(ConnectionState::Disconnected, None);
            info!(server = %self.target.name, "disconnected");
        }
    }
}
