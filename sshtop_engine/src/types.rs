//! Data types handed to the presentation layer.
//! Keep this module minimal and stable: it defines the snapshot format.

use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SampleStatus {
    Fresh,
    Stale,
}

#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct CoreUsage {
    pub core: u32,
    // 0..=100
    pub percent: f32,
}

#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct CpuUsage {
    pub aggregate: f32,
    pub per_core: Vec<CoreUsage>,
}

/// Memory in bytes.
#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq, Default)]
pub struct MemoryUsage {
    pub used: u64,
    pub total: u64,
}

impl MemoryUsage {
    pub fn percent(&self) -> f32 {
        if self.total == 0 {
            return 0.0;
        }
        (self.used as f64 / self.total as f64 * 100.0) as f32
    }
}

#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct MetricsSample {
    pub captured_at: DateTime<Utc>,
    pub status: SampleStatus,
    /// `None` for a baseline reading: no predecessor to diff against yet.
    pub cpu: Option<CpuUsage>,
    pub memory: MemoryUsage,
}

impl MetricsSample {
    pub fn is_fresh(&self) -> bool {
        self.status == SampleStatus::Fresh
    }
}

#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Failed,
}

impl ConnectionState {
    pub fn label(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Failed => "failed",
        }
    }
}

/// Published by a target's connection manager on every transition.
#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct ConnectionStatus {
    pub state: ConnectionState,
    /// Attempts made in the current retry cycle.
    pub attempts: u32,
    pub max_attempts: u32,
    pub changed_at: DateTime<Utc>,
    pub last_error: Option<String>,
}

impl ConnectionStatus {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            attempts: 0,
            max_attempts,
            changed_at: Utc::now(),
            last_error: None,
        }
    }
}
