//! sshtop_engine: poll CPU and memory counters from remote hosts over a
//! command transport and keep a bounded, snapshot-able history per host.
//!
//! The pieces, bottom up:
//! - [`transport`]: connect to a host and run commands on it.
//! - [`connection`]: per-target session lifecycle with retries and cooldown.
//! - [`metrics`]: `/proc/stat` and `/proc/meminfo` parsing and usage deltas.
//! - [`poller`]: one task per target turning counters into samples.
//! - [`store`]: shared latest-sample and history state.
//! - [`registry`] / [`supervisor`]: the target set and its running tasks.

pub mod connection;
pub mod error;
pub mod history;
pub mod metrics;
pub mod poller;
pub mod registry;
pub mod store;
pub mod supervisor;
pub mod target;
pub mod transport;
pub mod types;

pub use error::{
    CommandError, ConnectionError, ParseError, RegistryError, RunError, SessionError,
    SupervisorError,
};
pub use registry::{RegistryEvent, TargetRegistry};
pub use store::{MetricsSnapshot, MetricsStore, TargetView};
pub use supervisor::SupervisorHandle;
pub use target::{Auth, MonitorSettings, RetryPolicy, Secret, SecretProvider, StaticSecret, TargetConfig};
pub use types::{
    ConnectionState, ConnectionStatus, CoreUsage, CpuUsage, MemoryUsage, MetricsSample,
    SampleStatus,
};
