//! Per-target polling loop: read counters on a fixed cadence, diff them
//! against the previous reading and publish samples to the store.

use std::time::Duration;

use chrono::Utc;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::connection::ConnectionManager;
use crate::error::RunError;
use crate::metrics::{CounterTracker, Observation, RawCounterSample};
use crate::store::SlotWriter;
use crate::types::{MetricsSample, SampleStatus};

pub const STAT_COMMAND: &str = "cat /proc/stat";
pub const MEMINFO_COMMAND: &str = "cat /proc/meminfo";

/// What a single tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Stored a new baseline (first reading, or after a counter reset).
    Baseline,
    /// Published a fresh sample with CPU usage.
    Published,
    /// Remote command or parse failure; nothing changed.
    Skipped,
    /// No session; the latest sample was marked stale.
    Disconnected,
}

pub struct Poller {
    manager: ConnectionManager,
    tracker: CounterTracker,
    writer: SlotWriter,
    interval: Duration,
    // a change requests an immediate tick; unseen changes survive a busy tick
    refresh: watch::Receiver<()>,
}

impl Poller {
    pub fn new(
        manager: ConnectionManager,
        writer: SlotWriter,
        interval: Duration,
        refresh: watch::Receiver<()>,
    ) -> Self {
        Self {
            manager,
            tracker: CounterTracker::new(),
            writer,
            interval,
            refresh,
        }
    }

    fn name(&self) -> &str {
        self.writer.name()
    }

    fn lose_baseline(&mut self) {
        self.tracker.reset();
        self.writer.mark_stale();
    }

    async fn read(&mut self, command: &str) -> Result<String, TickOutcome> {
        match self.manager.run_command(command).await {
            Ok(out) => Ok(out),
            Err(RunError::Command(_)) => Err(TickOutcome::Skipped),
            Err(RunError::ConnectionLost(_)) | Err(RunError::NotConnected) => {
                self.lose_baseline();
                Err(TickOutcome::Disconnected)
            }
        }
    }

    pub async fn tick(&mut self) -> TickOutcome {
        if self.manager.ensure_connected().await.is_err() {
            self.lose_baseline();
            return TickOutcome::Disconnected;
        }
        let stat = match self.read(STAT_COMMAND).await {
            Ok(s) => s,
            Err(outcome) => return outcome,
        };
        let meminfo = match self.read(MEMINFO_COMMAND).await {
            Ok(s) => s,
            Err(outcome) => return outcome,
        };
        let raw = match RawCounterSample::parse(&stat, &meminfo, Utc::now()) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(server = %self.name(), error = %e, "unparseable counters, skipping tick");
                return TickOutcome::Skipped;
            }
        };

        let captured_at = raw.captured_at;
        let memory = raw.memory;
        let (cpu, outcome) = match self.tracker.observe(raw) {
            Observation::Usage(cpu) => (Some(cpu), TickOutcome::Published),
            Observation::Baseline => {
                debug!(server = %self.name(), "baseline stored");
                (None, TickOutcome::Baseline)
            }
            Observation::Reset(reason) => {
                info!(server = %self.name(), ?reason, "counters went backwards or cores changed, new baseline");
                (None, TickOutcome::Baseline)
            }
        };
        self.writer.publish(MetricsSample {
            captured_at,
            status: SampleStatus::Fresh,
            cpu,
            memory,
        });
        outcome
    }

    /// Tick until `shutdown` turns true (or its sender goes away). An
    /// in-flight tick is abandoned as soon as shutdown is signalled.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(server = %self.name(), interval = ?self.interval, "polling started");
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut refresh = self.refresh.clone();
        let mut refresh_open = true;
        let mut ticks: u64 = 0;

        loop {
            tokio::select! {
                biased;
                _ = shutdown.wait_for(|stop| *stop) => break,
                _ = ticker.tick() => {
                    // this tick serves any refresh requested so far
                    refresh.borrow_and_update();
                }
                changed = refresh.changed(), if refresh_open => {
                    if changed.is_err() {
                        refresh_open = false;
                        continue;
                    }
                    debug!(server = %self.name(), "refresh requested");
                    ticker.reset();
                }
            }
            tokio::select! {
                biased;
                _ = shutdown.wait_for(|stop| *stop) => break,
                outcome = self.tick() => {
                    ticks += 1;
                    debug!(server = %self.name(), tick = ticks, ?outcome, "tick done");
                }
            }
        }

        self.manager.disconnect().await;
        info!(server = %self.name(), ticks, "polling stopped");
    }
}

/// Start `poller` on `runtime`.
pub fn spawn_poller(
    runtime: &Handle,
    poller: Poller,
    shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    runtime.spawn(poller.run(shutdown))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{CommandError, ConnectionError, SessionError};
    use crate::store::MetricsStore;
    use crate::target::{Auth, MonitorSettings, TargetConfig};
    use crate::transport::simulated::{SimulatedHost, SimulatedTransport};
    use crate::transport::{Session, Transport};
    use crate::types::ConnectionState;
    use async_trait::async_trait;
    use std::sync::Arc;

    fn target(host: &str) -> Arc<TargetConfig> {
        let settings = MonitorSettings {
            retry_delay: Duration::from_secs(1),
            ..MonitorSettings::default()
        };
        Arc::new(TargetConfig::new(
            host,
            host,
            "ops",
            Auth::Key { path: "/k".into() },
            &settings,
        ))
    }

    fn poller(store: &MetricsStore, transport: Arc<dyn Transport>, host: &str) -> Poller {
        let manager = ConnectionManager::new(target(host), transport);
        let writer = store.register(host, manager.subscribe()).unwrap();
        let (_refresh, refresh_rx) = watch::channel(());
        Poller::new(manager, writer, Duration::from_secs(2), refresh_rx)
    }

    #[tokio::test(start_paused = true)]
    async fn first_tick_is_baseline_then_samples_flow() {
        let store = MetricsStore::new(8);
        let transport = Arc::new(SimulatedTransport::new());
        let mut p = poller(&store, transport, "box");

        assert_eq!(p.tick().await, TickOutcome::Baseline);
        let view = store.target("box").unwrap();
        assert!(view.latest.as_ref().unwrap().cpu.is_none());
        assert!(view.history.is_empty());

        assert_eq!(p.tick().await, TickOutcome::Published);
        assert_eq!(p.tick().await, TickOutcome::Published);
        let view = store.target("box").unwrap();
        assert_eq!(view.history.len(), 2);
        let cpu = view.latest.unwrap().cpu.unwrap();
        assert_eq!(cpu.per_core.len(), 4);
        assert!(cpu.per_core.iter().all(|c| (0.0..=100.0).contains(&c.percent)));
        assert!(view.history[0].captured_at <= view.history[1].captured_at);
    }

    #[tokio::test(start_paused = true)]
    async fn lost_connection_marks_stale_and_rebaselines() {
        let store = MetricsStore::new(8);
        // every 3rd command drops the link
        let transport = Arc::new(SimulatedTransport::new().with_host(
            "flaky",
            SimulatedHost {
                drop_every: 3,
                ..Default::default()
            },
        ));
        let mut p = poller(&store, transport, "flaky");

        assert_eq!(p.tick().await, TickOutcome::Baseline); // commands 1,2
        assert_eq!(p.tick().await, TickOutcome::Disconnected); // command 3 drops
        let view = store.target("flaky").unwrap();
        assert_eq!(view.latest.unwrap().status, SampleStatus::Stale);
        assert_eq!(view.connection.state, crate::types::ConnectionState::Reconnecting);

        // reconnect after retry_delay; no predecessor, so baseline again
        assert_eq!(p.tick().await, TickOutcome::Baseline); // commands 4,5
        assert_eq!(store.target("flaky").unwrap().latest.unwrap().status, SampleStatus::Fresh);
    }

    struct Garbage;
    struct GarbageSession(u32);

    #[async_trait]
    impl Transport for Garbage {
        async fn connect(&self, _t: &TargetConfig) -> Result<Box<dyn Session>, ConnectionError> {
            Ok(Box::new(GarbageSession(0)))
        }
    }

    #[async_trait]
    impl Session for GarbageSession {
        async fn run(&mut self, command: &str) -> Result<String, SessionError> {
            self.0 += 1;
            match (command, self.0) {
                // second stat read is corrupt
                (STAT_COMMAND, 3) => Ok("cpu0 what is this".into()),
                (STAT_COMMAND, n) => Ok(format!("cpu0 {n}00 0 0 {n}00\n")),
                _ => Ok("MemTotal: 100 kB\nMemAvailable: 50 kB\n".into()),
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_output_skips_without_touching_baseline() {
        let store = MetricsStore::new(8);
        let mut p = poller(&store, Arc::new(Garbage), "odd");
        assert_eq!(p.tick().await, TickOutcome::Baseline); // stat 100/100
        assert_eq!(p.tick().await, TickOutcome::Skipped); // corrupt
        assert!(p.tracker.has_baseline());
        // stat read #5: 500 busy / 500 idle vs baseline 100/100
        assert_eq!(p.tick().await, TickOutcome::Published);
        let cpu = store.target("odd").unwrap().latest.unwrap().cpu.unwrap();
        assert_eq!(cpu.aggregate, 50.0);
    }

    /// Stat reads count up; the second meminfo read fails as a command.
    struct FailingMeminfo;
    struct FailingMeminfoSession {
        stat_reads: u32,
        meminfo_reads: u32,
    }

    #[async_trait]
    impl Transport for FailingMeminfo {
        async fn connect(&self, _t: &TargetConfig) -> Result<Box<dyn Session>, ConnectionError> {
            Ok(Box::new(FailingMeminfoSession {
                stat_reads: 0,
                meminfo_reads: 0,
            }))
        }
    }

    #[async_trait]
    impl Session for FailingMeminfoSession {
        async fn run(&mut self, command: &str) -> Result<String, SessionError> {
            if command == STAT_COMMAND {
                self.stat_reads += 1;
                let n = self.stat_reads;
                return Ok(format!("cpu0 {n}00 0 0 {n}00\n"));
            }
            self.meminfo_reads += 1;
            if self.meminfo_reads == 2 {
                return Err(CommandError {
                    command: command.to_string(),
                    status: Some(1),
                    stderr: "cat: /proc/meminfo: Permission denied".into(),
                }
                .into());
            }
            Ok("MemTotal: 100 kB\nMemAvailable: 50 kB\n".into())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn command_error_skips_tick_and_keeps_connection_and_baseline() {
        let store = MetricsStore::new(8);
        let mut p = poller(&store, Arc::new(FailingMeminfo), "perm");
        assert_eq!(p.tick().await, TickOutcome::Baseline); // stat 100/100

        assert_eq!(p.tick().await, TickOutcome::Skipped); // meminfo refused
        assert_eq!(p.manager.state(), ConnectionState::Connected);
        assert!(p.tracker.has_baseline());
        let view = store.target("perm").unwrap();
        assert_eq!(view.connection.state, ConnectionState::Connected);
        assert_eq!(view.latest.as_ref().unwrap().status, SampleStatus::Fresh);
        assert!(view.history.is_empty());

        // stat read #3 diffs against the untouched baseline: 200 busy, 200 idle
        assert_eq!(p.tick().await, TickOutcome::Published);
        let cpu = store.target("perm").unwrap().latest.unwrap().cpu.unwrap();
        assert_eq!(cpu.aggregate, 50.0);
    }

    #[tokio::test(start_paused = true)]
    async fn run_stops_on_shutdown_and_disconnects() {
        let store = MetricsStore::new(8);
        let p = poller(&store, Arc::new(SimulatedTransport::new()), "box");
        let status = p.manager.subscribe();
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(p.run(rx));
        tokio::time::sleep(Duration::from_secs(5)).await;
        tx.send(true).unwrap();
        handle.await.unwrap();
        assert_eq!(status.borrow().state, crate::types::ConnectionState::Disconnected);
        assert_eq!(store.target("box").unwrap().history.len(), 2);
    }
}
