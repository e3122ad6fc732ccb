//! Owns one polling task per registered target and keeps that set in step
//! with the registry.
//!
//! The supervisor is a single task consuming registry events in order. Each
//! target runs in its own task with its own stop signal, so a slow or hung
//! host never holds up another target's ticks.
//!
//! A removed target is signalled as soon as its event is dequeued; the wait
//! for its task and the slot retirement then run in a teardown task of their
//! own, so removing several targets at once stops all of them together.

use std::collections::HashMap;
use std::sync::Arc;

use futures_util::future::join_all;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::connection::ConnectionManager;
use crate::error::{RegistryError, SupervisorError};
use crate::poller::{spawn_poller, Poller};
use crate::registry::{RegistryEvent, RemoveAck, TargetRegistry};
use crate::store::{MetricsSnapshot, MetricsStore};
use crate::target::{MonitorSettings, TargetConfig};
use crate::transport::Transport;

struct Worker {
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

struct Supervisor {
    runtime: Handle,
    transport: Arc<dyn Transport>,
    registry: Arc<TargetRegistry>,
    store: Arc<MetricsStore>,
    settings: MonitorSettings,
    refresh: watch::Receiver<()>,
    workers: HashMap<String, Worker>,
    // removed targets still winding down
    teardowns: HashMap<String, JoinHandle<()>>,
}

impl Supervisor {
    async fn run(
        mut self,
        mut events: mpsc::UnboundedReceiver<RegistryEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!(targets = self.registry.len(), "supervisor started");
        loop {
            let event = tokio::select! {
                biased;
                _ = shutdown.wait_for(|stop| *stop) => break,
                event = events.recv() => event,
            };
            match event {
                Some(event) => self.handle(event).await,
                None => break,
            }
        }
        self.stop_all().await;
        info!("supervisor stopped");
    }

    async fn handle(&mut self, event: RegistryEvent) {
        match event {
            RegistryEvent::Added { target, ack } => {
                self.finish_teardown(&target.name).await;
                let result = self.start_worker(&target);
                if let Err(e) = &result {
                    error!(server = %target.name, error = %e, "could not start monitoring");
                    self.registry.rollback(&target);
                }
                if let Some(ack) = ack {
                    let _ = ack.send(result);
                }
            }
            RegistryEvent::Removed { name, ack } => self.stop_worker(name, ack),
        }
    }

    fn start_worker(&mut self, target: &Arc<TargetConfig>) -> Result<(), SupervisorError> {
        if self.workers.len() >= self.settings.max_targets {
            return Err(SupervisorError::Capacity {
                name: target.name.clone(),
                limit: self.settings.max_targets,
            });
        }
        if self.workers.contains_key(&target.name) {
            return Err(RegistryError::DuplicateTarget(target.name.clone()).into());
        }
        let manager = ConnectionManager::new(target.clone(), self.transport.clone());
        let writer = self.store.register(&target.name, manager.subscribe())?;
        let mut refresh = self.refresh.clone();
        refresh.borrow_and_update();
        let poller = Poller::new(
            manager,
            writer,
            self.settings.poll_interval,
            refresh,
        );
        let (stop, stop_rx) = watch::channel(false);
        let handle = spawn_poller(&self.runtime, poller, stop_rx);
        self.workers
            .insert(target.name.clone(), Worker { stop, handle });
        info!(server = %target.name, active = self.workers.len(), "monitoring started");
        Ok(())
    }

    /// Signal the target's task now, then in the background give it one poll
    /// interval to wind down before aborting it. The slot is retired (and
    /// `ack` answered) only once the task is gone.
    fn stop_worker(&mut self, name: String, ack: Option<RemoveAck>) {
        self.teardowns.retain(|_, handle| !handle.is_finished());
        let worker = self.workers.remove(&name);
        match &worker {
            Some(worker) => {
                let _ = worker.stop.send(true);
            }
            None => debug!(server = %name, "no task to stop"),
        }
        let store = self.store.clone();
        let grace = self.settings.poll_interval;
        let active = self.workers.len();
        let key = name.clone();
        let teardown = self.runtime.spawn(async move {
            if let Some(worker) = worker {
                join_worker(&name, worker, grace).await;
            }
            store.retire(&name);
            info!(server = %name, active, "monitoring stopped");
            if let Some(ack) = ack {
                let _ = ack.send(());
            }
        });
        self.teardowns.insert(key, teardown);
    }

    /// Wait for a pending teardown of `name`, so its old slot is gone before
    /// a new one is registered under the same name.
    async fn finish_teardown(&mut self, name: &str) {
        if let Some(handle) = self.teardowns.remove(name) {
            if let Err(e) = handle.await {
                error!(server = %name, error = %e, "teardown task failed");
            }
        }
    }

    async fn stop_all(&mut self) {
        let grace = self.settings.poll_interval;
        let workers: Vec<(String, Worker)> = self.workers.drain().collect();
        for (_, worker) in &workers {
            let _ = worker.stop.send(true);
        }
        let stopped = join_all(workers.into_iter().map(|(name, worker)| async move {
            join_worker(&name, worker, grace).await;
            name
        }))
        .await;
        for name in stopped {
            self.store.retire(&name);
        }
        join_all(self.teardowns.drain().map(|(_, handle)| handle)).await;
    }
}

async fn join_worker(name: &str, worker: Worker, grace: std::time::Duration) {
    let Worker { stop, mut handle } = worker;
    let _ = stop.send(true);
    if timeout(grace, &mut handle).await.is_err() {
        warn!(server = %name, ?grace, "task did not stop in time, aborting");
        handle.abort();
        let _ = handle.await;
    }
}

/// Front door to a running engine.
pub struct SupervisorHandle {
    registry: Arc<TargetRegistry>,
    store: Arc<MetricsStore>,
    settings: MonitorSettings,
    refresh: watch::Sender<()>,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SupervisorHandle {
    /// Start supervising `targets` on the current tokio runtime.
    pub fn start(
        settings: MonitorSettings,
        transport: Arc<dyn Transport>,
        targets: Vec<TargetConfig>,
    ) -> Result<Self, SupervisorError> {
        let runtime = Handle::try_current().map_err(|_| SupervisorError::NoRuntime)?;
        if let Some(extra) = targets.get(settings.max_targets) {
            return Err(SupervisorError::Capacity {
                name: extra.name.clone(),
                limit: settings.max_targets,
            });
        }

        let (registry, events) = TargetRegistry::new();
        for target in targets {
            registry.add(target)?;
        }
        let registry = Arc::new(registry);
        let store = Arc::new(MetricsStore::new(settings.history_capacity));
        let (refresh, refresh_rx) = watch::channel(());
        let (shutdown, shutdown_rx) = watch::channel(false);

        let supervisor = Supervisor {
            runtime: runtime.clone(),
            transport,
            registry: registry.clone(),
            store: store.clone(),
            settings: settings.clone(),
            refresh: refresh_rx,
            workers: HashMap::new(),
            teardowns: HashMap::new(),
        };
        let task = runtime.spawn(supervisor.run(events, shutdown_rx));

        Ok(Self {
            registry,
            store,
            settings,
            refresh,
            shutdown,
            task,
        })
    }

    pub fn settings(&self) -> &MonitorSettings {
        &self.settings
    }

    pub fn registry(&self) -> &Arc<TargetRegistry> {
        &self.registry
    }

    pub fn store(&self) -> &Arc<MetricsStore> {
        &self.store
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        self.store.snapshot()
    }

    pub fn list_targets(&self) -> Vec<Arc<TargetConfig>> {
        self.registry.list()
    }

    /// Register `config` and wait until its task is running.
    pub async fn add_target(&self, config: TargetConfig) -> Result<(), SupervisorError> {
        let ack = self.registry.add_with_ack(config)?;
        ack.await.map_err(|_| SupervisorError::Stopped)?
    }

    /// Unregister `name` and wait until its task has stopped. No sample for
    /// it is written after this returns.
    pub async fn remove_target(&self, name: &str) -> Result<(), SupervisorError> {
        let ack = self.registry.remove_with_ack(name)?;
        ack.await.map_err(|_| SupervisorError::Stopped)
    }

    /// Ask every target to poll now instead of waiting for its next tick.
    /// A target busy with a tick polls again as soon as that tick ends.
    pub fn refresh_now(&self) {
        self.refresh.send_replace(());
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Stop every target task and the supervisor itself.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            error!(error = %e, "supervisor task failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::Auth;
    use crate::transport::simulated::{SimulatedHost, SimulatedTransport};
    use crate::types::ConnectionState;
    use std::time::Duration;

    fn settings() -> MonitorSettings {
        MonitorSettings {
            retry_delay: Duration::from_secs(1),
            max_retries: 1,
            ..MonitorSettings::default()
        }
    }

    fn cfg(name: &str) -> TargetConfig {
        TargetConfig::new(name, name, "ops", Auth::Key { path: "/k".into() }, &settings())
    }

    #[test]
    fn start_without_runtime_fails() {
        let res = SupervisorHandle::start(settings(), Arc::new(SimulatedTransport::new()), vec![]);
        assert_eq!(res.err(), Some(SupervisorError::NoRuntime));
    }

    #[tokio::test(start_paused = true)]
    async fn initial_targets_are_polled() {
        let sup = SupervisorHandle::start(
            settings(),
            Arc::new(SimulatedTransport::new()),
            vec![cfg("a"), cfg("b")],
        )
        .unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;
        let snap = sup.snapshot();
        assert_eq!(snap.targets.len(), 2);
        for t in &snap.targets {
            assert_eq!(t.connection.state, ConnectionState::Connected);
            assert!(!t.history.is_empty());
        }
        sup.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn failed_add_is_rolled_back() {
        let s = MonitorSettings {
            max_targets: 1,
            ..settings()
        };
        let sup = SupervisorHandle::start(s, Arc::new(SimulatedTransport::new()), vec![cfg("a")])
            .unwrap();
        let err = sup.add_target(cfg("b")).await.unwrap_err();
        assert_eq!(
            err,
            SupervisorError::Capacity {
                name: "b".into(),
                limit: 1
            }
        );
        assert!(!sup.registry().contains("b"));
        assert!(!sup.store().contains("b"));
        sup.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn remove_retires_slot_and_unreachable_target_keeps_running() {
        let transport = SimulatedTransport::new().with_host(
            "down",
            SimulatedHost {
                unreachable: true,
                ..Default::default()
            },
        );
        let sup = SupervisorHandle::start(settings(), Arc::new(transport), vec![]).unwrap();
        sup.add_target(cfg("up")).await.unwrap();
        sup.add_target(cfg("down")).await.unwrap();
        tokio::time::sleep(Duration::from_secs(7)).await;

        let snap = sup.snapshot();
        assert_eq!(snap.get("down").unwrap().connection.state, ConnectionState::Failed);
        assert!(!snap.get("up").unwrap().history.is_empty());

        sup.remove_target("down").await.unwrap();
        assert!(!sup.store().contains("down"));
        assert_eq!(
            sup.remove_target("down").await,
            Err(SupervisorError::Registry(RegistryError::NotFound("down".into())))
        );
        sup.shutdown().await;
    }
}
