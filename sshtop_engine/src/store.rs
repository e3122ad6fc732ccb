//! Shared metrics state: per-target latest sample, bounded history and a
//! live view of the connection state.
//!
//! The outer map is only write-locked when a target is added or retired.
//! Each slot has its own lock and a single writer (its polling loop), so
//! writers never contend with each other and a snapshot only briefly holds
//! each slot.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;

use crate::error::RegistryError;
use crate::history::History;
use crate::types::{ConnectionStatus, MetricsSample, SampleStatus};

struct SlotData {
    latest: Option<MetricsSample>,
    history: History<MetricsSample>,
    retired: bool,
}

struct Slot {
    name: String,
    data: Mutex<SlotData>,
    status: watch::Receiver<ConnectionStatus>,
}

impl Slot {
    fn data(&self) -> MutexGuard<'_, SlotData> {
        self.data.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn view(&self) -> TargetView {
        let data = self.data();
        TargetView {
            name: self.name.clone(),
            connection: self.status.borrow().clone(),
            latest: data.latest.clone(),
            history: data.history.to_vec(),
        }
    }
}

/// Write handle for one target's slot, owned by its polling loop.
pub struct SlotWriter {
    slot: Arc<Slot>,
}

impl SlotWriter {
    pub fn name(&self) -> &str {
        &self.slot.name
    }

    /// Store `sample` as the latest value. Samples carrying CPU usage are
    /// also appended to the history. Returns `false` if the slot is retired.
    pub fn publish(&self, sample: MetricsSample) -> bool {
        let mut data = self.slot.data();
        if data.retired {
            return false;
        }
        if sample.cpu.is_some() && sample.is_fresh() {
            data.history.push(sample.clone());
        }
        data.latest = Some(sample);
        true
    }

    /// Flag the latest sample as stale; history is left untouched.
    pub fn mark_stale(&self) -> bool {
        let mut data = self.slot.data();
        if data.retired {
            return false;
        }
        if let Some(latest) = data.latest.as_mut() {
            latest.status = SampleStatus::Stale;
        }
        true
    }

    pub fn is_retired(&self) -> bool {
        self.slot.data().retired
    }
}

/// Immutable copy of one target's state.
#[derive(Debug, Clone, Serialize)]
pub struct TargetView {
    pub name: String,
    pub connection: ConnectionStatus,
    pub latest: Option<MetricsSample>,
    /// Oldest first.
    pub history: Vec<MetricsSample>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub taken_at: DateTime<Utc>,
    /// Sorted by target name.
    pub targets: Vec<TargetView>,
}

impl MetricsSnapshot {
    pub fn get(&self, name: &str) -> Option<&TargetView> {
        self.targets.iter().find(|t| t.name == name)
    }
}

pub struct MetricsStore {
    slots: RwLock<HashMap<String, Arc<Slot>>>,
    history_capacity: usize,
}

impl MetricsStore {
    pub fn new(history_capacity: usize) -> Self {
        Self {
            slots: RwLock::new(HashMap::new()),
            history_capacity,
        }
    }

    pub fn history_capacity(&self) -> usize {
        self.history_capacity
    }

    /// Create the slot for `name`, returning its only writer.
    pub fn register(
        &self,
        name: &str,
        status: watch::Receiver<ConnectionStatus>,
    ) -> Result<SlotWriter, RegistryError> {
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        if slots.contains_key(name) {
            return Err(RegistryError::DuplicateTarget(name.to_string()));
        }
        let slot = Arc::new(Slot {
            name: name.to_string(),
            data: Mutex::new(SlotData {
                latest: None,
                history: History::new(self.history_capacity),
                retired: false,
            }),
            status,
        });
        slots.insert(name.to_string(), slot.clone());
        Ok(SlotWriter { slot })
    }

    /// Remove the slot; any writer still holding it is rejected from now on.
    pub fn retire(&self, name: &str) -> bool {
        let removed = self
            .slots
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name);
        match removed {
            Some(slot) => {
                slot.data().retired = true;
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.slots.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn target(&self, name: &str) -> Option<TargetView> {
        let slot = self
            .slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned();
        slot.map(|s| s.view())
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let slots: Vec<Arc<Slot>> = self
            .slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        let mut targets: Vec<TargetView> = slots.iter().map(|s| s.view()).collect();
        targets.sort_by(|a, b| a.name.cmp(&b.name));
        MetricsSnapshot {
            taken_at: Utc::now(),
            targets,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ConnectionState, CoreUsage, CpuUsage, MemoryUsage};

    fn status_rx() -> (watch::Sender<ConnectionStatus>, watch::Receiver<ConnectionStatus>) {
        watch::channel(ConnectionStatus::new(3))
    }

    fn fresh(pct: f32) -> MetricsSample {
        MetricsSample {
            captured_at: Utc::now(),
            status: SampleStatus::Fresh,
            cpu: Some(CpuUsage {
                aggregate: pct,
                per_core: vec![CoreUsage { core: 0, percent: pct }],
            }),
            memory: MemoryUsage { used: 1, total: 2 },
        }
    }

    #[test]
    fn history_is_bounded_and_baselines_skip_it() {
        let store = MetricsStore::new(2);
        let (_tx, rx) = status_rx();
        let w = store.register("a", rx).unwrap();
        let baseline = MetricsSample { cpu: None, ..fresh(0.0) };
        assert!(w.publish(baseline));
        for p in [10.0, 20.0, 30.0] {
            assert!(w.publish(fresh(p)));
        }
        let view = store.target("a").unwrap();
        let hist: Vec<f32> = view.history.iter().map(|s| s.cpu.as_ref().unwrap().aggregate).collect();
        assert_eq!(hist, vec![20.0, 30.0]);
        assert_eq!(view.latest.unwrap().cpu.unwrap().aggregate, 30.0);
    }

    #[test]
    fn stale_marks_latest_only() {
        let store = MetricsStore::new(4);
        let (_tx, rx) = status_rx();
        let w = store.register("a", rx).unwrap();
        assert!(w.mark_stale());
        assert!(store.target("a").unwrap().latest.is_none());
        w.publish(fresh(50.0));
        w.mark_stale();
        let view = store.target("a").unwrap();
        assert_eq!(view.latest.unwrap().status, SampleStatus::Stale);
        assert_eq!(view.history.len(), 1);
        assert!(view.history[0].is_fresh());
    }

    #[test]
    fn retired_slot_rejects_writes() {
        let store = MetricsStore::new(4);
        let (_tx, rx) = status_rx();
        let w = store.register("a", rx).unwrap();
        assert!(store.retire("a"));
        assert!(!store.retire("a"));
        assert!(w.is_retired());
        assert!(!w.publish(fresh(1.0)));
        assert!(!w.mark_stale());
        assert!(store.target("a").is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn duplicate_slot_is_refused() {
        let store = MetricsStore::new(4);
        let (_tx, rx) = status_rx();
        let _w = store.register("a", rx.clone()).unwrap();
        assert_eq!(
            store.register("a", rx).err(),
            Some(RegistryError::DuplicateTarget("a".into()))
        );
    }

    #[test]
    fn snapshot_is_sorted_and_reflects_connection_state() {
        let store = MetricsStore::new(4);
        let (tx_b, rx_b) = status_rx();
        let (_tx_a, rx_a) = status_rx();
        let _wb = store.register("b", rx_b).unwrap();
        let _wa = store.register("a", rx_a).unwrap();
        tx_b.send_modify(|s| s.state = ConnectionState::Failed);
        let snap = store.snapshot();
        let names: Vec<&str> = snap.targets.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(snap.get("b").unwrap().connection.state, ConnectionState::Failed);
        assert_eq!(snap.get("a").unwrap().connection.state, ConnectionState::Disconnected);
    }
}
