//! The set of monitored targets.
//!
//! Mutations take one coarse lock and enqueue their event while still holding
//! it, so the supervisor sees every successful add/remove exactly once and in
//! the order they happened.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

use crate::error::{RegistryError, SupervisorError};
use crate::target::TargetConfig;

pub type AddAck = oneshot::Sender<Result<(), SupervisorError>>;
pub type RemoveAck = oneshot::Sender<()>;

#[derive(Debug)]
pub enum RegistryEvent {
    Added {
        target: Arc<TargetConfig>,
        /// Completed once the supervisor has (or has failed to) start the target.
        ack: Option<AddAck>,
    },
    Removed {
        name: String,
        /// Completed once the target's task has stopped and its slot is gone.
        ack: Option<RemoveAck>,
    },
}

pub struct TargetRegistry {
    targets: Mutex<BTreeMap<String, Arc<TargetConfig>>>,
    events: mpsc::UnboundedSender<RegistryEvent>,
}

impl TargetRegistry {
    /// The receiver is meant for the supervisor.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<RegistryEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        (
            Self {
                targets: Mutex::new(BTreeMap::new()),
                events,
            },
            rx,
        )
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, Arc<TargetConfig>>> {
        self.targets.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current targets, sorted by name.
    pub fn list(&self) -> Vec<Arc<TargetConfig>> {
        self.lock().values().cloned().collect()
    }

    pub fn get(&self, name: &str) -> Option<Arc<TargetConfig>> {
        self.lock().get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.lock().contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn add(&self, config: TargetConfig) -> Result<(), RegistryError> {
        self.insert(config, None)
    }

    pub(crate) fn add_with_ack(
        &self,
        config: TargetConfig,
    ) -> Result<oneshot::Receiver<Result<(), SupervisorError>>, RegistryError> {
        let (tx, rx) = oneshot::channel();
        self.insert(config, Some(tx))?;
        Ok(rx)
    }

    fn insert(&self, config: TargetConfig, ack: Option<AddAck>) -> Result<(), RegistryError> {
        let mut targets = self.lock();
        if targets.contains_key(&config.name) {
            return Err(RegistryError::DuplicateTarget(config.name));
        }
        let target = Arc::new(config);
        targets.insert(target.name.clone(), target.clone());
        info!(server = %target.name, address = %target.address(), auth = target.auth.kind(), "target added");
        if self.events.send(RegistryEvent::Added { target, ack }).is_err() {
            debug!("no supervisor listening for registry events");
        }
        Ok(())
    }

    pub fn remove(&self, name: &str) -> Result<Arc<TargetConfig>, RegistryError> {
        self.delete(name, None)
    }

    pub(crate) fn remove_with_ack(
        &self,
        name: &str,
    ) -> Result<oneshot::Receiver<()>, RegistryError> {
        let (tx, rx) = oneshot::channel();
        self.delete(name, Some(tx))?;
        Ok(rx)
    }

    fn delete(&self, name: &str, ack: Option<RemoveAck>) -> Result<Arc<TargetConfig>, RegistryError> {
        let mut targets = self.lock();
        let removed = targets
            .remove(name)
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))?;
        info!(server = %name, "target removed");
        let event = RegistryEvent::Removed {
            name: name.to_string(),
            ack,
        };
        if self.events.send(event).is_err() {
            debug!("no supervisor listening for registry events");
        }
        Ok(removed)
    }

    /// Undo an add the supervisor could not honour. Emits no event: the
    /// supervisor is the one rolling back.
    pub(crate) fn rollback(&self, target: &Arc<TargetConfig>) -> bool {
        let mut targets = self.lock();
        match targets.get(&target.name) {
            Some(current) if Arc::ptr_eq(current, target) => {
                targets.remove(&target.name);
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::{Auth, MonitorSettings};

    fn cfg(name: &str) -> TargetConfig {
        TargetConfig::new(
            name,
            "10.0.0.1",
            "ops",
            Auth::Key { path: "/k".into() },
            &MonitorSettings::default(),
        )
    }

    #[test]
    fn add_get_remove() {
        let (reg, mut rx) = TargetRegistry::new();
        reg.add(cfg("b")).unwrap();
        reg.add(cfg("a")).unwrap();
        assert_eq!(
            reg.add(cfg("a")),
            Err(RegistryError::DuplicateTarget("a".into()))
        );
        let names: Vec<String> = reg.list().iter().map(|t| t.name.clone()).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(reg.get("b").unwrap().host, "10.0.0.1");
        assert!(reg.get("c").is_none());

        reg.remove("b").unwrap();
        assert_eq!(reg.remove("b").err(), Some(RegistryError::NotFound("b".into())));
        assert_eq!(reg.len(), 1);

        let mut seen = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            seen.push(match ev {
                RegistryEvent::Added { target, .. } => format!("+{}", target.name),
                RegistryEvent::Removed { name, .. } => format!("-{name}"),
            });
        }
        assert_eq!(seen, vec!["+b", "+a", "-b"]);
    }

    #[test]
    fn rollback_only_removes_the_same_registration() {
        let (reg, mut rx) = TargetRegistry::new();
        reg.add(cfg("a")).unwrap();
        let first = match rx.try_recv().unwrap() {
            RegistryEvent::Added { target, .. } => target,
            other => panic!("unexpected {other:?}"),
        };
        reg.remove("a").unwrap();
        reg.add(cfg("a")).unwrap();
        assert!(!reg.rollback(&first));
        assert!(reg.contains("a"));
        let second = reg.get("a").unwrap();
        assert!(reg.rollback(&second));
        assert!(reg.is_empty());
    }
}
