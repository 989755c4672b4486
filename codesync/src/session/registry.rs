//! Live-connection bookkeeping per session.
//!
//! A session's local tree is mirrored in when the first connection arrives
//! and nothing of the session is still waiting to be flushed. Later
//! connections reuse it. The tree is removed again once the last connection
//! is gone and every write-back has finished.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::OwnedMutexGuard;

/// State shared by every connection of one session.
#[derive(Debug, Default)]
pub struct SessionSlot {
    gate: Arc<tokio::sync::Mutex<()>>,
    live: AtomicUsize,
}

impl SessionSlot {
    /// Serializes mirroring and removal of the session's local tree.
    pub async fn lock(&self) -> OwnedMutexGuard<()> {
        Arc::clone(&self.gate).lock_owned().await
    }

    /// Connections currently attached.
    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    pub fn attach(&self) {
        self.live.fetch_add(1, Ordering::SeqCst);
    }

    /// Returns the number of connections left.
    pub fn detach(&self) -> usize {
        self.live.fetch_sub(1, Ordering::SeqCst).saturating_sub(1)
    }
}

/// Session slots keyed by session id.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    slots: Mutex<HashMap<String, Arc<SessionSlot>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Arc<SessionSlot>>> {
        self.slots
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    pub fn slot(&self, session_id: &str) -> Arc<SessionSlot> {
        Arc::clone(self.lock().entry(session_id.to_string()).or_default())
    }

    /// Forget a slot nobody attaches to or holds.
    pub fn prune(&self, session_id: &str) {
        let mut slots = self.lock();
        if slots
            .get(session_id)
            .is_some_and(|slot| slot.live() == 0 && Arc::strong_count(slot) == 1)
        {
            slots.remove(session_id);
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attach_detach_and_prune() {
        let registry = SessionRegistry::new();
        let slot = registry.slot("abc");
        slot.attach();
        slot.attach();
        assert!(Arc::ptr_eq(&slot, &registry.slot("abc")));
        assert_eq!(slot.detach(), 1);

        registry.prune("abc");
        assert_eq!(registry.len(), 1);

        assert_eq!(slot.detach(), 0);
        // Still held here.
        registry.prune("abc");
        assert_eq!(registry.len(), 1);

        drop(slot);
        registry.prune("abc");
        assert_eq!(registry.len(), 0);
    }

    #[tokio::test]
    async fn test_gate_is_exclusive() {
        let registry = SessionRegistry::new();
        let slot = registry.slot("abc");
        let guard = slot.lock().await;
        assert!(registry.slot("abc").gate.try_lock().is_err());
        drop(guard);
        assert!(registry.slot("abc").gate.try_lock().is_ok());
    }
}
