//! Per-file debounced flush scheduler.
//!
//! Every (session, file) key has at most one live timer. Scheduling a key
//! that already has one cancels it and starts a new timer carrying the newer
//! text, so a burst of edits costs one durable write once the burst settles.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::models::object_key_for;
use crate::store::RemoteStore;

/// Default quiet period after the last edit before a file is flushed.
pub const DEFAULT_QUIESCENCE_WINDOW: Duration = Duration::from_millis(5000);

/// Debounce key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FlushKey {
    pub session_id: String,
    pub file_path: String,
}

impl FlushKey {
    pub fn new(session_id: &str, file_path: &str) -> Self {
        Self {
            session_id: session_id.to_string(),
            file_path: file_path.trim_start_matches('/').to_string(),
        }
    }

    fn object_key(&self) -> String {
        object_key_for(&self.session_id, &self.file_path)
    }
}

/// A scheduled, not yet fired write.
struct PendingWrite {
    generation: u64,
    text: String,
    timer: JoinHandle<()>,
}

struct Inner {
    store: Arc<dyn RemoteStore>,
    window: Duration,
    pending: Mutex<HashMap<FlushKey, PendingWrite>>,
    /// Running flushes per session. Only changed while `pending` is held.
    flushing: Mutex<HashMap<String, usize>>,
    /// Serializes puts of one key so a slow put is never overtaken.
    lanes: Mutex<HashMap<FlushKey, Arc<tokio::sync::Mutex<()>>>>,
    next_generation: AtomicU64,
    in_flight: AtomicUsize,
    idle: Notify,
}

/// Debounced write-back to the object store. Cheap to clone.
#[derive(Clone)]
pub struct WriteBackScheduler {
    inner: Arc<Inner>,
}

impl WriteBackScheduler {
    pub fn new(store: Arc<dyn RemoteStore>, window: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                window,
                pending: Mutex::new(HashMap::new()),
                flushing: Mutex::new(HashMap::new()),
                lanes: Mutex::new(HashMap::new()),
                next_generation: AtomicU64::new(0),
                in_flight: AtomicUsize::new(0),
                idle: Notify::new(),
            }),
        }
    }

    /// Schedule `text` to be flushed for (`session_id`, `file_path`) once the
    /// quiescence window passes without another call for the same key.
    pub fn schedule(&self, session_id: &str, file_path: &str, text: String) {
        let key = FlushKey::new(session_id, file_path);

        let mut pending = self.inner.lock_pending();
        let generation = self.inner.next_generation.fetch_add(1, Ordering::SeqCst);
        let timer = tokio::spawn(Inner::run_timer(
            Arc::clone(&self.inner),
            key.clone(),
            generation,
        ));
        let replaced = pending.insert(
            key.clone(),
            PendingWrite {
                generation,
                text,
                timer,
            },
        );
        drop(pending);

        if let Some(old) = replaced {
            old.timer.abort();
            debug!(session = %key.session_id, file = %key.file_path, "flush rescheduled");
        } else {
            debug!(session = %key.session_id, file = %key.file_path, "flush scheduled");
        }
    }

    /// Whether `session_id` has a write waiting for its window or running.
    pub fn has_session_work(&self, session_id: &str) -> bool {
        let pending = self.inner.lock_pending();
        pending.keys().any(|key| key.session_id == session_id)
            || self.inner.lock_flushing().contains_key(session_id)
    }

    /// Wait until `session_id` has no pending or running write.
    pub async fn settle_session(&self, session_id: &str) {
        loop {
            let settled = self.inner.idle.notified();
            if !self.has_session_work(session_id) {
                return;
            }
            settled.await;
        }
    }

    /// Number of keys with a live timer.
    #[cfg(test)]
    pub fn pending_count(&self) -> usize {
        self.inner.lock_pending().len()
    }

    #[cfg(test)]
    pub fn is_pending(&self, session_id: &str, file_path: &str) -> bool {
        self.inner
            .lock_pending()
            .contains_key(&FlushKey::new(session_id, file_path))
    }

    /// Fire every pending write now and wait until no flush is running.
    pub async fn drain(&self) {
        let drained: Vec<(FlushKey, PendingWrite)> = {
            let mut pending = self.inner.lock_pending();
            let drained: Vec<_> = pending.drain().collect();
            for (key, _) in &drained {
                self.inner.begin_flush(key);
            }
            drained
        };

        if !drained.is_empty() {
            info!(count = drained.len(), "draining pending flushes");
        }

        let mut flushes = Vec::with_capacity(drained.len());
        for (key, write) in drained {
            write.timer.abort();
            let inner = Arc::clone(&self.inner);
            flushes.push(tokio::spawn(async move {
                let _guard = InFlight::new(&inner, &key);
                inner.flush(&key, write.text).await;
            }));
        }
        for flush in flushes {
            let _ = flush.await;
        }

        loop {
            let idle = self.inner.idle.notified();
            if self.inner.in_flight.load(Ordering::SeqCst) == 0 {
                break;
            }
            idle.await;
        }
    }
}

impl Inner {
    fn lock_pending(&self) -> MutexGuard<'_, HashMap<FlushKey, PendingWrite>> {
        self.pending.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn lock_flushing(&self) -> MutexGuard<'_, HashMap<String, usize>> {
        self.flushing
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Count a flush as running. Called with `pending` held.
    fn begin_flush(&self, key: &FlushKey) {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        *self.lock_flushing().entry(key.session_id.clone()).or_default() += 1;
    }

    async fn run_timer(self: Arc<Self>, key: FlushKey, generation: u64) {
        tokio::time::sleep(self.window).await;

        let text = {
            let mut pending = self.lock_pending();
            match pending.get(&key) {
                Some(write) if write.generation == generation => {}
                _ => return,
            }
            let Some(write) = pending.remove(&key) else {
                return;
            };
            self.begin_flush(&key);
            write.text
        };

        let _guard = InFlight::new(&self, &key);
        self.flush(&key, text).await;
    }

    async fn flush(&self, key: &FlushKey, text: String) {
        let lane = {
            let mut lanes = self
                .lanes
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            Arc::clone(lanes.entry(key.clone()).or_default())
        };

        {
            let _turn = lane.lock().await;
            let object_key = key.object_key();
            match self.store.put_object(&object_key, text.as_bytes()).await {
                Ok(()) => info!(key = %object_key, bytes = text.len(), "flushed file"),
                Err(e) => error!(key = %object_key, error = %e, "write-back failed"),
            }
        }

        let mut lanes = self
            .lanes
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if lanes.get(key).is_some_and(|l| Arc::ptr_eq(l, &lane)) && Arc::strong_count(&lane) == 2 {
            lanes.remove(key);
        }
    }
}

/// Ends a running flush when dropped, even if it panicked.
struct InFlight {
    inner: Arc<Inner>,
    session_id: String,
}

impl InFlight {
    fn new(inner: &Arc<Inner>, key: &FlushKey) -> Self {
        Self {
            inner: Arc::clone(inner),
            session_id: key.session_id.clone(),
        }
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        {
            let _pending = self.inner.lock_pending();
            let mut flushing = self.inner.lock_flushing();
            if let Some(count) = flushing.get_mut(&self.session_id) {
                *count -= 1;
                if *count == 0 {
                    flushing.remove(&self.session_id);
                }
            }
        }
        self.inner.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.inner.idle.notify_waiters();
    }
}
