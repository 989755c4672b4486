//! In-memory store used as a test double.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{SyncError, SyncResult};

use super::RemoteStore;

/// Keeps objects in a map and counts puts.
#[derive(Debug, Default)]
pub struct MemoryStore {
    objects: Mutex<BTreeMap<String, Vec<u8>>>,
    puts: Mutex<Vec<(String, Vec<u8>)>>,
    fail_puts: AtomicBool,
    fail_mirror: AtomicBool,
    put_delay_ms: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_object(self, key: &str, bytes: &[u8]) -> Self {
        self.objects
            .lock()
            .unwrap()
            .insert(key.to_string(), bytes.to_vec());
        self
    }

    pub fn object(&self, key: &str) -> Option<String> {
        self.objects
            .lock()
            .unwrap()
            .get(key)
            .map(|b| String::from_utf8_lossy(b).into_owned())
    }

    /// Every successful put, in completion order.
    pub fn puts(&self) -> Vec<(String, String)> {
        self.puts
            .lock()
            .unwrap()
            .iter()
            .map(|(k, b)| (k.clone(), String::from_utf8_lossy(b).into_owned()))
            .collect()
    }

    pub fn fail_puts(&self, fail: bool) {
        self.fail_puts.store(fail, Ordering::SeqCst);
    }

    pub fn fail_mirror(&self, fail: bool) {
        self.fail_mirror.store(fail, Ordering::SeqCst);
    }

    pub fn set_put_delay(&self, delay: Duration) {
        let ms = usize::try_from(delay.as_millis()).unwrap_or(usize::MAX);
        self.put_delay_ms.store(ms, Ordering::SeqCst);
    }
}

#[async_trait]
impl RemoteStore for MemoryStore {
    async fn mirror_tree(&self, remote_key: &str, local_dir: &Path) -> SyncResult<()> {
        if self.fail_mirror.load(Ordering::SeqCst) {
            return Err(SyncError::transfer(remote_key, "mirror refused"));
        }
        let prefix = format!("{remote_key}/");
        let objects: Vec<(String, Vec<u8>)> = self
            .objects
            .lock()
            .unwrap()
            .iter()
            .filter_map(|(k, v)| k.strip_prefix(&prefix).map(|rel| (rel.to_string(), v.clone())))
            .collect();

        tokio::fs::create_dir_all(local_dir)
            .await
            .map_err(|e| SyncError::transfer(remote_key, e))?;
        for (relative, bytes) in objects {
            let target = local_dir.join(&relative);
            if let Some(parent) = target.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| SyncError::transfer(remote_key, e))?;
            }
            tokio::fs::write(&target, bytes)
                .await
                .map_err(|e| SyncError::transfer(remote_key, e))?;
        }
        Ok(())
    }

    async fn put_object(&self, remote_key: &str, bytes: &[u8]) -> SyncResult<()> {
        let delay = self.put_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay as u64)).await;
        }
        if self.fail_puts.load(Ordering::SeqCst) {
            return Err(SyncError::transfer(remote_key, "put refused"));
        }
        self.objects
            .lock()
            .unwrap()
            .insert(remote_key.to_string(), bytes.to_vec());
        self.puts
            .lock()
            .unwrap()
            .push((remote_key.to_string(), bytes.to_vec()));
        Ok(())
    }
}
