//! Process registry and shared error flags
//!
//! The registry is owned by the control task and never shared. The error
//! flags are the one piece of state written from scanner tasks, so they sit
//! behind a single mutex that is held only for one check or set.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use super::worker::WorkerHandle;

/// Per-feed critical-error flags shared between scanners and the reconciler
#[derive(Debug, Clone, Default)]
pub struct ErrorFlags {
    inner: Arc<Mutex<HashMap<String, bool>>>,
}

impl ErrorFlags {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the flag; returns true if it was not already set
    pub async fn raise(&self, feed: &str) -> bool {
        let mut flags = self.inner.lock().await;
        let slot = flags.entry(feed.to_string()).or_insert(false);
        let newly_set = !*slot;
        *slot = true;
        newly_set
    }

    /// Read and clear the flag in one critical section
    pub async fn take(&self, feed: &str) -> bool {
        let mut flags = self.inner.lock().await;
        match flags.get_mut(feed) {
            Some(flag) => std::mem::replace(flag, false),
            None => false,
        }
    }

    pub async fn reset(&self, feed: &str) {
        self.inner.lock().await.insert(feed.to_string(), false);
    }

    pub async fn is_set(&self, feed: &str) -> bool {
        self.inner.lock().await.get(feed).copied().unwrap_or(false)
    }
}

/// Feed name to running worker
#[derive(Debug, Default)]
pub struct ProcessRegistry {
    workers: HashMap<String, WorkerHandle>,
}

impl ProcessRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, feed: &str) -> bool {
        self.workers.contains_key(feed)
    }

    pub fn insert(&mut self, handle: WorkerHandle) {
        self.workers.insert(handle.feed().name().to_string(), handle);
    }

    pub fn remove(&mut self, feed: &str) -> Option<WorkerHandle> {
        self.workers.remove(feed)
    }

    pub fn get(&self, feed: &str) -> Option<&WorkerHandle> {
        self.workers.get(feed)
    }

    pub fn get_mut(&mut self, feed: &str) -> Option<&mut WorkerHandle> {
        self.workers.get_mut(feed)
    }

    /// Registered feed names, sorted for deterministic passes
    pub fn feed_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.workers.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_raise_only_reports_first_transition() {
        let flags = ErrorFlags::new();
        assert!(flags.raise("vant1").await);
        assert!(!flags.raise("vant1").await);
        assert!(flags.is_set("vant1").await);
    }

    #[tokio::test]
    async fn test_take_clears_flag() {
        let flags = ErrorFlags::new();
        assert!(!flags.take("vant2").await);

        flags.raise("vant2").await;
        assert!(flags.take("vant2").await);
        assert!(!flags.take("vant2").await);
        assert!(!flags.is_set("vant2").await);
    }

    #[tokio::test]
    async fn test_clones_share_state() {
        let flags = ErrorFlags::new();
        let scanner_view = flags.clone();

        scanner_view.raise("vant3").await;
        assert!(flags.is_set("vant3").await);

        flags.reset("vant3").await;
        assert!(!scanner_view.is_set("vant3").await);
    }
}
