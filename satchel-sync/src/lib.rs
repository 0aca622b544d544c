/// Local-first multi-store synchronization.
///
/// Keeps several independently-mutable local collections consistent with a
/// remote durable store shared across devices. Changes sync in both
/// directions: local edits are dirty-tracked, debounced, and uploaded in
/// batches; remote changes are detected by heartbeat polling, downloaded,
/// and merged with wall-clock Last-Write-Wins semantics.
///
/// ```no_run
/// use std::sync::Arc;
/// use satchel_sync::{MemoryStore, SyncEngineBuilder};
///
/// # async fn example() -> anyhow::Result<()> {
/// let engine = SyncEngineBuilder::new()
///     .store(Arc::new(MemoryStore::new()))
///     .build()?;
/// engine.start();
/// # Ok(())
/// # }
/// ```

use std::sync::Arc;
use std::time::Duration;

use satchel_core::{Clock, SystemClock};

pub mod dirty;
pub mod engine;
pub mod gate;
pub mod heartbeat;
pub mod hub;
pub mod manifest;
pub mod merge;
pub mod scheduler;
pub mod store;

pub use dirty::{DirtyStats, DirtyTracker, ObservedChanges};
pub use engine::{
    SyncConfig, SyncDirection, SyncEngine, SyncEvent, SyncStats, SyncStatus,
};
pub use heartbeat::HeartbeatPoller;
pub use hub::{ChangeEvent, StateHub};
pub use manifest::Manifest;
pub use merge::{merge, MergeOutcome};
pub use store::{fs::FsStore, MemoryStore, RemoteStore};

/// Builder for [`SyncEngine`]. A remote store is required; everything else
/// has production defaults.
pub struct SyncEngineBuilder {
    store: Option<Arc<dyn RemoteStore>>,
    clock: Arc<dyn Clock>,
    config: SyncConfig,
}

impl SyncEngineBuilder {
    pub fn new() -> Self {
        Self {
            store: None,
            clock: Arc::new(SystemClock),
            config: SyncConfig::default(),
        }
    }

    /// The remote backend to sync against.
    pub fn store(mut self, store: Arc<dyn RemoteStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Replace the wall clock. Tests inject a manual clock here.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn hot_debounce(mut self, window: Duration) -> Self {
        self.config.hot_debounce = window;
        self
    }

    pub fn cold_debounce(mut self, window: Duration) -> Self {
        self.config.cold_debounce = window;
        self
    }

    pub fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.config.heartbeat_interval = interval;
        self
    }

    pub fn heartbeat_key(mut self, key: impl Into<String>) -> Self {
        self.config.heartbeat_key = key.into();
        self
    }

    pub fn build(self) -> anyhow::Result<Arc<SyncEngine>> {
        let store = self
            .store
            .ok_or_else(|| anyhow::anyhow!("a remote store is required"))?;
        Ok(SyncEngine::new(store, self.clock, self.config))
    }
}

impl Default for SyncEngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_requires_store() {
        assert!(SyncEngineBuilder::new().build().is_err());
    }

    #[tokio::test]
    async fn test_builder_defaults() {
        let engine = SyncEngineBuilder::new()
            .store(Arc::new(MemoryStore::new()))
            .hot_debounce(Duration::from_millis(100))
            .build()
            .unwrap();

        let status = engine.status();
        assert_eq!(status.direction, SyncDirection::Idle);
        assert!(!status.initial_sync_complete);
    }
}
