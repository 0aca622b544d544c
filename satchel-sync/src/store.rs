/// Remote store abstraction and the in-memory implementation.
///
/// The engine talks to the durable backend through this trait only: named
/// record documents, one small manifest per collection, and scalar values
/// for the heartbeat timestamp. Every operation is async and may fail with
/// a transport error; the engine treats those as retryable.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};

use satchel_core::{CollectionKind, Error, RecordDoc, Result};

use crate::manifest::Manifest;

pub mod fs;

#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Read every record document of a collection.
    async fn load_collection(&self, kind: CollectionKind) -> Result<Vec<RecordDoc>>;

    /// Write (create or replace) a batch of record documents.
    async fn save_records(&self, kind: CollectionKind, records: &[RecordDoc]) -> Result<()>;

    /// Delete one record document. Deleting a missing record is not an
    /// error; deletes must be idempotent so failed cycles can replay them.
    async fn delete_record(&self, kind: CollectionKind, id: &str) -> Result<()>;

    /// Read the collection's manifest, if one has been written yet.
    async fn load_manifest(&self, kind: CollectionKind) -> Result<Option<Manifest>>;

    /// Replace the collection's manifest.
    async fn update_manifest(&self, kind: CollectionKind, manifest: &Manifest) -> Result<()>;

    /// Read a scalar value (the heartbeat timestamp).
    async fn read_scalar(&self, key: &str) -> Result<Option<i64>>;

    /// Write a scalar value.
    async fn write_scalar(&self, key: &str, value: i64) -> Result<()>;
}

/// In-memory remote store with failure injection, shared by tests and by
/// hosts that want a scratch backend.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: RwLock<HashMap<CollectionKind, HashMap<String, RecordDoc>>>,
    manifests: RwLock<HashMap<CollectionKind, Manifest>>,
    scalars: RwLock<HashMap<String, i64>>,
    /// When set, every operation fails with a transport error.
    offline: AtomicBool,
    /// Collections whose next save_records calls fail (count per kind).
    save_failures: RwLock<HashMap<CollectionKind, u32>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate losing or regaining connectivity.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::Release);
    }

    /// Make the next `n` save_records calls for `kind` fail.
    pub fn fail_saves(&self, kind: CollectionKind, n: u32) {
        self.save_failures.write().insert(kind, n);
    }

    fn check_online(&self) -> Result<()> {
        if self.offline.load(Ordering::Acquire) {
            Err(Error::transport("store offline"))
        } else {
            Ok(())
        }
    }

    // Test inspection helpers.

    pub fn record_ids(&self, kind: CollectionKind) -> HashSet<String> {
        self.records
            .read()
            .get(&kind)
            .map(|m| m.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn record(&self, kind: CollectionKind, id: &str) -> Option<RecordDoc> {
        self.records.read().get(&kind).and_then(|m| m.get(id)).cloned()
    }

    pub fn manifest(&self, kind: CollectionKind) -> Option<Manifest> {
        self.manifests.read().get(&kind).cloned()
    }

    pub fn scalar(&self, key: &str) -> Option<i64> {
        self.scalars.read().get(key).copied()
    }
}

#[async_trait]
impl RemoteStore for MemoryStore {
    async fn load_collection(&self, kind: CollectionKind) -> Result<Vec<RecordDoc>> {
        self.check_online()?;
        Ok(self
            .records
            .read()
            .get(&kind)
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn save_records(&self, kind: CollectionKind, records: &[RecordDoc]) -> Result<()> {
        self.check_online()?;

        {
            let mut failures = self.save_failures.write();
            if let Some(remaining) = failures.get_mut(&kind) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(Error::transport(format!("injected save failure: {}", kind)));
                }
            }
        }

        let mut all = self.records.write();
        let collection = all.entry(kind).or_default();
        for record in records {
            collection.insert(record.id.clone(), record.clone());
        }
        Ok(())
    }

    async fn delete_record(&self, kind: CollectionKind, id: &str) -> Result<()> {
        self.check_online()?;
        if let Some(collection) = self.records.write().get_mut(&kind) {
            collection.remove(id);
        }
        Ok(())
    }

    async fn load_manifest(&self, kind: CollectionKind) -> Result<Option<Manifest>> {
        self.check_online()?;
        Ok(self.manifests.read().get(&kind).cloned())
    }

    async fn update_manifest(&self, kind: CollectionKind, manifest: &Manifest) -> Result<()> {
        self.check_online()?;
        self.manifests.write().insert(kind, manifest.clone());
        Ok(())
    }

    async fn read_scalar(&self, key: &str) -> Result<Option<i64>> {
        self.check_online()?;
        Ok(self.scalars.read().get(key).copied())
    }

    async fn write_scalar(&self, key: &str, value: i64) -> Result<()> {
        self.check_online()?;
        self.scalars.write().insert(key.to_string(), value);
        Ok(())
    }
}
