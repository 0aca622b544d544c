/// Dirty tracking for local collections.
///
/// Keeps a per-collection set of record ids whose local copy has changed
/// since the last successful upload, plus a cache of per-record content
/// signatures used to detect change without re-serializing whole records.
/// The signature cache always reflects "last observed", not "last synced":
/// it is updated on every observation regardless of sync outcome, while
/// dirty flags are only cleared after a remote write succeeds.

use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};

use satchel_core::{CollectionKind, RecordDoc};

/// What one observation of a collection turned up.
#[derive(Debug, Clone, Default)]
pub struct ObservedChanges {
    /// Ids whose signature changed or that are newly created.
    pub dirtied: Vec<String>,
    /// Ids present at the previous observation and gone now. These must
    /// produce remote delete requests, bypassing the debounce.
    pub removed: Vec<String>,
}

impl ObservedChanges {
    pub fn is_empty(&self) -> bool {
        self.dirtied.is_empty() && self.removed.is_empty()
    }
}

/// Per-collection dirty sets and signature caches.
#[derive(Debug, Default)]
pub struct DirtyTracker {
    dirty: RwLock<HashMap<CollectionKind, HashSet<String>>>,
    signatures: RwLock<HashMap<CollectionKind, HashMap<String, String>>>,
}

impl DirtyTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_dirty(&self, kind: CollectionKind, id: &str) {
        self.dirty
            .write()
            .entry(kind)
            .or_default()
            .insert(id.to_string());
    }

    /// Clear a single id after its remote write succeeded.
    pub fn clear(&self, kind: CollectionKind, id: &str) {
        if let Some(set) = self.dirty.write().get_mut(&kind) {
            set.remove(id);
        }
    }

    /// Clear a dirty flag only if the cached signature still matches the
    /// one that was uploaded. A mutation observed mid-cycle moves the cache
    /// on, and the flag must survive for the next cycle.
    pub fn clear_if_unchanged(&self, kind: CollectionKind, id: &str, uploaded_signature: &str) {
        let unchanged = self
            .signatures
            .read()
            .get(&kind)
            .and_then(|m| m.get(id))
            .map(|sig| sig == uploaded_signature)
            .unwrap_or(false);
        if unchanged {
            self.clear(kind, id);
        }
    }

    pub fn is_dirty(&self, kind: CollectionKind, id: &str) -> bool {
        self.dirty
            .read()
            .get(&kind)
            .map(|set| set.contains(id))
            .unwrap_or(false)
    }

    /// Snapshot of the dirty ids for one collection. Upload cycles take
    /// this snapshot at cycle start; mutations landing mid-cycle are left
    /// for the next cycle.
    pub fn all_dirty(&self, kind: CollectionKind) -> HashSet<String> {
        self.dirty.read().get(&kind).cloned().unwrap_or_default()
    }

    /// Compare a collection against the cached signatures, marking changed
    /// and created ids dirty and detecting removals by set difference.
    /// The cache is replaced with the observed state either way.
    pub fn observe(
        &self,
        kind: CollectionKind,
        docs: &HashMap<String, RecordDoc>,
    ) -> ObservedChanges {
        let mut changes = ObservedChanges::default();

        let mut signatures = self.signatures.write();
        let previous = signatures.entry(kind).or_default();

        for (id, doc) in docs {
            if previous.get(id) != Some(&doc.signature) {
                changes.dirtied.push(id.clone());
            }
        }

        for id in previous.keys() {
            if !docs.contains_key(id) {
                changes.removed.push(id.clone());
            }
        }

        *previous = docs
            .iter()
            .map(|(id, doc)| (id.clone(), doc.signature.clone()))
            .collect();
        drop(signatures);

        if !changes.is_empty() {
            let mut dirty = self.dirty.write();
            let set = dirty.entry(kind).or_default();
            for id in &changes.dirtied {
                set.insert(id.clone());
            }
            // A record deleted while dirty still needs the remote delete;
            // the caller turns `removed` into delete requests, so the
            // dirty flag itself can go.
            for id in &changes.removed {
                set.remove(id);
            }
        }

        changes.dirtied.sort();
        changes.removed.sort();
        changes
    }

    /// Replace the signature cache with freshly downloaded state without
    /// marking anything dirty. Used while a download cycle swaps local
    /// collections, so the engine does not mistake its own downloaded data
    /// for local edits.
    pub fn reset_observed(&self, kind: CollectionKind, docs: &HashMap<String, RecordDoc>) {
        let mut signatures = self.signatures.write();
        signatures.insert(
            kind,
            docs.iter()
                .map(|(id, doc)| (id.clone(), doc.signature.clone()))
                .collect(),
        );

        // Drop dirty flags for ids that no longer exist after the merge.
        if let Some(set) = self.dirty.write().get_mut(&kind) {
            set.retain(|id| docs.contains_key(id));
        }
    }

    pub fn stats(&self) -> DirtyStats {
        let dirty = self.dirty.read();
        DirtyStats {
            dirty_by_collection: dirty
                .iter()
                .map(|(kind, set)| (*kind, set.len()))
                .collect(),
            total_dirty: dirty.values().map(|set| set.len()).sum(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct DirtyStats {
    pub dirty_by_collection: HashMap<CollectionKind, usize>,
    pub total_dirty: usize,
}
