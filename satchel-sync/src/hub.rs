/// Engine-side local state.
///
/// Holds the five collections as id-keyed maps of record envelopes. Every
/// mutation emits a `ChangeEvent` on an unbounded channel; the engine's
/// observer task consumes those events and recomputes dirty state, so
/// callers never suspend and never touch the dirty tracker directly.
///
/// Download cycles rewrite collections through `rewrite`, which holds the
/// write lock across reading the current state and installing the merged
/// replacement, so no host mutation can slip in between the two.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;

use satchel_core::{CollectionKind, Record, RecordDoc, Result};

/// A collection changed locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChangeEvent {
    pub kind: CollectionKind,
}

pub struct StateHub {
    collections: RwLock<HashMap<CollectionKind, HashMap<String, RecordDoc>>>,
    change_tx: mpsc::UnboundedSender<ChangeEvent>,
}

impl StateHub {
    /// Create the hub plus the receiving end of its change channel.
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<ChangeEvent>) {
        let (change_tx, change_rx) = mpsc::unbounded_channel();
        let hub = Arc::new(Self {
            collections: RwLock::new(HashMap::new()),
            change_tx,
        });
        (hub, change_rx)
    }

    /// Insert or replace a record envelope.
    pub fn put(&self, kind: CollectionKind, doc: RecordDoc) {
        self.collections
            .write()
            .entry(kind)
            .or_default()
            .insert(doc.id.clone(), doc);
        self.notify(kind);
    }

    /// Encode and insert a typed record.
    pub fn put_record<R: Record>(&self, kind: CollectionKind, record: &R) -> Result<()> {
        let doc = RecordDoc::encode(record)?;
        self.put(kind, doc);
        Ok(())
    }

    /// Remove a record. Returns true if it existed.
    pub fn remove(&self, kind: CollectionKind, id: &str) -> bool {
        let existed = self
            .collections
            .write()
            .get_mut(&kind)
            .map(|m| m.remove(id).is_some())
            .unwrap_or(false);
        if existed {
            self.notify(kind);
        }
        existed
    }

    pub fn get(&self, kind: CollectionKind, id: &str) -> Option<RecordDoc> {
        self.collections
            .read()
            .get(&kind)
            .and_then(|m| m.get(id))
            .cloned()
    }

    /// Clone the whole collection for reads outside the lock.
    pub fn snapshot(&self, kind: CollectionKind) -> HashMap<String, RecordDoc> {
        self.collections.read().get(&kind).cloned().unwrap_or_default()
    }

    /// Run a closure against the collection under the read lock, avoiding
    /// a full clone for observation passes.
    pub fn read<T>(&self, kind: CollectionKind, f: impl FnOnce(&HashMap<String, RecordDoc>) -> T) -> T {
        let collections = self.collections.read();
        match collections.get(&kind) {
            Some(map) => f(map),
            None => f(&HashMap::new()),
        }
    }

    pub fn ids(&self, kind: CollectionKind) -> Vec<String> {
        self.collections
            .read()
            .get(&kind)
            .map(|m| m.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn len(&self, kind: CollectionKind) -> usize {
        self.collections.read().get(&kind).map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self, kind: CollectionKind) -> bool {
        self.len(kind) == 0
    }

    /// Replace a collection with the closure's output. The write lock is
    /// held across the read and the swap, so no put or remove interleaves
    /// between observing the current state and installing its replacement.
    /// Emits no change event; the engine aligns its signature cache inside
    /// the same closure.
    pub fn rewrite(
        &self,
        kind: CollectionKind,
        f: impl FnOnce(&HashMap<String, RecordDoc>) -> HashMap<String, RecordDoc>,
    ) {
        let mut collections = self.collections.write();
        let current = collections.entry(kind).or_default();
        *current = f(&*current);
    }

    fn notify(&self, kind: CollectionKind) {
        // Fails only after the engine stopped; mutations still apply.
        let _ = self.change_tx.send(ChangeEvent { kind });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use satchel_core::Session;

    #[test]
    fn test_put_emits_change_event() {
        let (hub, mut rx) = StateHub::new();
        let session = Session::new("calc", 1);

        hub.put_record(CollectionKind::Sessions, &session).unwrap();

        let event = rx.try_recv().unwrap();
        assert_eq!(event.kind, CollectionKind::Sessions);
        assert_eq!(hub.len(CollectionKind::Sessions), 1);
    }

    #[test]
    fn test_remove_missing_is_silent() {
        let (hub, mut rx) = StateHub::new();
        assert!(!hub.remove(CollectionKind::Cards, "nope"));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_rewrite_swaps_collection_without_events() {
        let (hub, mut rx) = StateHub::new();
        let session = Session::new("a", 1);
        hub.put_record(CollectionKind::Sessions, &session).unwrap();
        let _ = rx.try_recv();

        hub.rewrite(CollectionKind::Sessions, |current| {
            assert_eq!(current.len(), 1);
            HashMap::new()
        });
        assert!(hub.is_empty(CollectionKind::Sessions));
        assert!(hub.snapshot(CollectionKind::Sessions).is_empty());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_put_after_rewrite_still_emits_events() {
        let (hub, mut rx) = StateHub::new();
        hub.rewrite(CollectionKind::Sessions, |_| HashMap::new());

        let session = Session::new("b", 1);
        hub.put_record(CollectionKind::Sessions, &session).unwrap();
        assert!(rx.try_recv().is_ok());
    }
}
