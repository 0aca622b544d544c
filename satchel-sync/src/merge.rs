/// Last-Write-Wins reconciliation of a remote collection snapshot with the
/// local one.
///
/// The merge is a pure function: given the same two snapshots and the same
/// dirty predicate it always produces the same outcome. That determinism is
/// what keeps repeated heartbeat cycles from flapping and makes the merge
/// directly testable.

use std::collections::HashMap;

use satchel_core::RecordDoc;

/// Result of merging one collection.
#[derive(Debug, Clone, Default)]
pub struct MergeOutcome {
    /// The reconciled collection, keyed by record id.
    pub merged: HashMap<String, RecordDoc>,
    /// Ids that existed locally, were not dirty, and are absent remotely:
    /// they were deleted by another device and must be dropped locally.
    /// Sorted so the outcome is deterministic.
    pub locally_deleted: Vec<String>,
}

/// Reconcile `remote` and `local` snapshots of the same collection.
///
/// Per record id present in either side:
/// - present in both: the strictly greater `updated_at` wins; an exact tie
///   falls back to content richness (greater wins); if still tied the
///   remote copy wins, remote being the converged source of truth.
/// - present only remotely: kept (new, or already synced by another device).
/// - present only locally: kept only if `is_dirty(id)` reports an unsynced
///   local creation; otherwise it is treated as remotely deleted.
pub fn merge(
    remote: &HashMap<String, RecordDoc>,
    local: &HashMap<String, RecordDoc>,
    is_dirty: impl Fn(&str) -> bool,
) -> MergeOutcome {
    let mut outcome = MergeOutcome {
        merged: HashMap::with_capacity(remote.len().max(local.len())),
        locally_deleted: Vec::new(),
    };

    for (id, remote_doc) in remote {
        let winner = match local.get(id) {
            Some(local_doc) => pick(remote_doc, local_doc).clone(),
            None => remote_doc.clone(),
        };
        outcome.merged.insert(id.clone(), winner);
    }

    for (id, local_doc) in local {
        if remote.contains_key(id) {
            continue;
        }
        if is_dirty(id) {
            // Unsynced local creation: the next upload cycle will push it.
            outcome.merged.insert(id.clone(), local_doc.clone());
        } else {
            outcome.locally_deleted.push(id.clone());
        }
    }

    outcome.locally_deleted.sort();
    outcome
}

/// LWW comparison for a record present on both sides.
fn pick<'a>(remote: &'a RecordDoc, local: &'a RecordDoc) -> &'a RecordDoc {
    if remote.updated_at != local.updated_at {
        if remote.updated_at > local.updated_at {
            remote
        } else {
            local
        }
    } else if local.richness > remote.richness {
        local
    } else {
        // Equal timestamps and no richness signal: remote wins.
        remote
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(id: &str, updated_at: i64, richness: u32, tag: &str) -> RecordDoc {
        RecordDoc {
            id: id.to_string(),
            updated_at,
            richness,
            signature: format!("sig-{}-{}", id, tag),
            body: json!({ "id": id, "tag": tag }),
        }
    }

    fn snapshot(docs: Vec<RecordDoc>) -> HashMap<String, RecordDoc> {
        docs.into_iter().map(|d| (d.id.clone(), d)).collect()
    }

    #[test]
    fn test_merge_with_self_is_identity() {
        let side = snapshot(vec![doc("a", 100, 0, "x"), doc("b", 200, 3, "y")]);
        let outcome = merge(&side, &side, |_| false);

        assert_eq!(outcome.merged, side);
        assert!(outcome.locally_deleted.is_empty());
    }

    #[test]
    fn test_newer_remote_wins() {
        // Local has {id:"a", updatedAt:100}; remote has newer content "X".
        let local = snapshot(vec![doc("a", 100, 0, "stale")]);
        let remote = snapshot(vec![doc("a", 200, 0, "X")]);

        let outcome = merge(&remote, &local, |_| false);
        let merged = &outcome.merged["a"];
        assert_eq!(merged.updated_at, 200);
        assert_eq!(merged.body["tag"], "X");
    }

    #[test]
    fn test_newer_local_wins() {
        let local = snapshot(vec![doc("a", 300, 0, "fresh")]);
        let remote = snapshot(vec![doc("a", 200, 9, "old")]);

        let outcome = merge(&remote, &local, |_| false);
        assert_eq!(outcome.merged["a"].body["tag"], "fresh");
    }

    #[test]
    fn test_tie_falls_back_to_richness() {
        let local = snapshot(vec![doc("a", 100, 5, "rich")]);
        let remote = snapshot(vec![doc("a", 100, 2, "thin")]);

        let outcome = merge(&remote, &local, |_| false);
        assert_eq!(outcome.merged["a"].body["tag"], "rich");
    }

    #[test]
    fn test_full_tie_prefers_remote() {
        let local = snapshot(vec![doc("a", 100, 2, "local")]);
        let remote = snapshot(vec![doc("a", 100, 2, "remote")]);

        let outcome = merge(&remote, &local, |_| false);
        assert_eq!(outcome.merged["a"].body["tag"], "remote");
    }

    #[test]
    fn test_remote_only_record_is_kept() {
        let local = HashMap::new();
        let remote = snapshot(vec![doc("new", 50, 0, "from-other-device")]);

        let outcome = merge(&remote, &local, |_| false);
        assert!(outcome.merged.contains_key("new"));
        assert!(outcome.locally_deleted.is_empty());
    }

    #[test]
    fn test_dirty_local_creation_survives() {
        // Local has {id:"b"} dirty; remote has no "b".
        let local = snapshot(vec![doc("b", 100, 0, "draft")]);
        let remote = HashMap::new();

        let outcome = merge(&remote, &local, |id| id == "b");
        assert!(outcome.merged.contains_key("b"));
        assert!(outcome.locally_deleted.is_empty());
    }

    #[test]
    fn test_clean_local_only_record_reported_deleted_once() {
        // Local has {id:"c"} not dirty; remote has no "c".
        let local = snapshot(vec![doc("c", 100, 0, "gone")]);
        let remote = HashMap::new();

        let outcome = merge(&remote, &local, |_| false);
        assert!(!outcome.merged.contains_key("c"));
        assert_eq!(outcome.locally_deleted, vec!["c".to_string()]);
    }

    #[test]
    fn test_lww_convergence_when_one_side_dominates() {
        // Every id in A has updated_at >= the matching id in B, so
        // merge(A, B) must equal A.
        let a = snapshot(vec![doc("x", 300, 0, "a"), doc("y", 200, 0, "a")]);
        let b = snapshot(vec![doc("x", 100, 0, "b"), doc("y", 200, 0, "b")]);

        let outcome = merge(&a, &b, |_| false);
        assert_eq!(outcome.merged, a);
    }

    #[test]
    fn test_deterministic_deletion_order() {
        let local = snapshot(vec![
            doc("zz", 1, 0, "l"),
            doc("aa", 1, 0, "l"),
            doc("mm", 1, 0, "l"),
        ]);
        let remote = HashMap::new();

        let outcome = merge(&remote, &local, |_| false);
        assert_eq!(outcome.locally_deleted, vec!["aa", "mm", "zz"]);
    }
}
