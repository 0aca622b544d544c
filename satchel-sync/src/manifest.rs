/// Remote manifest: the per-collection index of record files.
///
/// The manifest is the only authoritative list of what exists remotely.
/// It is rewritten exactly once per sync cycle, after every record write
/// and delete in that cycle has resolved, so it never references a record
/// file that does not exist.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use satchel_core::{RecordDoc, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    /// Manifest format version for future compatibility.
    pub version: u32,
    /// When this manifest was last rewritten, epoch milliseconds.
    pub updated_at: i64,
    /// Ids of record files that exist remotely. Sorted for determinism.
    pub ids: BTreeSet<String>,
}

impl Manifest {
    pub const CURRENT_VERSION: u32 = 1;

    pub fn new(now_ms: i64) -> Self {
        Self {
            version: Self::CURRENT_VERSION,
            updated_at: now_ms,
            ids: BTreeSet::new(),
        }
    }

    /// Build a manifest from the records of one collection snapshot.
    pub fn from_ids<I, S>(ids: I, now_ms: i64) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            version: Self::CURRENT_VERSION,
            updated_at: now_ms,
            ids: ids.into_iter().map(Into::into).collect(),
        }
    }

    /// Build a manifest listing the given record docs.
    pub fn from_records<'a, I>(records: I, now_ms: i64) -> Self
    where
        I: IntoIterator<Item = &'a RecordDoc>,
    {
        Self::from_ids(records.into_iter().map(|r| r.id.clone()), now_ms)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}
