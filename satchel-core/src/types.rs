use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{Error, Result};

/// Debounce cadence class for a collection.
///
/// Hot collections are flushed on a short window (active editing produces
/// many mutations per second); cold collections tolerate a longer window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Cadence {
    Hot,
    Cold,
}

/// The five synchronized collections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollectionKind {
    Sessions,
    Folders,
    Cards,
    TimeBlocks,
    Ledger,
}

impl CollectionKind {
    /// Every collection the engine synchronizes.
    pub const ALL: [CollectionKind; 5] = [
        CollectionKind::Sessions,
        CollectionKind::Folders,
        CollectionKind::Cards,
        CollectionKind::TimeBlocks,
        CollectionKind::Ledger,
    ];

    /// Stable name used as the remote key prefix for this collection.
    pub fn name(&self) -> &'static str {
        match self {
            CollectionKind::Sessions => "sessions",
            CollectionKind::Folders => "folders",
            CollectionKind::Cards => "cards",
            CollectionKind::TimeBlocks => "time_blocks",
            CollectionKind::Ledger => "ledger",
        }
    }

    /// Debounce cadence for this collection. Active session edits are the
    /// latency-sensitive path; everything else rides the cold window.
    pub fn cadence(&self) -> Cadence {
        match self {
            CollectionKind::Sessions => Cadence::Hot,
            _ => Cadence::Cold,
        }
    }
}

impl std::fmt::Display for CollectionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A synchronized domain record.
///
/// Every record carries a unique id within its collection, a wall-clock
/// update timestamp in epoch milliseconds, and a cheap content signature
/// derived from its mutable fields (used to detect "has this changed"
/// without re-serializing the whole record).
pub trait Record: Serialize + Clone {
    fn id(&self) -> &str;

    /// Wall-clock update time, epoch milliseconds. Last-Write-Wins merging
    /// compares this field first.
    fn updated_at(&self) -> i64;

    /// Cheap signature over the mutable fields.
    fn signature(&self) -> String;

    /// Content-richness score used to break exact timestamp ties
    /// (greater wins). Defaults to zero for flat records.
    fn richness(&self) -> u32 {
        0
    }
}

/// Hashes signature parts into a short stable hex string.
pub fn signature_of(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update([0u8]);
    }
    let digest = hasher.finalize();
    digest[..8].iter().map(|b| format!("{:02x}", b)).collect()
}

/// Uniform envelope the engine moves around: the typed record serialized to
/// JSON plus the metadata merging and dirty tracking need.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordDoc {
    pub id: String,
    pub updated_at: i64,
    pub richness: u32,
    pub signature: String,
    pub body: serde_json::Value,
}

impl RecordDoc {
    /// Wrap a typed record into its engine envelope.
    pub fn encode<R: Record>(record: &R) -> Result<Self> {
        if record.id().is_empty() {
            return Err(Error::InvalidArgument("record id must not be empty".into()));
        }
        Ok(Self {
            id: record.id().to_string(),
            updated_at: record.updated_at(),
            richness: record.richness(),
            signature: record.signature(),
            body: serde_json::to_value(record)?,
        })
    }

    /// Recover the typed record from the envelope body.
    pub fn decode<R: DeserializeOwned>(&self) -> Result<R> {
        Ok(serde_json::from_value(self.body.clone())?)
    }
}

/// A single message inside a study session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub text: String,
}

/// A study session: a pinned-able titled transcript of messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub title: String,
    pub pinned: bool,
    pub messages: Vec<Message>,
    pub updated_at: i64,
}

impl Session {
    pub fn new(title: impl Into<String>, now_ms: i64) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            title: title.into(),
            pinned: false,
            messages: Vec::new(),
            updated_at: now_ms,
        }
    }
}

impl Record for Session {
    fn id(&self) -> &str {
        &self.id
    }

    fn updated_at(&self) -> i64 {
        self.updated_at
    }

    fn signature(&self) -> String {
        signature_of(&[
            &self.messages.len().to_string(),
            &self.updated_at.to_string(),
            &self.title,
            if self.pinned { "1" } else { "0" },
        ])
    }

    fn richness(&self) -> u32 {
        self.messages.len() as u32
    }
}

/// A hierarchical folder grouping sessions or cards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Folder {
    pub id: String,
    pub title: String,
    pub parent_id: Option<String>,
    pub children: Vec<String>,
    pub updated_at: i64,
}

impl Folder {
    pub fn new(title: impl Into<String>, now_ms: i64) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            title: title.into(),
            parent_id: None,
            children: Vec::new(),
            updated_at: now_ms,
        }
    }
}

impl Record for Folder {
    fn id(&self) -> &str {
        &self.id
    }

    fn updated_at(&self) -> i64 {
        self.updated_at
    }

    fn signature(&self) -> String {
        signature_of(&[
            &self.children.len().to_string(),
            &self.updated_at.to_string(),
            &self.title,
            self.parent_id.as_deref().unwrap_or(""),
        ])
    }

    fn richness(&self) -> u32 {
        self.children.len() as u32
    }
}

/// A flashcard with spaced-repetition counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Card {
    pub id: String,
    pub front: String,
    pub back: String,
    pub reviews: u32,
    pub lapses: u32,
    pub due_at: i64,
    pub updated_at: i64,
}

impl Card {
    pub fn new(front: impl Into<String>, back: impl Into<String>, now_ms: i64) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            front: front.into(),
            back: back.into(),
            reviews: 0,
            lapses: 0,
            due_at: now_ms,
            updated_at: now_ms,
        }
    }
}

impl Record for Card {
    fn id(&self) -> &str {
        &self.id
    }

    fn updated_at(&self) -> i64 {
        self.updated_at
    }

    fn signature(&self) -> String {
        signature_of(&[
            &self.updated_at.to_string(),
            &self.front,
            &self.back,
            &self.reviews.to_string(),
            &self.lapses.to_string(),
            &self.due_at.to_string(),
        ])
    }

    fn richness(&self) -> u32 {
        self.reviews
    }
}

/// A scheduled block of study time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeBlock {
    pub id: String,
    pub label: String,
    pub start_ms: i64,
    pub end_ms: i64,
    pub updated_at: i64,
}

impl TimeBlock {
    pub fn new(label: impl Into<String>, start_ms: i64, end_ms: i64, now_ms: i64) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            label: label.into(),
            start_ms,
            end_ms,
            updated_at: now_ms,
        }
    }
}

impl Record for TimeBlock {
    fn id(&self) -> &str {
        &self.id
    }

    fn updated_at(&self) -> i64 {
        self.updated_at
    }

    fn signature(&self) -> String {
        signature_of(&[
            &self.updated_at.to_string(),
            &self.label,
            &self.start_ms.to_string(),
            &self.end_ms.to_string(),
        ])
    }
}

/// One day of the points/progress ledger. The id is the date key
/// (e.g. "2026-08-23") so each day is a distinct record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: String,
    pub points: i64,
    pub streak: u32,
    pub updated_at: i64,
}

impl LedgerEntry {
    pub fn new(date_key: impl Into<String>, now_ms: i64) -> Self {
        Self {
            id: date_key.into(),
            points: 0,
            streak: 0,
            updated_at: now_ms,
        }
    }
}

impl Record for LedgerEntry {
    fn id(&self) -> &str {
        &self.id
    }

    fn updated_at(&self) -> i64 {
        self.updated_at
    }

    fn signature(&self) -> String {
        signature_of(&[
            &self.updated_at.to_string(),
            &self.points.to_string(),
            &self.streak.to_string(),
        ])
    }
}
