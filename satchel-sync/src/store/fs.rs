/// Filesystem-backed remote store.
///
/// Lays the remote state out as one JSON file per record under
/// `<root>/<collection>/<id>.json`, a `manifest.json` per collection, and
/// a single `scalars.json` at the root. Useful for tests against a real
/// I/O path and for syncing through a mounted folder.

use async_trait::async_trait;
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;

use satchel_core::{CollectionKind, Error, RecordDoc, Result};

use crate::manifest::Manifest;
use crate::store::RemoteStore;

const MANIFEST_FILE: &str = "manifest.json";
const SCALARS_FILE: &str = "scalars.json";

#[derive(Debug, Clone)]
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn collection_dir(&self, kind: CollectionKind) -> PathBuf {
        self.root.join(kind.name())
    }

    fn record_path(&self, kind: CollectionKind, id: &str) -> Result<PathBuf> {
        // Ids become file names; reject anything that could escape the
        // collection directory.
        if id.is_empty() || id.contains('/') || id.contains('\\') || id.contains("..") {
            return Err(Error::InvalidArgument(format!("unsafe record id: {id:?}")));
        }
        Ok(self.collection_dir(kind).join(format!("{id}.json")))
    }

    async fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>> {
        match fs::read_to_string(path).await {
            Ok(text) => Ok(Some(serde_json::from_str(&text)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let text = serde_json::to_string_pretty(value)?;
        fs::write(path, text).await?;
        Ok(())
    }

    async fn read_scalars(&self) -> Result<HashMap<String, i64>> {
        Ok(Self::read_json(&self.root.join(SCALARS_FILE))
            .await?
            .unwrap_or_default())
    }
}

#[async_trait]
impl RemoteStore for FsStore {
    async fn load_collection(&self, kind: CollectionKind) -> Result<Vec<RecordDoc>> {
        let dir = self.collection_dir(kind);
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut records = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if path.file_name().and_then(|n| n.to_str()) == Some(MANIFEST_FILE) {
                continue;
            }
            if let Some(doc) = Self::read_json::<RecordDoc>(&path).await? {
                records.push(doc);
            }
        }
        Ok(records)
    }

    async fn save_records(&self, kind: CollectionKind, records: &[RecordDoc]) -> Result<()> {
        for record in records {
            let path = self.record_path(kind, &record.id)?;
            Self::write_json(&path, record).await?;
        }
        Ok(())
    }

    async fn delete_record(&self, kind: CollectionKind, id: &str) -> Result<()> {
        let path = self.record_path(kind, id)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn load_manifest(&self, kind: CollectionKind) -> Result<Option<Manifest>> {
        Self::read_json(&self.collection_dir(kind).join(MANIFEST_FILE)).await
    }

    async fn update_manifest(&self, kind: CollectionKind, manifest: &Manifest) -> Result<()> {
        Self::write_json(&self.collection_dir(kind).join(MANIFEST_FILE), manifest).await
    }

    async fn read_scalar(&self, key: &str) -> Result<Option<i64>> {
        Ok(self.read_scalars().await?.get(key).copied())
    }

    async fn write_scalar(&self, key: &str, value: i64) -> Result<()> {
        let mut scalars = self.read_scalars().await?;
        scalars.insert(key.to_string(), value);
        Self::write_json(&self.root.join(SCALARS_FILE), &scalars).await
    }
}
