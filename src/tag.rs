use crate::error::{Result, TagTrailError};
use crate::protocols::Scheme;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Upper bound on a serialized tag file; anything larger is rejected on
/// load instead of being parsed.
const MAX_TAG_FILE_BYTES: u64 = 1024 * 1024;

/// Event kinds recorded in a tag's online event log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Read,
    Update,
}

/// One entry in the append-only event log.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TagEvent {
    pub reader: u32,
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub msg: String,
    pub timestamp: DateTime<Utc>,
}

/// One record stored under an online-storage key. Only RFChain produces
/// these; its protocol-specific field is the online secret `b`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StorageEntry {
    pub reader: u32,
    pub timestamp: DateTime<Utc>,
    pub b: String,
}

/// Per-tag online side channel: an event log plus keyed storage records.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OnlineStorage {
    pub events: Vec<TagEvent>,
    pub storage: BTreeMap<String, Vec<StorageEntry>>,
}

/// A physical RFID tag: the current on-chip payload, the history of all
/// prior payloads, and the online side channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Tag {
    pub id: u32,
    #[serde(with = "crate::keyfile::hex_bytes")]
    pub content: Vec<u8>,
    #[serde(with = "crate::keyfile::hex_bytes_vec")]
    pub history: Vec<Vec<u8>>,
    pub online_storage: OnlineStorage,
    pub mode: Scheme,
}

impl Tag {
    pub fn new(id: u32, content: Vec<u8>, mode: Scheme) -> Self {
        Self {
            id,
            content,
            history: Vec::new(),
            online_storage: OnlineStorage::default(),
            mode,
        }
    }

    /// Overwrites the tag content. The old value is copied to history.
    pub fn update_content(&mut self, reader: u32, content: Vec<u8>) {
        let now = Utc::now();
        self.online_storage.events.push(TagEvent {
            reader,
            kind: EventKind::Update,
            msg: format!("reader {} updated tag {} at {}", reader, self.id, now.to_rfc3339()),
            timestamp: now,
        });
        self.history.push(std::mem::replace(&mut self.content, content));
    }

    /// Records a read. Never touches content or history.
    pub fn read(&mut self, reader: u32) {
        let now = Utc::now();
        self.online_storage.events.push(TagEvent {
            reader,
            kind: EventKind::Read,
            msg: format!("reader {} read tag {} at {}", reader, self.id, now.to_rfc3339()),
            timestamp: now,
        });
    }

    /// Appends a record under `key` in the online storage.
    pub fn update_online_storage(&mut self, reader: u32, key: &str, b: String) {
        let now = Utc::now();
        self.online_storage
            .storage
            .entry(key.to_string())
            .or_default()
            .push(StorageEntry {
                reader,
                timestamp: now,
                b,
            });
        self.online_storage.events.push(TagEvent {
            reader,
            kind: EventKind::Read,
            msg: format!(
                "reader {} updated online storage for tag {} at {} with ID {}",
                reader,
                self.id,
                now.to_rfc3339(),
                key
            ),
            timestamp: now,
        });
    }

    /// First stored record for `key`, if any.
    pub fn online_storage_first(&self, key: &str) -> Option<&StorageEntry> {
        self.online_storage.storage.get(key).and_then(|v| v.first())
    }

    /// Path of this tag's serialization inside `dir`.
    pub fn file_path(dir: &Path, id: u32) -> PathBuf {
        dir.join(format!("{}.tag", id))
    }

    /// Atomically persists the tag to `<dir>/<id>.tag` (temp + rename).
    pub fn save(&self, dir: &Path) -> Result<()> {
        let path = Tag::file_path(dir, self.id);
        let tmp = path.with_extension("tag.tmp");
        let json = serde_json::to_vec_pretty(self)?;
        fs::write(&tmp, &json)?;
        fs::rename(&tmp, &path)?;
        log::debug!("persisted tag {} to {}", self.id, path.display());
        Ok(())
    }

    /// Loads `<dir>/<id>.tag`, rejecting oversized files and unknown
    /// fields.
    pub fn load(dir: &Path, id: u32) -> Result<Self> {
        let path = Tag::file_path(dir, id);
        let meta = fs::metadata(&path)?;
        if meta.len() > MAX_TAG_FILE_BYTES {
            return Err(TagTrailError::TagParse(format!(
                "tag file {} is {} bytes, cap is {}",
                path.display(),
                meta.len(),
                MAX_TAG_FILE_BYTES
            )));
        }
        let json = fs::read(&path)?;
        let tag: Tag = serde_json::from_slice(&json)?;
        Ok(tag)
    }
}

/// Exclusive advisory lock over a tag file, held for the duration of an
/// update. Created with `create_new`, removed on drop.
pub struct TagLock {
    path: PathBuf,
}

impl TagLock {
    pub fn acquire(dir: &Path, id: u32) -> Result<Self> {
        let path = dir.join(format!("{}.tag.lock", id));
        match fs::OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(_) => Ok(Self { path }),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                Err(TagTrailError::TagLocked(id))
            }
            Err(e) => Err(e.into()),
        }
    }
}

impl Drop for TagLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}
