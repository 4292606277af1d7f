//! Durable key-value stores backing the second cache tier.
//!
//! The cache only needs string keys and string values plus prefix listing,
//! so any persistent backend fits behind [`DurableStore`]. Two ship with the
//! crate:
//!
//! - [`MemoryStore`]: process-local map with an optional byte quota. Useful
//!   in tests and as a stand-in where no disk is available.
//! - [`FileStore`]: one JSON file per key under a directory (requires the
//!   `file-store` feature for the default location; the type itself is
//!   always available).
//!
//! Every method is fallible. The cache treats errors as misses or no-op
//! writes, so implementations should report failures rather than retry.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::{GovernorError, Result};

/// Persistent string key-value storage for the durable cache tier.
#[async_trait]
pub trait DurableStore: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Read a value. `Ok(None)` when the key is absent.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Write (or overwrite) a value.
    async fn set(&self, key: &str, value: String) -> Result<()>;

    /// Remove a value. Removing an absent key is not an error.
    async fn delete(&self, key: &str) -> Result<()>;

    /// List all keys starting with `prefix`.
    async fn keys(&self, prefix: &str) -> Result<Vec<String>>;
}

// ============================================================================
// MemoryStore
// ============================================================================

/// In-process [`DurableStore`].
///
/// Optionally enforces a byte quota (sum of key and value lengths), failing
/// writes with [`GovernorError::StorageFull`] once it would be exceeded, and
/// can be switched into an unavailable state where every call fails.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
    quota_bytes: Option<usize>,
    unavailable: AtomicBool,
}

impl MemoryStore {
    /// Create an unbounded store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store that rejects writes beyond `quota_bytes`.
    pub fn with_quota(quota_bytes: usize) -> Self {
        Self {
            quota_bytes: Some(quota_bytes),
            ..Self::default()
        }
    }

    /// Make every subsequent call fail (or succeed again).
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of stored keys.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(GovernorError::Storage("memory store unavailable".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl DurableStore for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.check_available()?;
        Ok(self.entries.lock().get(key).cloned())
    }

    async fn set(&self, key: &str, value: String) -> Result<()> {
        self.check_available()?;
        let mut entries = self.entries.lock();
        if let Some(quota) = self.quota_bytes {
            let used: usize = entries
                .iter()
                .filter(|(k, _)| k.as_str() != key)
                .map(|(k, v)| k.len() + v.len())
                .sum();
            if used + key.len() + value.len() > quota {
                return Err(GovernorError::StorageFull { key: key.to_owned() });
            }
        }
        entries.insert(key.to_owned(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.check_available()?;
        self.entries.lock().remove(key);
        Ok(())
    }

    async fn keys(&self, prefix: &str) -> Result<Vec<String>> {
        self.check_available()?;
        Ok(self
            .entries
            .lock()
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }
}

// ============================================================================
// FileStore
// ============================================================================

/// File extension for stored records.
const RECORD_EXTENSION: &str = "json";

/// Sequence for temporary file names, unique within the process.
static TMP_SEQ: AtomicU64 = AtomicU64::new(0);

/// Filesystem-backed [`DurableStore`]: one file per key.
///
/// Keys are percent-encoded into file names so arbitrary key characters
/// (`:` in particular) are safe on every platform. Writes go to a temporary
/// file first and are renamed into place, so readers never observe a
/// half-written record.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Store records under `dir`. The directory is created on first write.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Store under the platform cache directory:
    /// `~/.cache/vedrfolnir/responses` on Linux.
    #[cfg(feature = "file-store")]
    pub fn default_location() -> Self {
        Self::new(default_store_dir())
    }

    /// Directory holding the records.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir
            .join(format!("{}.{RECORD_EXTENSION}", encode_key(key)))
    }

    /// A temporary path no other writer (in this or another process) uses.
    fn tmp_path_for(&self, key: &str) -> PathBuf {
        let seq = TMP_SEQ.fetch_add(1, Ordering::Relaxed);
        self.dir.join(format!(
            "{}.{}-{seq}.tmp",
            encode_key(key),
            std::process::id()
        ))
    }
}

/// Default durable store directory.
#[cfg(feature = "file-store")]
pub fn default_store_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from(".cache"))
        .join("vedrfolnir")
        .join("responses")
}

fn map_io(key: &str, e: std::io::Error) -> GovernorError {
    if e.kind() == ErrorKind::StorageFull {
        GovernorError::StorageFull { key: key.to_owned() }
    } else {
        GovernorError::Io(e)
    }
}

#[async_trait]
impl DurableStore for FileStore {
    fn name(&self) -> &str {
        "file"
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        match tokio::fs::read_to_string(self.path_for(key)).await {
            Ok(raw) => Ok(Some(raw)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(map_io(key, e)),
        }
    }

    async fn set(&self, key: &str, value: String) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| map_io(key, e))?;
        let path = self.path_for(key);
        let tmp = self.tmp_path_for(key);
        let written = match tokio::fs::write(&tmp, value).await {
            Ok(()) => tokio::fs::rename(&tmp, &path).await,
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(map_io(key, e));
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        match tokio::fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(map_io(key, e)),
        }
    }

    async fn keys(&self, prefix: &str) -> Result<Vec<String>> {
        let mut dir = match tokio::fs::read_dir(&self.dir).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(GovernorError::Io(e)),
        };
        let mut keys = Vec::new();
        while let Some(entry) = dir.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(RECORD_EXTENSION) {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if let Some(key) = decode_key(stem) {
                if key.starts_with(prefix) {
                    keys.push(key);
                }
            }
        }
        Ok(keys)
    }
}

/// Percent-encode everything outside `[A-Za-z0-9_.~-]`.
fn encode_key(key: &str) -> String {
    urlencoding::encode(key).into_owned()
}

fn decode_key(name: &str) -> Option<String> {
    urlencoding::decode(name).ok().map(|key| key.into_owned())
}
