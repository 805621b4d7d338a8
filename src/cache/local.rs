//! On-disk, content-addressed audio store.
//!
//! Layout: `<dir>/<key>.<ext>` for audio plus `<dir>/index.json` mapping each
//! key to its file, creation time and size. Files and the index are written to
//! a temporary name first and renamed into place, so a crash leaves either the
//! old state or the new one.

use super::key::CacheKey;
use crate::tts::AudioFormat;
use crate::{Error, ErrorContext, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

const INDEX_FILE: &str = "index.json";
const INDEX_VERSION: u32 = 1;
const TMP_SUFFIX: &str = ".tmp";

pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// One cached synthesis result. Immutable once written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    /// File name relative to the store directory.
    pub file_name: String,
    pub created_at_ms: u64,
    pub size_bytes: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entry_count: usize,
    pub total_size_bytes: u64,
    /// Creation time (unix ms) of the oldest entry.
    pub oldest_entry: Option<u64>,
    /// Creation time (unix ms) of the newest entry.
    pub newest_entry: Option<u64>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CacheIndex {
    version: u32,
    entries: HashMap<String, CacheEntry>,
}

/// Result of the startup consistency check.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RepairReport {
    /// Index entries dropped because their file was gone.
    pub stale_entries: usize,
    /// Store-named audio or temp files deleted because nothing referenced them.
    pub orphan_files: usize,
}

pub struct LocalAudioStore {
    dir: PathBuf,
    index: Mutex<CacheIndex>,
}

impl LocalAudioStore {
    /// Open (or create) a store rooted at `dir` and repair any drift between
    /// the index and the files on disk.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;
        let index = Self::load_index(&dir).await;
        let store = Self {
            dir,
            index: Mutex::new(index),
        };
        let report = store.repair().await?;
        if report != RepairReport::default() {
            info!(
                stale_entries = report.stale_entries,
                orphan_files = report.orphan_files,
                dir = %store.dir.display(),
                "repaired local audio cache"
            );
        }
        Ok(store)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    async fn load_index(dir: &Path) -> CacheIndex {
        let path = dir.join(INDEX_FILE);
        let raw = match tokio::fs::read(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return CacheIndex {
                    version: INDEX_VERSION,
                    entries: HashMap::new(),
                }
            }
            Err(e) => {
                warn!(error = %e, path = %path.display(), "unreadable cache index, starting empty");
                return CacheIndex {
                    version: INDEX_VERSION,
                    entries: HashMap::new(),
                };
            }
        };
        match serde_json::from_slice::<CacheIndex>(&raw) {
            Ok(index) if index.version == INDEX_VERSION => index,
            Ok(index) => {
                warn!(version = index.version, "unsupported cache index version, starting empty");
                CacheIndex {
                    version: INDEX_VERSION,
                    entries: HashMap::new(),
                }
            }
            Err(e) => {
                warn!(error = %e, "corrupt cache index, starting empty");
                CacheIndex {
                    version: INDEX_VERSION,
                    entries: HashMap::new(),
                }
            }
        }
    }

    /// Drop entries whose file vanished and delete files nothing references.
    ///
    /// Only names this store writes (`<sha256 hex>.<ext>` and `.<uuid>.tmp`)
    /// are candidates; anything else in the directory is left alone.
    pub async fn repair(&self) -> Result<RepairReport> {
        let mut index = self.index.lock().await;
        let mut report = RepairReport::default();

        let mut stale = Vec::new();
        for (key, entry) in index.entries.iter() {
            if !file_exists(&self.dir.join(&entry.file_name)).await {
                stale.push(key.clone());
            }
        }
        for key in &stale {
            debug!(cache_key = %key, "dropping index entry without backing file");
            index.entries.remove(key);
        }
        report.stale_entries = stale.len();

        let referenced: std::collections::HashSet<&str> =
            index.entries.values().map(|e| e.file_name.as_str()).collect();
        let mut dir = tokio::fs::read_dir(&self.dir).await?;
        let mut orphans = Vec::new();
        while let Some(item) = dir.next_entry().await? {
            let name = item.file_name().to_string_lossy().into_owned();
            if name == INDEX_FILE || referenced.contains(name.as_str()) {
                continue;
            }
            if is_store_file(&name) {
                orphans.push(item.path());
            }
        }
        for path in orphans {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => report.orphan_files += 1,
                Err(e) => warn!(error = %e, path = %path.display(), "failed to delete orphan cache file"),
            }
        }

        if report.stale_entries > 0 {
            self.persist(&index).await?;
        }
        Ok(report)
    }

    /// Location of the cached audio, or `None` on a miss.
    ///
    /// An entry whose file disappeared is removed from the index and treated
    /// as a miss.
    pub async fn get(&self, key: &CacheKey) -> Result<Option<PathBuf>> {
        let mut index = self.index.lock().await;
        let Some(entry) = index.entries.get(key.as_str()) else {
            return Ok(None);
        };
        let path = self.dir.join(&entry.file_name);
        if file_exists(&path).await {
            return Ok(Some(path));
        }
        debug!(cache_key = %key, "cached file missing, evicting stale entry");
        index.entries.remove(key.as_str());
        self.persist(&index).await?;
        Ok(None)
    }

    pub async fn entry(&self, key: &CacheKey) -> Option<CacheEntry> {
        self.index.lock().await.entries.get(key.as_str()).cloned()
    }

    /// Write audio for `key` and record it in the index.
    pub async fn put(&self, key: &CacheKey, bytes: &[u8], format: AudioFormat) -> Result<PathBuf> {
        validate_key(key)?;
        let file_name = format!("{}.{}", key.as_str(), format.extension());
        let path = self.dir.join(&file_name);

        let mut index = self.index.lock().await;
        write_atomic(&self.dir, &path, bytes).await?;

        let entry = CacheEntry {
            key: key.hash.clone(),
            file_name: file_name.clone(),
            created_at_ms: now_ms(),
            size_bytes: bytes.len() as u64,
        };
        let previous = index.entries.insert(key.hash.clone(), entry);
        if let Err(e) = self.persist(&index).await {
            // Roll back so the index never points at a half-recorded entry.
            match previous {
                Some(prev) => {
                    index.entries.insert(key.hash.clone(), prev);
                }
                None => {
                    index.entries.remove(key.as_str());
                    let _ = tokio::fs::remove_file(&path).await;
                }
            }
            return Err(e);
        }
        debug!(cache_key = %key, bytes = bytes.len(), "stored audio locally");
        Ok(path)
    }

    pub async fn remove(&self, key: &CacheKey) -> Result<bool> {
        let mut index = self.index.lock().await;
        let Some(entry) = index.entries.remove(key.as_str()) else {
            return Ok(false);
        };
        remove_if_exists(&self.dir.join(&entry.file_name)).await?;
        self.persist(&index).await?;
        Ok(true)
    }

    /// Remove entries older than `max_age`, returning how many were evicted.
    pub async fn evict_older_than(&self, max_age: Duration) -> Result<usize> {
        let cutoff = now_ms().saturating_sub(max_age.as_millis() as u64);
        self.evict_created_before(cutoff).await
    }

    /// Remove entries created strictly before `cutoff_ms` (unix ms).
    pub async fn evict_created_before(&self, cutoff_ms: u64) -> Result<usize> {
        let mut index = self.index.lock().await;
        let expired: Vec<CacheEntry> = index
            .entries
            .values()
            .filter(|e| e.created_at_ms < cutoff_ms)
            .cloned()
            .collect();
        if expired.is_empty() {
            return Ok(0);
        }
        let (removed, failed) = self.remove_entries(&mut index, &expired).await;
        self.persist(&index).await?;
        if let Some(e) = failed {
            return Err(e);
        }
        info!(evicted = removed, "evicted expired audio cache entries");
        Ok(removed)
    }

    /// Remove every entry and file.
    pub async fn clear(&self) -> Result<usize> {
        let mut index = self.index.lock().await;
        let all: Vec<CacheEntry> = index.entries.values().cloned().collect();
        let (removed, failed) = self.remove_entries(&mut index, &all).await;
        self.persist(&index).await?;
        if let Some(e) = failed {
            return Err(e);
        }
        info!(removed, "cleared local audio cache");
        Ok(removed)
    }

    /// Delete each entry's file, dropping it from the index only once the file
    /// is gone. Returns the number removed and the first failure, if any.
    async fn remove_entries(
        &self,
        index: &mut CacheIndex,
        entries: &[CacheEntry],
    ) -> (usize, Option<Error>) {
        let mut removed = 0;
        let mut failed = None;
        for entry in entries {
            match remove_if_exists(&self.dir.join(&entry.file_name)).await {
                Ok(()) => {
                    index.entries.remove(&entry.key);
                    removed += 1;
                }
                Err(e) => {
                    warn!(cache_key = %entry.key, error = %e, "failed to delete cached audio");
                    failed.get_or_insert(e);
                }
            }
        }
        (removed, failed)
    }

    pub async fn len(&self) -> usize {
        self.index.lock().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn stats(&self) -> CacheStats {
        let index = self.index.lock().await;
        let entries = index.entries.values();
        CacheStats {
            entry_count: index.entries.len(),
            total_size_bytes: entries.clone().map(|e| e.size_bytes).sum(),
            oldest_entry: entries.clone().map(|e| e.created_at_ms).min(),
            newest_entry: entries.map(|e| e.created_at_ms).max(),
        }
    }

    async fn persist(&self, index: &CacheIndex) -> Result<()> {
        let data = serde_json::to_vec_pretty(index)?;
        write_atomic(&self.dir, &self.dir.join(INDEX_FILE), &data).await
    }

    #[cfg(test)]
    pub(crate) async fn backdate(&self, key: &CacheKey, created_at_ms: u64) {
        if let Some(entry) = self.index.lock().await.entries.get_mut(key.as_str()) {
            entry.created_at_ms = created_at_ms;
        }
    }
}

fn validate_key(key: &CacheKey) -> Result<()> {
    if key.hash.is_empty() || !key.hash.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(Error::validation_with_context(
            "cache key must be a non-empty alphanumeric digest",
            ErrorContext::new()
                .with_cache_key(key.hash.clone())
                .with_source("local_store"),
        ));
    }
    Ok(())
}

/// True for names `write_atomic` and `put` produce.
fn is_store_file(name: &str) -> bool {
    if let Some(id) = name
        .strip_prefix('.')
        .and_then(|rest| rest.strip_suffix(TMP_SUFFIX))
    {
        return uuid::Uuid::parse_str(id).is_ok();
    }
    let Some((stem, ext)) = name.split_once('.') else {
        return false;
    };
    stem.len() == 64
        && stem.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
        && ["mp3", "opus", "aac", "flac", "wav", "pcm"].contains(&ext)
}

async fn file_exists(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_file())
        .unwrap_or(false)
}

async fn remove_if_exists(path: &Path) -> Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

async fn write_atomic(dir: &Path, target: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = dir.join(format!(".{}{}", uuid::Uuid::new_v4(), TMP_SUFFIX));
    if let Err(e) = tokio::fs::write(&tmp, bytes).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e.into());
    }
    if let Err(e) = tokio::fs::rename(&tmp, target).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e.into());
    }
    Ok(())
}
