//! Durable key -> record map backing change detection.
//!
//! The whole map is one JSON object written atomically (tmp then rename).
//! Loads tolerate a corrupt or missing main file by consulting the tmp file
//! left behind by an interrupted save.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use parking_lot::RwLock;

use crate::error::CoreError;
use crate::models::FileMetaEntry;

pub struct MetaStore {
    path: PathBuf,
    entries: RwLock<HashMap<String, FileMetaEntry>>,
    /// Serializes saves; an errored save releases the lock, so one failure
    /// never blocks later saves.
    save_lock: tokio::sync::Mutex<()>,
}

impl MetaStore {
    /// Load the meta map from `path`. A corrupt main file falls back to the
    /// tmp file, which is promoted by copy when it parses; failing both, the
    /// store starts empty. `load` never fails on bad content.
    pub fn load(path: &Path) -> Self {
        let entries = match read_entries(path) {
            Ok(entries) => entries,
            Err(err) => {
                let tmp = tmp_path(path);
                match read_entries(&tmp) {
                    Ok(entries) => {
                        tracing::warn!(
                            "meta file unreadable ({err}); recovered {} entries from {}",
                            entries.len(),
                            tmp.display()
                        );
                        if let Err(copy_err) = std::fs::copy(&tmp, path) {
                            tracing::warn!("failed to promote {}: {copy_err}", tmp.display());
                        }
                        entries
                    }
                    Err(_) => {
                        if path.exists() {
                            tracing::warn!(
                                "{}; starting empty",
                                CoreError::CorruptMeta(err.to_string())
                            );
                        }
                        HashMap::new()
                    }
                }
            }
        };

        Self {
            path: path.to_path_buf(),
            entries: RwLock::new(entries),
            save_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn get(&self, path: &str) -> Option<FileMetaEntry> {
        self.entries.read().get(path).cloned()
    }

    pub fn set(&self, path: &str, entry: FileMetaEntry) {
        self.entries.write().insert(path.to_string(), entry);
    }

    pub fn delete(&self, path: &str) {
        self.entries.write().remove(path);
    }

    /// Remove every key under a directory. The prefix is suffixed with the
    /// platform separator when absent so `/repo/src` cannot match
    /// `/repo/src-old/lib.rs`.
    pub fn delete_by_prefix(&self, prefix: &str) {
        let sep = std::path::MAIN_SEPARATOR;
        let mut prefix = prefix.to_string();
        if !prefix.ends_with(sep) {
            prefix.push(sep);
        }
        self.entries
            .write()
            .retain(|key, _| !key.starts_with(&prefix));
    }

    /// Snapshot for change detection; reads never block saves.
    pub fn snapshot(&self) -> HashMap<String, FileMetaEntry> {
        self.entries.read().clone()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Persist the map: write `<meta>.tmp`, then rename over the main file.
    /// Concurrent saves queue on the save lock.
    pub async fn save(&self) -> Result<()> {
        let _guard = self.save_lock.lock().await;
        let json = {
            let entries = self.entries.read();
            serde_json::to_string(&*entries).context("serialize meta map")?
        };
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create {}", parent.display()))?;
        }
        let tmp = tmp_path(&self.path);
        std::fs::write(&tmp, json).with_context(|| format!("write {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("rename {} over {}", tmp.display(), self.path.display()))?;
        Ok(())
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut os = path.as_os_str().to_os_string();
    os.push(".tmp");
    PathBuf::from(os)
}

fn read_entries(path: &Path) -> Result<HashMap<String, FileMetaEntry>> {
    let data = std::fs::read_to_string(path)
        .with_context(|| format!("read {}", path.display()))?;
    serde_json::from_str(&data).with_context(|| format!("parse {}", path.display()))
}
