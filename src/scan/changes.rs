use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use anyhow::{Context, Result};

use crate::models::{content_hash, FileMetaEntry};

/// Outcome of comparing the previous meta map against a fresh traversal.
#[derive(Debug, Default)]
pub struct ChangeSet {
    pub added: Vec<PathBuf>,
    pub modified: Vec<PathBuf>,
    /// Keys of meta entries whose files no longer exist.
    pub deleted: Vec<String>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.modified.is_empty() && self.deleted.is_empty()
    }
}

/// Compare previous per-file meta against the current traversal.
///
/// A file is modified when its size differs, or its mtime differs *and* its
/// content hash differs. The hash is only computed when size or mtime moved,
/// so unchanged files are never read.
pub fn detect_changes(prev: &HashMap<String, FileMetaEntry>, files: &[PathBuf]) -> ChangeSet {
    let mut set = ChangeSet::default();
    let current: std::collections::HashSet<String> = files
        .iter()
        .map(|p| p.to_string_lossy().into_owned())
        .collect();

    for path in files {
        let key = path.to_string_lossy();
        let entry = match prev.get(key.as_ref()) {
            Some(entry) => entry,
            None => {
                set.added.push(path.clone());
                continue;
            }
        };
        let meta = match std::fs::metadata(path) {
            Ok(meta) => meta,
            Err(_) => continue, // disappeared mid-scan; the next pass deletes it
        };
        if meta.len() != entry.size {
            set.modified.push(path.clone());
        } else if mtime_ms(&meta) != entry.mtime_ms {
            match file_hash(path) {
                Ok(hash) if hash != entry.hash => set.modified.push(path.clone()),
                _ => {}
            }
        }
    }

    for key in prev.keys() {
        if !current.contains(key) {
            set.deleted.push(key.clone());
        }
    }
    set.deleted.sort();

    set
}

/// Stat a file into a meta entry, hashing its content.
pub fn stat_entry(path: &Path) -> Result<FileMetaEntry> {
    let meta = std::fs::metadata(path)
        .with_context(|| format!("cannot stat {}", path.display()))?;
    Ok(FileMetaEntry {
        hash: file_hash(path)?,
        mtime_ms: mtime_ms(&meta),
        size: meta.len(),
    })
}

pub fn file_hash(path: &Path) -> Result<String> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("cannot read {}", path.display()))?;
    Ok(content_hash(&bytes))
}

fn mtime_ms(meta: &std::fs::Metadata) -> u64 {
    meta.modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn keyed(path: &Path, entry: FileMetaEntry) -> HashMap<String, FileMetaEntry> {
        let mut map = HashMap::new();
        map.insert(path.to_string_lossy().into_owned(), entry);
        map
    }

    #[test]
    fn test_new_file_is_added() {
        let dir = tempfile::tempdir().unwrap();
        let f = dir.path().join("a.rs");
        fs::write(&f, "fn a() {}").unwrap();

        let set = detect_changes(&HashMap::new(), &[f.clone()]);
        assert_eq!(set.added, vec![f]);
        assert!(set.modified.is_empty());
        assert!(set.deleted.is_empty());
    }

    #[test]
    fn test_unchanged_file_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let f = dir.path().join("a.rs");
        fs::write(&f, "fn a() {}").unwrap();
        let entry = stat_entry(&f).unwrap();

        let set = detect_changes(&keyed(&f, entry), &[f]);
        assert!(set.is_empty());
    }

    #[test]
    fn test_size_change_is_modified_without_hashing() {
        let dir = tempfile::tempdir().unwrap();
        let f = dir.path().join("a.rs");
        fs::write(&f, "fn a() {}").unwrap();
        let mut entry = stat_entry(&f).unwrap();
        entry.size += 1;
        // Hash left equal: size alone must trigger the modification.
        let set = detect_changes(&keyed(&f, entry), &[f.clone()]);
        assert_eq!(set.modified, vec![f]);
    }

    #[test]
    fn test_mtime_change_with_same_hash_is_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let f = dir.path().join("a.rs");
        fs::write(&f, "fn a() {}").unwrap();
        let mut entry = stat_entry(&f).unwrap();
        entry.mtime_ms = entry.mtime_ms.wrapping_add(1234);

        let set = detect_changes(&keyed(&f, entry), &[f]);
        assert!(set.modified.is_empty());
    }

    #[test]
    fn test_mtime_and_hash_change_is_modified() {
        let dir = tempfile::tempdir().unwrap();
        let f = dir.path().join("a.rs");
        fs::write(&f, "fn a() {}").unwrap();
        let mut entry = stat_entry(&f).unwrap();
        entry.mtime_ms = entry.mtime_ms.wrapping_add(1234);
        entry.hash = "different".into();

        let set = detect_changes(&keyed(&f, entry), &[f.clone()]);
        assert_eq!(set.modified, vec![f]);
    }

    #[test]
    fn test_missing_file_is_deleted() {
        let dir = tempfile::tempdir().unwrap();
        let gone = dir.path().join("gone.rs");
        let map = keyed(
            &gone,
            FileMetaEntry {
                hash: "h".into(),
                mtime_ms: 1,
                size: 1,
            },
        );

        let set = detect_changes(&map, &[]);
        assert_eq!(set.deleted, vec![gone.to_string_lossy().into_owned()]);
    }
}
