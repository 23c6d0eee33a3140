use std::collections::HashSet;
use std::ffi::OsString;
use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result};
use ignore::gitignore::{Gitignore, GitignoreBuilder};
use ignore::Match;

/// Name of the per-repo ignore file, gitignore syntax.
pub const IGNORE_FILE: &str = ".osgrepignore";

/// Enumerates indexable files under a root.
///
/// Precedence, first match wins: hidden path segments are always excluded;
/// then custom patterns plus `.osgrepignore`; then, when the root is a git
/// repository, the tracked-file listing is preferred and git's own ignore
/// rules apply. Nested repositories found during traversal are enumerated
/// via their own tracked-file listing.
pub struct Walker {
    root: PathBuf,
    root_canonical: PathBuf,
    matcher: Gitignore,
}

impl Walker {
    pub fn new(root: &Path, custom_patterns: &[String]) -> Result<Self> {
        let root_canonical = root
            .canonicalize()
            .with_context(|| format!("cannot resolve root {}", root.display()))?;

        let mut builder = GitignoreBuilder::new(root);
        for pattern in custom_patterns {
            // Malformed patterns are skipped, matching gitignore behavior.
            let _ = builder.add_line(None, pattern);
        }
        let ignore_file = root.join(IGNORE_FILE);
        if ignore_file.exists() {
            let _ = builder.add(&ignore_file);
        }
        let matcher = builder
            .build()
            .unwrap_or_else(|_| Gitignore::empty());

        Ok(Self {
            root: root.to_path_buf(),
            root_canonical,
            matcher,
        })
    }

    /// All indexable files under the root, as absolute paths. Broken
    /// symlinks and unreadable directories are silently skipped; symlinked
    /// directories are followed at most once via a canonical-path visited
    /// set.
    pub fn files(&self) -> Vec<PathBuf> {
        let mut out = Vec::new();
        let mut visited = HashSet::new();
        self.visit_dir(&self.root, &mut visited, &mut out);
        out
    }

    /// Whether `path` is excluded from indexing. Consults the hidden-segment
    /// rule, custom patterns and `.osgrepignore`, and the root repository's
    /// git ignore rules, in that order. Paths resolving outside the root are
    /// ignored; the root itself never is.
    pub fn is_ignored(&self, path: &Path) -> bool {
        let rel = match self.relative_to_root(path) {
            Some(rel) => rel,
            None => return true,
        };
        if rel.as_os_str().is_empty() {
            return false;
        }
        if let Some(matched) = self.match_rules(&rel, path.is_dir()) {
            return matched;
        }
        if let Ok(repo) = git2::Repository::open(&self.root) {
            let abs = self.root.join(&rel);
            if repo.is_path_ignored(&abs).unwrap_or(false) {
                return true;
            }
        }
        false
    }

    /// Hidden-segment and pattern rules only (no git consultation); used on
    /// the traversal hot path where tracked-file enumeration already embodies
    /// git's view. `Some(true)` = excluded, `Some(false)` = whitelisted.
    fn match_rules(&self, rel: &Path, is_dir: bool) -> Option<bool> {
        if has_hidden_segment(rel) {
            return Some(true);
        }
        match self.matcher.matched(rel, is_dir) {
            Match::Ignore(_) => Some(true),
            Match::Whitelist(_) => Some(false),
            Match::None => None,
        }
    }

    fn excluded(&self, path: &Path, is_dir: bool) -> bool {
        match self.relative_to_root(path) {
            Some(rel) if rel.as_os_str().is_empty() => false,
            Some(rel) => self.match_rules(&rel, is_dir).unwrap_or(false),
            None => true,
        }
    }

    /// Lexically resolve `path` against the root. `None` means the path
    /// escapes the root via `..`.
    fn relative_to_root(&self, path: &Path) -> Option<PathBuf> {
        let stripped = if path.is_absolute() {
            path.strip_prefix(&self.root)
                .or_else(|_| path.strip_prefix(&self.root_canonical))
                .ok()?
        } else {
            path
        };
        let mut stack: Vec<OsString> = Vec::new();
        for comp in stripped.components() {
            match comp {
                Component::CurDir => {}
                Component::ParentDir => {
                    stack.pop()?;
                }
                Component::Normal(c) => stack.push(c.to_os_string()),
                _ => return None,
            }
        }
        Some(stack.iter().collect())
    }

    fn visit_dir(&self, dir: &Path, visited: &mut HashSet<PathBuf>, out: &mut Vec<PathBuf>) {
        let canon = match dir.canonicalize() {
            Ok(canon) => canon,
            Err(_) => return,
        };
        if !canon.starts_with(&self.root_canonical) {
            return;
        }
        if !visited.insert(canon) {
            return;
        }
        if dir != self.root && self.excluded(dir, true) {
            return;
        }
        if let Ok(repo) = git2::Repository::open(dir) {
            if self.visit_repo(&repo, dir, visited, out) {
                return;
            }
            // Empty tracked listing (seen on very large repos): raw walk.
            tracing::debug!("git listing empty for {}, falling back to raw walk", dir.display());
        }
        self.visit_entries(dir, visited, out);
    }

    /// Enumerate a repository via its index. Returns false when the listing
    /// is empty so the caller can fall back to a raw walk.
    fn visit_repo(
        &self,
        repo: &git2::Repository,
        dir: &Path,
        visited: &mut HashSet<PathBuf>,
        out: &mut Vec<PathBuf>,
    ) -> bool {
        let index = match repo.index() {
            Ok(index) => index,
            Err(_) => return false,
        };
        let mut listed = 0usize;
        for entry in index.iter() {
            listed += 1;
            let rel = PathBuf::from(String::from_utf8_lossy(&entry.path).as_ref());
            let abs = dir.join(rel);
            // Submodule entries and staged deletions are not regular files.
            if abs.is_file() && !self.excluded(&abs, false) {
                out.push(abs);
            }
        }
        if listed == 0 {
            return false;
        }
        self.scan_nested_repos(dir, visited, out);
        true
    }

    /// Tracked-file listings do not cover nested repositories; scan the
    /// directory tree for them so each is enumerated by its own listing.
    fn scan_nested_repos(
        &self,
        dir: &Path,
        visited: &mut HashSet<PathBuf>,
        out: &mut Vec<PathBuf>,
    ) {
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(_) => return,
        };
        let mut dirs: Vec<PathBuf> = entries.flatten().map(|e| e.path()).collect();
        dirs.sort();
        for path in dirs {
            let meta = match std::fs::metadata(&path) {
                Ok(meta) => meta,
                Err(_) => continue,
            };
            if !meta.is_dir() || self.excluded(&path, true) {
                continue;
            }
            if path.join(".git").exists() {
                self.visit_dir(&path, visited, out);
            } else {
                let canon = match path.canonicalize() {
                    Ok(canon) => canon,
                    Err(_) => continue,
                };
                if !canon.starts_with(&self.root_canonical) || !visited.insert(canon) {
                    continue;
                }
                self.scan_nested_repos(&path, visited, out);
            }
        }
    }

    /// Raw directory walk used outside repositories and as the large-repo
    /// fallback. Symlinks are followed through `fs::metadata`.
    fn visit_entries(&self, dir: &Path, visited: &mut HashSet<PathBuf>, out: &mut Vec<PathBuf>) {
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(_) => return,
        };
        let mut paths: Vec<PathBuf> = entries.flatten().map(|e| e.path()).collect();
        paths.sort();
        for path in paths {
            let meta = match std::fs::metadata(&path) {
                Ok(meta) => meta,
                Err(_) => continue, // broken symlink or permission error
            };
            if meta.is_file() {
                if !self.excluded(&path, false) {
                    out.push(path);
                }
            } else if meta.is_dir() {
                self.visit_dir(&path, visited, out);
            }
        }
    }
}

fn has_hidden_segment(rel: &Path) -> bool {
    rel.components().any(|c| match c {
        Component::Normal(name) => name.to_string_lossy().starts_with('.'),
        _ => false,
    })
}
