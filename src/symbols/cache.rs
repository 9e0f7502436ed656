//! Content-addressed persistent cache of per-file symbol trees.
//!
//! Records are keyed by `(file_path, content_hash, ls_id)` and stored one
//! file per key under the cache directory. The cache is strictly an
//! optimization: every failure path (missing file, bad JSON, schema-version
//! mismatch) downgrades to a miss, and losing the directory never changes
//! observable behavior.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::model::SymbolTree;

/// Bumped whenever the record layout or the hash algorithm changes; records
/// from other versions read as misses.
pub const SCHEMA_VERSION: u32 = 1;

/// Directory under the project root holding persisted state.
pub const STATE_DIR: &str = ".serena";

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// SHA-256 of a file's raw bytes, lowercase hex.
pub fn content_hash(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Identifies one cache record.
#[derive(Debug, Clone, Copy)]
pub struct CacheKey<'a> {
    /// Absolute path of the source file.
    pub file_path: &'a Path,
    /// Content hash the symbols were produced from.
    pub content_hash: &'a str,
    /// Identity of the producing language server.
    pub ls_id: &'a str,
}

/// On-disk record envelope; self-describing so stale layouts can be skipped.
#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    schema_version: u32,
    file_path: PathBuf,
    content_hash: String,
    ls_id: String,
    produced_at: u64,
    symbols: SymbolTree,
}

/// Disk-backed symbol tree cache.
#[derive(Debug, Clone)]
pub struct SymbolCache {
    dir: PathBuf,
}

impl SymbolCache {
    /// Cache rooted at an explicit directory.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Cache at the conventional location under a project root.
    pub fn for_project(root: &Path) -> Self {
        Self::new(root.join(STATE_DIR).join("cache"))
    }

    /// The cache directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_path(&self, key: &CacheKey<'_>) -> PathBuf {
        let mut hasher = Sha256::new();
        hasher.update(key.file_path.as_os_str().as_encoded_bytes());
        hasher.update([0]);
        hasher.update(key.content_hash.as_bytes());
        hasher.update([0]);
        hasher.update(key.ls_id.as_bytes());
        self.dir.join(format!("{:x}.symbols", hasher.finalize()))
    }

    /// Looks up a record. Absence, unreadable JSON and schema mismatches are
    /// all misses.
    pub fn get(&self, key: &CacheKey<'_>) -> Option<SymbolTree> {
        let path = self.record_path(key);
        let bytes = std::fs::read(&path).ok()?;
        let envelope: Envelope = match serde_json::from_slice(&bytes) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::debug!(record = %path.display(), error = %e, "unreadable cache record");
                return None;
            }
        };
        if envelope.schema_version != SCHEMA_VERSION
            || envelope.content_hash != key.content_hash
            || envelope.ls_id != key.ls_id
        {
            return None;
        }
        Some(envelope.symbols)
    }

    /// Stores a record atomically (temp file + rename). Racing writers for
    /// the same key are safe; the last rename wins. Errors are logged and
    /// swallowed.
    pub fn put(&self, key: &CacheKey<'_>, symbols: &SymbolTree) {
        let envelope = Envelope {
            schema_version: SCHEMA_VERSION,
            file_path: key.file_path.to_path_buf(),
            content_hash: key.content_hash.to_string(),
            ls_id: key.ls_id.to_string(),
            produced_at: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0),
            symbols: symbols.clone(),
        };
        if let Err(e) = self.write_record(key, &envelope) {
            tracing::warn!(
                file = %key.file_path.display(),
                error = %e,
                "failed to write symbol cache record"
            );
        }
    }

    fn write_record(&self, key: &CacheKey<'_>, envelope: &Envelope) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        let target = self.record_path(key);
        let temp = target.with_extension(format!(
            "tmp.{}.{}",
            std::process::id(),
            TEMP_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));
        let json = serde_json::to_vec(envelope)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(&temp, json)?;
        std::fs::rename(&temp, &target)
    }

    /// Removes every record for a file, regardless of content hash or
    /// producing server. Used after edits, deletes and renames.
    pub fn evict(&self, file_path: &Path) {
        let Ok(entries) = std::fs::read_dir(&self.dir) else {
            return;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("symbols") {
                continue;
            }
            let Ok(bytes) = std::fs::read(&path) else {
                continue;
            };
            let recorded = serde_json::from_slice::<serde_json::Value>(&bytes)
                .ok()
                .and_then(|v| v.get("file_path").and_then(|p| p.as_str().map(PathBuf::from)));
            if recorded.as_deref() == Some(file_path) {
                if let Err(e) = std::fs::remove_file(&path) {
                    tracing::debug!(record = %path.display(), error = %e, "failed to evict record");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbols::model::FindOptions;
    use lsp_types::{DocumentSymbol, DocumentSymbolResponse, Position, Range, SymbolKind};
    use tempfile::TempDir;

    fn sample_tree() -> SymbolTree {
        #[allow(deprecated)]
        let nested = vec![DocumentSymbol {
            name: "main".into(),
            detail: None,
            kind: SymbolKind::FUNCTION,
            tags: None,
            deprecated: None,
            range: Range {
                start: Position {
                    line: 0,
                    character: 0,
                },
                end: Position {
                    line: 1,
                    character: 1,
                },
            },
            selection_range: Range {
                start: Position {
                    line: 0,
                    character: 3,
                },
                end: Position {
                    line: 0,
                    character: 7,
                },
            },
            children: None,
        }];
        SymbolTree::from_response(&DocumentSymbolResponse::Nested(nested), "fn main() {\n}\n")
    }

    #[test]
    fn test_content_hash_stable() {
        let a = content_hash(b"hello");
        let b = content_hash(b"hello");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert_ne!(a, content_hash(b"hello "));
    }

    #[test]
    fn test_put_then_get() {
        let dir = TempDir::new().unwrap();
        let cache = SymbolCache::new(dir.path());
        let tree = sample_tree();
        let key = CacheKey {
            file_path: Path::new("/w/main.rs"),
            content_hash: "abc123",
            ls_id: "rust-analyzer",
        };

        assert!(cache.get(&key).is_none());
        cache.put(&key, &tree);
        let restored = cache.get(&key).unwrap();
        assert_eq!(restored, tree);
        assert_eq!(
            restored
                .find_by_name_path(&"main".parse().unwrap(), &FindOptions::default())
                .len(),
            1
        );
    }

    #[test]
    fn test_distinct_keys_do_not_collide() {
        let dir = TempDir::new().unwrap();
        let cache = SymbolCache::new(dir.path());
        let tree = sample_tree();
        let key_a = CacheKey {
            file_path: Path::new("/w/main.rs"),
            content_hash: "h1",
            ls_id: "rust-analyzer",
        };
        let key_b = CacheKey {
            file_path: Path::new("/w/main.rs"),
            content_hash: "h2",
            ls_id: "rust-analyzer",
        };
        let key_c = CacheKey {
            file_path: Path::new("/w/main.rs"),
            content_hash: "h1",
            ls_id: "pylsp",
        };
        cache.put(&key_a, &tree);
        assert!(cache.get(&key_b).is_none());
        assert!(cache.get(&key_c).is_none());
        assert!(cache.get(&key_a).is_some());
    }

    #[test]
    fn test_schema_mismatch_is_a_miss() {
        let dir = TempDir::new().unwrap();
        let cache = SymbolCache::new(dir.path());
        let tree = sample_tree();
        let key = CacheKey {
            file_path: Path::new("/w/main.rs"),
            content_hash: "abc",
            ls_id: "rust-analyzer",
        };
        cache.put(&key, &tree);

        // Rewrite the record with a bumped schema version.
        let record = cache.record_path(&key);
        let mut value: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&record).unwrap()).unwrap();
        value["schema_version"] = serde_json::json!(SCHEMA_VERSION + 1);
        std::fs::write(&record, serde_json::to_vec(&value).unwrap()).unwrap();

        assert!(cache.get(&key).is_none());
    }

    #[test]
    fn test_corrupt_record_is_a_miss() {
        let dir = TempDir::new().unwrap();
        let cache = SymbolCache::new(dir.path());
        let tree = sample_tree();
        let key = CacheKey {
            file_path: Path::new("/w/main.rs"),
            content_hash: "abc",
            ls_id: "rust-analyzer",
        };
        cache.put(&key, &tree);
        std::fs::write(cache.record_path(&key), b"not json").unwrap();
        assert!(cache.get(&key).is_none());
    }

    #[test]
    fn test_evict_removes_all_hashes_for_path() {
        let dir = TempDir::new().unwrap();
        let cache = SymbolCache::new(dir.path());
        let tree = sample_tree();
        let old = CacheKey {
            file_path: Path::new("/w/main.rs"),
            content_hash: "old",
            ls_id: "rust-analyzer",
        };
        let new = CacheKey {
            file_path: Path::new("/w/main.rs"),
            content_hash: "new",
            ls_id: "rust-analyzer",
        };
        let other = CacheKey {
            file_path: Path::new("/w/lib.rs"),
            content_hash: "old",
            ls_id: "rust-analyzer",
        };
        cache.put(&old, &tree);
        cache.put(&new, &tree);
        cache.put(&other, &tree);

        cache.evict(Path::new("/w/main.rs"));
        assert!(cache.get(&old).is_none());
        assert!(cache.get(&new).is_none());
        assert!(cache.get(&other).is_some());
    }

    #[test]
    fn test_last_writer_wins() {
        let dir = TempDir::new().unwrap();
        let cache = SymbolCache::new(dir.path());
        let key = CacheKey {
            file_path: Path::new("/w/main.rs"),
            content_hash: "abc",
            ls_id: "rust-analyzer",
        };
        let tree = sample_tree();
        cache.put(&key, &SymbolTree::default());
        cache.put(&key, &tree);
        assert_eq!(cache.get(&key).unwrap(), tree);
    }

    #[test]
    fn test_missing_directory_is_harmless() {
        let cache = SymbolCache::new("/nonexistent/cache/dir");
        let key = CacheKey {
            file_path: Path::new("/w/main.rs"),
            content_hash: "abc",
            ls_id: "rust-analyzer",
        };
        assert!(cache.get(&key).is_none());
        cache.evict(Path::new("/w/main.rs"));
    }
}
