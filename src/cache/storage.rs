//! Cache storage trait and file-per-key disk implementation.

use sha2::{Digest, Sha256};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime};
use tracing::{debug, warn};

/// Trait for cache storage backends.
///
/// Storage is best-effort: reads that fail are misses and writes that fail are
/// dropped. Nothing here ever reports an error to the caller.
pub trait CacheStorage: Send + Sync {
  /// Get the payload stored for an identity string, if present and fresh.
  fn get(&self, identity: &str) -> Option<Vec<u8>>;

  /// Store a payload for an identity string, replacing any previous entry.
  fn set(&self, identity: &str, payload: &[u8]);
}

/// Storage implementation that doesn't cache anything.
/// Used when caching is disabled - all operations are no-ops.
pub struct NoopStorage;

impl CacheStorage for NoopStorage {
  fn get(&self, _identity: &str) -> Option<Vec<u8>> {
    None // Always miss
  }

  fn set(&self, _identity: &str, _payload: &[u8]) {}
}

/// Derive the cache key for an identity string: hex-encoded SHA-256.
pub fn cache_key(identity: &str) -> String {
  let mut hasher = Sha256::new();
  hasher.update(identity.as_bytes());
  hex::encode(hasher.finalize())
}

/// Disk storage with one file per key.
///
/// The filename is the [`cache_key`] of the identity and the contents are the
/// raw payload. The file modification time is the only staleness signal: an
/// entry older than `ttl` is treated as a miss but left on disk until the next
/// write for the same key replaces it.
#[derive(Debug)]
pub struct FileStorage {
  dir: PathBuf,
  ttl: Duration,
}

/// Disambiguates temp files written concurrently by this process.
static WRITE_SEQ: AtomicU64 = AtomicU64::new(0);

impl FileStorage {
  pub fn new(dir: impl Into<PathBuf>, ttl: Duration) -> Self {
    Self {
      dir: dir.into(),
      ttl,
    }
  }

  /// Default cache location: `$XDG_CACHE_HOME/jsync`, or the temp dir.
  pub fn default_dir() -> PathBuf {
    dirs::cache_dir()
      .unwrap_or_else(std::env::temp_dir)
      .join("jsync")
  }

  pub fn dir(&self) -> &Path {
    &self.dir
  }

  pub fn ttl(&self) -> Duration {
    self.ttl
  }

  /// Path of the file backing an identity string.
  pub fn entry_path(&self, identity: &str) -> PathBuf {
    self.dir.join(cache_key(identity))
  }

  fn is_expired(&self, modified: SystemTime) -> bool {
    // A modification time in the future counts as fresh.
    SystemTime::now()
      .duration_since(modified)
      .map(|age| age > self.ttl)
      .unwrap_or(false)
  }

  fn write(&self, path: &Path, payload: &[u8]) -> io::Result<()> {
    fs::create_dir_all(&self.dir)?;

    // Write aside and rename so readers never observe a partial payload.
    let seq = WRITE_SEQ.fetch_add(1, Ordering::Relaxed);
    let tmp = path.with_extension(format!("{}.{}.tmp", std::process::id(), seq));
    fs::write(&tmp, payload)?;
    fs::rename(&tmp, path).inspect_err(|_| {
      let _ = fs::remove_file(&tmp);
    })
  }
}

impl CacheStorage for FileStorage {
  fn get(&self, identity: &str) -> Option<Vec<u8>> {
    let path = self.entry_path(identity);

    let modified = fs::metadata(&path).and_then(|m| m.modified()).ok()?;
    if self.is_expired(modified) {
      debug!(path = %path.display(), "cache entry expired");
      return None;
    }

    fs::read(&path).ok()
  }

  fn set(&self, identity: &str, payload: &[u8]) {
    let path = self.entry_path(identity);
    if let Err(e) = self.write(&path, payload) {
      warn!(path = %path.display(), error = %e, "failed to write cache entry");
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::thread;
  use tempfile::TempDir;

  fn create_test_storage(ttl: Duration) -> (FileStorage, TempDir) {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let storage = FileStorage::new(temp_dir.path(), ttl);
    (storage, temp_dir)
  }

  #[test]
  fn test_cache_key_is_stable_and_distinct() {
    assert_eq!(cache_key("project = PROJ"), cache_key("project = PROJ"));
    assert_ne!(cache_key("project = PROJ"), cache_key("project = PROJ2"));
    assert_eq!(
      cache_key(""),
      "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
    );
  }

  #[test]
  fn test_set_then_get_returns_payload() {
    let (storage, temp_dir) = create_test_storage(Duration::from_secs(60));

    storage.set("search?jql=a", b"{\"total\":1}");

    assert_eq!(storage.get("search?jql=a"), Some(b"{\"total\":1}".to_vec()));
    let file = temp_dir.path().join(cache_key("search?jql=a"));
    assert!(file.exists(), "Entry should be named after the digest");
  }

  #[test]
  fn test_get_missing_is_miss() {
    let (storage, _temp_dir) = create_test_storage(Duration::from_secs(60));
    assert_eq!(storage.get("nothing here"), None);
  }

  #[test]
  fn test_expired_entry_is_miss_but_kept_on_disk() {
    let (storage, _temp_dir) = create_test_storage(Duration::ZERO);

    storage.set("myself", b"{}");
    thread::sleep(Duration::from_millis(20));

    assert_eq!(storage.get("myself"), None);
    assert!(storage.entry_path("myself").exists());
  }

  #[test]
  fn test_overwrite_replaces_payload() {
    let (storage, _temp_dir) = create_test_storage(Duration::from_secs(60));

    storage.set("key", b"first");
    storage.set("key", b"second");

    assert_eq!(storage.get("key"), Some(b"second".to_vec()));
  }

  #[test]
  fn test_set_creates_missing_directory() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let nested = temp_dir.path().join("a").join("b");
    let storage = FileStorage::new(&nested, Duration::from_secs(60));

    storage.set("key", b"payload");

    assert!(nested.is_dir());
    assert_eq!(storage.get("key"), Some(b"payload".to_vec()));
  }

  #[test]
  fn test_write_failure_is_swallowed() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let blocker = temp_dir.path().join("not-a-dir");
    fs::write(&blocker, b"file").expect("Should create blocker file");
    let storage = FileStorage::new(&blocker, Duration::from_secs(60));

    storage.set("key", b"payload");

    assert_eq!(storage.get("key"), None);
  }

  #[test]
  fn test_no_temp_files_left_behind() {
    let (storage, temp_dir) = create_test_storage(Duration::from_secs(60));

    storage.set("a", b"1");
    storage.set("b", b"2");

    let names: Vec<String> = fs::read_dir(temp_dir.path())
      .expect("Should list cache dir")
      .filter_map(|e| e.ok())
      .map(|e| e.file_name().to_string_lossy().into_owned())
      .collect();
    assert_eq!(names.len(), 2);
    assert!(names.iter().all(|n| !n.ends_with(".tmp")));
  }

  #[test]
  fn test_noop_storage_always_misses() {
    let storage = NoopStorage;
    storage.set("key", b"payload");
    assert_eq!(storage.get("key"), None);
  }
}
