//! Locking.
//!
//! Two levels:
//! - Volume lock: fs2 advisory lock on <volume>/.fsnap.lock. Exclusive for a
//!   writer process, shared for read-only inspection. Released on Drop.
//! - Per-file lock table: one entry per logical file path, created lazily on
//!   first use and reclaimed when the last reference is dropped. The entry
//!   holds the file's shared state; its mutex is the per-file lock that
//!   serializes lifecycle transitions with HEAD writes.

use fs2::FileExt;
use std::collections::HashMap;
use std::fs::OpenOptions;
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::consts::VOLUME_LOCK_FILE;
use crate::error::{IoContext, Result, SnapError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Shared,
    Exclusive,
}

pub struct LockGuard {
    file: std::fs::File,
    path: PathBuf,
    mode: LockMode,
}

impl LockGuard {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn mode(&self) -> LockMode {
        self.mode
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

fn lock_file_path(root: &Path) -> PathBuf {
    root.join(VOLUME_LOCK_FILE)
}

/// Try to lock the volume. Fails immediately if another process holds it.
pub fn try_lock_volume(root: &Path, mode: LockMode) -> Result<LockGuard> {
    let path = lock_file_path(root);
    let file = OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .open(&path)
        .with_context(|| format!("open lock file {}", path.display()))?;
    match mode {
        LockMode::Shared => FileExt::try_lock_shared(&file)
            .with_context(|| format!("try_lock_shared failed: {}", path.display()))?,
        LockMode::Exclusive => FileExt::try_lock_exclusive(&file)
            .with_context(|| format!("try_lock_exclusive failed: {}", path.display()))?,
    }
    Ok(LockGuard { file, path, mode })
}

type Table<T> = Arc<Mutex<HashMap<PathBuf, Arc<T>>>>;

/// Lazily populated, reference-counted table of per-file entries.
pub struct LockTable<T> {
    inner: Table<T>,
}

impl<T> Default for LockTable<T> {
    fn default() -> Self {
        Self {
            inner: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl<T> LockTable<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get (or create with `init`) the entry for `path`.
    pub fn acquire<F: FnOnce() -> T>(&self, path: &Path, init: F) -> Result<FileRef<T>> {
        let mut m = self
            .inner
            .lock()
            .map_err(|_| SnapError::invalid_state("lock table poisoned"))?;
        let entry = m
            .entry(path.to_path_buf())
            .or_insert_with(|| Arc::new(init()))
            .clone();
        Ok(FileRef {
            path: path.to_path_buf(),
            entry: Some(entry),
            table: self.inner.clone(),
        })
    }

    /// Number of live entries (diagnostics/tests).
    pub fn len(&self) -> usize {
        self.inner.lock().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Counted reference to a lock-table entry. Dropping the last one removes
/// the entry from the table.
pub struct FileRef<T> {
    path: PathBuf,
    entry: Option<Arc<T>>,
    table: Table<T>,
}

impl<T> FileRef<T> {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl<T> Clone for FileRef<T> {
    fn clone(&self) -> Self {
        Self {
            path: self.path.clone(),
            entry: self.entry.clone(),
            table: self.table.clone(),
        }
    }
}

impl<T> Deref for FileRef<T> {
    type Target = T;

    fn deref(&self) -> &T {
        // entry is only taken in Drop
        self.entry.as_deref().expect("FileRef used after drop")
    }
}

impl<T> Drop for FileRef<T> {
    fn drop(&mut self) {
        let entry = match self.entry.take() {
            Some(e) => e,
            None => return,
        };
        if let Ok(mut m) = self.table.lock() {
            // table + this reference
            if Arc::strong_count(&entry) == 2 {
                m.remove(&self.path);
            }
            // release under the table lock so a concurrent drop sees the new count
            drop(entry);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn entries_are_shared_and_reclaimed() {
        let t: LockTable<AtomicUsize> = LockTable::new();
        let a = t.acquire(Path::new("/f"), || AtomicUsize::new(0)).unwrap();
        let b = t.acquire(Path::new("/f"), || AtomicUsize::new(100)).unwrap();
        a.fetch_add(1, Ordering::Relaxed);
        assert_eq!(b.load(Ordering::Relaxed), 1);
        assert_eq!(t.len(), 1);

        let c = b.clone();
        drop(a);
        drop(b);
        assert_eq!(t.len(), 1);
        drop(c);
        assert!(t.is_empty());
    }

    #[test]
    fn volume_lock_is_exclusive() {
        let root = std::env::temp_dir().join(format!(
            "fsnap-lock-{}-{}",
            std::process::id(),
            crate::util::now_nanos()
        ));
        std::fs::create_dir_all(&root).unwrap();
        let g = try_lock_volume(&root, LockMode::Exclusive).unwrap();
        assert_eq!(g.mode(), LockMode::Exclusive);
        assert!(try_lock_volume(&root, LockMode::Exclusive).is_err());
        drop(g);
        assert!(try_lock_volume(&root, LockMode::Shared).is_ok());
        let _ = std::fs::remove_dir_all(&root);
    }
}
