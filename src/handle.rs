//! Open file handles.
//!
//! All handles of one logical file share a single FileEntry from the
//! volume's lock table. The entry's mutex is the per-file lock: reads,
//! writes and lifecycle transitions all go through it, so there is exactly
//! one backend (and one in-memory HEAD index) per file.

use std::fs::File;
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use crate::chain::{LayerSet, ReadOutcome};
use crate::error::{IoContext, Result, SnapError};
use crate::lock::FileRef;
use crate::metrics::{record_read, record_write};
use crate::util::read_full_at;

pub(crate) enum Backend {
    /// No handle open, mid-transition, or the file was removed.
    Closed,
    /// PLAIN state: the path is an ordinary file.
    Plain(File),
    /// SNAPSHOTTED state: layer set opened from HEAD.
    Chain(LayerSet),
}

pub(crate) struct FileState {
    pub(crate) backend: Backend,
    pub(crate) handles: usize,
    pub(crate) writable: bool,
    /// Bumped by every lifecycle transition; snapshot readers opened under
    /// an older value rebuild their chain before the next read.
    pub(crate) generation: u64,
}

impl FileState {
    /// Persist everything and close the backend.
    pub(crate) fn quiesce(&mut self) -> Result<()> {
        match &mut self.backend {
            Backend::Chain(set) => set.sync_all()?,
            Backend::Plain(f) => {
                if self.writable {
                    f.sync_all().with_context(|| "fsync plain file")?;
                }
            }
            Backend::Closed => {}
        }
        self.backend = Backend::Closed;
        Ok(())
    }
}

pub(crate) struct FileEntry {
    state: Mutex<FileState>,
}

impl FileEntry {
    pub(crate) fn new(writable: bool) -> Self {
        Self {
            state: Mutex::new(FileState {
                backend: Backend::Closed,
                handles: 0,
                writable,
                generation: 0,
            }),
        }
    }

    pub(crate) fn lock(&self) -> Result<MutexGuard<'_, FileState>> {
        self.state
            .lock()
            .map_err(|_| SnapError::invalid_state("file state lock poisoned"))
    }
}

/// Handle to an open logical file, PLAIN or SNAPSHOTTED.
///
/// The backend behind a handle may change under it (a snapshot is taken, the
/// last snapshot is deleted); the handle keeps working across that.
pub struct FileHandle {
    entry: FileRef<FileEntry>,
    path: PathBuf,
    writable: bool,
}

impl FileHandle {
    pub(crate) fn new(entry: FileRef<FileEntry>, path: &Path, writable: bool) -> Self {
        Self {
            entry,
            path: path.to_path_buf(),
            writable,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_writable(&self) -> bool {
        self.writable
    }

    fn closed(&self) -> SnapError {
        SnapError::invalid_state(format!("{} is no longer open", self.path.display()))
    }

    fn check_writable(&self) -> Result<()> {
        if !self.writable {
            return Err(SnapError::ReadOnly(self.path.display().to_string()));
        }
        Ok(())
    }

    pub fn read(&self, offset: u64, len: usize) -> Result<ReadOutcome> {
        let st = self.entry.lock()?;
        match &st.backend {
            Backend::Chain(set) => set.read(offset, len),
            Backend::Plain(f) => read_plain(f, &self.path, offset, len),
            Backend::Closed => Err(self.closed()),
        }
    }

    pub fn write(&self, offset: u64, buf: &[u8]) -> Result<usize> {
        self.check_writable()?;
        let mut st = self.entry.lock()?;
        match &mut st.backend {
            Backend::Chain(set) => set.write(offset, buf),
            Backend::Plain(f) => {
                f.write_all_at(buf, offset)
                    .with_context(|| format!("write {} at {}", self.path.display(), offset))?;
                record_write(buf.len());
                Ok(buf.len())
            }
            Backend::Closed => Err(self.closed()),
        }
    }

    pub fn truncate(&self, len: u64) -> Result<()> {
        self.check_writable()?;
        let mut st = self.entry.lock()?;
        match &mut st.backend {
            Backend::Chain(set) => set.truncate(len),
            Backend::Plain(f) => f
                .set_len(len)
                .with_context(|| format!("truncate {} to {}", self.path.display(), len)),
            Backend::Closed => Err(self.closed()),
        }
    }

    /// All acknowledged writes, and the HEAD index describing them, are on
    /// disk when this returns.
    pub fn sync(&self) -> Result<()> {
        let mut st = self.entry.lock()?;
        match &mut st.backend {
            Backend::Chain(set) => set.sync_all(),
            Backend::Plain(f) => {
                if self.writable {
                    f.sync_all()
                        .with_context(|| format!("fsync {}", self.path.display()))?;
                }
                Ok(())
            }
            Backend::Closed => Err(self.closed()),
        }
    }

    pub fn size(&self) -> Result<u64> {
        let st = self.entry.lock()?;
        match &st.backend {
            Backend::Chain(set) => set.size(),
            Backend::Plain(f) => Ok(f
                .metadata()
                .with_context(|| format!("fstat {}", self.path.display()))?
                .len()),
            Backend::Closed => Err(self.closed()),
        }
    }

    pub fn is_snapshotted(&self) -> Result<bool> {
        let st = self.entry.lock()?;
        match &st.backend {
            Backend::Chain(_) => Ok(true),
            Backend::Plain(_) => Ok(false),
            Backend::Closed => Err(self.closed()),
        }
    }

    /// Layers behind this handle, HEAD included (1 for a plain file).
    pub fn depth(&self) -> Result<usize> {
        let st = self.entry.lock()?;
        match &st.backend {
            Backend::Chain(set) => Ok(set.depth()),
            Backend::Plain(_) => Ok(1),
            Backend::Closed => Err(self.closed()),
        }
    }
}

impl Drop for FileHandle {
    fn drop(&mut self) {
        let mut st = match self.entry.state.lock() {
            Ok(g) => g,
            Err(p) => p.into_inner(),
        };
        st.handles = st.handles.saturating_sub(1);
        if st.handles == 0 {
            // last close
            if let Err(e) = st.quiesce() {
                log::warn!("close {}: {}", self.path.display(), e);
            }
        }
    }
}

fn read_plain(f: &File, path: &Path, offset: u64, len: usize) -> Result<ReadOutcome> {
    let size = f
        .metadata()
        .with_context(|| format!("fstat {}", path.display()))?
        .len();
    if offset >= size {
        return Ok(ReadOutcome {
            data: Vec::new(),
            file_size: size,
            eof: true,
        });
    }
    let want = (len as u64).min(size - offset) as usize;
    let mut data = vec![0u8; want];
    let n = read_full_at(f, offset, &mut data)
        .with_context(|| format!("read {} at {}", path.display(), offset))?;
    data.truncate(n);
    record_read(n, 1);
    Ok(ReadOutcome {
        eof: n < want || offset + n as u64 >= size,
        data,
        file_size: size,
    })
}

/// Read-only view of a named snapshot.
///
/// Reads take the per-file lock. A transition (delete, rename, clone...)
/// may change the chain under the reader: the layer set is then reopened
/// from `name`, and a deleted or renamed snapshot reads as NotFound.
pub struct SnapshotReader {
    entry: FileRef<FileEntry>,
    root: PathBuf,
    name: String,
    max_depth: usize,
    view: Mutex<ReaderView>,
}

struct ReaderView {
    set: LayerSet,
    generation: u64,
}

impl SnapshotReader {
    pub(crate) fn new(
        entry: FileRef<FileEntry>,
        root: &Path,
        name: &str,
        max_depth: usize,
        set: LayerSet,
        generation: u64,
    ) -> Self {
        Self {
            entry,
            root: root.to_path_buf(),
            name: name.to_string(),
            max_depth,
            view: Mutex::new(ReaderView { set, generation }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run `f` on an up-to-date layer set, under the per-file lock.
    fn with_set<R, F>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&mut LayerSet) -> Result<R>,
    {
        let st = self.entry.lock()?;
        let mut view = self
            .view
            .lock()
            .map_err(|_| SnapError::invalid_state("snapshot reader lock poisoned"))?;
        if view.generation != st.generation {
            log::debug!(
                "snapshot '{}' of {}: chain changed, reopening",
                self.name,
                self.root.display()
            );
            view.set = LayerSet::open_snapshot(&self.root, &self.name, self.max_depth)?;
            view.generation = st.generation;
        }
        f(&mut view.set)
    }

    /// Length of the file when this snapshot was taken.
    pub fn size(&self) -> Result<u64> {
        self.with_set(|set| set.size())
    }

    pub fn read(&self, offset: u64, len: usize) -> Result<ReadOutcome> {
        self.with_set(|set| set.read(offset, len))
    }

    /// Always fails: snapshots are immutable.
    pub fn write(&self, offset: u64, buf: &[u8]) -> Result<usize> {
        self.with_set(|set| set.write(offset, buf))
    }

    /// Layer names from this snapshot down to ROOT.
    pub fn layers(&self) -> Result<Vec<String>> {
        self.with_set(|set| Ok(set.names()))
    }

    /// Whole snapshot content, read in one locked pass.
    pub fn read_all(&self) -> Result<Vec<u8>> {
        self.with_set(|set| {
            let size = set.size()?;
            Ok(set.read(0, size as usize)?.data)
        })
    }
}
