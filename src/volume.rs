//! Volume: the entry point of the engine.
//!
//! A volume is a directory tree holding logical files, each either PLAIN
//! (an ordinary file) or SNAPSHOTTED (a snapshot root directory with a
//! layer chain). The volume owns:
//! - the advisory volume lock (exclusive for writers, shared for readers),
//! - the attribute store,
//! - the per-file lock table shared by every FileHandle.
//!
//! Lifecycle calls take the per-file lock, quiesce the shared backend
//! (HEAD index persisted, descriptors closed), transform the tree and then
//! reopen the backend for the handles still open, PLAIN or SNAPSHOTTED as
//! the new state dictates.

use serde::Serialize;
use std::fs::{self, OpenOptions};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::attrs::{AttrStore, JsonAttrs};
use crate::chain::LayerSet;
use crate::config::{SnapConfig, VolumeBuilder};
use crate::consts::{ATTRS_FILE, HEAD, IDENTITY_KEY, SNAP_ROOT_KEY, VOLUME_META_DIR};
use crate::error::{IoContext, Result, SnapError};
use crate::handle::{Backend, FileEntry, FileHandle, SnapshotReader};
use crate::index::load_index;
use crate::layout::{remove_tree, SnapLayout};
use crate::lifecycle::{self, DeleteOutcome, Lifecycle};
use crate::lock::{try_lock_volume, LockGuard, LockMode, LockTable};

/// How a file is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    ReadOnly,
    ReadWrite,
    /// ReadWrite, creating an empty plain file if the path does not exist.
    Create,
}

/// One frozen layer as seen by `list_snapshots`.
#[derive(Debug, Clone, Serialize)]
pub struct SnapshotInfo {
    pub name: String,
    /// Logical length of the file when the snapshot was taken.
    pub size: u64,
    pub index_entries: usize,
    /// Data is hard-linked into another tree (a clone).
    pub shared: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct FileStat {
    pub size: u64,
    pub mode: u32,
    pub snapshotted: bool,
    /// Layers including HEAD; 1 for a plain file.
    pub depth: usize,
}

pub struct Volume {
    root: PathBuf,
    cfg: SnapConfig,
    attrs: Arc<dyn AttrStore>,
    files: LockTable<FileEntry>,
    read_only: bool,
    _lock: LockGuard,
}

impl Volume {
    /// Open a volume for writing with configuration from the environment.
    pub fn open(root: &Path) -> Result<Self> {
        Self::open_with_config(root, SnapConfig::from_env())
    }

    pub fn open_with_config(root: &Path, cfg: SnapConfig) -> Result<Self> {
        let attrs = Self::json_attrs(root)?;
        Self::open_inner(root, cfg, attrs, false)
    }

    /// Shared-lock open: reads and listing only.
    pub fn open_read_only(root: &Path) -> Result<Self> {
        let attrs = Self::json_attrs(root)?;
        Self::open_inner(root, SnapConfig::from_env(), attrs, true)
    }

    /// Open with a caller-provided attribute store (hosts with their own
    /// extended attribute layer, tests).
    pub fn open_with_attrs(
        root: &Path,
        cfg: SnapConfig,
        attrs: Arc<dyn AttrStore>,
    ) -> Result<Self> {
        Self::open_inner(root, cfg, attrs, false)
    }

    pub fn builder() -> VolumeBuilder {
        VolumeBuilder::new()
    }

    fn json_attrs(root: &Path) -> Result<Arc<dyn AttrStore>> {
        let meta = root.join(VOLUME_META_DIR);
        fs::create_dir_all(&meta).with_context(|| format!("mkdir {}", meta.display()))?;
        Ok(Arc::new(JsonAttrs::open(root, &meta.join(ATTRS_FILE))?))
    }

    fn open_inner(
        root: &Path,
        cfg: SnapConfig,
        attrs: Arc<dyn AttrStore>,
        read_only: bool,
    ) -> Result<Self> {
        if !root.is_dir() {
            return Err(SnapError::not_found(format!(
                "volume root {}",
                root.display()
            )));
        }
        let mode = if read_only {
            LockMode::Shared
        } else {
            LockMode::Exclusive
        };
        let lock = try_lock_volume(root, mode)?;
        log::debug!(
            "volume {} opened ({:?}), {}",
            root.display(),
            mode,
            cfg
        );
        Ok(Self {
            root: root.to_path_buf(),
            cfg,
            attrs,
            files: LockTable::new(),
            read_only,
            _lock: lock,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &SnapConfig {
        &self.cfg
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Files with live handles or an in-flight transition.
    pub fn open_files(&self) -> usize {
        self.files.len()
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }

    fn ensure_writable(&self) -> Result<()> {
        if self.read_only {
            return Err(SnapError::ReadOnly(format!(
                "volume {}",
                self.root.display()
            )));
        }
        Ok(())
    }

    /// Backend for the file's current on-disk state.
    fn open_backend(&self, abs: &Path) -> Result<Backend> {
        if lifecycle::is_snapshot_root(abs, &*self.attrs)? {
            let set = LayerSet::open(
                abs,
                !self.read_only,
                self.cfg.max_chain_depth,
                self.cfg.index_sync,
            )?;
            return Ok(Backend::Chain(set));
        }
        if abs.is_file() {
            let f = OpenOptions::new()
                .read(true)
                .write(!self.read_only)
                .open(abs)
                .with_context(|| format!("open {}", abs.display()))?;
            return Ok(Backend::Plain(f));
        }
        Err(SnapError::not_found(abs.display().to_string()))
    }

    pub fn is_snapshot_root<P: AsRef<Path>>(&self, path: P) -> Result<bool> {
        lifecycle::is_snapshot_root(&self.resolve(path.as_ref()), &*self.attrs)
    }

    // ---------------- file handles ----------------

    pub fn open_file<P: AsRef<Path>>(&self, path: P, access: Access) -> Result<FileHandle> {
        let abs = self.resolve(path.as_ref());
        let writable = access != Access::ReadOnly;
        if writable {
            self.ensure_writable()?;
        }

        let entry = self
            .files
            .acquire(&abs, || FileEntry::new(!self.read_only))?;
        {
            let mut st = entry.lock()?;
            if let Backend::Closed = st.backend {
                if access == Access::Create && abs.symlink_metadata().is_err() {
                    OpenOptions::new()
                        .write(true)
                        .create_new(true)
                        .open(&abs)
                        .with_context(|| format!("create {}", abs.display()))?;
                    log::debug!("created plain file {}", abs.display());
                }
                st.backend = self.open_backend(&abs)?;
            }
            st.handles += 1;
        }
        Ok(FileHandle::new(entry, &abs, writable))
    }

    /// Read-only view of snapshot `name` of a SNAPSHOTTED file. The view
    /// follows later transitions on the file.
    pub fn open_snapshot<P: AsRef<Path>>(&self, path: P, name: &str) -> Result<SnapshotReader> {
        let abs = self.resolve(path.as_ref());
        self.require_snapshotted(&abs)?;
        let entry = self
            .files
            .acquire(&abs, || FileEntry::new(!self.read_only))?;
        let (set, generation) = {
            let st = entry.lock()?;
            let generation = st.generation;
            let set = LayerSet::open_snapshot(&abs, name, self.cfg.max_chain_depth)?;
            (set, generation)
        };
        Ok(SnapshotReader::new(
            entry,
            &abs,
            name,
            self.cfg.max_chain_depth,
            set,
            generation,
        ))
    }

    // ---------------- lifecycle ----------------

    /// Run `f` under the per-file lock with the shared backend quiesced.
    /// When `reopen` is set, handles still open get a backend for whatever
    /// state the file is in afterwards.
    fn transition<R, F>(&self, abs: &Path, reopen: bool, f: F) -> Result<R>
    where
        F: FnOnce(&Lifecycle<'_>) -> Result<R>,
    {
        self.ensure_writable()?;
        let entry = self
            .files
            .acquire(abs, || FileEntry::new(!self.read_only))?;
        let mut st = entry.lock()?;
        st.quiesce()?;

        let lc = Lifecycle::new(abs, &*self.attrs, &self.cfg);
        let res = f(&lc);
        // the chain may have changed even if a step failed midway
        st.generation = st.generation.wrapping_add(1);

        if reopen && st.handles > 0 {
            match self.open_backend(abs) {
                Ok(b) => st.backend = b,
                Err(e) => {
                    log::error!(
                        "reopen {} after transition failed: {}",
                        abs.display(),
                        e
                    );
                    if res.is_ok() {
                        return Err(e);
                    }
                }
            }
        }
        res
    }

    fn require_snapshotted(&self, abs: &Path) -> Result<()> {
        if lifecycle::is_snapshot_root(abs, &*self.attrs)? {
            return Ok(());
        }
        if abs.symlink_metadata().is_ok() {
            return Err(SnapError::invalid_state(format!(
                "{} has no snapshots",
                abs.display()
            )));
        }
        Err(SnapError::not_found(abs.display().to_string()))
    }

    /// A new layer would push the chain past what an open can hold.
    fn check_depth_for_new_layer(&self, abs: &Path) -> Result<()> {
        let max = self.cfg.max_chain_depth;
        let frozen = if lifecycle::is_snapshot_root(abs, &*self.attrs)? {
            SnapLayout::new(abs).frozen_chain(max)?.len()
        } else {
            0
        };
        // frozen layers + the new one + HEAD
        if frozen + 2 > max {
            return Err(SnapError::ResourceExhausted {
                path: abs.display().to_string(),
                max,
            });
        }
        Ok(())
    }

    /// Snapshot a file whatever its state: first snapshot of a PLAIN file,
    /// chained snapshot of a SNAPSHOTTED one.
    pub fn create_snapshot<P: AsRef<Path>>(&self, path: P, name: &str) -> Result<()> {
        let abs = self.resolve(path.as_ref());
        if lifecycle::is_snapshot_root(&abs, &*self.attrs)? {
            self.create_chained_snapshot(&abs, name)
        } else {
            self.create_first_snapshot(&abs, name)
        }
    }

    pub fn create_first_snapshot<P: AsRef<Path>>(&self, path: P, name: &str) -> Result<()> {
        let abs = self.resolve(path.as_ref());
        crate::layout::validate_snapshot_name(name)?;
        if lifecycle::is_snapshot_root(&abs, &*self.attrs)? {
            return Err(SnapError::invalid_state(format!(
                "{} already has snapshots",
                abs.display()
            )));
        }
        if !abs.is_file() {
            return Err(SnapError::not_found(abs.display().to_string()));
        }
        self.check_depth_for_new_layer(&abs)?;
        self.transition(&abs, true, |lc| lc.create_first(name))
    }

    pub fn create_chained_snapshot<P: AsRef<Path>>(&self, path: P, name: &str) -> Result<()> {
        let abs = self.resolve(path.as_ref());
        crate::layout::validate_snapshot_name(name)?;
        self.require_snapshotted(&abs)?;
        self.check_depth_for_new_layer(&abs)?;
        self.transition(&abs, true, |lc| lc.create_chained(name))
    }

    pub fn delete_snapshot<P: AsRef<Path>>(&self, path: P, name: &str) -> Result<DeleteOutcome> {
        let abs = self.resolve(path.as_ref());
        crate::layout::validate_snapshot_name(name)?;
        self.require_snapshotted(&abs)?;
        self.transition(&abs, true, |lc| lc.delete(name))
    }

    /// Clone snapshot `name` of `path` into a new SNAPSHOTTED file at
    /// `new_path`. Frozen layers are shared through hard links.
    pub fn clone_snapshot<P: AsRef<Path>, Q: AsRef<Path>>(
        &self,
        path: P,
        name: &str,
        new_path: Q,
    ) -> Result<()> {
        let abs = self.resolve(path.as_ref());
        let target = self.resolve(new_path.as_ref());
        crate::layout::validate_snapshot_name(name)?;
        self.require_snapshotted(&abs)?;
        self.transition(&abs, true, |lc| lc.clone_to(name, &target))
    }

    pub fn rename_snapshot<P: AsRef<Path>>(&self, path: P, from: &str, to: &str) -> Result<()> {
        let abs = self.resolve(path.as_ref());
        self.require_snapshotted(&abs)?;
        self.transition(&abs, true, |lc| lc.rename(from, to))
    }

    /// Delete a file. For a SNAPSHOTTED file the whole tree goes; layers
    /// hard-linked into clones survive there. Open handles become unusable.
    pub fn remove_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let abs = self.resolve(path.as_ref());
        if abs.symlink_metadata().is_err() {
            return Err(SnapError::not_found(abs.display().to_string()));
        }
        let attrs = &*self.attrs;
        self.transition(&abs, false, |lc| {
            if lifecycle::is_snapshot_root(&abs, attrs)? {
                attrs.remove(&lc.layout().data_path(HEAD), IDENTITY_KEY)?;
                remove_tree(&abs)?;
                attrs.remove(&abs, SNAP_ROOT_KEY)?;
            } else {
                fs::remove_file(&abs).with_context(|| format!("unlink {}", abs.display()))?;
                attrs.remove(&abs, IDENTITY_KEY)?;
            }
            log::info!("removed {}", abs.display());
            Ok(())
        })
    }

    // ---------------- inspection ----------------

    /// Frozen layers, newest first, ROOT last.
    pub fn list_snapshots<P: AsRef<Path>>(&self, path: P) -> Result<Vec<SnapshotInfo>> {
        let abs = self.resolve(path.as_ref());
        self.require_snapshotted(&abs)?;
        let entry = self
            .files
            .acquire(&abs, || FileEntry::new(!self.read_only))?;
        let _st = entry.lock()?;

        let layout = SnapLayout::new(&abs);
        let mut out = Vec::new();
        for name in layout.frozen_chain(self.cfg.max_chain_depth)? {
            let data = layout.data_path(&name);
            let size = fs::metadata(&data)
                .with_context(|| format!("stat {}", data.display()))?
                .len();
            let index_entries = load_index(&layout.index_path(&name))?.len();
            let shared = layout.data_nlink(&name)? > 1;
            out.push(SnapshotInfo {
                name,
                size,
                index_entries,
                shared,
            });
        }
        Ok(out)
    }

    /// For a SNAPSHOTTED file: size and mode of HEAD's data plus the chain
    /// depth. For a PLAIN file: the file itself.
    pub fn stat<P: AsRef<Path>>(&self, path: P) -> Result<FileStat> {
        let abs = self.resolve(path.as_ref());
        if lifecycle::is_snapshot_root(&abs, &*self.attrs)? {
            let layout = SnapLayout::new(&abs);
            let data = layout.data_path(HEAD);
            let md = fs::metadata(&data).with_context(|| format!("stat {}", data.display()))?;
            let depth = layout.frozen_chain(self.cfg.max_chain_depth)?.len() + 1;
            return Ok(FileStat {
                size: md.len(),
                mode: md.permissions().mode() & 0o7777,
                snapshotted: true,
                depth,
            });
        }
        let md = match fs::metadata(&abs) {
            Ok(md) => md,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(SnapError::not_found(abs.display().to_string()))
            }
            Err(e) => return Err(e).with_context(|| format!("stat {}", abs.display())),
        };
        Ok(FileStat {
            size: md.len(),
            mode: md.permissions().mode() & 0o7777,
            snapshotted: false,
            depth: 1,
        })
    }
}
