//! Snapshot lifecycle: on-disk transformations between PLAIN and
//! SNAPSHOTTED states.
//!
//! - create.rs: first snapshot (PLAIN → SNAPSHOTTED) and chained snapshots.
//! - delete.rs: root merge, generic merge, revert to PLAIN.
//! - clone.rs:  hard-linked copy of a chain under a new path.
//! - rename.rs: rename a frozen layer and fix its neighbours' links.
//!
//! Every function here works on the directory tree only. Callers hold the
//! per-file lock and have quiesced open layer sets (HEAD index persisted,
//! descriptors closed) before calling in; reopening is up to them.
//! Steps are not rolled back: the first failure is logged and returned.

mod clone;
mod create;
mod delete;
mod rename;

pub use delete::DeleteOutcome;

use std::path::Path;

use crate::attrs::AttrStore;
use crate::config::SnapConfig;
use crate::consts::{SNAP_ROOT_KEY, SNAP_ROOT_VALUE};
use crate::error::Result;
use crate::layout::SnapLayout;

/// Everything a transition needs: the file's path, the attribute store and
/// the volume configuration.
pub struct Lifecycle<'a> {
    path: &'a Path,
    attrs: &'a dyn AttrStore,
    cfg: &'a SnapConfig,
    layout: SnapLayout,
}

impl<'a> Lifecycle<'a> {
    pub fn new(path: &'a Path, attrs: &'a dyn AttrStore, cfg: &'a SnapConfig) -> Self {
        Self {
            path,
            attrs,
            cfg,
            layout: SnapLayout::new(path),
        }
    }

    pub fn layout(&self) -> &SnapLayout {
        &self.layout
    }
}

/// A path is in SNAPSHOTTED state when it is a directory carrying the
/// snapshot-root mark.
pub fn is_snapshot_root(path: &Path, attrs: &dyn AttrStore) -> Result<bool> {
    if !path.is_dir() {
        return Ok(false);
    }
    Ok(attrs.get(path, SNAP_ROOT_KEY)?.as_deref() == Some(SNAP_ROOT_VALUE))
}

/// Log the failing step of a transition and pass the error on.
pub(crate) trait StepExt<T> {
    fn step(self, op: &str, what: &str) -> Result<T>;
}

impl<T> StepExt<T> for Result<T> {
    fn step(self, op: &str, what: &str) -> Result<T> {
        if let Err(e) = &self {
            log::error!("{}: step '{}' failed: {}", op, what, e);
        }
        self
    }
}
