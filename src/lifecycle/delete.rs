//! Snapshot deletion.
//!
//! Three shapes:
//! - root merge: the deleted layer is ROOT and its data is not shared. The
//!   child's bytes are copied onto ROOT's data, which then replaces the
//!   child's data; the child becomes the new ROOT with index [0, len).
//! - generic merge: bytes of the deleted layer that its child does not own
//!   are copied into the child, then the layer is unlinked from the chain.
//! - revert: when the deleted layer was the only snapshot, HEAD's data is
//!   moved back over the original path and the file is PLAIN again.

use std::fs::{self, File};
use std::os::unix::fs::PermissionsExt;

use super::{Lifecycle, StepExt};
use crate::consts::{
    FROZEN_INDEX_MODE, HEAD, HEAD_INDEX_MODE, IDENTITY_KEY, SNAP_ROOT_KEY, TEMP_REVERT_SUFFIX,
};
use crate::error::{IoContext, Result, SnapError};
use crate::index::{clip_to, load_index, store_index, IntervalIndex};
use crate::layout::{
    chown_to, owner_of, remove_tree, set_mode, sibling_with_suffix, unshare_file,
    validate_snapshot_name, with_writable,
};
use crate::metrics::{record_revert_to_plain, record_snapshot_deleted};
use crate::util::copy_range;

/// What the file looks like after a delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// Still SNAPSHOTTED with one layer fewer.
    Merged,
    /// The last snapshot is gone; the path is a plain file again.
    Reverted,
}

impl<'a> Lifecycle<'a> {
    pub fn delete(&self, name: &str) -> Result<DeleteOutcome> {
        const OP: &str = "delete snapshot";
        validate_snapshot_name(name)?;
        let layout = &self.layout;
        if !layout.has_layer(name) {
            return Err(SnapError::not_found(format!(
                "snapshot '{}' of {}",
                name,
                self.path.display()
            )));
        }

        let parent = layout.parent_of(name).step(OP, "read parent link")?;
        let child_link = layout.child_of(name).step(OP, "read child link")?;
        let is_root = parent.is_none();
        let is_leaf = child_link.is_none();
        let child = child_link.clone().unwrap_or_else(|| HEAD.to_string());
        let nlink = layout.data_nlink(name).step(OP, "stat layer data")?;

        log::debug!(
            "{} '{}' of {}: root={} leaf={} child={} nlink={}",
            OP,
            name,
            self.path.display(),
            is_root,
            is_leaf,
            child,
            nlink
        );

        if is_root && nlink == 1 {
            self.merge_root(name, &child)?;
        } else {
            self.merge_into_child(name, &child, nlink)?;
            // unlink from the chain
            if let Some(p) = parent.as_deref() {
                layout
                    .set_child(p, child_link.as_deref())
                    .step(OP, "relink parent")?;
            }
            layout
                .set_parent(&child, parent.as_deref())
                .step(OP, "relink child")?;
            remove_tree(&layout.layer_dir(name)).step(OP, "remove layer dir")?;
        }
        record_snapshot_deleted();

        if is_root && is_leaf {
            self.revert_to_plain()?;
            log::info!(
                "snapshot '{}' deleted, {} is a plain file again",
                name,
                self.path.display()
            );
            return Ok(DeleteOutcome::Reverted);
        }

        log::info!("snapshot '{}' of {} deleted", name, self.path.display());
        Ok(DeleteOutcome::Merged)
    }

    /// ROOT absorbs its child, then takes the child's place.
    fn merge_root(&self, root: &str, child: &str) -> Result<()> {
        const OP: &str = "delete snapshot (root merge)";
        let layout = &self.layout;
        let root_data = layout.data_path(root);
        let child_data = layout.data_path(child);

        let root_index = load_index(&layout.index_path(root)).step(OP, "load root index")?;
        let child_index = load_index(&layout.index_path(child)).step(OP, "load child index")?;
        let child_md = fs::metadata(&child_data)
            .with_context(|| format!("stat {}", child_data.display()))
            .step(OP, "stat child data")?;
        let child_len = child_md.len();

        let owned = clip_to(child_index.coalesced_copy().entries().to_vec(), child_len);
        let chunk = self.cfg.copy_chunk;
        with_writable(&root_data, |dst| {
            let src = File::open(&child_data)
                .with_context(|| format!("open {}", child_data.display()))?;
            for r in &owned {
                copy_range(&src, dst, r.start, r.size, chunk).with_context(|| {
                    format!("copy [{}, {}) into {}", r.start, r.end(), root_data.display())
                })?;
            }
            dst.set_len(child_len)
                .with_context(|| format!("truncate {} to {}", root_data.display(), child_len))
        })
        .step(OP, "copy child ranges onto root")?;

        set_mode(&root_data, child_md.permissions().mode() & 0o7777).step(OP, "chmod root data")?;
        chown_to(&root_data, owner_of(&child_md)).step(OP, "chown root data")?;

        // By the no-gap invariant this is [0, child_len).
        let promoted = IntervalIndex::from_entries(clip_to(
            root_index.union(&child_index).entries().to_vec(),
            child_len,
        ));
        store_index(
            &layout.index_path(child),
            &promoted,
            index_mode_of(child),
        )
        .step(OP, "store promoted index")?;

        // The identity tag is keyed by the child's data path, which the
        // rename below keeps.
        fs::rename(&root_data, &child_data)
            .with_context(|| format!("rename {} -> {}", root_data.display(), child_data.display()))
            .step(OP, "move root data into child")?;
        layout.set_parent(child, None).step(OP, "drop child parent link")?;
        remove_tree(&layout.layer_dir(root)).step(OP, "remove root dir")?;
        Ok(())
    }

    /// Copy what `name` owns and `child` does not into `child`.
    fn merge_into_child(&self, name: &str, child: &str, nlink: u64) -> Result<()> {
        const OP: &str = "delete snapshot (merge)";
        let layout = &self.layout;
        let data = layout.data_path(name);
        let child_data = layout.data_path(child);
        let child_index_path = layout.index_path(child);

        let index = load_index(&layout.index_path(name)).step(OP, "load layer index")?;
        let mut child_index = load_index(&child_index_path).step(OP, "load child index")?;
        let child_len = fs::metadata(&child_data)
            .with_context(|| format!("stat {}", child_data.display()))
            .step(OP, "stat child data")?
            .len();

        let ranges = clip_to(index.subtract(&child_index), child_len);
        if !ranges.is_empty() {
            // Child data linked into a clone: merge into a private copy so
            // the other tree keeps its bytes.
            if layout.data_nlink(child).step(OP, "stat child data")? > 1 {
                unshare_file(&child_data).step(OP, "unshare child data")?;
                log::debug!("{}: child '{}' data unshared", OP, child);
            }
            let chunk = self.cfg.copy_chunk;
            with_writable(&child_data, |dst| {
                let src =
                    File::open(&data).with_context(|| format!("open {}", data.display()))?;
                for r in &ranges {
                    copy_range(&src, dst, r.start, r.size, chunk).with_context(|| {
                        format!("copy [{}, {}) into {}", r.start, r.end(), child_data.display())
                    })?;
                }
                Ok(())
            })
            .step(OP, "copy ranges into child")?;

            for r in &ranges {
                child_index.insert(r.start, r.size);
            }
            store_index(&child_index_path, &child_index, index_mode_of(child))
                .step(OP, "store child index")?;
        }
        log::debug!(
            "{}: {} range(s) moved from '{}' into '{}'",
            OP,
            ranges.len(),
            name,
            child
        );

        // Shared with a clone: the other tree still reads these bytes.
        if nlink == 1 {
            with_writable(&data, |f| {
                f.set_len(0)
                    .with_context(|| format!("truncate {}", data.display()))
            })
            .step(OP, "release layer data")?;
        }
        Ok(())
    }

    /// Last snapshot gone: HEAD's data replaces the snapshot root directory.
    fn revert_to_plain(&self) -> Result<()> {
        const OP: &str = "revert to plain";
        let path = self.path;
        let head_data = self.layout.data_path(HEAD);

        let tmp = sibling_with_suffix(path, TEMP_REVERT_SUFFIX);
        if tmp.symlink_metadata().is_ok() {
            return Err(SnapError::AlreadyExists(tmp.display().to_string()));
        }
        fs::rename(path, &tmp)
            .with_context(|| format!("rename {} -> {}", path.display(), tmp.display()))
            .step(OP, "move snapshot root aside")?;
        self.attrs
            .remove(path, SNAP_ROOT_KEY)
            .step(OP, "drop snapshot-root mark")?;

        let moved = tmp.join(HEAD).join(crate::consts::DATA_FILE);
        fs::rename(&moved, path)
            .with_context(|| format!("rename {} -> {}", moved.display(), path.display()))
            .step(OP, "move HEAD data to path")?;
        self.attrs
            .transfer(&head_data, path, IDENTITY_KEY)
            .step(OP, "move identity")?;
        remove_tree(&tmp).step(OP, "remove snapshot tree")?;

        record_revert_to_plain();
        Ok(())
    }
}

fn index_mode_of(layer: &str) -> u32 {
    if layer == HEAD {
        HEAD_INDEX_MODE
    } else {
        FROZEN_INDEX_MODE
    }
}
