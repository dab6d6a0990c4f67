//! Snapshot creation.

use std::fs;

use super::{Lifecycle, StepExt};
use crate::consts::{
    FROZEN_DATA_MODE, FROZEN_INDEX_MODE, HEAD, HEAD_INDEX_MODE, IDENTITY_KEY, SNAP_ROOT_KEY,
    SNAP_ROOT_VALUE, TEMP_PART_SUFFIX,
};
use crate::error::{IoContext, Result, SnapError};
use crate::index::{load_index, store_index, IntervalIndex};
use crate::layout::{
    create_sparse_data, make_dir, owner_of, set_mode, sibling_with_suffix, validate_snapshot_name,
};
use crate::metrics::record_snapshot_created;

impl<'a> Lifecycle<'a> {
    /// PLAIN → SNAPSHOTTED. The file's bytes become layer `name` (ROOT) and
    /// a fresh sparse HEAD of the same length is stacked on top.
    pub fn create_first(&self, name: &str) -> Result<()> {
        const OP: &str = "create first snapshot";
        validate_snapshot_name(name)?;
        let path = self.path;
        let layout = &self.layout;

        let md = fs::metadata(path)
            .with_context(|| format!("stat {}", path.display()))
            .step(OP, "capture stat")?;
        if !md.is_file() {
            return Err(SnapError::invalid_state(format!(
                "{} is not a regular file",
                path.display()
            )));
        }
        let size = md.len();
        let mode = {
            use std::os::unix::fs::PermissionsExt;
            md.permissions().mode() & 0o7777
        };
        let owner = owner_of(&md);
        let identity = self.attrs.get(path, IDENTITY_KEY)?;

        // 1. move the data aside
        let part = sibling_with_suffix(path, TEMP_PART_SUFFIX);
        if part.symlink_metadata().is_ok() {
            return Err(SnapError::AlreadyExists(part.display().to_string()));
        }
        fs::rename(path, &part)
            .with_context(|| format!("rename {} -> {}", path.display(), part.display()))
            .step(OP, "move data aside")?;
        self.attrs
            .remove(path, IDENTITY_KEY)
            .step(OP, "strip identity")?;

        // 2. the path becomes a snapshot root directory
        make_dir(path, self.cfg.dir_mode, owner).step(OP, "make snapshot root")?;
        self.attrs
            .set(path, SNAP_ROOT_KEY, SNAP_ROOT_VALUE)
            .step(OP, "mark snapshot root")?;

        // 3. ROOT layer: original bytes, read-only, index [0, size)
        make_dir(&layout.layer_dir(name), self.cfg.dir_mode, owner).step(OP, "make layer dir")?;
        let data = layout.data_path(name);
        fs::rename(&part, &data)
            .with_context(|| format!("rename {} -> {}", part.display(), data.display()))
            .step(OP, "move data into layer")?;
        set_mode(&data, FROZEN_DATA_MODE).step(OP, "freeze data")?;
        store_index(
            &layout.index_path(name),
            &IntervalIndex::full(size),
            FROZEN_INDEX_MODE,
        )
        .step(OP, "write root index")?;

        // 4. fresh HEAD
        self.make_head(size, mode, owner, identity.as_deref())
            .step(OP, "create HEAD")?;
        layout
            .set_parent(HEAD, Some(name))
            .step(OP, "link HEAD to parent")?;

        record_snapshot_created();
        log::info!(
            "snapshot '{}' created for {} ({} bytes, first)",
            name,
            path.display(),
            size
        );
        Ok(())
    }

    /// SNAPSHOTTED: freeze HEAD under `name` and stack a fresh HEAD on it.
    pub fn create_chained(&self, name: &str) -> Result<()> {
        const OP: &str = "create snapshot";
        validate_snapshot_name(name)?;
        let layout = &self.layout;
        if layout.has_layer(name) {
            return Err(SnapError::AlreadyExists(format!(
                "snapshot '{}' of {}",
                name,
                self.path.display()
            )));
        }

        let head_data = layout.data_path(HEAD);
        let md = fs::metadata(&head_data)
            .with_context(|| format!("stat {}", head_data.display()))
            .step(OP, "stat HEAD")?;
        let size = md.len();
        let mode = {
            use std::os::unix::fs::PermissionsExt;
            md.permissions().mode() & 0o7777
        };
        let owner = owner_of(&md);
        let mut head_index = load_index(&layout.index_path(HEAD)).step(OP, "load HEAD index")?;
        head_index.sort_and_coalesce();

        // 1. previous newest frozen layer gets a child link
        if let Some(parent) = layout.parent_of(HEAD)? {
            layout
                .set_child(&parent, Some(name))
                .step(OP, "link parent to child")?;
        }

        // 2. HEAD becomes `name`
        let identity = self.attrs.get(&head_data, IDENTITY_KEY)?;
        self.attrs
            .remove(&head_data, IDENTITY_KEY)
            .step(OP, "strip identity")?;
        let from = layout.layer_dir(HEAD);
        let to = layout.layer_dir(name);
        fs::rename(&from, &to)
            .with_context(|| format!("rename {} -> {}", from.display(), to.display()))
            .step(OP, "rename HEAD")?;
        set_mode(&layout.data_path(name), FROZEN_DATA_MODE).step(OP, "freeze data")?;
        store_index(&layout.index_path(name), &head_index, FROZEN_INDEX_MODE)
            .step(OP, "persist frozen index")?;

        // 3. fresh HEAD on top
        self.make_head(size, mode, owner, identity.as_deref())
            .step(OP, "create HEAD")?;
        layout
            .set_parent(HEAD, Some(name))
            .step(OP, "link HEAD to parent")?;

        record_snapshot_created();
        log::info!(
            "snapshot '{}' created for {} ({} bytes, {} index entries)",
            name,
            self.path.display(),
            size,
            head_index.len()
        );
        Ok(())
    }

    /// mkdir HEAD + sparse data + empty index.
    pub(super) fn make_head(
        &self,
        size: u64,
        mode: u32,
        owner: (u32, u32),
        identity: Option<&[u8]>,
    ) -> Result<()> {
        make_dir(&self.layout.layer_dir(HEAD), self.cfg.dir_mode, owner)?;
        let data = self.layout.data_path(HEAD);
        create_sparse_data(&data, mode, owner, size)?;
        if let Some(id) = identity {
            self.attrs.set(&data, IDENTITY_KEY, id)?;
        }
        store_index(
            &self.layout.index_path(HEAD),
            &IntervalIndex::new(),
            HEAD_INDEX_MODE,
        )
    }
}
