//! Clone a snapshot into a new, independent file.
//!
//! Frozen layers from `name` down to ROOT are hard-linked, not copied. The
//! clone gets its own empty HEAD on top of the linked `name`.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use super::{Lifecycle, StepExt};
use crate::consts::{HEAD, SNAP_ROOT_KEY, SNAP_ROOT_VALUE};
use crate::error::{IoContext, Result, SnapError};
use crate::layout::{make_dir, owner_of, validate_snapshot_name, SnapLayout};
use crate::metrics::record_snapshot_cloned;

impl<'a> Lifecycle<'a> {
    pub fn clone_to(&self, name: &str, new_path: &Path) -> Result<()> {
        const OP: &str = "clone snapshot";
        validate_snapshot_name(name)?;
        let src = &self.layout;
        if !src.has_layer(name) {
            return Err(SnapError::not_found(format!(
                "snapshot '{}' of {}",
                name,
                self.path.display()
            )));
        }
        if new_path.symlink_metadata().is_ok() {
            return Err(SnapError::AlreadyExists(new_path.display().to_string()));
        }

        let root_md = fs::metadata(self.path)
            .with_context(|| format!("stat {}", self.path.display()))?;
        make_dir(new_path, self.cfg.dir_mode, owner_of(&root_md)).step(OP, "make clone root")?;
        self.attrs
            .set(new_path, SNAP_ROOT_KEY, SNAP_ROOT_VALUE)
            .step(OP, "mark clone root")?;
        let dst = SnapLayout::new(new_path);

        let mut cur = Some(name.to_string());
        let mut linked = 0usize;
        while let Some(layer) = cur {
            if linked >= self.cfg.max_chain_depth {
                return Err(SnapError::ResourceExhausted {
                    path: self.path.display().to_string(),
                    max: self.cfg.max_chain_depth,
                });
            }
            let dir_md = fs::metadata(src.layer_dir(&layer))
                .with_context(|| format!("stat {}", src.layer_dir(&layer).display()))?;
            make_dir(&dst.layer_dir(&layer), self.cfg.dir_mode, owner_of(&dir_md))
                .step(OP, "make layer dir")?;

            link_file(&src.data_path(&layer), &dst.data_path(&layer))
                .step(OP, "link layer data")?;
            if src.index_path(&layer).exists() {
                link_file(&src.index_path(&layer), &dst.index_path(&layer))
                    .step(OP, "link layer index")?;
            }

            let parent = src.parent_of(&layer)?;
            dst.set_parent(&layer, parent.as_deref())
                .step(OP, "copy parent link")?;
            // `name` is the newest layer of the clone: its child stays behind.
            if layer != name {
                let child = src.child_of(&layer)?;
                dst.set_child(&layer, child.as_deref())
                    .step(OP, "copy child link")?;
            }

            linked += 1;
            cur = parent;
        }

        // Fresh HEAD: length of `name`, mode and owner of the source HEAD.
        let size = fs::metadata(src.data_path(name))
            .with_context(|| format!("stat {}", src.data_path(name).display()))?
            .len();
        let head_md = fs::metadata(src.data_path(HEAD))
            .with_context(|| format!("stat {}", src.data_path(HEAD).display()))?;
        let cloned = Lifecycle::new(new_path, self.attrs, self.cfg);
        cloned
            .make_head(
                size,
                head_md.permissions().mode() & 0o7777,
                owner_of(&head_md),
                None,
            )
            .step(OP, "create clone HEAD")?;
        dst.set_parent(HEAD, Some(name))
            .step(OP, "link clone HEAD")?;

        record_snapshot_cloned();
        log::info!(
            "snapshot '{}' of {} cloned to {} ({} layer(s) linked)",
            name,
            self.path.display(),
            new_path.display(),
            linked
        );
        Ok(())
    }
}

fn link_file(from: &Path, to: &Path) -> Result<()> {
    fs::hard_link(from, to)
        .with_context(|| format!("link {} -> {}", from.display(), to.display()))
}
