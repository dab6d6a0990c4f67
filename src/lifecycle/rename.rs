//! Rename a frozen layer.

use std::fs;

use super::{Lifecycle, StepExt};
use crate::consts::HEAD;
use crate::error::{IoContext, Result, SnapError};
use crate::layout::validate_snapshot_name;
use crate::metrics::record_snapshot_renamed;

impl<'a> Lifecycle<'a> {
    pub fn rename(&self, from: &str, to: &str) -> Result<()> {
        const OP: &str = "rename snapshot";
        validate_snapshot_name(from)?;
        validate_snapshot_name(to)?;
        let layout = &self.layout;
        if !layout.has_layer(from) {
            return Err(SnapError::not_found(format!(
                "snapshot '{}' of {}",
                from,
                self.path.display()
            )));
        }
        if layout.layer_dir(to).symlink_metadata().is_ok() {
            return Err(SnapError::AlreadyExists(format!(
                "snapshot '{}' of {}",
                to,
                self.path.display()
            )));
        }

        if let Some(p) = layout.parent_of(from)? {
            layout.set_child(&p, Some(to)).step(OP, "relink parent")?;
        }
        let child = layout.child_of(from)?.unwrap_or_else(|| HEAD.to_string());
        layout
            .set_parent(&child, Some(to))
            .step(OP, "relink child")?;

        let a = layout.layer_dir(from);
        let b = layout.layer_dir(to);
        fs::rename(&a, &b)
            .with_context(|| format!("rename {} -> {}", a.display(), b.display()))
            .step(OP, "rename layer dir")?;

        record_snapshot_renamed();
        log::info!(
            "snapshot '{}' of {} renamed to '{}'",
            from,
            self.path.display(),
            to
        );
        Ok(())
    }
}
