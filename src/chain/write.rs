//! Writer: every mutation goes to layer 0 (HEAD).

use std::os::unix::fs::FileExt;

use super::LayerSet;
use crate::config::IndexSync;
use crate::error::{IoContext, Result, SnapError};
use crate::index::write_index_to;
use crate::metrics::record_write;

impl LayerSet {
    fn ensure_writable(&self) -> Result<()> {
        if !self.writable {
            return Err(SnapError::ReadOnly(format!(
                "layer '{}' of {}",
                self.layers[0].name,
                self.root.display()
            )));
        }
        Ok(())
    }

    /// Write `buf` at `offset` into HEAD and record the range in its index.
    pub fn write(&mut self, offset: u64, buf: &[u8]) -> Result<usize> {
        self.ensure_writable()?;
        if buf.is_empty() {
            return Ok(0);
        }
        let cur = self.size()?;
        let head = &mut self.layers[0];
        head.data
            .write_all_at(buf, offset)
            .with_context(|| format!("write {} at {}", head.data_path.display(), offset))?;

        // Writing past EOF leaves a zero-filled hole in HEAD that no older
        // layer may show through.
        if offset > cur {
            head.index.insert(cur, offset - cur);
        }
        head.index.insert(offset, buf.len() as u64);
        self.index_dirty = true;
        record_write(buf.len());

        if self.sync == IndexSync::OnWrite {
            self.sync_index()?;
        }
        Ok(buf.len())
    }

    /// Resize HEAD. Growing claims the new zero range for HEAD.
    pub fn truncate(&mut self, new_len: u64) -> Result<()> {
        self.ensure_writable()?;
        let cur = self.size()?;
        let head = &mut self.layers[0];
        head.data
            .set_len(new_len)
            .with_context(|| format!("truncate {} to {}", head.data_path.display(), new_len))?;
        head.index.truncate(new_len);
        if new_len > cur {
            head.index.insert(cur, new_len - cur);
        }
        self.index_dirty = true;

        if self.sync == IndexSync::OnWrite {
            self.sync_index()?;
        }
        Ok(())
    }

    /// Coalesce HEAD's index and rewrite its file if anything changed.
    pub fn sync_index(&mut self) -> Result<()> {
        if !self.index_dirty {
            return Ok(());
        }
        let head = &mut self.layers[0];
        head.index.sort_and_coalesce();
        if let Some(f) = head.index_file.as_ref() {
            write_index_to(f, &head.index, &head.index_path)?;
        }
        self.index_dirty = false;
        Ok(())
    }

    /// Persist the index and flush HEAD data.
    pub fn sync_all(&mut self) -> Result<()> {
        self.sync_index()?;
        if self.writable {
            let head = &self.layers[0];
            head.data
                .sync_data()
                .with_context(|| format!("fsync {}", head.data_path.display()))?;
            if let Some(f) = head.index_file.as_ref() {
                f.sync_data()
                    .with_context(|| format!("fsync {}", head.index_path.display()))?;
            }
        }
        Ok(())
    }
}
