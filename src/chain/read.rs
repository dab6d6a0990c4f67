//! Cross-layer reader.

use super::LayerSet;
use crate::error::{IoContext, Result, SnapError};
use crate::index::Interval;
use crate::metrics::record_read;
use crate::util::read_full_at;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadOutcome {
    pub data: Vec<u8>,
    /// File size as seen after the read (HEAD may have been resized).
    pub file_size: u64,
    /// The read reached end of file (or a layer returned short).
    pub eof: bool,
}

impl LayerSet {
    /// Logical size of the file: length of the top layer's data.
    pub fn size(&self) -> Result<u64> {
        let top = &self.layers[0];
        let md = top
            .data
            .metadata()
            .with_context(|| format!("fstat {}", top.data_path.display()))?;
        Ok(md.len())
    }

    /// First layer (newest first) owning `offset`, with the covering entry.
    fn owner_of(&self, offset: u64) -> Option<(usize, Interval)> {
        self.layers
            .iter()
            .enumerate()
            .find_map(|(i, l)| l.index.covering(offset).map(|e| (i, e)))
    }

    /// Reconstruct `[offset, offset+len)` by stitching layers newest → oldest.
    pub fn read(&self, offset: u64, len: usize) -> Result<ReadOutcome> {
        let size = self.size()?;
        if offset >= size {
            return Ok(ReadOutcome {
                data: Vec::new(),
                file_size: size,
                eof: true,
            });
        }

        let end = offset + (len as u64).min(size - offset);
        let mut out: Vec<u8> = Vec::with_capacity((end - offset) as usize);
        let mut pos = offset;
        let mut segments = 0u64;
        let mut short = false;

        while pos < end {
            let (i, entry) = self
                .owner_of(pos)
                .ok_or_else(|| SnapError::inconsistent(&self.root, pos))?;

            let mut cand = (end - pos).min(entry.end() - pos);
            // A newer layer may own bytes starting inside this span; stop there
            // so the next round picks them up from the newer layer.
            for newer in &self.layers[..i] {
                if let Some(s) = newer.index.first_start_within(pos, pos + cand) {
                    cand = s - pos;
                }
            }

            let layer = &self.layers[i];
            let at = out.len();
            out.resize(at + cand as usize, 0);
            let n = read_full_at(&layer.data, pos, &mut out[at..])
                .with_context(|| format!("read {} at {}", layer.data_path.display(), pos))?;
            out.truncate(at + n);
            segments += 1;
            pos += n as u64;

            if (n as u64) < cand {
                log::debug!(
                    "short read from layer '{}' at {} ({} of {})",
                    layer.name,
                    pos,
                    n,
                    cand
                );
                short = true;
                break;
            }
        }

        let file_size = self.size()?;
        record_read(out.len(), segments);
        Ok(ReadOutcome {
            eof: short || pos >= file_size,
            data: out,
            file_size,
        })
    }
}
