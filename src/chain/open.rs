//! Chain opener.

use std::fs::{File, OpenOptions};
use std::io::Read;
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;

use super::{Layer, LayerSet};
use crate::config::IndexSync;
use crate::consts::{HEAD, HEAD_INDEX_MODE};
use crate::error::{IoContext, Result, SnapError};
use crate::index::{decode, load_index};
use crate::layout::SnapLayout;

impl LayerSet {
    /// Open the chain of a snapshotted file from HEAD.
    ///
    /// `writable` opens HEAD data read-write and keeps its index file open
    /// for in-place rewrites; ancestors are always read-only.
    pub fn open(root: &Path, writable: bool, max_depth: usize, sync: IndexSync) -> Result<Self> {
        Self::open_from(root, HEAD, writable, max_depth, sync)
    }

    /// Read-only chain starting at a named snapshot.
    pub fn open_snapshot(root: &Path, name: &str, max_depth: usize) -> Result<Self> {
        let layout = SnapLayout::new(root);
        if name == HEAD {
            return Err(SnapError::InvalidName(name.to_string()));
        }
        if !layout.has_layer(name) {
            return Err(SnapError::not_found(format!(
                "snapshot '{}' of {}",
                name,
                root.display()
            )));
        }
        Self::open_from(root, name, false, max_depth, IndexSync::Deferred)
    }

    fn open_from(
        root: &Path,
        top: &str,
        writable: bool,
        max_depth: usize,
        sync: IndexSync,
    ) -> Result<Self> {
        let layout = SnapLayout::new(root);
        let mut layers: Vec<Layer> = Vec::new();

        // Top layer: caller's access mode.
        let data_path = layout.data_path(top);
        let data = OpenOptions::new()
            .read(true)
            .write(writable)
            .open(&data_path)
            .with_context(|| format!("open {}", data_path.display()))?;
        let index_path = layout.index_path(top);
        let (index, index_file) = if writable {
            let mut f = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .mode(HEAD_INDEX_MODE)
                .open(&index_path)
                .with_context(|| format!("open index {}", index_path.display()))?;
            let idx = read_index_from(&mut f, &index_path)?;
            (idx, Some(f))
        } else {
            (load_index(&index_path)?, None)
        };
        layers.push(Layer {
            name: top.to_string(),
            data,
            data_path,
            index,
            index_path,
            index_file,
        });

        // Ancestors, read-only. On any error `layers` is dropped and every
        // descriptor opened so far is closed with it.
        let mut next = layout.parent_of(top)?;
        while let Some(name) = next {
            if layers.len() >= max_depth {
                log::error!(
                    "chain of {} deeper than {} layers",
                    root.display(),
                    max_depth
                );
                return Err(SnapError::ResourceExhausted {
                    path: root.display().to_string(),
                    max: max_depth,
                });
            }
            let data_path = layout.data_path(&name);
            let data = File::open(&data_path)
                .with_context(|| format!("open {}", data_path.display()))?;
            let index_path = layout.index_path(&name);
            let index = load_index(&index_path)?;
            next = layout.parent_of(&name)?;
            layers.push(Layer {
                name,
                data,
                data_path,
                index,
                index_path,
                index_file: None,
            });
        }

        log::debug!(
            "opened chain {} [{}] writable={}",
            root.display(),
            layers
                .iter()
                .map(|l| l.name.as_str())
                .collect::<Vec<_>>()
                .join(" <- "),
            writable
        );

        Ok(Self {
            root: root.to_path_buf(),
            layers,
            writable,
            sync,
            index_dirty: false,
        })
    }
}

fn read_index_from(f: &mut File, path: &Path) -> Result<crate::index::IntervalIndex> {
    let mut bytes = Vec::new();
    f.read_to_end(&mut bytes)
        .with_context(|| format!("read index {}", path.display()))?;
    decode(&bytes, path)
}
