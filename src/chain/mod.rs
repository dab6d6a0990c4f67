//! Layer chains.
//!
//! - open.rs:  chain opener (HEAD → … → ROOT, depth-capped).
//! - read.rs:  cross-layer reader (newest layer wins, nested overwrites clip).
//! - write.rs: writer (HEAD only) and index persistence.
//!
//! A LayerSet is the in-memory view of one chain: `layers[0]` is the top
//! layer (HEAD for file handles, a named snapshot for snapshot readers),
//! the last element is ROOT. Only `layers[0]` of a writable set is mutable.

mod open;
mod read;
mod write;

pub use read::ReadOutcome;

use std::fs::File;
use std::path::{Path, PathBuf};

use crate::config::IndexSync;
use crate::index::IntervalIndex;

pub struct Layer {
    name: String,
    data: File,
    data_path: PathBuf,
    index: IntervalIndex,
    index_path: PathBuf,
    // HEAD of a writable set only
    index_file: Option<File>,
}

impl Layer {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn index(&self) -> &IntervalIndex {
        &self.index
    }

    pub fn data_path(&self) -> &Path {
        &self.data_path
    }

    pub fn index_path(&self) -> &Path {
        &self.index_path
    }
}

pub struct LayerSet {
    root: PathBuf,
    layers: Vec<Layer>,
    writable: bool,
    sync: IndexSync,
    index_dirty: bool,
}

impl LayerSet {
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    pub fn depth(&self) -> usize {
        self.layers.len()
    }

    pub fn is_writable(&self) -> bool {
        self.writable
    }

    /// Names from the top layer down to ROOT.
    pub fn names(&self) -> Vec<String> {
        self.layers.iter().map(|l| l.name.clone()).collect()
    }
}

impl Drop for LayerSet {
    fn drop(&mut self) {
        if self.index_dirty {
            if let Err(e) = self.sync_index() {
                log::warn!("index sync on close failed for {}: {}", self.root.display(), e);
            }
        }
    }
}
