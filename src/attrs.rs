//! Per-path attribute store.
//!
//! The engine needs two attributes: the snapshot-root mark on a file's
//! directory and the movable content-identity tag carried by HEAD data.
//! Attributes are keyed by path; renaming a path does not move its
//! attributes, callers move them explicitly.
//!
//! Implementations:
//! - MemAttrs: in-process map (tests, embedding hosts with their own xattr layer).
//! - JsonAttrs: persisted map at <volume>/.fsnap/attrs.json, written tmp+rename.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::error::{IoContext, Result, SnapError};

pub trait AttrStore: Send + Sync {
    fn get(&self, path: &Path, key: &str) -> Result<Option<Vec<u8>>>;
    fn set(&self, path: &Path, key: &str, value: &[u8]) -> Result<()>;
    /// Removing a missing attribute is not an error.
    fn remove(&self, path: &Path, key: &str) -> Result<()>;

    /// Move one attribute from `from` to `to`. Returns whether it existed.
    fn transfer(&self, from: &Path, to: &Path, key: &str) -> Result<bool> {
        match self.get(from, key)? {
            Some(v) => {
                self.remove(from, key)?;
                self.set(to, key, &v)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

type AttrMap = BTreeMap<String, BTreeMap<String, Vec<u8>>>;

fn poisoned() -> SnapError {
    SnapError::invalid_state("attribute store lock poisoned")
}

#[derive(Default)]
pub struct MemAttrs {
    map: Mutex<AttrMap>,
}

impl MemAttrs {
    pub fn new() -> Self {
        Self::default()
    }
}

fn path_key(p: &Path) -> String {
    p.to_string_lossy().into_owned()
}

impl AttrStore for MemAttrs {
    fn get(&self, path: &Path, key: &str) -> Result<Option<Vec<u8>>> {
        let m = self.map.lock().map_err(|_| poisoned())?;
        Ok(m.get(&path_key(path)).and_then(|a| a.get(key)).cloned())
    }

    fn set(&self, path: &Path, key: &str, value: &[u8]) -> Result<()> {
        let mut m = self.map.lock().map_err(|_| poisoned())?;
        m.entry(path_key(path))
            .or_default()
            .insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn remove(&self, path: &Path, key: &str) -> Result<()> {
        let mut m = self.map.lock().map_err(|_| poisoned())?;
        let pk = path_key(path);
        if let Some(a) = m.get_mut(&pk) {
            a.remove(key);
            if a.is_empty() {
                m.remove(&pk);
            }
        }
        Ok(())
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct AttrFile {
    // path (relative to base) -> key -> value
    entries: AttrMap,
}

/// Attribute map persisted as JSON. Paths under `base` are stored relative
/// to it so the volume can be moved.
pub struct JsonAttrs {
    base: PathBuf,
    file: PathBuf,
    state: Mutex<AttrFile>,
}

impl JsonAttrs {
    pub fn open(base: &Path, file: &Path) -> Result<Self> {
        let state = if file.exists() {
            let bytes = fs::read(file).with_context(|| format!("read {}", file.display()))?;
            serde_json::from_slice(&bytes)
                .map_err(|e| SnapError::corrupt(file, format!("parse attrs: {}", e)))?
        } else {
            AttrFile::default()
        };
        Ok(Self {
            base: base.to_path_buf(),
            file: file.to_path_buf(),
            state: Mutex::new(state),
        })
    }

    fn key_of(&self, p: &Path) -> String {
        match p.strip_prefix(&self.base) {
            Ok(rel) => path_key(rel),
            Err(_) => path_key(p),
        }
    }

    fn save(&self, st: &AttrFile) -> Result<()> {
        let dir = self.file.parent().unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
        let mut tmp_name = self.file.as_os_str().to_owned();
        tmp_name.push(".tmp");
        let tmp = PathBuf::from(tmp_name);

        let data = serde_json::to_vec_pretty(st)
            .map_err(|e| SnapError::corrupt(&self.file, format!("serialize attrs: {}", e)))?;
        let mut f = OpenOptions::new()
            .create(true)
            .truncate(true)
            .write(true)
            .open(&tmp)
            .with_context(|| format!("open {}", tmp.display()))?;
        f.write_all(&data)
            .with_context(|| format!("write {}", tmp.display()))?;
        let _ = f.sync_all();

        fs::rename(&tmp, &self.file)
            .with_context(|| format!("rename {} -> {}", tmp.display(), self.file.display()))?;
        Ok(())
    }
}

impl AttrStore for JsonAttrs {
    fn get(&self, path: &Path, key: &str) -> Result<Option<Vec<u8>>> {
        let st = self.state.lock().map_err(|_| poisoned())?;
        Ok(st
            .entries
            .get(&self.key_of(path))
            .and_then(|a| a.get(key))
            .cloned())
    }

    fn set(&self, path: &Path, key: &str, value: &[u8]) -> Result<()> {
        let mut st = self.state.lock().map_err(|_| poisoned())?;
        st.entries
            .entry(self.key_of(path))
            .or_default()
            .insert(key.to_string(), value.to_vec());
        self.save(&st)
    }

    fn remove(&self, path: &Path, key: &str) -> Result<()> {
        let mut st = self.state.lock().map_err(|_| poisoned())?;
        let pk = self.key_of(path);
        let changed = match st.entries.get_mut(&pk) {
            Some(a) => {
                let had = a.remove(key).is_some();
                if a.is_empty() {
                    st.entries.remove(&pk);
                }
                had
            }
            None => false,
        };
        if changed {
            self.save(&st)?;
        }
        Ok(())
    }
}
