//! On-disk shape of a snapshotted file and the primitives lifecycle
//! operations are built from.
//!
//! ```text
//! <path>/                   snapshot root (attribute SNAP_ROOT_KEY = "yes")
//! <path>/<layer>/data       layer content (frozen layers: mode 0400)
//! <path>/<layer>/index      16-byte BE interval records
//! <path>/<layer>/parent  -> ../<older layer>   absent on ROOT
//! <path>/<layer>/child   -> ../<newer layer>   absent on the newest frozen layer
//! <path>/HEAD/...           mutable tip, never has a child link
//! ```

use std::fs::{self, File, OpenOptions};
use std::io;
use std::os::unix::fs::{symlink, MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};

use crate::consts::{
    CHILD_LINK, DATA_FILE, HEAD, INDEX_FILE, LIST, PARENT_LINK, UNSHARE_TMP_SUFFIX,
};
use crate::error::{IoContext, Result, SnapError};

/// Paths inside one snapshot root.
#[derive(Debug, Clone)]
pub struct SnapLayout {
    root: PathBuf,
}

impl SnapLayout {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn layer_dir(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    pub fn data_path(&self, name: &str) -> PathBuf {
        self.root.join(name).join(DATA_FILE)
    }

    pub fn index_path(&self, name: &str) -> PathBuf {
        self.root.join(name).join(INDEX_FILE)
    }

    fn parent_link(&self, name: &str) -> PathBuf {
        self.root.join(name).join(PARENT_LINK)
    }

    fn child_link(&self, name: &str) -> PathBuf {
        self.root.join(name).join(CHILD_LINK)
    }

    pub fn has_layer(&self, name: &str) -> bool {
        self.layer_dir(name).is_dir()
    }

    /// Older neighbour of `name`, None for ROOT.
    pub fn parent_of(&self, name: &str) -> Result<Option<String>> {
        read_link_name(&self.parent_link(name))
    }

    /// Newer frozen neighbour of `name`, None when the next layer is HEAD.
    pub fn child_of(&self, name: &str) -> Result<Option<String>> {
        read_link_name(&self.child_link(name))
    }

    /// Point `name/parent` at `parent` (or drop it).
    pub fn set_parent(&self, name: &str, parent: Option<&str>) -> Result<()> {
        relink(&self.parent_link(name), parent)
    }

    /// Point `name/child` at `child` (or drop it).
    pub fn set_child(&self, name: &str, child: Option<&str>) -> Result<()> {
        relink(&self.child_link(name), child)
    }

    /// Link count of a layer's data file; > 1 means it is shared with a clone.
    pub fn data_nlink(&self, name: &str) -> Result<u64> {
        let p = self.data_path(name);
        let md = fs::metadata(&p).with_context(|| format!("stat {}", p.display()))?;
        Ok(md.nlink())
    }

    /// Layer names walking parent links from HEAD: newest first, ROOT last.
    /// HEAD itself is not included.
    pub fn frozen_chain(&self, max_depth: usize) -> Result<Vec<String>> {
        let mut out = Vec::new();
        let mut cur = self.parent_of(HEAD)?;
        while let Some(name) = cur {
            if out.len() >= max_depth {
                return Err(SnapError::ResourceExhausted {
                    path: self.root.display().to_string(),
                    max: max_depth,
                });
            }
            cur = self.parent_of(&name)?;
            out.push(name);
        }
        Ok(out)
    }
}

/// Snapshot names: non-empty, a single path component, not reserved.
pub fn validate_snapshot_name(name: &str) -> Result<()> {
    let bad = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains('/')
        || name.contains('\0')
        || name == HEAD
        || name == LIST;
    if bad {
        return Err(SnapError::InvalidName(name.to_string()));
    }
    Ok(())
}

fn read_link_name(link: &Path) -> Result<Option<String>> {
    match fs::read_link(link) {
        Ok(target) => Ok(target
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e).with_context(|| format!("readlink {}", link.display())),
    }
}

fn relink(link: &Path, target: Option<&str>) -> Result<()> {
    match fs::remove_file(link) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e).with_context(|| format!("unlink {}", link.display())),
    }
    if let Some(t) = target {
        let rel = Path::new("..").join(t);
        symlink(&rel, link)
            .with_context(|| format!("symlink {} -> {}", link.display(), rel.display()))?;
    }
    Ok(())
}

/// Owner of a path as (uid, gid).
pub fn owner_of(md: &fs::Metadata) -> (u32, u32) {
    (md.uid(), md.gid())
}

pub fn chown_to(path: &Path, owner: (u32, u32)) -> Result<()> {
    std::os::unix::fs::chown(path, Some(owner.0), Some(owner.1))
        .with_context(|| format!("chown {}", path.display()))
}

pub fn set_mode(path: &Path, mode: u32) -> Result<()> {
    fs::set_permissions(path, fs::Permissions::from_mode(mode & 0o7777))
        .with_context(|| format!("chmod {:o} {}", mode & 0o7777, path.display()))
}

/// mkdir + chmod + chown. Fails with AlreadyExists if the path is taken.
pub fn make_dir(path: &Path, mode: u32, owner: (u32, u32)) -> Result<()> {
    match fs::create_dir(path) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
            return Err(SnapError::AlreadyExists(path.display().to_string()))
        }
        Err(e) => return Err(e).with_context(|| format!("mkdir {}", path.display())),
    }
    set_mode(path, mode)?;
    chown_to(path, owner)
}

/// Fresh sparse data file of `len` bytes (reads as zeros).
pub fn create_sparse_data(path: &Path, mode: u32, owner: (u32, u32), len: u64) -> Result<()> {
    let f = OpenOptions::new()
        .create_new(true)
        .write(true)
        .open(path)
        .with_context(|| format!("create {}", path.display()))?;
    f.set_len(len)
        .with_context(|| format!("truncate {} to {}", path.display(), len))?;
    drop(f);
    set_mode(path, mode)?;
    chown_to(path, owner)
}

/// Open `path` read-write even if its mode is read-only (frozen layers are
/// 0400). The original mode is restored afterwards.
pub fn with_writable<R, F>(path: &Path, f: F) -> Result<R>
where
    F: FnOnce(&File) -> Result<R>,
{
    let md = fs::metadata(path).with_context(|| format!("stat {}", path.display()))?;
    let mode = md.permissions().mode() & 0o7777;
    let relaxed = mode & 0o200 == 0;
    if relaxed {
        set_mode(path, mode | 0o200)?;
    }
    let res = OpenOptions::new()
        .read(true)
        .write(true)
        .open(path)
        .with_context(|| format!("open rw {}", path.display()))
        .and_then(|file| f(&file));
    if relaxed {
        if let Err(e) = set_mode(path, mode) {
            log::warn!("restore mode {:o} on {}: {}", mode, path.display(), e);
        }
    }
    res
}

/// Give `path` its own inode: copy it next to itself and rename the copy
/// over it. Other hard links keep the old inode and its bytes. Mode and
/// owner are carried over.
pub fn unshare_file(path: &Path) -> Result<()> {
    let md = fs::metadata(path).with_context(|| format!("stat {}", path.display()))?;
    let tmp = sibling_with_suffix(path, UNSHARE_TMP_SUFFIX);
    match fs::remove_file(&tmp) {
        Ok(()) => log::warn!("removed stale {}", tmp.display()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e).with_context(|| format!("unlink {}", tmp.display())),
    }
    fs::copy(path, &tmp)
        .with_context(|| format!("copy {} -> {}", path.display(), tmp.display()))?;
    set_mode(&tmp, md.permissions().mode())?;
    chown_to(&tmp, owner_of(&md))?;
    fs::rename(&tmp, path)
        .with_context(|| format!("rename {} -> {}", tmp.display(), path.display()))
}

/// rm -rf, tolerating an already missing tree.
pub fn remove_tree(path: &Path) -> Result<()> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).with_context(|| format!("remove {}", path.display())),
    }
}

/// `<path><suffix>` next to `path`.
pub fn sibling_with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut s = path.as_os_str().to_owned();
    s.push(suffix);
    PathBuf::from(s)
}
