//! Index file codec.
//!
//! Format: a flat run of 16-byte records `[start u64 BE][size u64 BE]`,
//! no header, no trailer. An empty or absent file means "no delta".
//! A length that is not a multiple of 16 is a decode error.

use byteorder::{BigEndian, ByteOrder};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::os::unix::fs::{FileExt, PermissionsExt};
use std::path::Path;

use super::{Interval, IntervalIndex};
use crate::consts::{INDEX_RECORD_SIZE, INDEX_TMP_SUFFIX};
use crate::error::{IoContext, Result, SnapError};
use crate::metrics::record_index_sync;

pub fn encode(idx: &IntervalIndex) -> Vec<u8> {
    let mut out = vec![0u8; idx.len() * INDEX_RECORD_SIZE];
    for (i, e) in idx.entries().iter().enumerate() {
        let off = i * INDEX_RECORD_SIZE;
        BigEndian::write_u64(&mut out[off..off + 8], e.start);
        BigEndian::write_u64(&mut out[off + 8..off + 16], e.size);
    }
    out
}

/// Decode raw index bytes; `path` only names the source in errors.
pub fn decode(bytes: &[u8], path: &Path) -> Result<IntervalIndex> {
    if bytes.len() % INDEX_RECORD_SIZE != 0 {
        return Err(SnapError::corrupt(
            path,
            format!(
                "length {} is not a multiple of {}",
                bytes.len(),
                INDEX_RECORD_SIZE
            ),
        ));
    }
    let entries = bytes
        .chunks_exact(INDEX_RECORD_SIZE)
        .map(|rec| {
            Interval::new(
                BigEndian::read_u64(&rec[0..8]),
                BigEndian::read_u64(&rec[8..16]),
            )
        })
        .collect();
    Ok(IntervalIndex::from_entries(entries))
}

/// Load an index from disk. Missing file → empty index.
pub fn load_index(path: &Path) -> Result<IntervalIndex> {
    match fs::read(path) {
        Ok(bytes) => decode(&bytes, path),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(IntervalIndex::new()),
        Err(e) => Err(e).with_context(|| format!("read index {}", path.display())),
    }
}

/// Coalesce and write an index atomically (tmp+rename), then set its mode.
///
/// The rename replaces the directory entry, so a hard-linked index shared
/// with a clone keeps its old content on the other side.
pub fn store_index(path: &Path, idx: &IntervalIndex, mode: u32) -> Result<()> {
    let c = idx.coalesced_copy();
    let bytes = encode(&c);

    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(INDEX_TMP_SUFFIX);
    let tmp = Path::new(&tmp_name);

    let mut f = OpenOptions::new()
        .create(true)
        .truncate(true)
        .write(true)
        .open(tmp)
        .with_context(|| format!("open {}", tmp.display()))?;
    f.write_all(&bytes)
        .with_context(|| format!("write {}", tmp.display()))?;
    let _ = f.sync_all();
    drop(f);

    fs::set_permissions(tmp, fs::Permissions::from_mode(mode))
        .with_context(|| format!("chmod {}", tmp.display()))?;
    fs::rename(tmp, path)
        .with_context(|| format!("rename {} -> {}", tmp.display(), path.display()))?;
    record_index_sync();
    Ok(())
}

/// Rewrite an already open (HEAD) index file in place.
pub fn write_index_to(f: &File, idx: &IntervalIndex, path: &Path) -> Result<()> {
    let bytes = encode(idx);
    f.set_len(0)
        .with_context(|| format!("truncate index {}", path.display()))?;
    if !bytes.is_empty() {
        f.write_all_at(&bytes, 0)
            .with_context(|| format!("write index {}", path.display()))?;
    }
    record_index_sync();
    Ok(())
}
