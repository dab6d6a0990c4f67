use std::fs::File;
use std::io;
use std::os::unix::fs::FileExt;

use crate::metrics::record_merge_copy;

/// Текущее Unix-время в наносекундах (для уникальных имён).
pub fn now_nanos() -> u128 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos()
}

/// Positional read that keeps going until `buf` is full or EOF.
/// Returns the number of bytes read; less than `buf.len()` means EOF.
pub fn read_full_at(f: &File, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
    let mut done = 0usize;
    while done < buf.len() {
        match f.read_at(&mut buf[done..], offset + done as u64) {
            Ok(0) => break,
            Ok(n) => done += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(done)
}

/// Copy `[offset, offset+len)` from `src` to the same offsets in `dst`,
/// `chunk` bytes at a time. Stops early at EOF of `src`; returns bytes copied.
pub fn copy_range(src: &File, dst: &File, offset: u64, len: u64, chunk: usize) -> io::Result<u64> {
    let mut buf = vec![0u8; chunk.min(len as usize).max(1)];
    let mut copied = 0u64;
    while copied < len {
        let want = ((len - copied) as usize).min(buf.len());
        let n = read_full_at(src, offset + copied, &mut buf[..want])?;
        if n == 0 {
            break;
        }
        dst.write_all_at(&buf[..n], offset + copied)?;
        copied += n as u64;
        record_merge_copy(n);
        if n < want {
            break;
        }
    }
    Ok(copied)
}

pub fn hex_dump(bytes: &[u8]) -> String {
    let mut out = String::new();
    for (i, b) in bytes.iter().enumerate() {
        if i > 0 {
            if i % 16 == 0 {
                out.push('\n');
            } else {
                out.push(' ');
            }
        }
        out.push_str(&format!("{:02x}", b));
    }
    out
}

pub fn display_text(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(s) => s.to_string(),
        Err(_) => format!("(binary {} B)", bytes.len()),
    }
}
