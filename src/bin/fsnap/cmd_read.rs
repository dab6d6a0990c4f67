use anyhow::{Context, Result};
use std::path::PathBuf;

use fsnap::util::{display_text, hex_dump};
use fsnap::{Access, ReadOutcome, Volume};

use super::util::write_out;

pub fn exec(
    volume: PathBuf,
    file: PathBuf,
    offset: u64,
    len: Option<usize>,
    snapshot: Option<String>,
    out: Option<PathBuf>,
) -> Result<()> {
    // Чтение не требует writer'а
    let vol = Volume::open_read_only(&volume)
        .with_context(|| format!("open volume {}", volume.display()))?;

    let r: ReadOutcome = match snapshot.as_deref() {
        Some(name) => {
            let snap = vol
                .open_snapshot(&file, name)
                .with_context(|| format!("open snapshot '{}' of {}", name, file.display()))?;
            let want = len.unwrap_or(snap.size()?.saturating_sub(offset) as usize);
            snap.read(offset, want)?
        }
        None => {
            let h = vol
                .open_file(&file, Access::ReadOnly)
                .with_context(|| format!("open {}", file.display()))?;
            let want = len.unwrap_or(h.size()?.saturating_sub(offset) as usize);
            h.read(offset, want)?
        }
    };

    if let Some(out_path) = out {
        write_out(&out_path, &r.data)?;
        println!(
            "read {} B at {} -> wrote to {}",
            r.data.len(),
            offset,
            out_path.display()
        );
        return Ok(());
    }
    println!(
        "read {} B at {} (file size {}, eof={})",
        r.data.len(),
        offset,
        r.file_size,
        r.eof
    );
    println!("text: {}", display_text(&r.data));
    println!("hex:  {}", hex_dump(&r.data[..r.data.len().min(64)]));
    Ok(())
}
