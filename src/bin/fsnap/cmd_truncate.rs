use anyhow::{Context, Result};
use std::path::PathBuf;

use fsnap::{Access, Volume};

pub fn exec(volume: PathBuf, file: PathBuf, len: u64) -> Result<()> {
    let vol = Volume::open(&volume)
        .with_context(|| format!("open volume {}", volume.display()))?;
    let h = vol
        .open_file(&file, Access::ReadWrite)
        .with_context(|| format!("open {}", file.display()))?;
    h.truncate(len)?;
    h.sync()?;
    println!("truncated {} to {} B", file.display(), len);
    Ok(())
}
