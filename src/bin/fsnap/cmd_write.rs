use anyhow::{Context, Result};
use std::path::PathBuf;

use fsnap::{Access, Volume};

use super::util::decode_value_arg;

pub fn exec(volume: PathBuf, file: PathBuf, offset: u64, value: String) -> Result<()> {
    let (bytes, src) = decode_value_arg(&value)?;
    let vol = Volume::open(&volume)
        .with_context(|| format!("open volume {}", volume.display()))?;
    let h = vol
        .open_file(&file, Access::Create)
        .with_context(|| format!("open {}", file.display()))?;
    let n = h.write(offset, &bytes)?;
    h.sync()?;
    println!(
        "wrote {} B ({}) at {} -> {} (size {})",
        n,
        src.label(),
        offset,
        file.display(),
        h.size()?
    );
    Ok(())
}
