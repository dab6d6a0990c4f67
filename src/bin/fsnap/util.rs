use anyhow::{bail, Context, Result};
use std::fs;
use std::io::Read;
use std::path::Path;

/// Where the bytes of `fsnap write --value` come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueSource {
    /// `-`
    Stdin,
    /// `@path`
    File,
    /// `hex:0a0b..`
    Hex,
    /// anything else, taken as UTF-8
    Text,
}

impl ValueSource {
    pub fn label(self) -> &'static str {
        match self {
            ValueSource::Stdin => "stdin",
            ValueSource::File => "file",
            ValueSource::Hex => "hex",
            ValueSource::Text => "text",
        }
    }
}

pub fn decode_value_arg(arg: &str) -> Result<(Vec<u8>, ValueSource)> {
    if arg == "-" {
        let mut buf = Vec::new();
        std::io::stdin()
            .read_to_end(&mut buf)
            .context("read value from stdin")?;
        return Ok((buf, ValueSource::Stdin));
    }
    if let Some(p) = arg.strip_prefix('@') {
        let bytes = fs::read(p).with_context(|| format!("read value file {}", p))?;
        return Ok((bytes, ValueSource::File));
    }
    if let Some(hx) = arg.strip_prefix("hex:") {
        return Ok((parse_hex(hx)?, ValueSource::Hex));
    }
    Ok((arg.as_bytes().to_vec(), ValueSource::Text))
}

fn parse_hex(s: &str) -> Result<Vec<u8>> {
    let s = s.trim();
    if s.len() % 2 != 0 {
        bail!("hex value has odd length {}", s.len());
    }
    s.as_bytes()
        .chunks(2)
        .enumerate()
        .map(|(i, pair)| {
            std::str::from_utf8(pair)
                .ok()
                .and_then(|p| u8::from_str_radix(p, 16).ok())
                .with_context(|| format!("bad hex byte at {}", i * 2))
        })
        .collect()
}

/// Dump read bytes into `out_path` (parent dirs created).
pub fn write_out(out_path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = out_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).with_context(|| format!("mkdir {}", parent.display()))?;
    }
    fs::write(out_path, bytes).with_context(|| format!("write {}", out_path.display()))
}
