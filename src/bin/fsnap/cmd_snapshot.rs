use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use fsnap::{DeleteOutcome, Volume};

fn open_rw(volume: &Path) -> Result<Volume> {
    Volume::open(volume).with_context(|| format!("open volume {}", volume.display()))
}

/// Создать снапшот (первый или очередной в цепочке).
pub fn exec_create(volume: PathBuf, file: PathBuf, name: String) -> Result<()> {
    let vol = open_rw(&volume)?;
    vol.create_snapshot(&file, &name)
        .with_context(|| format!("create snapshot '{}' of {}", name, file.display()))?;
    println!("snapshot '{}' created for {}", name, file.display());
    Ok(())
}

pub fn exec_delete(volume: PathBuf, file: PathBuf, name: String) -> Result<()> {
    let vol = open_rw(&volume)?;
    let outcome = vol
        .delete_snapshot(&file, &name)
        .with_context(|| format!("delete snapshot '{}' of {}", name, file.display()))?;
    match outcome {
        DeleteOutcome::Merged => println!("snapshot '{}' deleted", name),
        DeleteOutcome::Reverted => println!(
            "snapshot '{}' deleted; {} has no snapshots left",
            name,
            file.display()
        ),
    }
    Ok(())
}

pub fn exec_clone(volume: PathBuf, file: PathBuf, name: String, to: PathBuf) -> Result<()> {
    let vol = open_rw(&volume)?;
    vol.clone_snapshot(&file, &name, &to).with_context(|| {
        format!(
            "clone snapshot '{}' of {} to {}",
            name,
            file.display(),
            to.display()
        )
    })?;
    println!("snapshot '{}' cloned to {}", name, to.display());
    Ok(())
}

pub fn exec_rename(volume: PathBuf, file: PathBuf, from: String, to: String) -> Result<()> {
    let vol = open_rw(&volume)?;
    vol.rename_snapshot(&file, &from, &to)
        .with_context(|| format!("rename snapshot '{}' of {}", from, file.display()))?;
    println!("snapshot '{}' renamed to '{}'", from, to);
    Ok(())
}

/// Список снапшотов (от новых к ROOT), опционально JSON.
pub fn exec_list(volume: PathBuf, file: PathBuf, json: bool) -> Result<()> {
    let vol = Volume::open_read_only(&volume)
        .with_context(|| format!("open volume {}", volume.display()))?;
    if !vol.is_snapshot_root(&file)? {
        if json {
            println!("[]");
        } else {
            println!("(no snapshots)");
        }
        return Ok(());
    }
    let snaps = vol
        .list_snapshots(&file)
        .with_context(|| format!("list snapshots of {}", file.display()))?;
    if json {
        println!("{}", serde_json::to_string_pretty(&snaps)?);
        return Ok(());
    }
    for s in snaps {
        println!(
            "{:<24} size={} entries={}{}",
            s.name,
            s.size,
            s.index_entries,
            if s.shared { " shared" } else { "" }
        );
    }
    Ok(())
}
