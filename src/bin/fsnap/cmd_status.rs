use anyhow::{Context, Result};
use serde::Serialize;
use std::path::PathBuf;

use fsnap::{metrics_snapshot, FileStat, MetricsSnapshot, SnapshotInfo, Volume};

#[derive(Serialize)]
struct Status {
    volume: String,
    config: ConfigView,
    #[serde(skip_serializing_if = "Option::is_none")]
    file: Option<FileView>,
    metrics: MetricsSnapshot,
}

#[derive(Serialize)]
struct ConfigView {
    max_chain_depth: usize,
    index_sync: String,
    copy_chunk: usize,
    dir_mode: String,
}

#[derive(Serialize)]
struct FileView {
    path: String,
    stat: FileStat,
    snapshots: Vec<SnapshotInfo>,
}

pub fn exec(volume: PathBuf, file: Option<PathBuf>, json: bool) -> Result<()> {
    let vol = Volume::open_read_only(&volume)
        .with_context(|| format!("open volume {}", volume.display()))?;
    let cfg = vol.config();

    let file_view = match file {
        Some(f) => {
            let stat = vol
                .stat(&f)
                .with_context(|| format!("stat {}", f.display()))?;
            let snapshots = if stat.snapshotted {
                vol.list_snapshots(&f)?
            } else {
                Vec::new()
            };
            Some(FileView {
                path: f.display().to_string(),
                stat,
                snapshots,
            })
        }
        None => None,
    };

    let st = Status {
        volume: volume.display().to_string(),
        config: ConfigView {
            max_chain_depth: cfg.max_chain_depth,
            index_sync: cfg.index_sync.to_string(),
            copy_chunk: cfg.copy_chunk,
            dir_mode: format!("{:o}", cfg.dir_mode),
        },
        file: file_view,
        metrics: metrics_snapshot(),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&st)?);
        return Ok(());
    }

    println!("volume: {}", st.volume);
    println!("  {}", cfg);
    if let Some(fv) = &st.file {
        println!("file: {}", fv.path);
        println!(
            "  size={} mode={:o} snapshotted={} depth={}",
            fv.stat.size, fv.stat.mode, fv.stat.snapshotted, fv.stat.depth
        );
        for s in &fv.snapshots {
            println!(
                "  - {} size={} entries={}{}",
                s.name,
                s.size,
                s.index_entries,
                if s.shared { " shared" } else { "" }
            );
        }
    }
    let m = &st.metrics;
    println!("metrics:");
    println!(
        "  reads={} read_bytes={} avg_segments={:.2}",
        m.read_calls,
        m.read_bytes,
        m.avg_segments_per_read()
    );
    println!("  writes={} write_bytes={}", m.write_calls, m.write_bytes);
    println!(
        "  snapshots: created={} deleted={} cloned={} renamed={} reverts={}",
        m.snapshots_created, m.snapshots_deleted, m.snapshots_cloned, m.snapshots_renamed,
        m.reverts_to_plain
    );
    println!(
        "  index_syncs={} merge_bytes_copied={}",
        m.index_syncs, m.merge_bytes_copied
    );
    Ok(())
}
