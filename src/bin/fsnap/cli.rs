use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// CLI для fsnap: запись/чтение файлов тома и управление снапшотами
#[derive(Parser, Debug)]
#[command(name = "fsnap", version, about = "fsnap per-file snapshot CLI")]
pub struct Cli {
    #[command(subcommand)]
    pub cmd: Cmd,
}

#[derive(Subcommand, Debug)]
pub enum Cmd {
    /// Write bytes into a file (created as a plain file if missing)
    ///
    /// Value forms: literal UTF-8, hex:deadbeef, @./file.bin, - (stdin)
    Write {
        #[arg(long)]
        volume: PathBuf,
        /// File path relative to the volume root
        #[arg(long)]
        file: PathBuf,
        #[arg(long, default_value_t = 0)]
        offset: u64,
        #[arg(long)]
        value: String,
    },
    /// Read a byte range of the current content (or of a snapshot)
    Read {
        #[arg(long)]
        volume: PathBuf,
        #[arg(long)]
        file: PathBuf,
        #[arg(long, default_value_t = 0)]
        offset: u64,
        /// Bytes to read (default: to end of file)
        #[arg(long)]
        len: Option<usize>,
        /// Read from this snapshot instead of HEAD
        #[arg(long)]
        snapshot: Option<String>,
        /// Write raw bytes into this file instead of printing
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Resize a file
    Truncate {
        #[arg(long)]
        volume: PathBuf,
        #[arg(long)]
        file: PathBuf,
        #[arg(long)]
        len: u64,
    },
    /// Snapshot management
    Snapshot {
        #[command(subcommand)]
        cmd: SnapCmd,
    },
    /// Volume / file status and process metrics
    ///
    /// Example:
    ///   fsnap status --volume ./vol --file data.img --json
    Status {
        #[arg(long)]
        volume: PathBuf,
        #[arg(long)]
        file: Option<PathBuf>,
        #[arg(long, default_value_t = false)]
        json: bool,
    },
}

#[derive(Subcommand, Debug)]
pub enum SnapCmd {
    /// Freeze the current content under a name
    Create {
        #[arg(long)]
        volume: PathBuf,
        #[arg(long)]
        file: PathBuf,
        #[arg(long)]
        name: String,
    },
    /// Delete a snapshot (content is merged into its neighbour)
    Delete {
        #[arg(long)]
        volume: PathBuf,
        #[arg(long)]
        file: PathBuf,
        #[arg(long)]
        name: String,
    },
    /// Clone a snapshot into a new file (layers are hard-linked)
    Clone {
        #[arg(long)]
        volume: PathBuf,
        #[arg(long)]
        file: PathBuf,
        #[arg(long)]
        name: String,
        /// New file path relative to the volume root
        #[arg(long)]
        to: PathBuf,
    },
    /// Rename a snapshot
    Rename {
        #[arg(long)]
        volume: PathBuf,
        #[arg(long)]
        file: PathBuf,
        #[arg(long)]
        from: String,
        #[arg(long)]
        to: String,
    },
    /// List snapshots, newest first
    List {
        #[arg(long)]
        volume: PathBuf,
        #[arg(long)]
        file: PathBuf,
        #[arg(long, default_value_t = false)]
        json: bool,
    },
}
