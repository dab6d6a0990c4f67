use anyhow::Result;
use env_logger::{Builder, Env};

mod cli;
mod util;
mod cmd_write;
mod cmd_read;
mod cmd_truncate;
mod cmd_snapshot;
mod cmd_status;

fn init_logger() {
    // Уровень берём из RUST_LOG, иначе дефолт — info.
    // Пример: RUST_LOG=debug fsnap ...
    Builder::from_env(Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();
}

fn main() {
    init_logger();

    if let Err(e) = run() {
        eprintln!("error: {:#}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    use clap::Parser;
    let cli = cli::Cli::parse();
    match cli.cmd {
        cli::Cmd::Write { volume, file, offset, value } =>
            cmd_write::exec(volume, file, offset, value),

        cli::Cmd::Read { volume, file, offset, len, snapshot, out } =>
            cmd_read::exec(volume, file, offset, len, snapshot, out),

        cli::Cmd::Truncate { volume, file, len } =>
            cmd_truncate::exec(volume, file, len),

        cli::Cmd::Snapshot { cmd } => match cmd {
            cli::SnapCmd::Create { volume, file, name } =>
                cmd_snapshot::exec_create(volume, file, name),
            cli::SnapCmd::Delete { volume, file, name } =>
                cmd_snapshot::exec_delete(volume, file, name),
            cli::SnapCmd::Clone { volume, file, name, to } =>
                cmd_snapshot::exec_clone(volume, file, name, to),
            cli::SnapCmd::Rename { volume, file, from, to } =>
                cmd_snapshot::exec_rename(volume, file, from, to),
            cli::SnapCmd::List { volume, file, json } =>
                cmd_snapshot::exec_list(volume, file, json),
        },

        // Status supports --json flag
        cli::Cmd::Status { volume, file, json } =>
            cmd_status::exec(volume, file, json),
    }
}
