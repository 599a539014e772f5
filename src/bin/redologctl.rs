//! redologctl
//!
//! Inspects and repairs redo log files.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use redolog::wal::{PlaybackWindow, RedoPlayer, ScanOptions};
use redolog::{LogReader, Result};
use tracing_subscriber::{fmt, EnvFilter};

/// Redo log inspection tool
#[derive(Parser, Debug)]
#[command(name = "redologctl")]
#[command(about = "Inspect, verify and repair redo log files")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the file header
    Header {
        /// Redo log file
        file: PathBuf,
    },

    /// Print every recoverable entry
    Dump {
        /// Redo log file
        file: PathBuf,

        /// Also print payloads as hex
        #[arg(long)]
        payload: bool,
    },

    /// Scan the log and report transaction state without modifying it
    Verify {
        /// Redo log file
        file: PathBuf,
    },

    /// Scan the log and truncate junk after the last good entry
    Recover {
        /// Redo log file
        file: PathBuf,
    },

    /// Print committed changes in replay order across archived and active logs
    Playback {
        /// Play these logs, in order, instead of the archive and active log
        #[arg(long = "logfiles", num_args = 1..)]
        logfiles: Vec<PathBuf>,

        /// Directory holding rolled-over logs
        #[arg(long, default_value = "./redolog/archive")]
        archive_dir: PathBuf,

        /// Active redo log
        #[arg(long, default_value = "./redolog/redo.log")]
        log_path: PathBuf,

        /// First log sequence to play (inclusive)
        #[arg(long)]
        from_seq: Option<i64>,

        /// Last log sequence to play (inclusive)
        #[arg(long)]
        to_seq: Option<i64>,

        /// Skip changes stamped before this unix millis time
        #[arg(long)]
        from_time: Option<i64>,

        /// Skip changes committed after this unix millis time
        #[arg(long)]
        to_time: Option<i64>,

        /// Stop at the first unreadable log
        #[arg(long)]
        stop_on_error: bool,
    },
}

fn main() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn,redolog=info"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    if let Err(e) = run(args.command) {
        tracing::error!("{}", e);
        std::process::exit(1);
    }
}

fn run(command: Commands) -> Result<()> {
    match command {
        Commands::Header { file } => {
            let mut reader = LogReader::new(&file);
            reader.open()?;
            if let Some(header) = reader.header() {
                println!("{}", header);
            }
        }
        Commands::Dump { file, payload } => {
            let mut reader = LogReader::new(&file);
            reader.open()?;
            while let Some(op) = reader.next_logged_op()? {
                println!("[{}] {}", reader.last_op_start_offset(), op);
                if payload {
                    println!("    {}", hex(&op.payload));
                }
            }
            if reader.skipped_bytes() > 0 {
                println!("skipped {} bytes of garbage", reader.skipped_bytes());
            }
        }
        Commands::Verify { file } => {
            let result = RedoPlayer::verify(&file)?;
            print_scan(&result);
        }
        Commands::Recover { file } => {
            let result = RedoPlayer::scan(
                &file,
                &ScanOptions {
                    writable: true,
                    ..ScanOptions::default()
                },
            )?;
            print_scan(&result);
        }
        Commands::Playback {
            logfiles,
            archive_dir,
            log_path,
            from_seq,
            to_seq,
            from_time,
            to_time,
            stop_on_error,
        } => {
            let defaults = PlaybackWindow::default();
            let window = PlaybackWindow {
                from_sequence: from_seq.unwrap_or(defaults.from_sequence),
                to_sequence: to_seq.unwrap_or(defaults.to_sequence),
                from_time: from_time.unwrap_or(defaults.from_time),
                to_time: to_time.unwrap_or(defaults.to_time),
                stop_on_error,
            };
            window.validate()?;

            let logs = if logfiles.is_empty() {
                RedoPlayer::select_logs(&archive_dir, &log_path, &window)?
            } else {
                RedoPlayer::retain_in_window(logfiles, &window)?
            };
            println!("{} redo log files to play back", logs.len());

            let result = RedoPlayer::playback(&logs, &window, |op| {
                println!("{}", op);
                Ok(())
            })?;
            println!("files played:   {}", result.files);
            println!("ops read:       {}", result.ops_read);
            println!("replayed:       {}", result.replayed);
            println!("outside window: {}", result.outside_window);
        }
    }
    Ok(())
}

fn print_scan(result: &redolog::wal::ScanResult) {
    println!("ops read:       {}", result.ops_read);
    println!("committed:      {}", result.committed);
    println!("aborted:        {}", result.aborted);
    println!("checkpoints:    {}", result.checkpoints);
    println!("orphans:        {}", result.orphans);
    println!("skipped bytes:  {}", result.skipped_bytes);
    println!("junk at end:    {}", result.junk_bytes);
    println!("truncated:      {}", result.was_truncated);
    println!("uncommitted:    {}", result.uncommitted.len());
    for op in &result.uncommitted {
        println!("    {}", op);
    }
}

fn hex(data: &[u8]) -> String {
    data.iter().map(|b| format!("{:02x}", b)).collect()
}
