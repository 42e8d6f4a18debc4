//! gatekv CLI
//!
//! Command-line interface for a gatekv snapshot file.

use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use gatekv::{stress, Config, ConcurrencyMode, KeyValueStore, ReloadPolicy, SyncStore};
use tracing_subscriber::{fmt, EnvFilter};

/// gatekv CLI
#[derive(Parser, Debug)]
#[command(name = "gatekv-cli")]
#[command(about = "CLI for the gatekv key-value store")]
#[command(version)]
struct Args {
    /// Snapshot file (must end in .gkv)
    #[arg(short, long, default_value = "./gatekv_data/store.gkv")]
    file: String,

    /// Maximum concurrent readers
    #[arg(short, long, default_value = "4")]
    readers: usize,

    /// Coordinate threads in this process, or processes via named semaphores
    #[arg(short, long, value_enum, default_value = "threads")]
    mode: ModeArg,

    /// When to re-read the snapshot file
    #[arg(long, value_enum, default_value = "after-write")]
    reload: ReloadArg,

    /// Remove this file's named semaphores before opening (processes mode).
    /// Use it when no other process has the store open, to change
    /// --readers or to recover permits left taken by a killed process.
    #[arg(long)]
    reset: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Get a value by key
    Get {
        /// The key to get
        key: String,
    },

    /// Set a key-value pair
    Set {
        /// The key to set
        key: String,

        /// The value to set
        value: String,
    },

    /// Delete a key
    Del {
        /// The key to delete
        key: String,
    },

    /// List all keys
    Keys,

    /// Run concurrent readers and writers against one key
    Stress {
        /// Key to hammer
        #[arg(long, default_value = "testKey")]
        key: String,

        /// Reader threads
        #[arg(long, default_value = "5")]
        read_tasks: usize,

        /// Writer threads
        #[arg(long, default_value = "5")]
        write_tasks: usize,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum ModeArg {
    Threads,
    Processes,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum ReloadArg {
    AfterWrite,
    OnChange,
    Always,
}

impl From<ModeArg> for ConcurrencyMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Threads => ConcurrencyMode::Threads,
            ModeArg::Processes => ConcurrencyMode::Processes,
        }
    }
}

impl From<ReloadArg> for ReloadPolicy {
    fn from(reload: ReloadArg) -> Self {
        match reload {
            ReloadArg::AfterWrite => ReloadPolicy::AfterWrite,
            ReloadArg::OnChange => ReloadPolicy::OnChange,
            ReloadArg::Always => ReloadPolicy::Always,
        }
    }
}

fn main() {
    // Initialize tracing/logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,gatekv=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    tracing::info!("gatekv CLI v{}", gatekv::VERSION);
    tracing::info!("Snapshot file: {}", args.file);

    // Build config from args
    let config = Config::builder()
        .snapshot_path(&args.file)
        .read_capacity(args.readers)
        .mode(args.mode.into())
        .reload_policy(args.reload.into())
        .build();

    if args.reset {
        if let Err(e) = reset_named(&config) {
            tracing::error!("Failed to reset named semaphores: {}", e);
            std::process::exit(1);
        }
    }

    let store: SyncStore<String> = match SyncStore::open(config) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!("Failed to open store: {}", e);
            std::process::exit(1);
        }
    };

    let ok = match args.command {
        Commands::Get { key } => match store.get(&key) {
            Some(value) => {
                println!("{}", value);
                true
            }
            None => {
                println!("(nil)");
                false
            }
        },
        Commands::Set { key, value } => report(store.set(&key, value)),
        Commands::Del { key } => report(store.delete(&key)),
        Commands::Keys => {
            for key in store.keys() {
                println!("{}", key);
            }
            true
        }
        Commands::Stress {
            key,
            read_tasks,
            write_tasks,
        } => run_stress(store, &key, read_tasks, write_tasks),
    };

    if !ok {
        std::process::exit(1);
    }
}

fn report(ok: bool) -> bool {
    println!("{}", if ok { "OK" } else { "FAILED" });
    ok
}

#[cfg(unix)]
fn reset_named(config: &Config) -> gatekv::Result<()> {
    gatekv::AccessCoordinator::remove_named(&config.snapshot_path)?;
    tracing::info!("Named semaphores removed");
    Ok(())
}

#[cfg(not(unix))]
fn reset_named(_config: &Config) -> gatekv::Result<()> {
    Ok(())
}

/// Race readers against writers and print what they saw
fn run_stress(store: SyncStore<String>, key: &str, read_tasks: usize, write_tasks: usize) -> bool {
    let report = match stress::run(Arc::new(store), key, read_tasks, write_tasks) {
        Ok(report) => report,
        Err(e) => {
            tracing::error!("Stress run failed: {}", e);
            return false;
        }
    };

    for (i, observed) in report.observations.iter().enumerate() {
        println!("read {}: {}", i, observed.as_deref().unwrap_or("(nil)"));
    }
    println!(
        "final: {} (peak concurrent readers {}/{})",
        report.final_value.as_deref().unwrap_or("(nil)"),
        report.peak_readers,
        report.capacity
    );

    report.passed()
}
