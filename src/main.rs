// ABOUTME: Entry point for the keyshift binary.
// ABOUTME: Parses CLI arguments, loads config, initializes tracing, and runs a migration or an import.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use keyshift_core::{Item, KeySchema};
use keyshift_migrate::{FileConfig, MigrationConfig, run};
use keyshift_store::SqliteTable;

/// Exit code reported when a run is stopped by Ctrl-C.
const EXIT_INTERRUPTED: u8 = 130;

#[derive(Debug, Parser)]
#[command(name = "keyshift", version, about = "Order-key 11 -> 13 digit table migrator")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Config file (defaults to $KEYSHIFT_CONFIG, then ./keyshift.yaml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Re-key every item of a table into the 13-digit format
    Migrate(MigrateArgs),
    /// Load items from a JSON-lines file into a table
    Import(ImportArgs),
}

#[derive(Debug, Args)]
struct TableArgs {
    /// Table name
    #[arg(long)]
    table: String,

    /// Partition key attribute
    #[arg(long, default_value = "pk")]
    pk: String,

    /// Sort key attribute
    #[arg(long, default_value = "sk")]
    sk: String,

    /// SQLite database file holding the table
    #[arg(long)]
    db: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct MigrateArgs {
    #[command(flatten)]
    table: TableArgs,

    /// Audit CSV path
    #[arg(long)]
    audit: Option<PathBuf>,

    /// Ignore the saved scan checkpoint and start from the beginning
    #[arg(long)]
    reset_scan: bool,
}

#[derive(Debug, Args)]
struct ImportArgs {
    #[command(flatten)]
    table: TableArgs,

    /// JSON-lines file, one item per line
    #[arg(long)]
    file: PathBuf,
}

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    match execute(cli).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("{:#}", e);
            eprintln!("error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn execute(cli: Cli) -> anyhow::Result<ExitCode> {
    let file = match FileConfig::locate(cli.config.as_deref()) {
        Some(path) => FileConfig::load(&path)?,
        None => FileConfig::default(),
    };

    let table_args = match &cli.command {
        Command::Migrate(args) => &args.table,
        Command::Import(args) => &args.table,
    };
    let mut config = MigrationConfig::new(
        table_args.table.clone(),
        KeySchema::new(table_args.pk.clone(), table_args.sk.clone()),
    )
    .with_file(&file);
    if let Some(db) = &table_args.db {
        config.store_path = db.clone();
    }

    init_tracing(&config.log_level, cli.verbose);

    match cli.command {
        Command::Migrate(args) => {
            if let Some(audit) = args.audit {
                config.audit_path = audit;
            }
            config.reset_scan = args.reset_scan;
            config.validate()?;
            migrate(&config).await
        }
        Command::Import(args) => {
            config.validate()?;
            import(&config, &args.file)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn init_tracing(level: &str, verbose: bool) {
    let default = if verbose { "debug" } else { level };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default)),
        )
        .init();
}

fn open_table(config: &MigrationConfig) -> anyhow::Result<SqliteTable> {
    SqliteTable::open(&config.store_path, &config.table, config.keys.clone()).with_context(|| {
        format!(
            "opening table {} in {}",
            config.table,
            config.store_path.display()
        )
    })
}

async fn migrate(config: &MigrationConfig) -> anyhow::Result<ExitCode> {
    let table = open_table(config)?;

    let interrupt = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&interrupt);
    tokio::spawn(watch_interrupts(tokio::signal::ctrl_c, flag, || {
        std::process::exit(i32::from(EXIT_INTERRUPTED));
    }));

    let summary = run(&table, config, &interrupt).await?;
    println!("{}", serde_json::to_string_pretty(&summary)?);

    if summary.interrupted {
        tracing::warn!("Interrupted - checkpoint saved.");
        Ok(ExitCode::from(EXIT_INTERRUPTED))
    } else {
        Ok(ExitCode::SUCCESS)
    }
}

/// Raise `flag` on the first signal so the run stops after the current item;
/// call `abort` on the second one.
async fn watch_interrupts<S, F, A>(mut signal: S, flag: Arc<AtomicBool>, abort: A)
where
    S: FnMut() -> F,
    F: Future<Output = std::io::Result<()>>,
    A: FnOnce(),
{
    if signal().await.is_err() {
        return;
    }
    tracing::warn!(
        "interrupt received, stopping after the current item (Ctrl-C again to abort)"
    );
    flag.store(true, Ordering::SeqCst);

    if signal().await.is_ok() {
        tracing::error!("second interrupt, aborting without waiting for the current item");
        abort();
    }
}

fn import(config: &MigrationConfig, path: &Path) -> anyhow::Result<()> {
    let table = open_table(config)?;
    let reader = BufReader::new(
        File::open(path).with_context(|| format!("opening {}", path.display()))?,
    );

    let mut count = 0usize;
    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let item: Item = serde_json::from_str(&line)
            .with_context(|| format!("{}:{}: invalid item", path.display(), index + 1))?;
        table
            .put(&item)
            .with_context(|| format!("{}:{}: write failed", path.display(), index + 1))?;
        count += 1;
    }

    tracing::info!("imported {} items into {}", count, config.table);
    println!("imported {} items", count);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A signal source that fires `count` times and then reports it is closed.
    fn signals(count: usize) -> impl FnMut() -> std::future::Ready<std::io::Result<()>> {
        let mut sent = 0;
        move || {
            sent += 1;
            std::future::ready(if sent <= count {
                Ok(())
            } else {
                Err(std::io::Error::other("signal stream closed"))
            })
        }
    }

    #[tokio::test]
    async fn first_interrupt_only_raises_flag() {
        let flag = Arc::new(AtomicBool::new(false));
        let mut aborted = false;
        watch_interrupts(signals(1), Arc::clone(&flag), || aborted = true).await;
        assert!(flag.load(Ordering::SeqCst));
        assert!(!aborted);
    }

    #[tokio::test]
    async fn second_interrupt_aborts() {
        let flag = Arc::new(AtomicBool::new(false));
        let mut aborted = false;
        watch_interrupts(signals(2), Arc::clone(&flag), || aborted = true).await;
        assert!(flag.load(Ordering::SeqCst));
        assert!(aborted);
    }

    #[tokio::test]
    async fn failed_signal_setup_leaves_flag_down() {
        let flag = Arc::new(AtomicBool::new(false));
        let mut aborted = false;
        watch_interrupts(signals(0), Arc::clone(&flag), || aborted = true).await;
        assert!(!flag.load(Ordering::SeqCst));
        assert!(!aborted);
    }
}
