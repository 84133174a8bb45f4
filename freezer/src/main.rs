//! Freezer - Main entry point
//!
//! `freeze` stores a directory, `defrost` restores it, `watch` keeps it frozen.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use freezer::config::Config;
use freezer::daemon::ShutdownCoordinator;
use freezer::db::{close_pool, create_pool, SqliteRevisionStore};
use freezer::executor::marker::MarkerStore;
use freezer::watch::PathWatcher;
use freezer::{utils, BackupEngine, BackupOutcome, SourcePath};
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Store a directory as the current revision
    Freeze(FreezeArgs),

    /// Restore a directory from its current revision
    Defrost(DefrostArgs),

    /// Freeze a directory, then again every time it changes
    Watch(FreezeArgs),

    /// Inspect or change the configuration file
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[derive(Args, Debug)]
struct Target {
    /// Directory to operate on
    #[arg(short, long)]
    path: PathBuf,

    /// Storage id (defaults to the configured one)
    #[arg(short, long)]
    storage_id: Option<String>,

    /// Directory name placed in front of every archive entry
    #[arg(long)]
    local_name: Option<String>,
}

#[derive(Args, Debug)]
struct FreezeArgs {
    #[command(flatten)]
    target: Target,

    /// Append a new revision instead of overwriting the current one
    #[arg(long)]
    new_revision: bool,
}

#[derive(Args, Debug)]
struct DefrostArgs {
    #[command(flatten)]
    target: Target,

    /// Ignore the marker file and always check the stored revision
    #[arg(long)]
    force: bool,
}

#[derive(Subcommand, Debug)]
enum ConfigCommand {
    /// Print every effective setting
    Show,

    /// Update the database section
    Db {
        /// SQLite database file
        #[arg(long)]
        path: Option<PathBuf>,

        #[arg(long)]
        table_name: Option<String>,

        #[arg(long)]
        table_prefix: Option<String>,

        #[arg(long)]
        pool_size: Option<u32>,
    },
}

/// Storage id, path and local name after applying config defaults
struct Resolved {
    storage_id: String,
    path: PathBuf,
    local_name: Option<String>,
}

impl Resolved {
    fn new(target: Target, config: &Config) -> Self {
        Self {
            storage_id: target
                .storage_id
                .unwrap_or_else(|| config.storage.storage_id.clone()),
            path: target.path,
            local_name: target
                .local_name
                .or_else(|| config.storage.local_name.clone())
                .filter(|name| !name.is_empty()),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_path = cli.config.clone().unwrap_or_else(default_config_path);
    let config = if config_path.exists() {
        Config::from_file(&config_path)
            .with_context(|| format!("Failed to load {}", config_path.display()))?
    } else {
        Config::default()
    }
    .effective(&config_path);

    // Initialize logging
    let log_level = cli.log_level.as_deref().unwrap_or(&config.log.level);
    utils::logger::init(log_level)?;

    tracing::debug!(
        "Starting freezer v{} (config: {})",
        env!("CARGO_PKG_VERSION"),
        config_path.display()
    );

    match cli.command {
        Command::Freeze(args) => freeze(&config, args).await,
        Command::Defrost(args) => defrost(&config, args).await,
        Command::Watch(args) => watch(&config, args).await,
        Command::Config(command) => configure(&config_path, command),
    }
}

/// `$HOME/.freezer/config.toml`, or `.freezer/config.toml` under the working directory
fn default_config_path() -> PathBuf {
    let base = std::env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(|| std::env::current_dir().ok())
        .unwrap_or_else(|| PathBuf::from("."));
    base.join(".freezer").join("config.toml")
}

fn open_engine(config: &Config) -> Result<BackupEngine> {
    let pool = create_pool(&config.database.path, config.database.pool_size)?;
    let store = SqliteRevisionStore::open(pool, config.table_name()?)?;
    tracing::debug!(
        db = %config.database.path.display(),
        table = store.table(),
        "Revision store open"
    );
    Ok(BackupEngine::new(store))
}

fn close_engine(engine: BackupEngine) -> Result<()> {
    let pool = engine.store().pool().clone();
    engine.close()?;
    close_pool(&pool);
    Ok(())
}

fn report(storage_id: &str, outcome: &BackupOutcome) {
    match outcome {
        BackupOutcome::Stored {
            checksum,
            revision_id,
            ..
        } => println!("{} revision {} frozen ({})", storage_id, revision_id, checksum),
        BackupOutcome::EmptySource => println!("{} has nothing to freeze", storage_id),
    }
}

async fn freeze(config: &Config, args: FreezeArgs) -> Result<()> {
    let target = Resolved::new(args.target, config);
    let new_revision = args.new_revision || config.storage.new_revision;
    let engine = open_engine(config)?;

    tokio::task::spawn_blocking(move || -> Result<()> {
        let outcome = engine
            .backup(
                &target.storage_id,
                &target.path,
                target.local_name.as_deref(),
                new_revision,
            )
            .with_context(|| format!("Failed to freeze {}", target.path.display()))?;
        report(&target.storage_id, &outcome);
        close_engine(engine)
    })
    .await?
}

async fn defrost(config: &Config, args: DefrostArgs) -> Result<()> {
    let target = Resolved::new(args.target, config);
    let force = args.force;
    let engine = open_engine(config)?;

    tokio::task::spawn_blocking(move || -> Result<()> {
        if force && MarkerStore.delete(&target.path) {
            tracing::info!(path = %target.path.display(), "Marker removed");
        }

        let restored = engine
            .restore(&target.storage_id, &target.path, target.local_name.as_deref())
            .with_context(|| format!("Failed to defrost {}", target.path.display()))?;

        if restored {
            println!("{} defrosted into {}", target.storage_id, target.path.display());
        } else {
            println!("{} has no revision to defrost", target.storage_id);
        }
        close_engine(engine)
    })
    .await?
}

async fn watch(config: &Config, args: FreezeArgs) -> Result<()> {
    let target = Resolved::new(args.target, config);
    let new_revision = args.new_revision || config.storage.new_revision;
    let timeout = config.watch.timeout();

    let watcher = PathWatcher::available_or_noop(config.watch.mode, config.watch.poll_interval());
    if !watcher.is_available() {
        anyhow::bail!("File watching is not available (watch.mode = none?)");
    }
    let mut engine = open_engine(config)?.with_watcher(watcher);

    let shutdown = ShutdownCoordinator::new();
    let token = shutdown.token();

    let worker = tokio::task::spawn_blocking(move || -> Result<()> {
        let outcome = engine.backup(
            &target.storage_id,
            &target.path,
            target.local_name.as_deref(),
            new_revision,
        )?;
        report(&target.storage_id, &outcome);

        let source = SourcePath::new(target.storage_id.clone(), target.path.clone())
            .with_local_name(target.local_name.clone())
            .with_new_revision(new_revision);
        engine.add_source_path(source, None)?;
        tracing::info!(path = %target.path.display(), "Watching for changes, Ctrl+C to stop");

        while !token.is_cancelled() {
            for event in engine.monitor(1, timeout)? {
                tracing::debug!(path = %event.path.display(), mask = event.mask.bits(), "Change observed");
            }
        }

        close_engine(engine)
    });

    let signal = shutdown.clone();
    tokio::spawn(async move { signal.wait_for_signal().await });

    let result = worker.await?;
    // Stop the signal listener when the worker ends on its own
    shutdown.shutdown();
    result
}

fn configure(config_path: &Path, command: ConfigCommand) -> Result<()> {
    match command {
        ConfigCommand::Show => {
            let config = Config::load_or_create(config_path)?.effective(config_path);

            println!("# {}", config_path.display());
            for (key, value) in config.entries() {
                println!("{} = {}", key, value);
            }
        }
        ConfigCommand::Db {
            path,
            table_name,
            table_prefix,
            pool_size,
        } => {
            let mut config = Config::load_or_create(config_path)?;

            if let Some(path) = path {
                config.database.path = path;
            }
            if let Some(table_name) = table_name {
                config.database.table_name = table_name;
            }
            if let Some(table_prefix) = table_prefix {
                config.database.table_prefix = table_prefix;
            }
            if let Some(pool_size) = pool_size {
                config.database.pool_size = pool_size;
            }

            // Refuse to save a table name the store would reject
            config.table_name()?;
            config.save(config_path)?;
            println!("Updated {}", config_path.display());
        }
    }

    Ok(())
}
