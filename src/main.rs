use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use mediasentry::config::LoggingConfig;
use mediasentry::emby::EmbyClient;
use mediasentry::import_saver::ImportSaverSettings;
use mediasentry::releases::ReleaseWatcherSettings;
use mediasentry::store::{ReconciliationStore, ReleaseState};
use mediasentry::{Config, HealthCheck, Host, SyncEngine};

#[derive(Parser)]
#[command(name = "mediasentry")]
#[command(about = "Emby automation host: import-time saver, release watcher and trailer requests")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Configuration file path (defaults to XDG config location)
    #[arg(short, long)]
    config: Option<std::path::PathBuf>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run every configured module and the webhook server (default)
    Serve,

    /// Run a single import-time reconciliation pass
    Sync,

    /// Run a single release check
    Releases,

    /// Print a module's persisted state
    Store {
        #[arg(value_enum)]
        which: StoreKind,
    },

    /// System health check and diagnostics
    Doctor,

    /// Write a default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[derive(clap::ValueEnum, Clone, Copy)]
enum StoreKind {
    /// Import-time database
    Import,

    /// Release watcher database
    Releases,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Some(Commands::Init { force }) = cli.command {
        init_logging(cli.verbose, &LoggingConfig::default())?;
        return cmd_init(cli.config, force);
    }

    let config = load_config(cli.config)?;
    init_logging(cli.verbose, &config.logging)?;
    info!("Starting MediaSentry v{}", env!("CARGO_PKG_VERSION"));

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => Host::new(config).run().await,
        Commands::Sync => cmd_sync(&config).await,
        Commands::Releases => cmd_releases(&config).await,
        Commands::Store { which } => cmd_store(which, &config),
        Commands::Doctor => cmd_doctor(&config).await,
        Commands::Init { .. } => Ok(()),
    }
}

/// Initialize logging: RUST_LOG wins, then --verbose, then the config file
fn init_logging(verbose: bool, logging: &LoggingConfig) -> Result<()> {
    let default_level = if verbose { "debug" } else { logging.level.as_str() };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let layer = fmt::layer().with_ansi(logging.color);
    let layer = if logging.format == "full" {
        layer.boxed()
    } else {
        layer.compact().boxed()
    };

    tracing_subscriber::registry()
        .with(layer)
        .with(filter)
        .init();

    Ok(())
}

/// Load configuration from specified path or default location
fn load_config(config_path: Option<std::path::PathBuf>) -> Result<Config> {
    match config_path {
        Some(path) => Config::load(&path),
        None => Config::load_or_default(),
    }
}

/// Write a default configuration file
fn cmd_init(config_path: Option<std::path::PathBuf>, force: bool) -> Result<()> {
    let path = match config_path {
        Some(path) => path,
        None => Config::default_config_path()?,
    };

    if path.exists() && !force {
        println!("⚠️  Configuration already exists: {}", path.display());
        println!("   Use --force to overwrite");
        return Ok(());
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
    }

    Config::default().save(&path)?;

    println!("✅ MediaSentry initialized successfully!");
    println!("   Config: {}", path.display());
    println!("   Next: add an emby section and the module sections you want, then run 'mediasentry doctor'");

    Ok(())
}

/// One reconciliation pass against Emby
async fn cmd_sync(config: &Config) -> Result<()> {
    let section = config
        .import_saver
        .as_ref()
        .context("import_saver section missing from config")?;
    let settings = ImportSaverSettings::from_config(section)?;

    let emby = EmbyClient::new(&config.emby)?.with_item_types(&settings.item_types);
    let store = ReconciliationStore::open_reconciliation(&settings.db_path)?;

    let engine = SyncEngine::new(
        Arc::new(emby),
        Arc::new(Mutex::new(store)),
        settings.library_view_user,
        settings.forget_time,
    )?;

    println!("🔄 Syncing with Emby...");
    let summary = engine.run_pass().await?;

    println!();
    println!("📊 Sync Summary:");
    println!("   ➕ Created: {}", summary.created);
    println!("   ✏️  Updated: {}", summary.updated);
    println!("   ❓ Missing: {}", summary.missing);
    println!("   🗑️  Deleted: {}", summary.deleted);
    println!("   ⏭️  Skipped: {}", summary.skipped);
    println!("   ❌ Failed: {}", summary.failed);
    println!("   ⏱️  Duration: {:.2}s", summary.duration.as_secs_f64());

    Ok(())
}

/// One release check tick
async fn cmd_releases(config: &Config) -> Result<()> {
    let section = config
        .release_watcher
        .as_ref()
        .context("release_watcher section missing from config")?;
    let mut watcher = ReleaseWatcherSettings::from_config(section)?.into_watcher()?;

    println!("🔍 Checking releases...");
    let summary = watcher.check_all().await?;

    println!();
    println!("📊 Release Check Summary:");
    println!("   📦 Checked: {}", summary.checked);
    println!("   📣 Notified: {}", summary.notified);
    println!("   ❌ Failed: {}", summary.failed);

    Ok(())
}

/// Dump persisted module state
fn cmd_store(which: StoreKind, config: &Config) -> Result<()> {
    match which {
        StoreKind::Import => {
            let section = config
                .import_saver
                .as_ref()
                .context("import_saver section missing from config")?;
            let settings = ImportSaverSettings::from_config(section)?;
            let store = ReconciliationStore::open_reconciliation(&settings.db_path)?;

            println!("Entries ({}):", store.len());
            for (key, entry) in store.entries() {
                println!(
                    "   {}  baseline {}  last seen {}",
                    key,
                    entry.baseline.to_rfc3339(),
                    entry.last_seen.to_rfc3339()
                );
            }
        }
        StoreKind::Releases => {
            let section = config
                .release_watcher
                .as_ref()
                .context("release_watcher section missing from config")?;
            let settings = ReleaseWatcherSettings::from_config(section)?;
            let state = ReleaseState::open_releases(&settings.db_file)?;

            println!("Repositories ({}):", state.len());
            for (repo, version) in state.entries() {
                println!("   📦 {}  {}", repo, version);
            }
        }
    }

    Ok(())
}

/// Run system diagnostics
async fn cmd_doctor(config: &Config) -> Result<()> {
    let health = HealthCheck::run(config).await;
    print_health_report(&health);

    if !health.all_passed() {
        std::process::exit(1);
    }

    Ok(())
}

/// Print health check report to stdout
fn print_health_report(health: &HealthCheck) {
    use mediasentry::health::CheckResult;

    fn print_check(name: &str, result: &CheckResult) {
        println!("{}:", name);
        let icon = if result.passed {
            if result.is_warning { "⚠️ " } else { "✅" }
        } else {
            "❌"
        };
        println!("  {} {}", icon, result.message);
        if let Some(details) = &result.details {
            for line in details.lines() {
                println!("     {}", line);
            }
        }
    }

    println!("🔍 MediaSentry System Diagnostics");
    println!();

    for (name, result) in health.all_checks() {
        print_check(name, result);
    }

    println!();
    if health.all_passed() {
        println!("✅ All checks passed");
    } else {
        println!("❌ {} check(s) failed", health.errors().len());
    }
}
