//! Redis Migration CLI
//!
//! CLI tool for copying, moving, deleting, listing and counting Redis keys.
//! Pedantic lints relaxed for CLI ergonomics.

// CLI tool - relax pedantic lints for ergonomics
#![allow(clippy::pedantic)]

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use redis_migrate::{
    commands, open_store, HashOverwriteMode, MigrationConfig, MigrationMode,
    MigrationOptions, MigrationRequest, MigrationResult, Migrator, StoreEndpoint,
    UnsupportedTypePolicy,
};
use redis_migrate::endpoint::TlsOptions;

#[derive(Parser)]
#[command(name = "redis-migrate")]
#[command(version)]
#[command(about = "Copy, move, delete, list and count Redis keys", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Connect to every endpoint over TLS
    #[arg(long, global = true)]
    tls: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Copy keys from source to destination
    Copy {
        #[command(flatten)]
        transfer: TransferArgs,
    },

    /// Move keys from source to destination
    Move {
        #[command(flatten)]
        transfer: TransferArgs,
    },

    /// Delete keys matching a pattern
    #[command(alias = "del")]
    Delete {
        /// Redis address ([auth@]host[:port][/db])
        address: StoreEndpoint,

        /// Key pattern
        #[arg(default_value = "*")]
        pattern: String,

        /// Do not ask for confirmation
        #[arg(short, long)]
        yes: bool,
    },

    /// List keys matching a pattern with type, length and TTL
    List {
        /// Redis address ([auth@]host[:port][/db])
        address: StoreEndpoint,

        /// Key pattern
        #[arg(default_value = "*")]
        pattern: String,
    },

    /// Count keys matching a pattern
    Count {
        /// Redis address ([auth@]host[:port][/db])
        address: StoreEndpoint,

        /// Key pattern
        #[arg(default_value = "*")]
        pattern: String,
    },

    /// Run migration from config file
    Run {
        /// Configuration file path
        #[arg(short, long, value_name = "FILE")]
        config: PathBuf,

        /// Concurrency override
        #[arg(long, env = "REDIS_MIGRATE_CONCURRENCY")]
        concurrency: Option<usize>,
    },

    /// Validate configuration file
    Validate {
        /// Configuration file path
        #[arg(short, long, value_name = "FILE")]
        config: PathBuf,
    },
}

#[derive(Args)]
struct TransferArgs {
    /// Source address ([auth@]host[:port][/db])
    source: StoreEndpoint,

    /// Destination address ([auth@]host[:port][/db])
    destination: StoreEndpoint,

    /// Key pattern
    #[arg(short, long, default_value = "*")]
    pattern: String,

    /// Overwrite keys that already exist at the destination
    #[arg(short, long)]
    overwrite: bool,

    /// Hash overwrite mode (field or key)
    #[arg(short = 'm', long, default_value = "key")]
    hash_overwrite_mode: HashOverwriteMode,

    /// Keys per SCAN page (move) or per batch (copy)
    #[arg(short = 's', long, default_value_t = 1000)]
    page_size: usize,

    /// Keys transferred concurrently
    #[arg(short, long, env = "REDIS_MIGRATE_CONCURRENCY", default_value_t = 1)]
    concurrency: usize,

    /// Skip keys of unsupported types instead of aborting
    #[arg(long)]
    skip_unsupported: bool,

    /// Per-command timeout in seconds
    #[arg(long, value_name = "SECS")]
    timeout: Option<u64>,

    /// Show a progress spinner
    #[arg(long)]
    progress: bool,
}

fn secure(endpoint: StoreEndpoint, tls: bool) -> StoreEndpoint {
    if tls && endpoint.tls.is_none() {
        endpoint.with_tls(TlsOptions::default())
    } else {
        endpoint
    }
}

impl TransferArgs {
    fn into_request(self, tls: bool) -> MigrationRequest {
        let options = MigrationOptions {
            concurrency: self.concurrency,
            unsupported_type: if self.skip_unsupported {
                UnsupportedTypePolicy::Skip
            } else {
                UnsupportedTypePolicy::Abort
            },
            progress: self.progress,
            command_timeout_secs: self.timeout,
        };
        MigrationRequest::new(secure(self.source, tls), secure(self.destination, tls))
            .with_pattern(self.pattern)
            .with_overwrite(self.overwrite)
            .with_hash_overwrite_mode(self.hash_overwrite_mode)
            .with_page_size(self.page_size)
            .with_options(options)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Copy { transfer } => {
            run_migration(transfer.into_request(cli.tls), MigrationMode::Copy).await?;
        }
        Commands::Move { transfer } => {
            run_migration(transfer.into_request(cli.tls), MigrationMode::Move).await?;
        }
        Commands::Delete {
            address,
            pattern,
            yes,
        } => {
            delete_keys(&secure(address, cli.tls), &pattern, yes).await?;
        }
        Commands::List { address, pattern } => {
            list_keys(&secure(address, cli.tls), &pattern).await?;
        }
        Commands::Count { address, pattern } => {
            count_keys(&secure(address, cli.tls), &pattern).await?;
        }
        Commands::Run {
            config,
            concurrency,
        } => {
            run_from_config(&config, concurrency).await?;
        }
        Commands::Validate { config } => {
            validate_config(&config)?;
        }
    }

    Ok(())
}

/// Cancels `token` on Ctrl-C.
fn cancel_on_ctrl_c(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, stopping after in-flight commands");
            token.cancel();
        }
    });
}

async fn run_migration(request: MigrationRequest, mode: MigrationMode) -> anyhow::Result<()> {
    request.validate()?;

    let verb = match mode {
        MigrationMode::Copy => "Copying",
        MigrationMode::Move => "Moving",
    };
    println!("{verb} keys");
    println!("   From:           {}", request.source);
    println!("   To:             {}", request.destination);
    println!("   Pattern:        {}", request.pattern);
    println!("   Overwrite:      {}", request.overwrite);
    println!("   Hash overwrite: {}", request.hash_overwrite_mode);

    let migrator = Migrator::connect(request).await?;
    cancel_on_ctrl_c(migrator.cancellation_token());
    let result = migrator.run(mode).await?;

    print_summary(mode, &result);
    Ok(())
}

fn print_summary(mode: MigrationMode, result: &MigrationResult) {
    match mode {
        MigrationMode::Copy => println!(
            "Copy complete. Copied {} of {} keys.",
            result.transferred, result.scanned
        ),
        MigrationMode::Move => println!(
            "Move complete. Moved {} of {} keys.",
            result.transferred, result.scanned
        ),
    }
    if result.unsupported > 0 {
        println!("   Unsupported: {} keys skipped", result.unsupported);
    }
    if result.hash_fields_written > 0 {
        println!("   Hash fields: {}", result.hash_fields_written);
    }
    println!("   Duration:  {:.2}s", result.duration_secs);
    println!("   Throughput: {:.0} keys/sec", result.throughput());
}

async fn delete_keys(address: &StoreEndpoint, pattern: &str, yes: bool) -> anyhow::Result<()> {
    println!("Deleting keys matching '{pattern}' from: {address}");

    if !yes && console::user_attended() {
        let confirmed = dialoguer::Confirm::new()
            .with_prompt(format!("Delete all keys matching '{pattern}'?"))
            .default(false)
            .interact()?;
        if !confirmed {
            println!("Aborted.");
            return Ok(());
        }
    }

    let mut store = open_store(address, None).await?;
    let deleted = commands::delete(store.as_ref(), pattern).await;
    store.close().await?;
    let deleted = deleted?;

    println!("Delete complete. Deleted {deleted} keys.");
    Ok(())
}

async fn list_keys(address: &StoreEndpoint, pattern: &str) -> anyhow::Result<()> {
    let mut store = open_store(address, None).await?;
    let listings = commands::list(store.as_ref(), pattern).await;
    store.close().await?;
    let listings = listings?;

    for listing in &listings {
        println!("{listing}");
    }
    println!("Found {} keys matching the specified pattern.", listings.len());
    Ok(())
}

async fn count_keys(address: &StoreEndpoint, pattern: &str) -> anyhow::Result<()> {
    let mut store = open_store(address, None).await?;
    let count = commands::count(store.as_ref(), pattern).await;
    store.close().await?;
    let count = count?;

    println!("Found {count} keys matching the specified pattern.");
    Ok(())
}

async fn run_from_config(config_path: &PathBuf, concurrency: Option<usize>) -> anyhow::Result<()> {
    info!("Loading configuration from {:?}", config_path);

    let mut config = MigrationConfig::from_file(config_path)?;

    if let Some(c) = concurrency {
        config.request.options.concurrency = c;
    }

    config.validate()?;
    run_migration(config.request, config.mode).await
}

fn validate_config(config_path: &PathBuf) -> anyhow::Result<()> {
    info!("Validating configuration from {:?}", config_path);

    let config = MigrationConfig::from_file(config_path)?;
    config.validate()?;

    let timeout = config
        .request
        .options
        .command_timeout()
        .map_or("none".to_string(), |d: Duration| format!("{}s", d.as_secs()));

    println!("Configuration is valid!");
    println!("   Mode:        {}", config.mode);
    println!("   Source:      {}", config.request.source);
    println!("   Destination: {}", config.request.destination);
    println!("   Pattern:     {}", config.request.pattern);
    println!("   Page size:   {}", config.request.page_size);
    println!("   Concurrency: {}", config.request.options.concurrency);
    println!("   Timeout:     {timeout}");

    Ok(())
}
