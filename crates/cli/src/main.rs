use clap::{Parser, Subcommand};
use geodex_core::{config::AppConfig, ResolverService};
use tracing::warn;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "geodex")]
#[command(about = "Geodex - IP geolocation resolver with tiered caching and provider failover")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to the configuration file (also settable via GEODEX_CONFIG)
    #[arg(long)]
    config: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve one or more IP addresses and print the records as JSON
    Resolve {
        /// Addresses to resolve
        #[arg(required = true)]
        keys: Vec<String>,

        /// Print resolver statistics after resolving
        #[arg(long)]
        stats: bool,
    },

    /// Print store row count and an (empty-process) stats snapshot
    Stats,

    /// Check a key against the configured allow-list
    CheckAllowed {
        /// Address to check
        key: String,
    },

    /// Remove expired entries from the memory cache and the store
    ClearExpired,

    /// Remove every cached and stored record
    ClearAll,

    /// Validate the configuration file and print the effective settings
    CheckConfig,
}

fn load_config(cli: &Cli) -> Result<AppConfig, String> {
    let config = match &cli.config {
        Some(path) => AppConfig::from_file(path),
        None => AppConfig::load(),
    }
    .map_err(|e| format!("failed to load configuration: {e}"))?;

    config.validate()?;
    Ok(config)
}

fn init_logging(config: &AppConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.level.clone()));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if config.logging.format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn build_resolver(config: &AppConfig) -> Result<ResolverService, String> {
    ResolverService::from_config(config)
        .await
        .map_err(|e| format!("failed to initialize resolver: {e}"))
}

async fn run(cli: Cli) -> Result<(), String> {
    let config = load_config(&cli)?;
    init_logging(&config);

    match cli.command {
        Commands::Resolve { keys, stats } => {
            let resolver = build_resolver(&config).await?;
            resolver.start_background_tasks();

            for key in &keys {
                let record = resolver.resolve(key).await;
                let json = serde_json::to_string_pretty(record.as_ref())
                    .map_err(|e| format!("failed to encode record: {e}"))?;
                println!("{json}");
            }

            if stats {
                print_stats(&resolver)?;
            }

            // Flush pending batch writes before exiting.
            resolver.shutdown().await;
        }

        Commands::Stats => {
            let resolver = build_resolver(&config).await?;
            print_stats(&resolver)?;
        }

        Commands::CheckAllowed { key } => {
            let resolver = build_resolver(&config).await?;
            if resolver.is_allowed(&key) {
                println!("{key}: allowed");
            } else {
                println!("{key}: not allowed");
                std::process::exit(1);
            }
        }

        Commands::ClearExpired => {
            let resolver = build_resolver(&config).await?;
            let removed = resolver.clear_expired().await;
            println!("removed {removed} expired entries");
        }

        Commands::ClearAll => {
            let resolver = build_resolver(&config).await?;
            let removed = resolver.clear_all().await;
            println!("removed {removed} entries");
        }

        Commands::CheckConfig => {
            println!("{}", config_summary(&config)?);
        }
    }

    Ok(())
}

fn print_stats(resolver: &ResolverService) -> Result<(), String> {
    let snapshot = resolver.stats();
    let json = serde_json::to_string_pretty(&snapshot)
        .map_err(|e| format!("failed to encode stats: {e}"))?;
    println!("{json}");
    Ok(())
}

fn config_summary(config: &AppConfig) -> Result<String, String> {
    serde_json::to_string_pretty(config).map_err(|e| format!("failed to encode config: {e}"))
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(message) = run(cli).await {
        warn!("{message}");
        eprintln!("error: {message}");
        std::process::exit(1);
    }
}
