//! vedr: vedrfolnir CLI
//!
//! Inspect configuration and on-disk cache state.

use std::path::PathBuf;

use clap::{CommandFactory, Parser, Subcommand};
use vedrfolnir::cache::{CacheEntry, DURABLE_KEY_PREFIX};
use vedrfolnir::clock::{Clock, SystemClock};
use vedrfolnir::{DurableStore, FileStore, GovernanceConfig, IdentityClass, Window};

/// Vedrfolnir CLI
#[derive(Parser)]
#[command(name = "vedr")]
#[command(about = "Vedrfolnir request governance tool")]
#[command(disable_version_flag = true)]
struct Args {
    /// Print version with build metadata
    #[arg(short = 'V', long)]
    version: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Load and validate a config file, then print the effective rule sets
    CheckConfig {
        /// Config file (defaults to ~/.vedrfolnir/config.toml, then /etc/vedrfolnir/config.toml)
        #[arg(short, long, env = "VEDRFOLNIR_CONFIG")]
        config: Option<PathBuf>,
    },

    /// Print the default configuration as TOML
    Defaults,

    /// Inspect an on-disk response cache
    Stats {
        /// Cache directory (defaults to the platform cache directory)
        #[arg(short, long)]
        dir: Option<PathBuf>,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialise tracing (default: warn for CLI; override with RUST_LOG).
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let args = Args::parse();

    if args.version {
        println!("vedr {}", vedrfolnir::version_string());
        return Ok(());
    }

    let Some(command) = args.command else {
        Args::command().print_help()?;
        return Ok(());
    };

    match command {
        Command::CheckConfig { config } => {
            let config = GovernanceConfig::load(config.as_deref())?;
            println!("config ok");
            println!(
                "cache: max_size={} ttl={}s memory={} durable={} backend={:?}",
                config.cache.max_size,
                config.cache.default_ttl.as_secs(),
                config.cache.memory_tier,
                config.cache.durable_tier,
                config.storage.backend,
            );
            let rl = &config.rate_limit;
            println!(
                "brake: enabled={} hourly=${:.2} daily=${:.2}",
                rl.emergency_brake.enabled,
                rl.emergency_brake.max_hourly_cost,
                rl.emergency_brake.max_daily_cost,
            );
            for class in IdentityClass::ALL {
                let rules = rl.rule_sets.for_class(class);
                let limits: Vec<String> = Window::ALL
                    .iter()
                    .map(|&w| match rules.limit(w) {
                        Some(max) => format!("{w}={max}"),
                        None => format!("{w}=-"),
                    })
                    .collect();
                let marker = if class == rl.default_class { " (default)" } else { "" };
                println!("{class}{marker}: {}", limits.join(" "));
            }
        }

        Command::Defaults => {
            print!("{}", GovernanceConfig::default().to_toml()?);
        }

        Command::Stats { dir } => {
            let store = match dir {
                Some(dir) => FileStore::new(dir),
                None => FileStore::default_location(),
            };
            let now = SystemClock.now_ms();
            let (mut live, mut expired, mut corrupt, mut hits) = (0usize, 0usize, 0usize, 0u64);
            for key in store.keys(DURABLE_KEY_PREFIX).await? {
                let Some(raw) = store.get(&key).await? else {
                    continue;
                };
                match CacheEntry::decode(&key, &raw) {
                    Ok(entry) if entry.is_expired(now) => expired += 1,
                    Ok(entry) => {
                        live += 1;
                        hits += entry.hit_count;
                    }
                    Err(_) => corrupt += 1,
                }
            }
            println!("directory: {}", store.dir().display());
            println!("live: {live}");
            println!("expired: {expired}");
            println!("corrupt: {corrupt}");
            println!("hits on live entries: {hits}");
        }
    }

    Ok(())
}
