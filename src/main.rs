use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use serde_json::json;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use ratekeeper::clock::SystemClock;
use ratekeeper::config::{
    HandleRegistry, RateLimiterSettings, DEFAULT_CACHE_POOL, DEFAULT_LOCK_FACTORY,
};
use ratekeeper::lock::InMemoryLockFactory;
use ratekeeper::ratelimit::{Limiter, RateLimit, RateLimiterFactory};
use ratekeeper::storage::{FileStorage, MemoryStorage};

/// Inspect and drive configured rate limiters.
#[derive(Debug, Parser)]
#[command(name = "ratekeeper", version, about)]
struct Cli {
    /// Rate limiter settings file (YAML)
    #[arg(short, long, default_value = "ratekeeper.yaml")]
    config: PathBuf,

    /// Directory holding limiter state for the default storage
    #[arg(long, default_value = ".ratekeeper")]
    state_dir: PathBuf,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Take tokens from a limiter
    Consume {
        name: String,
        /// Keep a separate budget for this key (e.g. a user id)
        #[arg(short, long)]
        key: Option<String>,
        #[arg(short, long, default_value_t = 1)]
        tokens: i64,
    },
    /// Show a limiter's standing without consuming
    Peek {
        name: String,
        #[arg(short, long)]
        key: Option<String>,
    },
    /// Restore a limiter to full capacity
    Reset {
        name: String,
        #[arg(short, long)]
        key: Option<String>,
    },
    /// List configured limiters
    List,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    info!(version = env!("CARGO_PKG_VERSION"), "Starting ratekeeper");

    let settings = RateLimiterSettings::load(&cli.config)?;
    let handles = HandleRegistry::new()
        .with_storage(DEFAULT_CACHE_POOL, Arc::new(FileStorage::open(&cli.state_dir)?))
        .with_storage("cache.memory", Arc::new(MemoryStorage::new()))
        .with_lock_factory(DEFAULT_LOCK_FACTORY, Arc::new(InMemoryLockFactory::new()));
    let factory = settings.build_factory(&handles, Arc::new(SystemClock))?;
    debug!(state_dir = %cli.state_dir.display(), "Storage ready");

    match cli.command {
        Command::Consume { name, key, tokens } => {
            let limiter = limiter(&factory, &name, key.as_deref())?;
            print_decision(&limiter, &limiter.consume(tokens)?)?;
        }
        Command::Peek { name, key } => {
            let limiter = limiter(&factory, &name, key.as_deref())?;
            print_decision(&limiter, &limiter.peek()?)?;
        }
        Command::Reset { name, key } => {
            let limiter = limiter(&factory, &name, key.as_deref())?;
            limiter.reset()?;
            println!("{}", json!({ "id": limiter.id(), "reset": true }));
        }
        Command::List => {
            for name in factory.names() {
                let definition = factory.definition(name)?;
                let line = json!({
                    "name": name,
                    "policy": definition.config.policy,
                    "limit": definition.config.limit,
                    "locking": definition.lock.is_some(),
                });
                println!("{}", line);
            }
        }
    }

    Ok(())
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

fn limiter(
    factory: &RateLimiterFactory,
    name: &str,
    key: Option<&str>,
) -> ratekeeper::error::Result<Limiter> {
    match key {
        Some(key) => factory.create_for(name, key),
        None => factory.create(name),
    }
}

fn print_decision(limiter: &Limiter, decision: &RateLimit) -> anyhow::Result<()> {
    let output = json!({
        "id": limiter.id(),
        "policy": limiter.policy(),
        "accepted": decision.is_accepted(),
        "limit": decision.limit(),
        "remaining_tokens": decision.remaining_tokens(),
        "retry_after_secs": decision.retry_after().map(|d| d.as_secs_f64()),
        "reset_at": decision.reset_at().to_rfc3339(),
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
