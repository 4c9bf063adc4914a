//! tidelb - traffic distribution core for a load balancer
//!
//! Usage:
//!     tidelb --config <path>
//!
//! See --help for more options.

use anyhow::{Context, Result};
use clap::Parser;
use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

use tidelb::AppState;
use tidelb::config::{Config, load_config};
use tidelb::orchestrator::RequestContext;
use tidelb::util::init_logging;

/// Backend selection with adaptive strategy choice.
#[derive(Parser, Debug)]
#[command(name = "tidelb")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, value_name = "FILE")]
    config: PathBuf,

    /// Override log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Validate configuration and exit
    #[arg(long)]
    validate: bool,

    /// Run N synthetic selections per pool, print the distribution and exit
    #[arg(long, value_name = "N")]
    simulate: Option<usize>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = load_config(&cli.config).with_context(|| {
        format!(
            "failed to load configuration from '{}'",
            cli.config.display()
        )
    })?;

    // CLI overrides config
    let log_level = cli
        .log_level
        .as_deref()
        .unwrap_or(&config.global.log_level);

    init_logging(log_level, &config.global.log_format);

    if cli.validate {
        info!("Configuration is valid");
        println!("Configuration is valid.");
        println!("  Pools: {}", config.pools.len());
        for pool in &config.pools {
            println!(
                "    - {} [{}] sticky={} backends={}",
                pool.name,
                pool.algorithm,
                pool.sticky_sessions,
                pool.backends.len()
            );
        }
        println!("  Routes: {}", config.routes.len());
        println!(
            "  Adaptive: ai_enabled={} fallback={} min_confidence={}",
            config.adaptive.ai_enabled,
            config.adaptive.fallback_algorithm,
            config.adaptive.min_confidence_level
        );
        return Ok(());
    }

    info!(
        config_path = %cli.config.display(),
        pools = config.pools.len(),
        routes = config.routes.len(),
        ai_enabled = config.adaptive.ai_enabled,
        "tidelb starting"
    );

    for pool in &config.pools {
        info!(
            name = %pool.name,
            algorithm = %pool.algorithm,
            sticky = pool.sticky_sessions,
            backends = pool.backends.len(),
            "configured pool"
        );
    }

    if let Some(rounds) = cli.simulate {
        return simulate(config, rounds);
    }

    run(config)
}

/// Issue synthetic selections against every pool and print where they went.
fn simulate(config: Config, rounds: usize) -> Result<()> {
    let pools: Vec<String> = config.pools.iter().map(|p| p.name.clone()).collect();
    let state = AppState::new(config).context("failed to build pools")?;
    let orchestrator = state.orchestrator();
    let request = RequestContext::new("GET", "/", "text/html", "tidelb-simulator", 0);

    for pool in pools {
        let mut distribution: BTreeMap<String, usize> = BTreeMap::new();
        let mut failures = 0usize;
        let started = Instant::now();

        for i in 0..rounds {
            let client = IpAddr::V4(Ipv4Addr::new(10, 0, (i >> 8) as u8, i as u8));
            match orchestrator.select_for_pool(&pool, client, None, &request) {
                Ok(selection) => {
                    *distribution
                        .entry(selection.backend.address().to_string())
                        .or_default() += 1;
                    orchestrator.complete(&selection, Duration::ZERO, true);
                }
                Err(e) => {
                    warn!(pool = %pool, error = %e, "simulated selection failed");
                    failures += 1;
                }
            }
        }

        println!("pool {} ({} selections in {:?})", pool, rounds, started.elapsed());
        for (backend, count) in &distribution {
            let share = *count as f64 * 100.0 / rounds.max(1) as f64;
            println!("  {backend:<24} {count:>8} {share:>6.1}%");
        }
        if failures > 0 {
            println!("  failed{:>27}", failures);
        }
    }

    Ok(())
}

/// Run the background loops until Ctrl+C.
fn run(config: Config) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to create tokio runtime")?;

    runtime.block_on(async { run_async(config).await })
}

async fn run_async(config: Config) -> Result<()> {
    let state = AppState::new(config).context("failed to build pools")?;

    if state.orchestrator().start() {
        info!("adaptive strategy loops running");
    }

    info!("tidelb is running");
    info!("press Ctrl+C to stop");

    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            info!("received shutdown signal");
        }
        Err(e) => {
            error!(error = %e, "failed to listen for shutdown signal");
        }
    }

    state.shutdown().await;

    info!("tidelb shut down complete");
    Ok(())
}
