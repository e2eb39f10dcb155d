// src/main.rs

//! Entry point: runs the monitor/cache-filter proxy core, or validates a
//! rule file in a one-shot mode without starting any servers.

use std::env;

use anyhow::Result;
use relwarden::config::Config;
use relwarden::core::rules::RuleEngine;
use relwarden::server;
use tracing::error;
use tracing_subscriber::{filter::EnvFilter, prelude::*, reload};

#[tokio::main]
async fn main() -> Result<()> {
    run_app().await
}

async fn run_app() -> Result<()> {
    const VERSION: &str = env!("CARGO_PKG_VERSION");
    let args: Vec<String> = env::args().collect();

    if args.contains(&"--version".to_string()) {
        println!("relwarden version {VERSION}");
        return Ok(());
    }

    if let Some(i) = args.iter().position(|a| a == "--reload-rules") {
        // --- One-shot rule validation mode ---
        // Loads and compiles a rule file, reports any error, and exits
        // without starting the proxy or touching the network.
        let Some(path) = args.get(i + 1) else {
            eprintln!("Usage: relwarden --reload-rules /path/to/rules.json");
            std::process::exit(1);
        };

        tracing_subscriber::fmt()
            .with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()))
            .compact()
            .init();

        match RuleEngine::load_file(path) {
            Ok(engine) => {
                let snapshot = engine.snapshot();
                println!(
                    "rules ok: {} store rule(s), {} use rule(s)",
                    snapshot.store_rule_count(),
                    snapshot.use_rule_count()
                );
                return Ok(());
            }
            Err(e) => {
                eprintln!("rule validation failed: {e}");
                std::process::exit(1);
            }
        }
    }

    // --- Normal server mode ---
    let config_path = args
        .iter()
        .position(|arg| arg == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str())
        .unwrap_or("config.toml");

    let config = match Config::from_file(config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Failed to load configuration from \"{config_path}\": {e}");
            std::process::exit(1);
        }
    };

    let initial_log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    let (filter, _reload_handle) = reload::Layer::new(EnvFilter::new(initial_log_level));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().compact().with_ansi(true))
        .init();

    if let Err(e) = server::run(config).await {
        error!("server runtime error: {}", e);
        return Err(e);
    }

    Ok(())
}
