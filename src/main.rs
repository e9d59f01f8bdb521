// src/main.rs

//! MeshGate's entry point: parses arguments by hand, loads configuration,
//! sets up reloadable logging, and hands off to `server::run` (§10.1,
//! §10.4). Grounded on the teacher's `src/main.rs` normal-server-mode
//! branch; the `--warden` mode switch has no counterpart here.

use anyhow::Result;
use meshgate::config::Config;
use meshgate::core::identity::Role;
use meshgate::server;
use std::env;
use std::sync::Arc;
use tracing::error;
use tracing_subscriber::{filter::EnvFilter, prelude::*, reload};

#[tokio::main]
async fn main() -> Result<()> {
    run_app().await
}

fn usage() -> &'static str {
    "Usage: meshgate [--config <path>] [--role <auth|admin|proxy|node|app|database>] [--skip-version-check] [--version]"
}

async fn run_app() -> Result<()> {
    const VERSION: &str = env!("CARGO_PKG_VERSION");

    let args: Vec<String> = env::args().collect();

    if args.iter().any(|a| a == "--version") {
        println!("meshgate version {VERSION}");
        return Ok(());
    }

    let config_path = args
        .iter()
        .position(|arg| arg == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str())
        .unwrap_or("config.toml");

    let mut config = match Config::from_file(config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Failed to load configuration from \"{config_path}\": {e}");
            eprintln!("{}", usage());
            std::process::exit(1);
        }
    };

    if let Some(role_index) = args.iter().position(|arg| arg == "--role") {
        match args.get(role_index + 1) {
            Some(role_str) => match parse_role(role_str) {
                Some(role) => config.role = role,
                None => {
                    eprintln!("Invalid role: {role_str}");
                    eprintln!("{}", usage());
                    std::process::exit(1);
                }
            },
            None => {
                eprintln!("--role flag requires a value");
                std::process::exit(1);
            }
        }
    }

    if args.iter().any(|a| a == "--skip-version-check") {
        config.skip_version_check = true;
    }

    let initial_log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    let (filter, reload_handle) = reload::Layer::new(EnvFilter::new(initial_log_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().compact().with_ansi(true))
        .init();

    let reload_handle = Arc::new(reload_handle);

    if let Err(e) = server::run(config, reload_handle).await {
        error!("server runtime error: {e}");
        return Err(e);
    }

    Ok(())
}

fn parse_role(s: &str) -> Option<Role> {
    match s {
        "auth" => Some(Role::Auth),
        "admin" => Some(Role::Admin),
        "proxy" => Some(Role::Proxy),
        "node" => Some(Role::Node),
        "app" => Some(Role::App),
        "database" => Some(Role::Database),
        _ => None,
    }
}
