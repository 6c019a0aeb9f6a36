//! console-gateway
//!
//! HTTP gateway giving operators revocable access to the serial consoles of
//! bare-metal nodes.

use anyhow::{Context, Result};
use clap::Parser;
use common::setup_logging;
use gateway::audit::create_audit_logger;
use gateway::config::DriverKind;
use gateway::driver::ConsoleDriver;
use gateway::{AdminGate, AppState, Gateway, GatewayConfig, MemoryNodeStore};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "console-gateway")]
#[command(
    author,
    version,
    about = "Console gateway - revocable access to bare-metal serial consoles"
)]
#[command(long_about = "
An HTTP gateway that manages bare-metal node records and streams each
node's IPMI serial-over-LAN console to any number of token-holding viewers.

EXAMPLES:
    # Run with default config
    console-gateway

    # Run with custom config
    console-gateway --config /path/to/gateway.toml

    # Simulated consoles, for trying the API without hardware
    console-gateway --driver dummy --listen 127.0.0.1:9000

    # Run with debug logging
    console-gateway --log-level debug

CONFIGURATION:
    The gateway looks for configuration files in the following order:
    1. Path specified with --config
    2. ~/.config/console-gateway/gateway.toml
    3. /etc/console-gateway/gateway.toml
    4. Built-in defaults
")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "PATH")]
    config: Option<std::path::PathBuf>,

    /// Save default configuration to default location and exit
    #[arg(long)]
    save_config: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Address to listen on, overriding the config file
    #[arg(long, value_name = "ADDR")]
    listen: Option<String>,

    /// Console driver (ipmitool, dummy), overriding the config file
    #[arg(long, value_name = "DRIVER")]
    driver: Option<DriverKind>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.save_config {
        let config = GatewayConfig::default();
        let path = GatewayConfig::default_path();
        config.save(&path).context("Failed to save configuration")?;
        println!("Configuration saved to: {}", path.display());
        return Ok(());
    }

    let mut config = if let Some(ref path) = args.config {
        GatewayConfig::load(Some(path.clone())).context("Failed to load configuration")?
    } else {
        GatewayConfig::load_or_default()
    };

    if let Some(listen) = args.listen {
        config.server.listen_addr = listen;
    }
    if let Some(driver) = args.driver {
        config.console.driver = driver;
    }
    config.validate().context("Invalid configuration")?;

    let log_level = args
        .log_level
        .as_deref()
        .unwrap_or(&config.server.log_level);
    setup_logging(log_level).context("Failed to setup logging")?;

    info!("console-gateway v{}", env!("CARGO_PKG_VERSION"));
    info!("Log level: {}", log_level);

    run(config).await
}

async fn run(config: GatewayConfig) -> Result<()> {
    let admin_secret = config
        .admin
        .resolve_token()
        .context("Failed to resolve admin token")?;
    if admin_secret.is_empty() {
        warn!("No admin token configured; all admin requests will be refused");
    }

    let audit = create_audit_logger(config.audit.clone());
    if let Some(ref logger) = *audit {
        logger.log_server_started(env!("CARGO_PKG_VERSION"));
    }

    let driver = ConsoleDriver::from_settings(&config.console);
    info!("Console driver: {}", driver.name());

    let gateway = Arc::new(Gateway::new(
        Arc::new(MemoryNodeStore::new()),
        driver,
        config.console.subscriber_queue,
        audit.clone(),
    ));
    let state = AppState::new(
        Arc::clone(&gateway),
        AdminGate::new(admin_secret),
        audit.clone(),
    );

    let listener = TcpListener::bind(&config.server.listen_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.listen_addr))?;

    info!("Press Ctrl+C to shutdown");

    // Console streams only end once their consoles are torn down.
    let shutdown_gateway = Arc::clone(&gateway);
    let shutdown = async move {
        match signal::ctrl_c().await {
            Ok(()) => info!("Received Ctrl+C, shutting down gracefully..."),
            Err(e) => error!("Error waiting for Ctrl+C: {}", e),
        }
        shutdown_gateway.shutdown();
    };

    let result = gateway::serve(listener, state, shutdown)
        .await
        .context("HTTP server error");

    if let Some(ref logger) = *audit {
        logger.log_server_stopped();
        logger.shutdown().await;
    }

    info!("Gateway shutdown complete");
    result
}
