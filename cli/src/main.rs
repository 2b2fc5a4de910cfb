//! CSMS session engine: CLI
//!
//! ```sh
//! # Run the CSMS with the default config (~/.config/csms-session/config.toml)
//! csms-session serve
//!
//! # Custom config path and port
//! csms-session --config /etc/csms-session/config.toml serve --ws-port 9000
//!
//! # Connect the configured charge points to a CSMS
//! CSMS_URL=ws://csms.local CSMS_PORT=9000 csms-session simulate
//!
//! # Validate config without starting
//! csms-session --check
//! ```

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::{error, info};

use csms_session::config::AppConfig;
use csms_session::interfaces::ws::client;
use csms_session::server::{init_tracing, ServerHandle};
use csms_session::shared::ShutdownCoordinator;

#[derive(Parser, Debug)]
#[command(
    name = "csms-session",
    version,
    about = "OCPP 2.0.1 session engine: CSMS server and charge point simulator",
    long_about = "OCPP-J session engine with Basic-auth admission, subprotocol \
                  negotiation and call correlation.\n\n\
                  Default config: ~/.config/csms-session/config.toml"
)]
struct Cli {
    /// Path to the configuration file (TOML).
    #[arg(short, long, env = "CSMS_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Override the log level (trace, debug, info, warn, error).
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// Validate the configuration file and exit.
    #[arg(long)]
    check: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the CSMS WebSocket server.
    Serve {
        /// Override the WebSocket listen port.
        #[arg(long)]
        ws_port: Option<u16>,
    },
    /// Connect the configured charge points to a CSMS.
    Simulate,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // ── Load configuration ─────────────────────────────────
    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(csms_session::default_config_path);

    let mut config = match AppConfig::load(&config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            if cli.check {
                eprintln!("Configuration is invalid: {}", e);
                std::process::exit(1);
            }
            tracing_subscriber::fmt()
                .with_env_filter(tracing_subscriber::EnvFilter::new("info"))
                .init();
            error!("Failed to load config from {}: {}", config_path.display(), e);
            error!("Using default configuration.");
            run(cli, AppConfig::default()).await?;
            return Ok(());
        }
    };

    if let Some(ref level) = cli.log_level {
        config.logging.level = level.clone();
    }

    // ── Config validation mode ─────────────────────────────
    if cli.check {
        println!("Configuration is valid");
        println!("   Config file  : {}", config_path.display());
        println!("   WS address   : {}", config.server.address());
        println!("   Subprotocols : {}", config.protocol.subprotocols.join(", "));
        println!(
            "   CSMS target  : {}:{}",
            config.client.csms_url, config.client.csms_port
        );
        println!("   Stations     : {}", config.client.stations.len());
        println!("   Log level    : {}", config.logging.level);
        return Ok(());
    }

    init_tracing(&config);
    info!("Configuration loaded from {}", config_path.display());
    run(cli, config).await
}

async fn run(cli: Cli, mut config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command.unwrap_or(Command::Serve { ws_port: None }) {
        Command::Serve { ws_port } => {
            if let Some(port) = ws_port {
                info!("CLI override: ws_port = {}", port);
                config.server.ws_port = port;
            }

            let handle = ServerHandle::start(config).await?;
            handle.install_signal_handler();
            info!("Listening on {}. Press Ctrl+C to shutdown gracefully.", handle.local_addr);

            handle.shutdown_signal().wait().await;
            handle.wait().await;
        }
        Command::Simulate => {
            let coordinator = ShutdownCoordinator::new(config.server.shutdown_timeout);
            coordinator.start_signal_listener();

            info!(
                stations = config.client.stations.len(),
                "Connecting charge points to {}:{}",
                config.client.csms_url,
                config.client.csms_port
            );
            client::run_stations(&config, coordinator.signal()).await;
        }
    }
    Ok(())
}
