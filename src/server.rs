//! Reusable CSMS runtime.
//!
//! [`ServerHandle`] binds the WebSocket listener, runs the accept loop in
//! the background and drains open sessions on shutdown. The CLI uses it for
//! `serve`; tests use it with port 0.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::application::session::SharedSessionRegistry;
use crate::config::AppConfig;
use crate::interfaces::ws::CsmsServer;
use crate::shared::errors::AppError;
use crate::shared::shutdown::{ShutdownCoordinator, ShutdownSignal};

/// Handle to a running CSMS endpoint.
pub struct ServerHandle {
    /// Live session bookkeeping.
    pub session_registry: SharedSessionRegistry,
    /// The configuration the server was started with.
    pub config: AppConfig,
    /// Address actually bound (differs from the config when port 0 is used).
    pub local_addr: SocketAddr,

    shutdown: ShutdownCoordinator,
    ws_task: JoinHandle<()>,
}

impl ServerHandle {
    pub async fn start(config: AppConfig) -> Result<Self, AppError> {
        info!("Starting CSMS session engine...");

        let shutdown = ShutdownCoordinator::new(config.server.shutdown_timeout);
        let server = CsmsServer::new(&config, shutdown.signal());
        let session_registry = server.session_registry();

        let listener = TcpListener::bind(config.server.address()).await?;
        let local_addr = listener.local_addr()?;

        let ws_task = tokio::spawn(async move {
            if let Err(e) = server.serve(listener).await {
                error!(error = %e, "WebSocket server error");
            }
        });

        Ok(Self {
            session_registry,
            config,
            local_addr,
            shutdown,
            ws_task,
        })
    }

    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.shutdown.signal()
    }

    /// Install OS signal listeners (SIGTERM, SIGINT) that trigger shutdown.
    pub fn install_signal_handler(&self) {
        self.shutdown.start_signal_listener();
    }

    pub fn trigger_shutdown(&self) {
        self.shutdown.signal().trigger();
    }

    /// Wait for shutdown, then for the accept loop and open sessions to
    /// finish within the configured grace period.
    pub async fn wait(self) {
        let Self {
            session_registry,
            shutdown,
            ws_task,
            ..
        } = self;

        let drained = shutdown
            .shutdown_with_cleanup(|| async move {
                if let Err(e) = ws_task.await {
                    error!(error = %e, "WebSocket server task panicked");
                }
                while session_registry.count() > 0 {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
            })
            .await;

        if drained {
            info!("CSMS shutdown complete");
        } else {
            info!("CSMS shutdown complete with sessions still open");
        }
    }

    /// Trigger shutdown and wait for completion.
    pub async fn shutdown(self) {
        self.trigger_shutdown();
        self.wait().await;
    }

    pub fn is_running(&self) -> bool {
        !self.ws_task.is_finished()
    }
}

/// Initialize tracing from the application config.
///
/// `RUST_LOG` takes precedence over `logging.level`.
pub fn init_tracing(config: &AppConfig) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level));

    match config.logging.format.to_lowercase().as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer())
                .init();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.server.ws_host = "127.0.0.1".into();
        config.server.ws_port = 0;
        config.server.shutdown_timeout = 2;
        config
    }

    #[tokio::test]
    async fn starts_on_ephemeral_port_and_stops() {
        let handle = ServerHandle::start(local_config()).await.unwrap();
        assert_ne!(handle.local_addr.port(), 0);
        assert!(handle.is_running());
        assert_eq!(handle.session_registry.count(), 0);

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn accepts_connections_until_shutdown() {
        let handle = ServerHandle::start(local_config()).await.unwrap();
        let mut config = local_config();
        config.client.csms_url = "ws://127.0.0.1".into();
        config.client.csms_port = handle.local_addr.port();

        let (ws, _) = crate::interfaces::ws::client::connect(&config.client, "CP_2")
            .await
            .unwrap();
        drop(ws);

        handle.shutdown().await;
    }
}
