//! CSMS WebSocket server
//!
//! Accepts charge point connections at `ws://<host>:<port>/{charge_point_id}`
//! (or `/ocpp/{charge_point_id}`). Admission happens inside the handshake;
//! a refused station gets an HTTP error instead of the upgrade.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::{header, HeaderValue, StatusCode};
use tracing::{error, info, warn};

use super::admission::{Admission, AdmissionController, AdmissionError};
use super::negotiator::ProtocolNegotiator;
use super::transport::{self, CLOSE_GRACE};
use crate::application::handlers::{csms_handlers, SharedHandlerTable};
use crate::application::identity::CredentialGate;
use crate::application::session::{Session, SessionRegistry, SharedSessionRegistry};
use crate::config::AppConfig;
use crate::shared::errors::AppError;
use crate::shared::shutdown::ShutdownSignal;

/// Read-only state shared by every connection of one endpoint.
struct Endpoint {
    admission: AdmissionController,
    handlers: SharedHandlerTable,
    connector_count: u32,
    registry: SharedSessionRegistry,
    shutdown: ShutdownSignal,
}

pub struct CsmsServer {
    address: String,
    endpoint: Arc<Endpoint>,
}

impl CsmsServer {
    pub fn new(config: &AppConfig, shutdown: ShutdownSignal) -> Self {
        let admission = AdmissionController::new(
            CredentialGate::new(&config.security.username, &config.security.password),
            ProtocolNegotiator::new(config.protocol.subprotocols.clone()),
        );

        Self {
            address: config.server.address(),
            endpoint: Arc::new(Endpoint {
                admission,
                handlers: csms_handlers(config.protocol.heartbeat_interval).shared(),
                connector_count: config.protocol.connector_count,
                registry: SessionRegistry::shared(),
                shutdown,
            }),
        }
    }

    pub fn session_registry(&self) -> SharedSessionRegistry {
        self.endpoint.registry.clone()
    }

    /// Bind the configured address and serve until shutdown.
    pub async fn run(self) -> Result<(), AppError> {
        let listener = TcpListener::bind(&self.address).await?;
        self.serve(listener).await
    }

    /// Serve on an already bound listener until shutdown.
    pub async fn serve(self, listener: TcpListener) -> Result<(), AppError> {
        let local = listener.local_addr()?;
        info!(
            subprotocols = ?self.endpoint.admission.negotiator().supported(),
            "CSMS listening on ws://{}",
            local
        );
        info!("Charge points should connect to: ws://{}/{{charge_point_id}}", local);

        let stop = self.endpoint.shutdown.wait();
        tokio::pin!(stop);

        loop {
            tokio::select! {
                result = listener.accept() => match result {
                    Ok((stream, addr)) => self.spawn_connection(stream, addr),
                    Err(e) => error!(error = %e, "Failed to accept connection"),
                },
                _ = &mut stop => {
                    info!(
                        open_sessions = self.endpoint.registry.count(),
                        "WebSocket server received shutdown signal"
                    );
                    return Ok(());
                }
            }
        }
    }

    fn spawn_connection(&self, stream: TcpStream, addr: SocketAddr) {
        let endpoint = self.endpoint.clone();
        tokio::spawn(async move {
            match handle_connection(stream, addr, endpoint).await {
                Ok(()) => {}
                Err(e) if e.is_rejection() => {
                    warn!(%addr, reason = %e, "Connection refused");
                    metrics::counter!("ocpp_admissions_rejected_total").increment(1);
                }
                Err(e) => error!(%addr, error = %e, "Connection error"),
            }
        });
    }
}

/// Run admission inside the handshake callback.
///
/// The outcome is written to `outcome` because the callback can only hand
/// a response back to tungstenite.
fn admission_callback<'a>(
    endpoint: &'a Endpoint,
    addr: SocketAddr,
    outcome: &'a mut Option<Result<Admission, AdmissionError>>,
) -> impl FnOnce(&Request, Response) -> Result<Response, ErrorResponse> + 'a {
    move |req: &Request, mut response: Response| {
        let path = req.uri().path();
        info!(%addr, path, "WebSocket handshake");

        match endpoint.admission.admit(path, req.headers()) {
            Ok(admission) => {
                let value = HeaderValue::from_str(&admission.subprotocol).map_err(|_| {
                    let mut resp = ErrorResponse::new(Some("unusable subprotocol".into()));
                    *resp.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
                    resp
                })?;
                response
                    .headers_mut()
                    .insert(header::SEC_WEBSOCKET_PROTOCOL, value);
                *outcome = Some(Ok(admission));
                Ok(response)
            }
            Err(e) => {
                let rejection = e.to_response();
                *outcome = Some(Err(e));
                Err(rejection)
            }
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    endpoint: Arc<Endpoint>,
) -> Result<(), AppError> {
    let mut outcome = None;
    let accepted =
        tokio_tungstenite::accept_hdr_async(stream, admission_callback(&endpoint, addr, &mut outcome))
            .await;

    let (ws, admission) = match (accepted, outcome) {
        (_, Some(Err(rejected))) => return Err(rejected.into()),
        (Err(e), _) => return Err(e.into()),
        (Ok(ws), Some(Ok(admission))) => (ws, admission),
        (Ok(_), None) => {
            return Err(AppError::Handshake(
                "upgrade completed without admission".into(),
            ))
        }
    };

    let Admission {
        charge_point_id,
        subprotocol,
    } = admission;
    info!(
        charge_point_id = charge_point_id.as_str(),
        %addr,
        subprotocol = subprotocol.as_str(),
        "Charge point connected"
    );

    let connection_id = endpoint
        .registry
        .register(&charge_point_id, &subprotocol, Some(addr));
    let (outbound, inbound, tasks) = transport::spawn(ws, &charge_point_id);
    let session = Session::new(
        &charge_point_id,
        outbound,
        endpoint.handlers.clone(),
        endpoint.connector_count,
    );

    // The session owns the only outbound sender; once the select drops it,
    // the writer sends a Close frame.
    tokio::select! {
        state = session.serve(inbound) => {
            info!(
                charge_point_id = charge_point_id.as_str(),
                powered_up = state.is_powered_up(),
                "Charge point disconnected"
            );
        }
        _ = endpoint.shutdown.wait() => {
            info!(
                charge_point_id = charge_point_id.as_str(),
                "Connection closing due to server shutdown"
            );
        }
    }

    if !tasks.finish(CLOSE_GRACE).await {
        warn!(
            charge_point_id = charge_point_id.as_str(),
            "Close handshake did not complete, transport aborted"
        );
    }
    endpoint.registry.unregister(&charge_point_id, connection_id);
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio_tungstenite::tungstenite::client::IntoClientRequest;
    use tokio_tungstenite::tungstenite::Error as WsError;

    use super::*;
    use crate::application::identity::encode_basic;
    use crate::application::session::ChargePointClient;
    use crate::config::StationConfig;
    use crate::interfaces::ws::client;

    async fn start_server() -> (SocketAddr, ShutdownSignal, SharedSessionRegistry) {
        let shutdown = ShutdownSignal::new();
        let server = CsmsServer::new(&AppConfig::default(), shutdown.clone());
        let registry = server.session_registry();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(server.serve(listener));
        (addr, shutdown, registry)
    }

    async fn handshake_status(addr: SocketAddr, user: &str, pass: &str, proto: &str) -> StatusCode {
        let mut request = format!("ws://{}/CP_1", addr).into_client_request().unwrap();
        let headers = request.headers_mut();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_str(&encode_basic(user, pass).unwrap()).unwrap(),
        );
        headers.insert(header::SEC_WEBSOCKET_PROTOCOL, HeaderValue::from_str(proto).unwrap());

        match tokio_tungstenite::connect_async(request).await {
            Ok((_, response)) => response.status(),
            Err(WsError::Http(response)) => response.status(),
            Err(e) => panic!("unexpected handshake error: {}", e),
        }
    }

    #[tokio::test]
    async fn wrong_password_gets_401() {
        let (addr, shutdown, registry) = start_server().await;
        let status = handshake_status(addr, "user_id", "wrongPass", "ocpp2.0.1").await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(registry.count(), 0);
        shutdown.trigger();
    }

    #[tokio::test]
    async fn unsupported_subprotocol_gets_400() {
        let (addr, shutdown, _) = start_server().await;
        let status = handshake_status(addr, "user", "pass", "ocpp1.6").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        shutdown.trigger();
    }

    #[tokio::test]
    async fn admitted_station_boots_and_reports() {
        let (addr, shutdown, registry) = start_server().await;

        let mut settings = AppConfig::default().client;
        settings.csms_url = format!("ws://{}", addr.ip());
        settings.csms_port = addr.port();

        let (ws, subprotocol) = client::connect(&settings, "CP_1").await.unwrap();
        assert_eq!(subprotocol, "ocpp2.0.1");

        let (outbound, inbound, _tasks) = transport::spawn(ws, "CP_1");
        let device = Session::new(
            "CP_1",
            outbound,
            crate::application::handlers::HandlerTable::new().shared(),
            9,
        );
        let cp = ChargePointClient::new(
            StationConfig::new("CP_1", "Trek", "Edison"),
            1,
            9,
            device.correlator(),
            Duration::from_secs(5),
        );
        tokio::spawn(device.serve(inbound));

        assert!(cp.send_boot_notification().await.is_ok());
        assert!(cp.send_status_notification(1).await.is_ok());
        assert!(registry.is_connected("CP_1"));

        shutdown.trigger();
    }

    #[tokio::test]
    async fn shutdown_sends_close_frame_to_station() {
        use futures_util::StreamExt;
        use tokio_tungstenite::tungstenite::Message;

        let (addr, shutdown, registry) = start_server().await;

        let mut settings = AppConfig::default().client;
        settings.csms_url = format!("ws://{}", addr.ip());
        settings.csms_port = addr.port();
        let (mut ws, _) = client::connect(&settings, "CP_2").await.unwrap();

        while !registry.is_connected("CP_2") {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        shutdown.trigger();

        let first = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .unwrap();
        assert!(matches!(first, Some(Ok(Message::Close(_)))), "got {:?}", first);

        // Answering the Close lets the server finish the handshake and
        // drop the registry entry.
        while let Ok(Some(Ok(_))) =
            tokio::time::timeout(Duration::from_secs(5), ws.next()).await
        {}
        tokio::time::timeout(Duration::from_secs(5), async {
            while registry.is_connected("CP_2") {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
    }
}
