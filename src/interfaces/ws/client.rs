//! Charge point simulator
//!
//! Connects each configured station to the CSMS with Basic credentials and
//! the configured subprotocol, runs the startup exchange and then keeps the
//! session open until the CSMS closes it or shutdown is signalled.

use futures_util::future::join_all;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{header, HeaderValue};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{error, info, warn};

use super::transport::{self, CLOSE_GRACE};
use crate::application::handlers::HandlerTable;
use crate::application::identity::encode_basic;
use crate::application::session::{ChargePointClient, Session, StartupReport};
use crate::config::{AppConfig, ClientConfig, StationConfig};
use crate::shared::errors::AppError;
use crate::shared::shutdown::ShutdownSignal;

pub type ClientStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Open an authenticated WebSocket for `station_id`.
///
/// Returns the stream and the subprotocol the CSMS agreed to.
pub async fn connect(
    settings: &ClientConfig,
    station_id: &str,
) -> Result<(ClientStream, String), AppError> {
    let url = settings.station_url(station_id);
    let mut request = url.as_str().into_client_request()?;

    let credentials = encode_basic(&settings.username, &settings.password)?;
    let headers = request.headers_mut();
    headers.insert(header::AUTHORIZATION, HeaderValue::from_str(&credentials)?);
    headers.insert(
        header::SEC_WEBSOCKET_PROTOCOL,
        HeaderValue::from_str(&settings.subprotocol)?,
    );

    let (ws, response) = connect_async(request).await?;
    let subprotocol = response
        .headers()
        .get(header::SEC_WEBSOCKET_PROTOCOL)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();

    info!(
        charge_point_id = station_id,
        url = url.as_str(),
        subprotocol = subprotocol.as_str(),
        "Connected to CSMS"
    );
    Ok((ws, subprotocol))
}

/// Run one station until the CSMS closes the socket or shutdown fires.
pub async fn run_station(
    config: &AppConfig,
    station: StationConfig,
    shutdown: ShutdownSignal,
) -> Result<StartupReport, AppError> {
    let (ws, _subprotocol) = connect(&config.client, &station.id).await?;
    let station_id = station.id.clone();

    let (outbound, inbound, tasks) = transport::spawn(ws, &station_id);
    // Calls from the CSMS are answered with NotImplemented.
    let session = Session::new(
        &station_id,
        outbound,
        HandlerTable::new().shared(),
        config.protocol.connector_count,
    );
    let client = ChargePointClient::new(
        station,
        config.client.evse_id,
        config.protocol.connector_count,
        session.correlator(),
        config.protocol.call_timeout(),
    );
    let mut serve = tokio::spawn(session.serve(inbound));

    let report = tokio::select! {
        report = client.startup() => Ok(report),
        _ = shutdown.wait() => Err(AppError::Shutdown),
    };

    let stopped = match &report {
        Ok(_) => tokio::select! {
            _ = &mut serve => false,
            _ = shutdown.wait() => true,
        },
        Err(_) => true,
    };
    if stopped {
        info!(charge_point_id = station_id.as_str(), "Closing session due to shutdown");
    } else {
        info!(charge_point_id = station_id.as_str(), "CSMS closed the session");
    }

    // Release every correlator handle so the writer sends its Close frame.
    serve.abort();
    drop(client);
    if !tasks.finish(CLOSE_GRACE).await {
        warn!(
            charge_point_id = station_id.as_str(),
            "Close handshake did not complete, transport aborted"
        );
    }

    report
}

/// Run every configured station concurrently.
pub async fn run_stations(config: &AppConfig, shutdown: ShutdownSignal) {
    let runs = config.client.stations.iter().cloned().map(|station| {
        let shutdown = shutdown.clone();
        async move {
            let id = station.id.clone();
            (id, run_station(config, station, shutdown).await)
        }
    });

    for (id, result) in join_all(runs).await {
        match result {
            Ok(report) => info!(
                charge_point_id = id.as_str(),
                booted = report.boot.is_ok(),
                connector_id = report.connector_id,
                status_reported = report.status.is_ok(),
                "Station finished"
            ),
            Err(e) => error!(charge_point_id = id.as_str(), error = %e, "Station failed"),
        }
    }
}
