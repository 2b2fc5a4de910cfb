//! Charge point side of a session
//!
//! Owns the device's own connector inventory and drives the startup
//! exchange (BootNotification + StatusNotification) through the session's
//! correlator.

use std::time::Duration;

use chrono::{SecondsFormat, Utc};
use rust_ocpp::v2_0_1::messages::boot_notification::BootNotificationResponse;
use serde_json::json;
use tracing::{info, warn};

use super::correlator::{CallFailure, SharedCorrelator};
use crate::config::StationConfig;
use crate::domain::{ConnectorRegistry, ConnectorStatus};

/// Connector id used when no connector is `Available`.
pub const MAIN_CONNECTOR_ID: u32 = 0;

/// Outcome of [`ChargePointClient::startup`].
#[derive(Debug)]
pub struct StartupReport {
    pub boot: Result<BootNotificationResponse, CallFailure>,
    /// Connector the StatusNotification reported
    pub connector_id: u32,
    pub status: Result<(), CallFailure>,
}

pub struct ChargePointClient {
    station: StationConfig,
    evse_id: u32,
    connectors: ConnectorRegistry,
    correlator: SharedCorrelator,
    call_timeout: Duration,
}

impl ChargePointClient {
    pub fn new(
        station: StationConfig,
        evse_id: u32,
        connector_count: u32,
        correlator: SharedCorrelator,
        call_timeout: Duration,
    ) -> Self {
        Self {
            station,
            evse_id,
            connectors: ConnectorRegistry::initialize(connector_count),
            correlator,
            call_timeout,
        }
    }

    pub fn connectors(&self) -> &ConnectorRegistry {
        &self.connectors
    }

    /// Lowest `Available` connector, or the main connector.
    pub fn next_connector_id(&self) -> u32 {
        self.connectors
            .find_available()
            .map(|c| c.id)
            .unwrap_or(MAIN_CONNECTOR_ID)
    }

    pub async fn send_boot_notification(&self) -> Result<BootNotificationResponse, CallFailure> {
        let mut charging_station = json!({
            "model": self.station.model,
            "vendorName": self.station.vendor,
        });
        if let Some(serial) = &self.station.serial_number {
            charging_station["serialNumber"] = json!(serial);
        }
        if let Some(firmware) = &self.station.firmware_version {
            charging_station["firmwareVersion"] = json!(firmware);
        }

        let payload = json!({
            "chargingStation": charging_station,
            "reason": "PowerUp",
        });

        let reply = self
            .correlator
            .send_call("BootNotification", payload, self.call_timeout)
            .await?;

        let response: BootNotificationResponse = serde_json::from_value(reply)
            .map_err(|e| CallFailure::InvalidResponse(e.to_string()))?;

        info!(
            charge_point_id = self.station.id.as_str(),
            status = ?response.status,
            interval = response.interval,
            "Boot accepted"
        );
        Ok(response)
    }

    pub async fn send_status_notification(&self, connector_id: u32) -> Result<(), CallFailure> {
        let status = self
            .connectors
            .get(connector_id)
            .map(|c| c.status)
            .unwrap_or(ConnectorStatus::Available);

        let payload = json!({
            "timestamp": Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            "connectorStatus": status.to_string(),
            "evseId": self.evse_id,
            "connectorId": connector_id,
        });

        self.correlator
            .send_call("StatusNotification", payload, self.call_timeout)
            .await?;

        info!(
            charge_point_id = self.station.id.as_str(),
            connector_id,
            %status,
            "Status reported"
        );
        Ok(())
    }

    /// Boot and report a connector concurrently.
    ///
    /// The status call can overtake the boot call on the wire and be
    /// rejected; that is logged and reported, the session stays up.
    pub async fn startup(&self) -> StartupReport {
        let connector_id = self.next_connector_id();

        let (boot, status) = tokio::join!(
            self.send_boot_notification(),
            self.send_status_notification(connector_id)
        );

        if let Err(e) = &boot {
            warn!(
                charge_point_id = self.station.id.as_str(),
                action = "BootNotification",
                error = %e,
                "Boot failed"
            );
        }
        if let Err(e) = &status {
            warn!(
                charge_point_id = self.station.id.as_str(),
                action = "StatusNotification",
                connector_id,
                error = %e,
                "Status report failed"
            );
        }

        StartupReport {
            boot,
            connector_id,
            status,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use rust_ocpp::v2_0_1::enumerations::registration_status_enum_type::RegistrationStatusEnumType;
    use tokio::sync::mpsc;
    use tokio::task::JoinHandle;

    use super::*;
    use crate::application::handlers::{csms_handlers, HandlerTable};
    use crate::application::session::Session;
    use crate::domain::SessionState;

    const TIMEOUT: Duration = Duration::from_secs(5);

    /// A charge point session wired to a CSMS session over in-memory channels.
    struct Link {
        client: ChargePointClient,
        client_task: JoinHandle<SessionState>,
        server_task: JoinHandle<SessionState>,
    }

    impl Link {
        fn open(station: StationConfig) -> Self {
            let (to_server, server_inbound) = mpsc::unbounded_channel();
            let (to_client, client_inbound) = mpsc::unbounded_channel();

            let server = Session::new(&station.id, to_client, csms_handlers(10).shared(), 9);
            let device = Session::new(&station.id, to_server, HandlerTable::new().shared(), 9);
            let correlator = device.correlator();

            Self {
                client: ChargePointClient::new(station, 1, 9, correlator, TIMEOUT),
                client_task: tokio::spawn(device.serve(client_inbound)),
                server_task: tokio::spawn(server.serve(server_inbound)),
            }
        }

        /// Tear down the charge point side and collect the CSMS state.
        async fn close(self) -> SessionState {
            self.client_task.abort();
            let _ = self.client_task.await;
            drop(self.client);
            self.server_task.await.unwrap()
        }
    }

    #[tokio::test]
    async fn boot_then_status_end_to_end() {
        let link = Link::open(StationConfig::new("CP_1", "Trek", "Edison"));

        let boot = link.client.send_boot_notification().await.unwrap();
        assert!(matches!(boot.status, RegistrationStatusEnumType::Accepted));
        assert_eq!(boot.interval, 10);

        let connector_id = link.client.next_connector_id();
        assert_eq!(connector_id, 1);
        link.client.send_status_notification(connector_id).await.unwrap();

        let state = link.close().await;
        assert!(state.is_powered_up());
        assert_eq!(state.station().map(|s| s.model.as_str()), Some("Trek"));
        assert_eq!(
            state.connectors().get(1).map(|c| c.status),
            Some(ConnectorStatus::Available)
        );
    }

    #[tokio::test]
    async fn status_before_boot_is_rejected_but_session_survives() {
        let link = Link::open(StationConfig::new("CP_2", "Drive", "Through"));

        let err = link.client.send_status_notification(1).await.unwrap_err();
        assert!(matches!(
            err,
            CallFailure::PeerError { ref code, .. } if code == "ProtocolError"
        ));

        assert!(link.client.send_boot_notification().await.is_ok());
        assert!(link.client.send_status_notification(1).await.is_ok());

        let state = link.close().await;
        assert!(state.is_powered_up());
    }

    #[tokio::test]
    async fn startup_always_boots() {
        let link = Link::open(StationConfig::new("CP_1", "Trek", "Edison"));

        let report = link.client.startup().await;
        assert!(report.boot.is_ok());
        assert_eq!(report.connector_id, 1);
        // The status call may or may not have overtaken the boot call.
        if let Err(e) = &report.status {
            assert!(matches!(e, CallFailure::PeerError { .. }));
        }

        assert!(link.close().await.is_powered_up());
    }

    #[tokio::test]
    async fn falls_back_to_main_connector() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let correlator = Arc::new(crate::application::session::Correlator::new(
            "CP",
            tx,
            HandlerTable::new().shared(),
        ));
        let client = ChargePointClient::new(
            StationConfig::new("CP", "M", "V"),
            1,
            0,
            correlator,
            TIMEOUT,
        );
        assert!(client.connectors().is_empty());
        assert_eq!(client.next_connector_id(), MAIN_CONNECTOR_ID);
    }

    #[tokio::test]
    async fn closed_transport_fails_calls() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let correlator = Arc::new(crate::application::session::Correlator::new(
            "CP",
            tx,
            HandlerTable::new().shared(),
        ));
        let client = ChargePointClient::new(
            StationConfig::new("CP", "M", "V"),
            1,
            9,
            correlator,
            TIMEOUT,
        );
        assert_eq!(
            client.send_boot_notification().await.unwrap_err(),
            CallFailure::ConnectionClosed
        );
    }
}
