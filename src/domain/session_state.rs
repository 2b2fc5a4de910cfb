//! Per-connection protocol state
//!
//! A charging station has to announce itself with a BootNotification before
//! any connector state it reports is trusted. The state lives with exactly one
//! session and is only mutated by that session's inbound loop.

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::info;

use super::connector::{ConnectorRegistry, ConnectorStatus};

/// Power state of the charging station as seen by this session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PowerState {
    #[default]
    PoweredDown,
    PoweredUp,
}

/// Identity a station reports in its BootNotification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StationInfo {
    pub model: String,
    pub vendor: String,
    pub serial_number: Option<String>,
    pub firmware_version: Option<String>,
}

/// Registration outcome returned to the station.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationStatus {
    Accepted,
}

/// Payload of a successful boot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootAcceptance {
    pub current_time: DateTime<Utc>,
    pub interval: u16,
    pub status: RegistrationStatus,
}

/// Business-rule rejection of an out-of-order call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OrderingError {
    #[error("Charging station has not powered up yet")]
    NotPoweredUp,
}

#[derive(Debug, Clone)]
pub struct SessionState {
    charge_point_id: String,
    power: PowerState,
    connectors: ConnectorRegistry,
    station: Option<StationInfo>,
}

impl SessionState {
    pub fn new(charge_point_id: impl Into<String>, connector_count: u32) -> Self {
        Self {
            charge_point_id: charge_point_id.into(),
            power: PowerState::PoweredDown,
            connectors: ConnectorRegistry::initialize(connector_count),
            station: None,
        }
    }

    pub fn charge_point_id(&self) -> &str {
        &self.charge_point_id
    }

    pub fn power(&self) -> PowerState {
        self.power
    }

    pub fn is_powered_up(&self) -> bool {
        self.power == PowerState::PoweredUp
    }

    pub fn connectors(&self) -> &ConnectorRegistry {
        &self.connectors
    }

    pub fn station(&self) -> Option<&StationInfo> {
        self.station.as_ref()
    }

    /// Always accepted. Moves the session to `PoweredUp`; repeated boots
    /// (a station rebooting mid-session) keep it there.
    pub fn handle_boot_notification(
        &mut self,
        station: StationInfo,
        reason: &str,
        heartbeat_interval: u16,
    ) -> BootAcceptance {
        info!(
            charge_point_id = self.charge_point_id.as_str(),
            model = station.model.as_str(),
            vendor = station.vendor.as_str(),
            reason,
            "Station powered up"
        );

        self.power = PowerState::PoweredUp;
        self.station = Some(station);

        BootAcceptance {
            current_time: Utc::now(),
            interval: heartbeat_interval,
            status: RegistrationStatus::Accepted,
        }
    }

    pub fn handle_status_notification(
        &mut self,
        connector_id: u32,
        timestamp: DateTime<Utc>,
        evse_id: u32,
        status: ConnectorStatus,
    ) -> Result<(), OrderingError> {
        if !self.is_powered_up() {
            return Err(OrderingError::NotPoweredUp);
        }

        info!(
            charge_point_id = self.charge_point_id.as_str(),
            connector_id,
            evse_id,
            %status,
            %timestamp,
            "Connector status updated"
        );
        self.connectors.set_status(connector_id, status);
        Ok(())
    }
}
