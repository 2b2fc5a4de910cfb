//! BootNotification handler

use async_trait::async_trait;
use rust_ocpp::v2_0_1::enumerations::registration_status_enum_type::RegistrationStatusEnumType;
use rust_ocpp::v2_0_1::messages::boot_notification::{
    BootNotificationRequest, BootNotificationResponse,
};
use serde_json::Value;
use tracing::info;

use super::{parse_request, to_payload, ActionHandler, HandlerResult};
use crate::domain::{RegistrationStatus, SessionState, StationInfo};

pub struct BootNotificationHandler {
    heartbeat_interval: u16,
}

impl BootNotificationHandler {
    pub fn new(heartbeat_interval: u16) -> Self {
        Self { heartbeat_interval }
    }
}

#[async_trait]
impl ActionHandler for BootNotificationHandler {
    async fn handle(&self, state: &mut SessionState, payload: Value) -> HandlerResult {
        // Some stations omit the mandatory `reason`; treat it as a power-up.
        let mut patched = payload;
        if let Some(obj) = patched.as_object_mut() {
            obj.entry("reason").or_insert(serde_json::json!("PowerUp"));
        }

        let req: BootNotificationRequest = parse_request("BootNotification", patched)?;
        let cs = req.charging_station;

        info!(
            charge_point_id = state.charge_point_id(),
            vendor = cs.vendor_name.as_str(),
            model = cs.model.as_str(),
            reason = ?req.reason,
            "BootNotification"
        );

        let acceptance = state.handle_boot_notification(
            StationInfo {
                model: cs.model,
                vendor: cs.vendor_name,
                serial_number: cs.serial_number,
                firmware_version: cs.firmware_version,
            },
            &format!("{:?}", req.reason),
            self.heartbeat_interval,
        );

        let status = match acceptance.status {
            RegistrationStatus::Accepted => RegistrationStatusEnumType::Accepted,
        };

        to_payload(&BootNotificationResponse {
            current_time: acceptance.current_time,
            interval: acceptance.interval,
            status,
            status_info: None,
        })
    }
}
