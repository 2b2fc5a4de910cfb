//! StatusNotification handler
//!
//! Rejected with a `ProtocolError` until the same session has processed a
//! BootNotification.

use async_trait::async_trait;
use rust_ocpp::v2_0_1::enumerations::connector_status_enum_type::ConnectorStatusEnumType;
use rust_ocpp::v2_0_1::messages::status_notification::{
    StatusNotificationRequest, StatusNotificationResponse,
};
use serde_json::Value;
use tracing::{info, warn};

use super::{parse_request, to_payload, ActionHandler, CallErrorReply, HandlerResult};
use crate::domain::{ConnectorStatus, OrderingError, SessionState};
use crate::shared::ocpp_frame::ErrorCode;

pub struct StatusNotificationHandler;

impl From<OrderingError> for CallErrorReply {
    fn from(err: OrderingError) -> Self {
        match err {
            OrderingError::NotPoweredUp => {
                CallErrorReply::new(ErrorCode::ProtocolError, err.to_string())
                    .with_details(serde_json::json!({ "reason": "NotPoweredUp" }))
            }
        }
    }
}

fn connector_status(status: ConnectorStatusEnumType) -> ConnectorStatus {
    match status {
        ConnectorStatusEnumType::Available => ConnectorStatus::Available,
        ConnectorStatusEnumType::Occupied => ConnectorStatus::Occupied,
        ConnectorStatusEnumType::Reserved => ConnectorStatus::Reserved,
        ConnectorStatusEnumType::Unavailable => ConnectorStatus::Unavailable,
        ConnectorStatusEnumType::Faulted => ConnectorStatus::Faulted,
    }
}

fn non_negative(field: &'static str, value: i64) -> Result<u32, CallErrorReply> {
    u32::try_from(value).map_err(|_| {
        CallErrorReply::new(
            ErrorCode::PropertyConstraintViolation,
            format!("{} must be a non-negative integer", field),
        )
    })
}

#[async_trait]
impl ActionHandler for StatusNotificationHandler {
    async fn handle(&self, state: &mut SessionState, payload: Value) -> HandlerResult {
        let req: StatusNotificationRequest = parse_request("StatusNotification", payload)?;

        info!(
            charge_point_id = state.charge_point_id(),
            evse_id = req.evse_id,
            connector_id = req.connector_id,
            status = ?req.connector_status,
            "StatusNotification"
        );

        let connector_id = non_negative("connectorId", req.connector_id.into())?;
        let evse_id = non_negative("evseId", req.evse_id.into())?;

        if let Err(e) = state.handle_status_notification(
            connector_id,
            req.timestamp,
            evse_id,
            connector_status(req.connector_status),
        ) {
            warn!(
                charge_point_id = state.charge_point_id(),
                connector_id,
                error = %e,
                "StatusNotification rejected"
            );
            return Err(e.into());
        }

        to_payload(&StatusNotificationResponse {})
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::handlers::BootNotificationHandler;

    fn status_payload(connector_id: i64) -> Value {
        serde_json::json!({
            "timestamp": "2024-01-01T00:00:00Z",
            "connectorStatus": "Occupied",
            "evseId": 1,
            "connectorId": connector_id
        })
    }

    #[tokio::test]
    async fn rejected_before_boot() {
        let mut state = SessionState::new("CP", 9);
        let err = StatusNotificationHandler
            .handle(&mut state, status_payload(1))
            .await
            .unwrap_err();

        assert_eq!(err.code, ErrorCode::ProtocolError);
        assert_eq!(err.details["reason"], "NotPoweredUp");
    }

    #[tokio::test]
    async fn accepted_after_boot_with_empty_ack() {
        let mut state = SessionState::new("CP2", 9);
        BootNotificationHandler::new(10)
            .handle(
                &mut state,
                serde_json::json!({
                    "chargingStation": {"model": "Trek", "vendorName": "Edison"},
                    "reason": "PowerUp"
                }),
            )
            .await
            .unwrap();

        let reply = StatusNotificationHandler
            .handle(&mut state, status_payload(1))
            .await
            .unwrap();

        assert_eq!(reply, serde_json::json!({}));
        assert_eq!(
            state.connectors().get(1).map(|c| c.status),
            Some(ConnectorStatus::Occupied)
        );
    }

    #[tokio::test]
    async fn unknown_connector_status_is_a_formation_violation() {
        let mut state = SessionState::new("CP", 9);
        let payload = serde_json::json!({
            "timestamp": "2024-01-01T00:00:00Z",
            "connectorStatus": "Exploded",
            "evseId": 1,
            "connectorId": 1
        });
        let err = StatusNotificationHandler
            .handle(&mut state, payload)
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::FormationViolation);
    }
}
