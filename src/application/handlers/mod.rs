//! Inbound action handlers
//!
//! A [`HandlerTable`] maps OCPP action names to handlers. It is built once
//! per endpoint at startup and shared read-only by every session of that
//! endpoint; handlers receive the calling session's own [`SessionState`].

mod handle_boot_notification;
mod handle_status_notification;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::domain::SessionState;
use crate::shared::ocpp_frame::ErrorCode;

pub use handle_boot_notification::BootNotificationHandler;
pub use handle_status_notification::StatusNotificationHandler;

/// A handler's rejection, sent back to the peer as a CallError.
#[derive(Debug, Clone, PartialEq)]
pub struct CallErrorReply {
    pub code: ErrorCode,
    pub description: String,
    pub details: Value,
}

impl CallErrorReply {
    pub fn new(code: ErrorCode, description: impl Into<String>) -> Self {
        Self {
            code,
            description: description.into(),
            details: Value::Object(Default::default()),
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }
}

pub type HandlerResult = Result<Value, CallErrorReply>;

/// Produces the reply to one inbound Call.
#[async_trait]
pub trait ActionHandler: Send + Sync {
    async fn handle(&self, state: &mut SessionState, payload: Value) -> HandlerResult;
}

/// Action name → handler.
#[derive(Default)]
pub struct HandlerTable {
    handlers: HashMap<String, Box<dyn ActionHandler>>,
}

impl HandlerTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, action: impl Into<String>, handler: impl ActionHandler + 'static) -> Self {
        self.handlers.insert(action.into(), Box::new(handler));
        self
    }

    pub fn get(&self, action: &str) -> Option<&dyn ActionHandler> {
        self.handlers.get(action).map(|h| h.as_ref())
    }

    pub fn actions(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }

    pub fn shared(self) -> SharedHandlerTable {
        Arc::new(self)
    }
}

pub type SharedHandlerTable = Arc<HandlerTable>;

/// Handlers a CSMS endpoint answers: BootNotification and StatusNotification.
pub fn csms_handlers(heartbeat_interval: u16) -> HandlerTable {
    HandlerTable::new()
        .register(
            "BootNotification",
            BootNotificationHandler::new(heartbeat_interval),
        )
        .register("StatusNotification", StatusNotificationHandler)
}

/// Parse a request payload, mapping failures to a `FormationViolation` reply.
pub(crate) fn parse_request<T: serde::de::DeserializeOwned>(
    action: &str,
    payload: Value,
) -> Result<T, CallErrorReply> {
    serde_json::from_value(payload).map_err(|e| {
        CallErrorReply::new(
            ErrorCode::FormationViolation,
            format!("Invalid {} payload: {}", action, e),
        )
    })
}

/// Serialize a response payload, mapping failures to an `InternalError` reply.
pub(crate) fn to_payload<T: serde::Serialize>(response: &T) -> HandlerResult {
    serde_json::to_value(response)
        .map_err(|e| CallErrorReply::new(ErrorCode::InternalError, e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    #[async_trait]
    impl ActionHandler for Echo {
        async fn handle(&self, _state: &mut SessionState, payload: Value) -> HandlerResult {
            Ok(payload)
        }
    }

    #[tokio::test]
    async fn registered_handlers_are_found_by_action() {
        let table = HandlerTable::new().register("Echo", Echo);
        let mut state = SessionState::new("CP", 1);
        let handler = table.get("Echo").expect("registered");
        let reply = handler
            .handle(&mut state, serde_json::json!({"a": 1}))
            .await;
        assert_eq!(reply, Ok(serde_json::json!({"a": 1})));
        assert!(table.get("Heartbeat").is_none());
    }

    #[test]
    fn csms_table_covers_boot_and_status() {
        let table = csms_handlers(10);
        let mut actions: Vec<_> = table.actions().collect();
        actions.sort();
        assert_eq!(actions, ["BootNotification", "StatusNotification"]);
    }
}
