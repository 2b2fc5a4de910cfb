//! Connection admission
//!
//! Runs inside the WebSocket handshake callback: the request must carry
//! valid Basic credentials, name a supported subprotocol and have a charge
//! point id in its path. Nothing session-related exists until all three pass.

use thiserror::Error;
use tokio_tungstenite::tungstenite::handshake::server::ErrorResponse;
use tokio_tungstenite::tungstenite::http::{header, HeaderMap, StatusCode};

use super::negotiator::{NegotiationError, ProtocolNegotiator};
use crate::application::identity::{AuthError, CredentialGate};

/// Spelling some deployed stations send instead of `Authorization`.
const AUTHORISATION: &str = "authorisation";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdmissionError {
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Negotiation(#[from] NegotiationError),
    #[error("request path carries no charge point id")]
    MissingIdentity,
}

impl AdmissionError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Auth(_) => StatusCode::UNAUTHORIZED,
            Self::Negotiation(_) | Self::MissingIdentity => StatusCode::BAD_REQUEST,
        }
    }

    /// Handshake rejection sent back instead of the 101 upgrade.
    pub fn to_response(&self) -> ErrorResponse {
        let mut response = ErrorResponse::new(Some(self.to_string()));
        *response.status_mut() = self.status_code();
        response
    }
}

/// An admitted connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Admission {
    pub charge_point_id: String,
    pub subprotocol: String,
}

pub struct AdmissionController {
    gate: CredentialGate,
    negotiator: ProtocolNegotiator,
}

impl AdmissionController {
    pub fn new(gate: CredentialGate, negotiator: ProtocolNegotiator) -> Self {
        Self { gate, negotiator }
    }

    pub fn negotiator(&self) -> &ProtocolNegotiator {
        &self.negotiator
    }

    /// Authenticate, then negotiate, then resolve the charge point id.
    pub fn admit(&self, path: &str, headers: &HeaderMap) -> Result<Admission, AdmissionError> {
        let credentials = headers
            .get(header::AUTHORIZATION)
            .or_else(|| headers.get(AUTHORISATION))
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        self.gate.authorize(credentials)?;

        let requested = headers
            .get(header::SEC_WEBSOCKET_PROTOCOL)
            .and_then(|v| v.to_str().ok());
        let subprotocol = self.negotiator.negotiate_header(requested)?;

        let charge_point_id =
            extract_charge_point_id(path).ok_or(AdmissionError::MissingIdentity)?;

        Ok(Admission {
            charge_point_id,
            subprotocol,
        })
    }
}

/// Charge point id from the request path.
/// Accepts `/{charge_point_id}` and `/ocpp/{charge_point_id}`.
pub fn extract_charge_point_id(path: &str) -> Option<String> {
    let path = path.trim_start_matches('/');

    if let Some(id) = path.strip_prefix("ocpp/") {
        let id = id.trim_start_matches('/');
        if !id.is_empty() && !id.contains('/') {
            return Some(id.to_string());
        }
        return None;
    }

    if !path.is_empty() && !path.contains('/') {
        return Some(path.to_string());
    }

    None
}
