use thiserror::Error;
use tokio_tungstenite::tungstenite;
use tokio_tungstenite::tungstenite::http::header::InvalidHeaderValue;

use crate::application::identity::AuthError;
use crate::config::ConfigError;
use crate::interfaces::ws::admission::AdmissionError;

/// Process-level failures: binding, connecting, handshakes, configuration.
///
/// Per-frame and per-call failures never surface here; they are answered on
/// the wire or returned to the caller as `CallFailure`.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Admission refused: {0}")]
    Admission(#[from] AdmissionError),

    #[error("Credentials: {0}")]
    Auth(#[from] AuthError),

    #[error("Invalid header value: {0}")]
    InvalidHeader(#[from] InvalidHeaderValue),

    #[error("Handshake: {0}")]
    Handshake(String),

    #[error("Interrupted by shutdown")]
    Shutdown,
}

impl AppError {
    /// Refusals of a single connection, as opposed to faults of the process.
    pub fn is_rejection(&self) -> bool {
        matches!(self, AppError::Admission(_))
    }
}
