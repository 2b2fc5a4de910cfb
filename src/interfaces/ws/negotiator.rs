//! OCPP subprotocol negotiation
//!
//! During the WebSocket handshake the charge point advertises the
//! subprotocols it speaks via the `Sec-WebSocket-Protocol` header. The
//! negotiator picks the first of them this endpoint supports.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NegotiationError {
    #[error("no subprotocol requested")]
    SubprotocolNotRequested,
    #[error("none of the requested subprotocols ({requested}) is supported")]
    NoCommonSubprotocol { requested: String },
}

/// Confirms a requested subprotocol against the supported set.
#[derive(Debug, Clone)]
pub struct ProtocolNegotiator {
    supported: Vec<String>,
}

impl ProtocolNegotiator {
    pub fn new(supported: Vec<String>) -> Self {
        Self { supported }
    }

    /// First entry of `requested` that is also supported.
    pub fn negotiate(&self, requested: &[&str]) -> Result<String, NegotiationError> {
        if requested.is_empty() {
            return Err(NegotiationError::SubprotocolNotRequested);
        }

        requested
            .iter()
            .find(|p| self.supported.iter().any(|s| s == *p))
            .map(|p| p.to_string())
            .ok_or_else(|| NegotiationError::NoCommonSubprotocol {
                requested: requested.join(", "),
            })
    }

    /// Negotiate from a raw, comma-separated header value.
    ///
    /// An absent or blank header counts as not requested.
    pub fn negotiate_header(&self, header: Option<&str>) -> Result<String, NegotiationError> {
        let requested: Vec<&str> = header
            .unwrap_or("")
            .split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .collect();
        self.negotiate(&requested)
    }

    pub fn supported(&self) -> &[String] {
        &self.supported
    }
}
