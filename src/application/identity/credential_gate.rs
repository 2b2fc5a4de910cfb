//! HTTP Basic credential check for connecting charging stations
//!
//! The station sends `Authorization: Basic <base64(identity:secret)>` during
//! the WebSocket handshake. Both halves are compared in constant time.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use subtle::ConstantTimeEq;
use thiserror::Error;

const BASIC_PREFIX: &str = "Basic ";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("malformed credentials: {0}")]
    MalformedCredentials(&'static str),
    #[error("invalid identity or secret")]
    Unauthorized,
}

/// Decoded identity/secret pair. Consumed by [`CredentialGate::authorize`].
struct Credentials {
    identity: String,
    secret: String,
}

impl Credentials {
    fn decode(encoded: &str) -> Result<Self, AuthError> {
        let encoded = encoded.trim();
        let encoded = encoded.strip_prefix(BASIC_PREFIX).unwrap_or(encoded).trim();
        if encoded.is_empty() {
            return Err(AuthError::MalformedCredentials("empty credentials"));
        }

        let bytes = STANDARD
            .decode(encoded)
            .map_err(|_| AuthError::MalformedCredentials("not valid base64"))?;
        let decoded = String::from_utf8(bytes)
            .map_err(|_| AuthError::MalformedCredentials("not valid UTF-8"))?;

        let mut parts = decoded.split(':');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(identity), Some(secret), None) => Ok(Self {
                identity: identity.to_string(),
                secret: secret.to_string(),
            }),
            _ => Err(AuthError::MalformedCredentials(
                "expected exactly one identity and one secret",
            )),
        }
    }
}

/// The credential authority a CSMS endpoint checks stations against.
#[derive(Clone)]
pub struct CredentialGate {
    identity: String,
    secret: String,
}

impl CredentialGate {
    pub fn new(identity: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            secret: secret.into(),
        }
    }

    /// Check an encoded credential blob, with or without the `Basic ` prefix.
    pub fn authorize(&self, encoded: &str) -> Result<(), AuthError> {
        let credentials = Credentials::decode(encoded)?;

        // Evaluate both comparisons before branching.
        let identity_ok = credentials
            .identity
            .as_bytes()
            .ct_eq(self.identity.as_bytes());
        let secret_ok = credentials.secret.as_bytes().ct_eq(self.secret.as_bytes());

        if bool::from(identity_ok & secret_ok) {
            Ok(())
        } else {
            Err(AuthError::Unauthorized)
        }
    }
}

impl std::fmt::Debug for CredentialGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialGate")
            .field("identity", &self.identity)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Build the `Authorization` header value a station sends.
pub fn encode_basic(identity: &str, secret: &str) -> Result<String, AuthError> {
    if identity.contains(':') {
        return Err(AuthError::MalformedCredentials(
            "identity must not contain ':'",
        ));
    }
    Ok(format!(
        "{}{}",
        BASIC_PREFIX,
        STANDARD.encode(format!("{}:{}", identity, secret))
    ))
}
