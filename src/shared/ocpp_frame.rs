//! OCPP-J message framing
//!
//! Every message on a session is one of three JSON arrays:
//!
//! - **Call**       `[2, "<uniqueId>", "<action>", {<payload>}]`
//! - **CallResult** `[3, "<uniqueId>", {<payload>}]`
//! - **CallError**  `[4, "<uniqueId>", "<errorCode>", "<errorDescription>", {<errorDetails>}]`
//!
//! The `uniqueId` is chosen by the originator of the Call and echoed verbatim
//! by the reply. It is opaque to the receiver.

use serde_json::Value;
use thiserror::Error;

// ── Message-type constants ─────────────────────────────────────

const MSG_TYPE_CALL: u64 = 2;
const MSG_TYPE_CALL_RESULT: u64 = 3;
const MSG_TYPE_CALL_ERROR: u64 = 4;

// ── Error codes ────────────────────────────────────────────────

/// RPC framework error codes carried in the third slot of a CallError.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    FormationViolation,
    GenericError,
    InternalError,
    MessageTypeNotSupported,
    NotImplemented,
    NotSupported,
    OccurrenceConstraintViolation,
    PropertyConstraintViolation,
    ProtocolError,
    SecurityError,
    TypeConstraintViolation,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FormationViolation => "FormationViolation",
            Self::GenericError => "GenericError",
            Self::InternalError => "InternalError",
            Self::MessageTypeNotSupported => "MessageTypeNotSupported",
            Self::NotImplemented => "NotImplemented",
            Self::NotSupported => "NotSupported",
            Self::OccurrenceConstraintViolation => "OccurrenceConstraintViolation",
            Self::PropertyConstraintViolation => "PropertyConstraintViolation",
            Self::ProtocolError => "ProtocolError",
            Self::SecurityError => "SecurityError",
            Self::TypeConstraintViolation => "TypeConstraintViolation",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── OcppFrame ──────────────────────────────────────────────────

/// A parsed OCPP-J frame.
#[derive(Debug, Clone, PartialEq)]
pub enum OcppFrame {
    /// `[2, uniqueId, action, payload]`
    Call {
        unique_id: String,
        action: String,
        payload: Value,
    },
    /// `[3, uniqueId, payload]`
    CallResult { unique_id: String, payload: Value },
    /// `[4, uniqueId, errorCode, errorDescription, errorDetails]`
    CallError {
        unique_id: String,
        error_code: String,
        error_description: String,
        error_details: Value,
    },
}

impl OcppFrame {
    // ── Parsing ────────────────────────────────────────────

    /// Parse a raw text frame.
    pub fn parse(text: &str) -> Result<Self, FrameError> {
        let arr: Vec<Value> =
            serde_json::from_str(text).map_err(|e| FrameError::InvalidJson(e.to_string()))?;

        let msg_type = arr
            .first()
            .ok_or(FrameError::EmptyArray)?
            .as_u64()
            .ok_or(FrameError::InvalidMessageType)?;

        match msg_type {
            MSG_TYPE_CALL => Self::parse_call(&arr),
            MSG_TYPE_CALL_RESULT => Self::parse_call_result(&arr),
            MSG_TYPE_CALL_ERROR => Self::parse_call_error(&arr),
            other => Err(FrameError::UnknownMessageType(other)),
        }
    }

    fn unique_id_of(arr: &[Value]) -> Result<String, FrameError> {
        arr[1]
            .as_str()
            .map(str::to_string)
            .ok_or(FrameError::FieldTypeMismatch("uniqueId must be a string"))
    }

    fn parse_call(arr: &[Value]) -> Result<Self, FrameError> {
        if arr.len() < 4 {
            return Err(FrameError::MissingFields {
                expected: 4,
                got: arr.len(),
            });
        }

        let unique_id = Self::unique_id_of(arr)?;
        let action = arr[2]
            .as_str()
            .ok_or(FrameError::FieldTypeMismatch("action must be a string"))?
            .to_string();
        if !arr[3].is_object() {
            return Err(FrameError::FieldTypeMismatch("payload must be an object"));
        }

        Ok(Self::Call {
            unique_id,
            action,
            payload: arr[3].clone(),
        })
    }

    fn parse_call_result(arr: &[Value]) -> Result<Self, FrameError> {
        if arr.len() < 3 {
            return Err(FrameError::MissingFields {
                expected: 3,
                got: arr.len(),
            });
        }

        let unique_id = Self::unique_id_of(arr)?;
        let payload = match &arr[2] {
            Value::Null => Value::Object(Default::default()),
            other => other.clone(),
        };

        Ok(Self::CallResult { unique_id, payload })
    }

    fn parse_call_error(arr: &[Value]) -> Result<Self, FrameError> {
        if arr.len() < 4 {
            return Err(FrameError::MissingFields {
                expected: 4,
                got: arr.len(),
            });
        }

        let unique_id = Self::unique_id_of(arr)?;
        let error_code = arr[2]
            .as_str()
            .unwrap_or(ErrorCode::GenericError.as_str())
            .to_string();
        let error_description = arr[3].as_str().unwrap_or("").to_string();
        let error_details = arr
            .get(4)
            .cloned()
            .unwrap_or(Value::Object(Default::default()));

        Ok(Self::CallError {
            unique_id,
            error_code,
            error_description,
            error_details,
        })
    }

    /// Try to recover a correlation id from a frame that failed to parse, so
    /// the sender can be told what went wrong.
    ///
    /// Only frames that look like a Call (or carry an unknown message type)
    /// qualify. A broken CallResult/CallError is never answered.
    pub fn salvage_unique_id(text: &str) -> Option<String> {
        let arr: Vec<Value> = serde_json::from_str(text).ok()?;
        let msg_type = arr.first()?.as_u64()?;
        if msg_type == MSG_TYPE_CALL_RESULT || msg_type == MSG_TYPE_CALL_ERROR {
            return None;
        }
        arr.get(1)?.as_str().map(str::to_string)
    }

    // ── Serialization ──────────────────────────────────────

    /// Serialize this frame to its JSON text form.
    pub fn serialize(&self) -> String {
        let arr = match self {
            Self::Call {
                unique_id,
                action,
                payload,
            } => Value::Array(vec![
                Value::Number(MSG_TYPE_CALL.into()),
                Value::String(unique_id.clone()),
                Value::String(action.clone()),
                payload.clone(),
            ]),

            Self::CallResult { unique_id, payload } => Value::Array(vec![
                Value::Number(MSG_TYPE_CALL_RESULT.into()),
                Value::String(unique_id.clone()),
                payload.clone(),
            ]),

            Self::CallError {
                unique_id,
                error_code,
                error_description,
                error_details,
            } => Value::Array(vec![
                Value::Number(MSG_TYPE_CALL_ERROR.into()),
                Value::String(unique_id.clone()),
                Value::String(error_code.clone()),
                Value::String(error_description.clone()),
                error_details.clone(),
            ]),
        };

        arr.to_string()
    }

    // ── Helpers ────────────────────────────────────────────

    pub fn unique_id(&self) -> &str {
        match self {
            Self::Call { unique_id, .. }
            | Self::CallResult { unique_id, .. }
            | Self::CallError { unique_id, .. } => unique_id,
        }
    }

    /// Build a `CallError` reply for the given correlation id.
    pub fn error_response(
        unique_id: impl Into<String>,
        error_code: ErrorCode,
        error_description: impl Into<String>,
        error_details: Value,
    ) -> Self {
        Self::CallError {
            unique_id: unique_id.into(),
            error_code: error_code.as_str().to_string(),
            error_description: error_description.into(),
            error_details,
        }
    }

    pub fn is_call(&self) -> bool {
        matches!(self, Self::Call { .. })
    }
}

// ── Errors ─────────────────────────────────────────────────────

/// Reasons a single text frame could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("invalid JSON array: {0}")]
    InvalidJson(String),
    #[error("empty OCPP message array")]
    EmptyArray,
    #[error("message type is not a number")]
    InvalidMessageType,
    #[error("unknown message type: {0}")]
    UnknownMessageType(u64),
    #[error("expected at least {expected} fields, got {got}")]
    MissingFields { expected: usize, got: usize },
    #[error("field type mismatch: {0}")]
    FieldTypeMismatch(&'static str),
}

impl FrameError {
    /// Error code used when the failure is reported back to the peer.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::UnknownMessageType(_) => ErrorCode::MessageTypeNotSupported,
            Self::FieldTypeMismatch(_) => ErrorCode::TypeConstraintViolation,
            _ => ErrorCode::FormationViolation,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_call() {
        let text = r#"[2,"abc123","BootNotification",{"chargingStation":{"model":"Trek","vendorName":"Edison"},"reason":"PowerUp"}]"#;
        match OcppFrame::parse(text).unwrap() {
            OcppFrame::Call {
                unique_id,
                action,
                payload,
            } => {
                assert_eq!(unique_id, "abc123");
                assert_eq!(action, "BootNotification");
                assert_eq!(payload["chargingStation"]["vendorName"], "Edison");
            }
            other => panic!("Expected Call frame, got {:?}", other),
        }
    }

    #[test]
    fn parse_call_result_with_null_payload() {
        let frame = OcppFrame::parse(r#"[3,"abc123",null]"#).unwrap();
        assert_eq!(
            frame,
            OcppFrame::CallResult {
                unique_id: "abc123".into(),
                payload: serde_json::json!({}),
            }
        );
    }

    #[test]
    fn parse_call_error_without_details() {
        let text = r#"[4,"abc123","ProtocolError","Charging station has not powered up yet"]"#;
        match OcppFrame::parse(text).unwrap() {
            OcppFrame::CallError {
                unique_id,
                error_code,
                error_description,
                error_details,
            } => {
                assert_eq!(unique_id, "abc123");
                assert_eq!(error_code, "ProtocolError");
                assert_eq!(error_description, "Charging station has not powered up yet");
                assert_eq!(error_details, serde_json::json!({}));
            }
            other => panic!("Expected CallError frame, got {:?}", other),
        }
    }

    #[test]
    fn serialize_call_error_has_five_slots() {
        let frame = OcppFrame::error_response(
            "id3",
            ErrorCode::NotImplemented,
            "Unknown action",
            serde_json::json!({}),
        );
        assert_eq!(
            frame.serialize(),
            r#"[4,"id3","NotImplemented","Unknown action",{}]"#
        );
    }

    #[test]
    fn call_survives_serialization() {
        let frame = OcppFrame::Call {
            unique_id: "id1".into(),
            action: "Heartbeat".into(),
            payload: serde_json::json!({}),
        };
        let parsed = OcppFrame::parse(&frame.serialize()).unwrap();
        assert!(parsed.is_call());
        assert_eq!(parsed.unique_id(), "id1");
    }

    #[test]
    fn rejects_malformed_frames() {
        assert!(matches!(
            OcppFrame::parse("not json"),
            Err(FrameError::InvalidJson(_))
        ));
        assert_eq!(OcppFrame::parse("[]"), Err(FrameError::EmptyArray));
        assert_eq!(
            OcppFrame::parse(r#"["2","x","A",{}]"#),
            Err(FrameError::InvalidMessageType)
        );
        assert_eq!(
            OcppFrame::parse(r#"[7,"x"]"#),
            Err(FrameError::UnknownMessageType(7))
        );
        assert_eq!(
            OcppFrame::parse(r#"[2,"x","Heartbeat"]"#),
            Err(FrameError::MissingFields {
                expected: 4,
                got: 3
            })
        );
        assert_eq!(
            OcppFrame::parse(r#"[2,42,"Heartbeat",{}]"#),
            Err(FrameError::FieldTypeMismatch("uniqueId must be a string"))
        );
    }

    #[test]
    fn salvage_only_answers_calls_and_unknown_types() {
        assert_eq!(
            OcppFrame::salvage_unique_id(r#"[2,"abc",17,{}]"#),
            Some("abc".to_string())
        );
        assert_eq!(
            OcppFrame::salvage_unique_id(r#"[9,"xyz"]"#),
            Some("xyz".to_string())
        );
        assert_eq!(OcppFrame::salvage_unique_id(r#"[3,"abc"]"#), None);
        assert_eq!(OcppFrame::salvage_unique_id(r#"[4,"abc"]"#), None);
        assert_eq!(OcppFrame::salvage_unique_id("garbage"), None);
    }

    #[test]
    fn frame_errors_map_to_wire_codes() {
        assert_eq!(
            FrameError::UnknownMessageType(9).error_code(),
            ErrorCode::MessageTypeNotSupported
        );
        assert_eq!(
            FrameError::MissingFields {
                expected: 4,
                got: 2
            }
            .error_code(),
            ErrorCode::FormationViolation
        );
    }
}
