//! WebSocket interfaces
//!
//! - `admission`: credential check, subprotocol negotiation and identity at handshake time
//! - `csms_server`: the CSMS accept loop
//! - `client`: the charge point simulator
//! - `transport`: WebSocket ↔ channel bridge shared by both roles

pub mod admission;
pub mod client;
pub mod csms_server;
pub mod negotiator;
pub mod transport;

pub use admission::{Admission, AdmissionController, AdmissionError};
pub use csms_server::CsmsServer;
pub use negotiator::{NegotiationError, ProtocolNegotiator};
