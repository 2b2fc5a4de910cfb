//! # CSMS session engine
//!
//! OCPP-J session protocol between charging stations and a central system:
//! admission (Basic credentials + subprotocol negotiation), call/reply
//! correlation and the per-session power-up ordering rule.
//!
//! ## Architecture
//!
//! - **domain**: connector inventory and the per-session state machine
//! - **application**: action handlers, credential gate, sessions and correlation
//! - **interfaces**: WebSocket admission, transport, CSMS server and charge point client
//! - **shared**: OCPP-J framing, errors, shutdown

pub mod application;
pub mod config;
pub mod domain;
pub mod interfaces;
pub mod server;
pub mod shared;

pub use config::{default_config_path, AppConfig};
pub use server::{init_tracing, ServerHandle};
pub use shared::errors::AppError;
