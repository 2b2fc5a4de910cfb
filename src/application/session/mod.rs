//! Sessions: correlation, the serve loop, the charge point orchestrator and
//! the registry of live connections.

pub mod charge_point;
pub mod correlator;
pub mod registry;
pub mod runner;

pub use charge_point::{ChargePointClient, StartupReport, MAIN_CONNECTOR_ID};
pub use correlator::{CallFailure, Correlator, SharedCorrelator};
pub use registry::{ConnectionInfo, SessionRegistry, SharedSessionRegistry};
pub use runner::Session;
