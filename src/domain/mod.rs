//! Domain layer: connector inventory and the per-session state machine.

pub mod connector;
pub mod session_state;

pub use connector::{Connector, ConnectorRegistry, ConnectorStatus};
pub use session_state::{
    BootAcceptance, OrderingError, PowerState, RegistrationStatus, SessionState, StationInfo,
};
