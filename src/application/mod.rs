pub mod handlers;
pub mod identity;
pub mod session;

pub use handlers::{csms_handlers, ActionHandler, CallErrorReply, HandlerTable, SharedHandlerTable};
pub use identity::{AuthError, CredentialGate};
pub use session::{
    CallFailure, ChargePointClient, Correlator, Session, SessionRegistry, SharedSessionRegistry,
    StartupReport,
};
