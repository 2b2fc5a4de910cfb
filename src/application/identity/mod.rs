pub mod credential_gate;

pub use credential_gate::{encode_basic, AuthError, CredentialGate};
