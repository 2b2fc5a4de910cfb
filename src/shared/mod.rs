pub mod errors;
pub mod ocpp_frame;
pub mod shutdown;

pub use errors::AppError;
pub use shutdown::*;
