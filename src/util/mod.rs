//! Logging setup and shutdown signalling.

mod logging;
mod shutdown;

pub use logging::init_logging;
pub use shutdown::ShutdownSignal;
