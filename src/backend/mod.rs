//! Backend pool registry and load balancing algorithms.

pub mod algorithms;
mod backend;
mod error;
mod pool;
mod registry;
mod sessions;

pub use backend::{Backend, BackendStatus, normalize_weight};
pub use error::{BalancerError, BalancerResult};
pub use pool::Pool;
pub use registry::Registry;
pub use sessions::SessionStore;
