//! Domain layer: the session entity, its state machine, and the response
//! cache. Pure logic, no I/O.

pub mod cache;
pub mod session;

pub use cache::{CachedResponse, RETRY_TIME_LIMIT};
pub use session::SessionData;
