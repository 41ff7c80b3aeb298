//! Registry Server - HTTP surface over the registry core.
//!
//! Exposes paginated listings, version lookups, publish and delete for
//! servers and skills, plus registry administration and sync status.

pub mod handlers;
pub mod server;

pub use server::{build_router, start_server, AppState};
