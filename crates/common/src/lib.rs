//! Shared plumbing for the spout services: logging setup and layered
//! configuration loading.

pub mod utils;

pub use utils::config::load_layered;
pub use utils::logging::{init_logging, LoggingConfig, LoggingGuard, AUDIT_TARGET};
