//! # lvmigrate Common
//!
//! Shared utilities for the lvmigrate components.
//!
//! ## Logging
//!
//! ```rust,ignore
//! use lvmigrate_common::init_logging;
//!
//! init_logging("info").unwrap();
//! tracing::info!(domain = "web01", "Starting migration");
//! ```

pub mod logging;

pub use logging::{init_logging, init_logging_json};
