//! # virtdeck Common
//!
//! Shared utilities for the virtdeck components.
//!
//! ## Logging
//!
//! ```rust
//! use virtdeck_common::init_logging;
//!
//! init_logging("info").unwrap();
//! ```

pub mod logging;

pub use logging::{init_logging, init_logging_json};
