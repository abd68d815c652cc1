//! # raftseal testkit
//!
//! Test utilities for raftseal.
//!
//! This crate provides:
//! - Fake crypters with arbitrary algorithm ids, and encrypters that fail
//!   on demand
//! - Temporary state directories and legacy layout writers
//! - Crash simulation for WAL files
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust,ignore
//! use raftseal_testkit::prelude::*;
//!
//! #[test]
//! fn survives_reopen() {
//!     let state = TempState::new();
//!     let logger = state.logger(&key());
//!     logger.bootstrap_new(b"meta").unwrap();
//!     // ...
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod crash;
pub mod fakes;
pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::crash::*;
    pub use crate::fakes::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::init_tracing;
}

pub use crash::*;
pub use fakes::*;
pub use fixtures::*;
pub use generators::*;

/// Installs a `tracing` subscriber for test output.
///
/// Honors `RUST_LOG`; defaults to `warn`. Safe to call from every test.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}
