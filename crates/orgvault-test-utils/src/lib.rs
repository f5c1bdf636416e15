#![deny(unsafe_code)]

//! Shared test utilities for the orgvault workspace.
//!
//! Provides reusable fixtures, config builders, stub HTTP servers and tracing
//! helpers so that individual crate tests stay concise and consistent.
//!
//! Add this crate as a `[dev-dependency]` in any workspace member:
//!
//! ```toml
//! [dev-dependencies]
//! orgvault-test-utils = { workspace = true }
//! ```
//!
//! Nothing here depends on `orgvault-core`; core's unit tests use it too.

pub mod config;
pub mod git;
pub mod stub;
pub mod tracing_setup;

pub use config::{TestConfigBuilder, TestWorkspace};
pub use git::SourceRepo;
pub use stub::{RecordedRequest, StubServer};
pub use tracing_setup::init_test_tracing;
