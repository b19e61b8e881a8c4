//! src/lib.rs
//!
//! Test support for the cloud API samples. Tests use it to retry probes
//! against eventually-consistent services, to clean up the datasets and
//! buckets earlier runs left behind, and to build and run a sample's binary
//! end to end.

pub mod cleanup;
pub mod cloud;
pub mod config;
pub mod error;
pub mod naming;
pub mod report;
pub mod retry;
pub mod runner;

pub use config::{end_to_end_test, system_test, HarnessConfig, TestContext};
pub use error::{Error, Result};
pub use report::TestReport;
pub use retry::{retry, Attempt, AttemptResult, Halt};
pub use runner::{RunOutput, Runner};
