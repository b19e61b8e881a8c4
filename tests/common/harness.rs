//! tests/common/harness.rs
//!
//! Shared fixtures: a test project context, managed names at chosen ages, and
//! the path to the sample package the runner tests build.

use sample_harness::{naming::managed_name, TestContext};
use std::{
    path::PathBuf,
    time::{Duration, SystemTime},
};

pub const PROJECT: &str = "sample-project";

pub fn context() -> TestContext {
    TestContext {
        project_id: PROJECT.to_string(),
    }
}

/// A managed name created `age` ago.
pub fn name_aged(kind: &str, id: u64, age: Duration) -> String {
    managed_name("harness", kind, id, SystemTime::now() - age)
}

pub fn hours(n: u64) -> Duration {
    Duration::from_secs(n * 60 * 60)
}

pub fn minutes(n: u64) -> Duration {
    Duration::from_secs(n * 60)
}

/// The tiny sample program under `tests/fixtures/greeter`.
pub fn greeter_package() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join("greeter")
}
