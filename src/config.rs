//! src/config.rs
//!
//! Defines the strongly-typed `HarnessConfig` struct, loaded from an optional
//! `harness.toml` and `SAMPLES_`-prefixed environment variables via `figment`,
//! and the gates tests use to decide whether they can talk to a real project.

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// Top-level struct holding the harness configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HarnessConfig {
    /// Project that system tests run against. Unset means "skip them".
    pub project_id: Option<String>,
    /// Enables the slow end-to-end tests.
    pub e2e_test: bool,
}

impl HarnessConfig {
    /// Loads configuration from `harness.toml` and environment variables.
    /// It uses the `Default` implementation as a base layer.
    pub fn load() -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Serialized::defaults(HarnessConfig::default()))
            .merge(Toml::file("harness.toml"))
            .merge(Env::prefixed("SAMPLES_"))
            .extract()
    }

    fn project(&self) -> Option<&str> {
        self.project_id.as_deref().filter(|p| !p.trim().is_empty())
    }
}

/// What a system test needs to know about its environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestContext {
    pub project_id: String,
}

/// Returns the context for a test that needs a cloud project, or `None` when
/// no project is configured. Callers return early on `None`: the test is
/// skipped, not failed.
pub fn system_test() -> Option<TestContext> {
    context_from(load_or_skip()?)
}

/// Like `system_test`, but also requires `e2e_test` to be enabled.
pub fn end_to_end_test() -> Option<TestContext> {
    let config = load_or_skip()?;
    if !config.e2e_test {
        tracing::warn!("End-to-end tests are disabled. Set SAMPLES_E2E_TEST=true to run them.");
        return None;
    }
    context_from(config)
}

fn load_or_skip() -> Option<HarnessConfig> {
    match HarnessConfig::load() {
        Ok(config) => Some(config),
        Err(e) => {
            tracing::warn!(error = %e, "Cannot load harness configuration. Skipping.");
            None
        }
    }
}

fn context_from(config: HarnessConfig) -> Option<TestContext> {
    match config.project() {
        Some(project_id) => Some(TestContext {
            project_id: project_id.to_string(),
        }),
        None => {
            tracing::warn!("SAMPLES_PROJECT_ID is not set. Skipping.");
            None
        }
    }
}
