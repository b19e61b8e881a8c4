//! src/runner.rs
//!
//! Builds a sample package into a scratch directory and runs the resulting
//! binary as a child process, the way a user would invoke it from a shell.

use crate::{
    error::{Error, Result},
    report::TestReport,
};
use serde::Deserialize;
use std::{
    ffi::{OsStr, OsString},
    path::{Path, PathBuf},
    process::Stdio,
    time::Duration,
};
use tempfile::TempDir;
use tokio::{
    io::{AsyncRead, AsyncReadExt},
    process::Command,
    time::Instant,
};

/// Everything a child process wrote before it exited or was killed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunOutput {
    pub stdout: String,
    pub stderr: String,
}

/// The subset of cargo's JSON build messages we care about.
#[derive(Debug, Deserialize)]
struct CargoMessage {
    reason: String,
    #[serde(default)]
    executable: Option<PathBuf>,
}

/// A sample package compiled into a scratch directory.
///
/// The scratch directory lives until `cleanup` is called.
pub struct Runner<'r> {
    report: &'r TestReport,
    dir: TempDir,
    bin: Option<PathBuf>,
}

impl<'r> Runner<'r> {
    /// Builds the package in `package_dir`.
    ///
    /// A failed build is logged to `report` once and leaves `built()` false
    /// for good. Only failing to create the scratch directory is an error.
    pub async fn build(report: &'r TestReport, package_dir: impl AsRef<Path>) -> Result<Self> {
        let dir = tempfile::Builder::new().prefix("sample-runner").tempdir()?;
        let package_dir = package_dir.as_ref();

        let bin = match build_package(package_dir, dir.path()).await {
            Ok(bin) => {
                tracing::info!(package = %package_dir.display(), bin = %bin.display(), "Built sample");
                Some(bin)
            }
            Err(e) => {
                report.error(format!("cannot build sample: {e}"));
                None
            }
        };

        Ok(Self { report, dir, bin })
    }

    pub fn built(&self) -> bool {
        self.bin.is_some()
    }

    pub fn binary(&self) -> Option<&Path> {
        self.bin.as_deref()
    }

    /// Runs the binary with `env` layered over the inherited environment.
    ///
    /// The child is killed if it outlives `timeout`. On a non-zero exit or a
    /// timeout the error carries whatever output was captured.
    pub async fn run<I, K, V>(&self, env: I, timeout: Duration, args: &[&str]) -> Result<RunOutput>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<OsStr>,
        V: AsRef<OsStr>,
    {
        let deadline = Instant::now() + timeout;
        let bin = self.bin.as_ref().ok_or(Error::NotBuilt)?;

        let mut command = Command::new(bin);
        command
            .args(args)
            .envs(env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if Instant::now() >= deadline {
            return Err(Error::Timeout {
                timeout,
                output: RunOutput::default(),
            });
        }

        let mut child = command.spawn()?;
        let stdout = tokio::spawn(read_to_string(child.stdout.take()));
        let stderr = tokio::spawn(read_to_string(child.stderr.take()));

        let status = match tokio::time::timeout_at(deadline, child.wait()).await {
            Ok(status) => Some(status?),
            Err(_) => {
                tracing::warn!(bin = %bin.display(), ?timeout, "Sample timed out. Killing it.");
                // It may have exited on its own in the meantime.
                let _ = child.kill().await;
                None
            }
        };

        let output = RunOutput {
            stdout: stdout.await??,
            stderr: stderr.await??,
        };

        match status {
            Some(status) if status.success() => Ok(output),
            Some(status) => Err(Error::ProcessFailed { status, output }),
            None => Err(Error::Timeout { timeout, output }),
        }
    }

    /// Removes the scratch directory. Failures are reported, not returned.
    pub fn cleanup(self) {
        let path = self.dir.path().to_path_buf();
        if let Err(e) = self.dir.close() {
            self.report
                .error(format!("cannot remove {}: {e}", path.display()));
        }
    }
}

async fn build_package(package_dir: &Path, target_dir: &Path) -> Result<PathBuf> {
    let cargo = std::env::var_os("CARGO").unwrap_or_else(|| OsString::from("cargo"));
    let output = Command::new(cargo)
        .current_dir(package_dir)
        .args(["build", "--message-format=json-render-diagnostics", "--target-dir"])
        .arg(target_dir)
        .stdin(Stdio::null())
        .output()
        .await?;

    let build_failed = |reason: String| Error::BuildFailed {
        package_dir: package_dir.to_path_buf(),
        reason,
    };

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(build_failed(format!("{}\n{}", output.status, stderr.trim_end())));
    }

    let mut executable = None;
    for line in String::from_utf8_lossy(&output.stdout).lines() {
        let message: CargoMessage = serde_json::from_str(line)?;
        if message.reason == "compiler-artifact" && message.executable.is_some() {
            executable = message.executable;
        }
    }
    executable.ok_or_else(|| build_failed("no executable was produced".to_string()))
}

async fn read_to_string<R: AsyncRead + Unpin>(pipe: Option<R>) -> std::io::Result<String> {
    let mut buf = Vec::new();
    if let Some(mut pipe) = pipe {
        pipe.read_to_end(&mut buf).await?;
    }
    Ok(String::from_utf8_lossy(&buf).into_owned())
}
