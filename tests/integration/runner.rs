//! tests/integration/runner.rs
//!
//! Builds the greeter sample with the subprocess runner and runs it the way
//! a user would, checking output, exit codes and the timeout.

use crate::common::harness;
use sample_harness::{Error, Runner, TestReport};
use std::{fs, time::Duration};
use test_log::test;

#[test(tokio::test(flavor = "multi_thread", worker_threads = 2))]
async fn test_greeter_reads_env_and_honours_deadline() {
    let report = TestReport::new("greeter");
    let runner = Runner::build(&report, harness::greeter_package())
        .await
        .expect("scratch dir");
    assert!(runner.built(), "build failed: {:?}", report.entries());

    let output = runner
        .run([("GREETING", "hi")], Duration::from_secs(5), &[])
        .await
        .expect("greeter should succeed");
    assert!(output.stdout.contains("hi"), "stdout: {}", output.stdout);
    assert!(output.stderr.is_empty());

    let err = runner
        .run([("GREETING", "hi")], Duration::from_nanos(1), &[])
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Timeout { .. }), "unexpected error: {err}");

    runner.cleanup();
    report.assert_passed();
}

#[test(tokio::test(flavor = "multi_thread", worker_threads = 2))]
async fn test_failures_keep_partial_output() {
    let report = TestReport::new("greeter_failures");
    let runner = Runner::build(&report, harness::greeter_package())
        .await
        .expect("scratch dir");
    assert!(runner.built(), "build failed: {:?}", report.entries());

    let err = runner
        .run([("GREETING", "bye")], Duration::from_secs(5), &["--fail"])
        .await
        .unwrap_err();
    match &err {
        Error::ProcessFailed { status, output } => {
            assert_eq!(status.code(), Some(3));
            assert!(output.stdout.contains("bye, world"));
            assert!(output.stderr.contains("something went wrong"));
        }
        other => panic!("expected a process failure, got {other}"),
    }

    let err = runner
        .run([("GREETING", "wait")], Duration::from_millis(500), &["--hang"])
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Timeout { .. }));
    let output = err.output().expect("timeouts carry output");
    assert!(output.stdout.contains("wait, world"));

    runner.cleanup();
    report.assert_passed();
}

#[test(tokio::test)]
async fn test_broken_package_never_builds() -> anyhow::Result<()> {
    let package = tempfile::tempdir()?;
    fs::write(
        package.path().join("Cargo.toml"),
        "[package]\nname = \"broken\"\nversion = \"0.1.0\"\nedition = \"2021\"\n\n[workspace]\n",
    )?;
    fs::create_dir(package.path().join("src"))?;
    fs::write(package.path().join("src").join("main.rs"), "fn main() { nope }\n")?;

    let report = TestReport::new("broken");
    let runner = Runner::build(&report, package.path()).await?;

    assert!(!runner.built());
    assert!(report.failed());
    assert!(report.entries()[0].contains("cannot build sample"));

    let err = runner
        .run(std::iter::empty::<(&str, &str)>(), Duration::from_secs(1), &[])
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotBuilt));
    runner.cleanup();
    Ok(())
}
