//! src/retry.rs
//!
//! The retry runner. Runs a probe up to a bounded number of times, one tokio
//! task per attempt, to absorb eventual-consistency delays in external
//! services during tests.

use crate::report::{format_entry, TestReport};
use std::{
    fmt,
    future::Future,
    panic::Location,
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

/// Returned by the `*_now` helpers. A probe ends its attempt early by
/// returning it as `Err(Halt)`, usually through `?`.
#[must_use = "return it as `Err(Halt)` to end the attempt"]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Halt;

/// What a probe returns. `Ok(())` means the probe ran to completion; the
/// attempt's flags decide whether that completion counts as a success.
pub type AttemptResult = std::result::Result<(), Halt>;

#[derive(Debug, Default)]
struct AttemptState {
    log: Vec<String>,
    retry: bool,
    fail: bool,
}

/// Handle given to the probe for a single attempt.
///
/// Cloning is cheap; every clone refers to the same attempt.
#[derive(Debug, Clone)]
pub struct Attempt {
    index: u32,
    state: Arc<Mutex<AttemptState>>,
}

impl Attempt {
    fn new(index: u32) -> Self {
        Self {
            index,
            state: Arc::new(Mutex::new(AttemptState::default())),
        }
    }

    /// The 1-based index of this attempt.
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Asks for another attempt but keeps executing this one.
    pub fn retry(&self) {
        self.lock().retry = true;
    }

    /// Asks for another attempt and ends this one.
    pub fn retry_now(&self) -> Halt {
        self.retry();
        Halt
    }

    /// Marks this attempt as a hard failure but keeps executing it.
    pub fn fail(&self) {
        self.lock().fail = true;
    }

    /// Marks this attempt as a hard failure and ends it.
    pub fn fail_now(&self) -> Halt {
        self.fail();
        Halt
    }

    /// Buffers a message. It is only written to the test report if the
    /// attempt's outcome gets reported.
    #[track_caller]
    pub fn log(&self, message: impl fmt::Display) {
        let entry = format_entry(Location::caller(), &message);
        self.lock().log.push(entry);
    }

    /// Logs a transient error and asks for another attempt.
    #[track_caller]
    pub fn error(&self, message: impl fmt::Display) {
        let entry = format_entry(Location::caller(), &message);
        let mut state = self.lock();
        state.log.push(entry);
        state.retry = true;
    }

    /// Logs a non-retryable error and ends the attempt as a hard failure.
    #[track_caller]
    pub fn fatal(&self, message: impl fmt::Display) -> Halt {
        let entry = format_entry(Location::caller(), &message);
        let mut state = self.lock();
        state.log.push(entry);
        state.fail = true;
        Halt
    }

    fn lock(&self) -> MutexGuard<'_, AttemptState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Runs `probe` up to `max_attempts` times, sleeping `sleep` between attempts.
///
/// Returns `true` as soon as an attempt neither asked for a retry nor failed.
/// A hard failure writes the attempt's log to `report` and marks it failed;
/// the loop only goes on if that attempt also asked for a retry. Returns
/// `false` after a hard failure without a retry, or once the attempts are
/// exhausted (which also fails the report). `max_attempts` of zero is
/// treated as one.
pub async fn retry<F, Fut>(
    report: &TestReport,
    max_attempts: u32,
    sleep: Duration,
    mut probe: F,
) -> bool
where
    F: FnMut(Attempt) -> Fut,
    Fut: Future<Output = AttemptResult> + Send + 'static,
{
    let max_attempts = max_attempts.max(1);

    for index in 1..=max_attempts {
        let attempt = Attempt::new(index);
        let task = tokio::spawn(probe(attempt.clone()));

        // The join handle is the completion signal; flags are only read after it.
        if let Err(e) = task.await {
            let mut state = attempt.lock();
            state.log.push(format!("probe ended abnormally: {e}"));
            state.fail = true;
        }

        let state = std::mem::take(&mut *attempt.lock());

        if !state.retry && !state.fail {
            if !state.log.is_empty() {
                report.push(summarize(index, "SUCCESS", &state.log));
            }
            tracing::debug!(test = %report.name(), attempt = index, "Probe succeeded");
            return true;
        }

        let last = index == max_attempts;
        if state.fail || last {
            report.push(summarize(index, "FAIL", &state.log));
            report.fail();
        }

        // A hard failure still gets another attempt if the probe also asked for one.
        if !state.retry || last {
            tracing::warn!(
                test = %report.name(),
                attempt = index,
                hard_failure = state.fail,
                "Giving up on probe"
            );
            return false;
        }

        tracing::debug!(test = %report.name(), attempt = index, ?sleep, "Probe asked for a retry");
        tokio::time::sleep(sleep).await;
    }

    false
}

fn summarize(index: u32, outcome: &str, log: &[String]) -> String {
    let mut summary = format!("Attempt {index}: {outcome}");
    for line in log {
        summary.push_str("\n    ");
        summary.push_str(line);
    }
    summary
}
