//! src/report.rs
//!
//! Defines `TestReport`, the log a test accumulates while it drives the
//! harness. Entries are prefixed with the `file:line` of the call site and
//! mirrored to `tracing`, and any error marks the whole report as failed.

use std::{
    fmt,
    panic::Location,
    path::Path,
    sync::{
        atomic::{AtomicBool, Ordering},
        Mutex, MutexGuard,
    },
};

/// The enclosing test's log and pass/fail state.
///
/// A report is shared by reference between the test body and every harness
/// call it makes. Marking it failed never stops the test; callers decide when
/// to stop by checking `failed()` or calling `assert_passed()`.
#[derive(Debug)]
pub struct TestReport {
    name: String,
    entries: Mutex<Vec<String>>,
    failed: AtomicBool,
}

impl TestReport {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entries: Mutex::new(Vec::new()),
            failed: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Appends an entry to the log.
    #[track_caller]
    pub fn log(&self, message: impl fmt::Display) {
        let entry = format_entry(Location::caller(), &message);
        tracing::info!(test = %self.name, "{entry}");
        self.push(entry);
    }

    /// Appends an entry to the log and marks the test as failed.
    #[track_caller]
    pub fn error(&self, message: impl fmt::Display) {
        let entry = format_entry(Location::caller(), &message);
        tracing::error!(test = %self.name, "{entry}");
        self.push(entry);
        self.fail();
    }

    /// Marks the test as failed without logging anything.
    pub fn fail(&self) {
        self.failed.store(true, Ordering::SeqCst);
    }

    pub fn failed(&self) -> bool {
        self.failed.load(Ordering::SeqCst)
    }

    /// A snapshot of every entry logged so far, in order.
    pub fn entries(&self) -> Vec<String> {
        self.lock().clone()
    }

    /// Panics with the full log if the test has been marked as failed.
    #[track_caller]
    pub fn assert_passed(&self) {
        if self.failed() {
            panic!("{} failed:\n{}", self.name, self.lock().join("\n"));
        }
    }

    /// Appends a pre-formatted entry, keeping whatever location it already carries.
    pub(crate) fn push(&self, entry: String) {
        self.lock().push(entry);
    }

    fn lock(&self) -> MutexGuard<'_, Vec<String>> {
        // A panicking writer cannot leave a half-pushed entry behind.
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Formats `message` as `file:line: message`, keeping only the file name.
pub(crate) fn format_entry(location: &Location<'_>, message: &dyn fmt::Display) -> String {
    let file = Path::new(location.file())
        .file_name()
        .and_then(|f| f.to_str())
        .unwrap_or_else(|| location.file());
    format!("{}:{}: {}", file, location.line(), message)
}
