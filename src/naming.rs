//! src/naming.rs
//!
//! Generates names for test-owned cloud resources and recognises them again
//! later. A managed name embeds a per-process counter and its creation time:
//! `<APP_PREFIX>_<namespace>_<kind><counter>_<unix-nanos>`.

use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, OnceLock,
    },
    time::{Duration, SystemTime, UNIX_EPOCH},
};

/// Every managed resource name starts with this.
pub const APP_PREFIX: &str = "rust_samples";

/// Managed resources older than this are deleted by the cleaners.
pub const EXPIRY: Duration = Duration::from_secs(60 * 60);

/// Source of unique, monotonically increasing ids.
pub trait IdSource: Send + Sync {
    fn next_id(&self) -> u64;
}

/// An `IdSource` backed by an atomic counter.
#[derive(Debug, Default)]
pub struct AtomicIdSource(AtomicU64);

impl AtomicIdSource {
    pub const fn new() -> Self {
        Self(AtomicU64::new(0))
    }
}

impl IdSource for AtomicIdSource {
    fn next_id(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed) + 1
    }
}

static PROCESS_IDS: OnceLock<Arc<AtomicIdSource>> = OnceLock::new();

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ResourceKind {
    Dataset,
    Table,
    Bucket,
    Object,
}

impl ResourceKind {
    fn as_str(self) -> &'static str {
        match self {
            ResourceKind::Dataset => "dataset",
            ResourceKind::Table => "table",
            ResourceKind::Bucket => "bucket",
            ResourceKind::Object => "object",
        }
    }
}

/// Hands out managed resource names.
#[derive(Clone)]
pub struct ResourceNamer {
    ids: Arc<dyn IdSource>,
}

impl ResourceNamer {
    pub fn new(ids: Arc<dyn IdSource>) -> Self {
        Self { ids }
    }

    /// A namer sharing the process-wide counter.
    pub fn process_wide() -> Self {
        let ids = PROCESS_IDS.get_or_init(|| Arc::new(AtomicIdSource::new()));
        Self::new(ids.clone())
    }

    pub fn next_dataset(&self, namespace: &str) -> String {
        self.next(namespace, ResourceKind::Dataset)
    }

    pub fn next_table(&self, namespace: &str) -> String {
        self.next(namespace, ResourceKind::Table)
    }

    pub fn next_bucket(&self, namespace: &str) -> String {
        self.next(namespace, ResourceKind::Bucket)
    }

    pub fn next_object(&self, namespace: &str) -> String {
        self.next(namespace, ResourceKind::Object)
    }

    fn next(&self, namespace: &str, kind: ResourceKind) -> String {
        let id = self.ids.next_id();
        managed_name(namespace, kind.as_str(), id, SystemTime::now())
    }
}

impl std::fmt::Debug for ResourceNamer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceNamer").finish_non_exhaustive()
    }
}

/// Formats a managed name with an explicit id and creation time.
pub fn managed_name(namespace: &str, kind: &str, id: u64, created: SystemTime) -> String {
    let nanos = created
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    format!("{APP_PREFIX}_{namespace}_{kind}{id}_{nanos}")
}

/// Recovers the creation time embedded in a managed resource name.
///
/// Returns `None` for names without `APP_PREFIX` or whose text after the last
/// `_` is not a base-10 `i64` of nanoseconds. Such names are never deleted
/// by age.
pub fn extract_time(name: &str) -> Option<SystemTime> {
    if !name.starts_with(APP_PREFIX) {
        return None;
    }
    let (_, suffix) = name.rsplit_once('_')?;
    let nanos: i64 = suffix.parse().ok()?;
    let offset = Duration::from_nanos(nanos.unsigned_abs());
    if nanos >= 0 {
        UNIX_EPOCH.checked_add(offset)
    } else {
        UNIX_EPOCH.checked_sub(offset)
    }
}

/// Whether `name` is a managed resource created more than `EXPIRY` before `now`.
pub fn is_expired(name: &str, now: SystemTime) -> bool {
    match (extract_time(name), now.checked_sub(EXPIRY)) {
        (Some(created), Some(cutoff)) => created < cutoff,
        _ => false,
    }
}

/// `<prefix>-<uuid>`, for buckets that are expired by their created time
/// rather than by a timestamp in the name.
pub fn unique_bucket_name(prefix: &str) -> String {
    format!("{}-{}", prefix, uuid::Uuid::new_v4())
}
