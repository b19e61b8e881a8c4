//! src/cloud/inmem.rs
//!
//! In-memory stand-ins for the dataset and storage services, with knobs for
//! injecting the failures the cleaners have to tolerate.

use super::{
    BucketAttrs, DatasetService, ObjectAttrs, Page, ServiceError, ServiceResult, StorageService,
};
use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    sync::{Arc, Mutex, MutexGuard},
    time::SystemTime,
};

const DEFAULT_PAGE_SIZE: usize = 50;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Slices `items` into the page addressed by `token` (an offset).
fn page_of<T: Clone>(items: &[T], token: Option<String>, page_size: usize) -> ServiceResult<Page<T>> {
    let start = match token {
        Some(token) => token
            .parse::<usize>()
            .map_err(|_| ServiceError::Other(format!("invalid page token {token:?}")))?,
        None => 0,
    };
    let end = (start + page_size.max(1)).min(items.len());
    let items_on_page = items.get(start..end).unwrap_or_default().to_vec();
    let next_page_token = (end < items.len()).then(|| end.to_string());
    Ok(Page {
        items: items_on_page,
        next_page_token,
    })
}

/// Consumes one injected failure for `key`, if any remain.
fn take_failure(failures: &mut HashMap<String, (u32, ServiceError)>, key: &str) -> Option<ServiceError> {
    let (remaining, error) = failures.get_mut(key)?;
    let error = error.clone();
    *remaining -= 1;
    if *remaining == 0 {
        failures.remove(key);
    }
    Some(error)
}

// --- Datasets ---

#[derive(Debug)]
struct DatasetsState {
    datasets: BTreeSet<(String, String)>,
    page_size: usize,
    listing_error: Option<ServiceError>,
    delete_failures: HashMap<String, (u32, ServiceError)>,
    deleted: Vec<String>,
}

/// A dataset service keeping `(project, dataset)` pairs in memory.
#[derive(Debug, Clone)]
pub struct InMemoryDatasets {
    state: Arc<Mutex<DatasetsState>>,
}

impl Default for InMemoryDatasets {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryDatasets {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(DatasetsState {
                datasets: BTreeSet::new(),
                page_size: DEFAULT_PAGE_SIZE,
                listing_error: None,
                delete_failures: HashMap::new(),
                deleted: Vec::new(),
            })),
        }
    }

    pub fn with_page_size(self, page_size: usize) -> Self {
        lock(&self.state).page_size = page_size;
        self
    }

    pub fn insert(&self, project_id: &str, dataset_id: &str) {
        lock(&self.state)
            .datasets
            .insert((project_id.to_string(), dataset_id.to_string()));
    }

    pub fn contains(&self, project_id: &str, dataset_id: &str) -> bool {
        lock(&self.state)
            .datasets
            .contains(&(project_id.to_string(), dataset_id.to_string()))
    }

    /// Every listing fails with `error` until cleared with `None`.
    pub fn set_listing_error(&self, error: Option<ServiceError>) {
        lock(&self.state).listing_error = error;
    }

    /// The next `times` deletes of `dataset_id` fail with `error`.
    pub fn fail_deletes(&self, dataset_id: &str, times: u32, error: ServiceError) {
        if times > 0 {
            lock(&self.state)
                .delete_failures
                .insert(dataset_id.to_string(), (times, error));
        }
    }

    /// Datasets deleted so far, in order.
    pub fn deleted(&self) -> Vec<String> {
        lock(&self.state).deleted.clone()
    }
}

impl DatasetService for InMemoryDatasets {
    async fn list_datasets(
        &self,
        project_id: &str,
        page_token: Option<String>,
    ) -> ServiceResult<Page<String>> {
        let state = lock(&self.state);
        if let Some(error) = &state.listing_error {
            return Err(error.clone());
        }
        let ids: Vec<String> = state
            .datasets
            .iter()
            .filter(|(project, _)| project == project_id)
            .map(|(_, id)| id.clone())
            .collect();
        page_of(&ids, page_token, state.page_size)
    }

    async fn delete_dataset(
        &self,
        project_id: &str,
        dataset_id: &str,
        _delete_contents: bool,
    ) -> ServiceResult<()> {
        let mut state = lock(&self.state);
        if let Some(error) = take_failure(&mut state.delete_failures, dataset_id) {
            return Err(error);
        }
        let key = (project_id.to_string(), dataset_id.to_string());
        if !state.datasets.remove(&key) {
            return Err(ServiceError::NotFound(format!("dataset {dataset_id}")));
        }
        state.deleted.push(dataset_id.to_string());
        Ok(())
    }
}

// --- Storage ---

#[derive(Debug)]
struct StoredBucket {
    project_id: String,
    created: SystemTime,
    // Keyed by (name, generation); the highest generation of a name is live.
    objects: BTreeMap<(String, i64), ObjectAttrs>,
}

#[derive(Debug)]
struct StorageState {
    buckets: BTreeMap<String, StoredBucket>,
    page_size: usize,
    next_generation: i64,
    bucket_listing_error: Option<ServiceError>,
    object_listing_errors: HashMap<String, ServiceError>,
    attrs_errors: HashMap<String, (u32, ServiceError)>,
    delete_failures: HashMap<String, (u32, ServiceError)>,
    // Deleted buckets that stay visible.
    lingering: BTreeSet<String>,
    creates: Vec<String>,
}

/// An object store keeping buckets and versioned objects in memory.
#[derive(Debug, Clone)]
pub struct InMemoryStorage {
    state: Arc<Mutex<StorageState>>,
}

impl Default for InMemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(StorageState {
                buckets: BTreeMap::new(),
                page_size: DEFAULT_PAGE_SIZE,
                next_generation: 1,
                bucket_listing_error: None,
                object_listing_errors: HashMap::new(),
                attrs_errors: HashMap::new(),
                delete_failures: HashMap::new(),
                lingering: BTreeSet::new(),
                creates: Vec::new(),
            })),
        }
    }

    pub fn with_page_size(self, page_size: usize) -> Self {
        lock(&self.state).page_size = page_size;
        self
    }

    pub fn insert_bucket(&self, project_id: &str, bucket: &str, created: SystemTime) {
        lock(&self.state).buckets.insert(
            bucket.to_string(),
            StoredBucket {
                project_id: project_id.to_string(),
                created,
                objects: BTreeMap::new(),
            },
        );
    }

    /// Writes a new generation of `object` and returns it.
    pub fn insert_object(&self, bucket: &str, object: &str) -> ServiceResult<i64> {
        let mut state = lock(&self.state);
        let generation = state.next_generation;
        state.next_generation += 1;
        let stored = state
            .buckets
            .get_mut(bucket)
            .ok_or_else(|| ServiceError::NotFound(format!("bucket {bucket}")))?;
        stored.objects.insert(
            (object.to_string(), generation),
            ObjectAttrs {
                name: object.to_string(),
                generation,
                event_based_hold: false,
                temporary_hold: false,
            },
        );
        Ok(generation)
    }

    /// Places holds on every generation of `object`.
    pub fn set_holds(&self, bucket: &str, object: &str, event_based: bool, temporary: bool) {
        if let Some(stored) = lock(&self.state).buckets.get_mut(bucket) {
            for attrs in stored.objects.values_mut().filter(|a| a.name == object) {
                attrs.event_based_hold = event_based;
                attrs.temporary_hold = temporary;
            }
        }
    }

    pub fn bucket_names(&self) -> Vec<String> {
        lock(&self.state).buckets.keys().cloned().collect()
    }

    pub fn contains_bucket(&self, bucket: &str) -> bool {
        lock(&self.state).buckets.contains_key(bucket)
    }

    /// Number of stored generations across all objects in `bucket`.
    pub fn object_count(&self, bucket: &str) -> usize {
        lock(&self.state)
            .buckets
            .get(bucket)
            .map(|b| b.objects.len())
            .unwrap_or_default()
    }

    /// Buckets created through `create_bucket`, in order.
    pub fn created(&self) -> Vec<String> {
        lock(&self.state).creates.clone()
    }

    pub fn set_bucket_listing_error(&self, error: Option<ServiceError>) {
        lock(&self.state).bucket_listing_error = error;
    }

    pub fn set_object_listing_error(&self, bucket: &str, error: ServiceError) {
        lock(&self.state)
            .object_listing_errors
            .insert(bucket.to_string(), error);
    }

    /// The next `times` reads of `bucket`'s attributes fail with `error`,
    /// whether or not the bucket exists.
    pub fn fail_attrs(&self, bucket: &str, times: u32, error: ServiceError) {
        if times > 0 {
            lock(&self.state)
                .attrs_errors
                .insert(bucket.to_string(), (times, error));
        }
    }

    /// Deleting `bucket` reports success, but the bucket never goes away.
    pub fn linger_after_delete(&self, bucket: &str) {
        lock(&self.state).lingering.insert(bucket.to_string());
    }

    /// The next `times` deletes of `key` fail with `error`. The key is a
    /// bucket name, or `bucket/object` for objects.
    pub fn fail_deletes(&self, key: &str, times: u32, error: ServiceError) {
        if times > 0 {
            lock(&self.state)
                .delete_failures
                .insert(key.to_string(), (times, error));
        }
    }
}

impl StorageService for InMemoryStorage {
    async fn list_buckets(
        &self,
        project_id: &str,
        prefix: Option<&str>,
        page_token: Option<String>,
    ) -> ServiceResult<Page<BucketAttrs>> {
        let state = lock(&self.state);
        if let Some(error) = &state.bucket_listing_error {
            return Err(error.clone());
        }
        let buckets: Vec<BucketAttrs> = state
            .buckets
            .iter()
            .filter(|(_, b)| b.project_id == project_id)
            .filter(|(name, _)| prefix.map_or(true, |p| name.starts_with(p)))
            .map(|(name, b)| BucketAttrs {
                name: name.clone(),
                created: b.created,
            })
            .collect();
        page_of(&buckets, page_token, state.page_size)
    }

    async fn bucket_attrs(&self, bucket: &str) -> ServiceResult<BucketAttrs> {
        let mut state = lock(&self.state);
        if let Some(error) = take_failure(&mut state.attrs_errors, bucket) {
            return Err(error);
        }
        state
            .buckets
            .get(bucket)
            .map(|b| BucketAttrs {
                name: bucket.to_string(),
                created: b.created,
            })
            .ok_or_else(|| ServiceError::NotFound(format!("bucket {bucket}")))
    }

    async fn create_bucket(&self, project_id: &str, bucket: &str) -> ServiceResult<()> {
        let mut state = lock(&self.state);
        if state.buckets.contains_key(bucket) {
            return Err(ServiceError::AlreadyExists(format!("bucket {bucket}")));
        }
        state.buckets.insert(
            bucket.to_string(),
            StoredBucket {
                project_id: project_id.to_string(),
                created: SystemTime::now(),
                objects: BTreeMap::new(),
            },
        );
        state.creates.push(bucket.to_string());
        Ok(())
    }

    async fn delete_bucket(&self, bucket: &str) -> ServiceResult<()> {
        let mut state = lock(&self.state);
        if let Some(error) = take_failure(&mut state.delete_failures, bucket) {
            return Err(error);
        }
        let empty = match state.buckets.get(bucket) {
            Some(stored) => stored.objects.is_empty(),
            None => return Err(ServiceError::NotFound(format!("bucket {bucket}"))),
        };
        if !empty {
            return Err(ServiceError::NotEmpty(format!("bucket {bucket}")));
        }
        if !state.lingering.contains(bucket) {
            state.buckets.remove(bucket);
        }
        Ok(())
    }

    async fn list_objects(
        &self,
        bucket: &str,
        versions: bool,
        page_token: Option<String>,
    ) -> ServiceResult<Page<ObjectAttrs>> {
        let state = lock(&self.state);
        if let Some(error) = state.object_listing_errors.get(bucket) {
            return Err(error.clone());
        }
        let stored = state
            .buckets
            .get(bucket)
            .ok_or_else(|| ServiceError::NotFound(format!("bucket {bucket}")))?;

        let mut objects: Vec<ObjectAttrs> = stored.objects.values().cloned().collect();
        if !versions {
            // Keys are ordered by (name, generation), so the live one is last per name.
            let mut live: BTreeMap<String, ObjectAttrs> = BTreeMap::new();
            for attrs in objects {
                live.insert(attrs.name.clone(), attrs);
            }
            objects = live.into_values().collect();
        }
        page_of(&objects, page_token, state.page_size)
    }

    async fn release_object_holds(&self, bucket: &str, object: &str) -> ServiceResult<()> {
        let mut state = lock(&self.state);
        let stored = state
            .buckets
            .get_mut(bucket)
            .ok_or_else(|| ServiceError::NotFound(format!("bucket {bucket}")))?;
        let mut found = false;
        for attrs in stored.objects.values_mut().filter(|a| a.name == object) {
            attrs.event_based_hold = false;
            attrs.temporary_hold = false;
            found = true;
        }
        if found {
            Ok(())
        } else {
            Err(ServiceError::NotFound(format!("object {bucket}/{object}")))
        }
    }

    async fn delete_object(
        &self,
        bucket: &str,
        object: &str,
        generation: Option<i64>,
    ) -> ServiceResult<()> {
        let mut state = lock(&self.state);
        if let Some(error) = take_failure(&mut state.delete_failures, &format!("{bucket}/{object}")) {
            return Err(error);
        }
        let stored = state
            .buckets
            .get_mut(bucket)
            .ok_or_else(|| ServiceError::NotFound(format!("bucket {bucket}")))?;

        let generation = match generation {
            Some(generation) => generation,
            None => stored
                .objects
                .keys()
                .filter(|(name, _)| name == object)
                .map(|(_, generation)| *generation)
                .max()
                .ok_or_else(|| ServiceError::NotFound(format!("object {bucket}/{object}")))?,
        };
        let key = (object.to_string(), generation);
        let held = match stored.objects.get(&key) {
            Some(attrs) => attrs.is_held(),
            None => {
                return Err(ServiceError::NotFound(format!(
                    "object {bucket}/{object}#{generation}"
                )))
            }
        };
        if held {
            return Err(ServiceError::Other(format!(
                "object {bucket}/{object} is under hold"
            )));
        }
        stored.objects.remove(&key);
        Ok(())
    }
}
