//! src/cloud/mod.rs
//!
//! The seams to the cloud services the cleaners talk to. Real SDK clients
//! are adapted to these traits by the caller; the in-memory versions in
//! `inmem` stand in for them in tests.

use futures::{stream, Stream, TryStreamExt};
use std::{future::Future, time::SystemTime};
use thiserror::Error;

pub mod inmem;

pub use inmem::{InMemoryDatasets, InMemoryStorage};

pub type ServiceResult<T> = std::result::Result<T, ServiceError>;

/// Errors reported by a collaborator service.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ServiceError {
    #[error("{0} does not exist")]
    NotFound(String),

    #[error("{0} already exists")]
    AlreadyExists(String),

    #[error("{0} is not empty")]
    NotEmpty(String),

    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("{0}")]
    Other(String),
}

impl ServiceError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ServiceError::NotFound(_))
    }
}

/// One page of a listing. A missing `next_page_token` means the listing is done.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next_page_token: Option<String>,
}

impl<T> Page<T> {
    pub fn last(items: Vec<T>) -> Self {
        Self {
            items,
            next_page_token: None,
        }
    }
}

/// Turns a page fetcher into a stream of items, following page tokens until
/// a page comes back without one. The first error ends the stream.
pub fn paginate<T, F, Fut>(mut fetch: F) -> impl Stream<Item = ServiceResult<T>>
where
    F: FnMut(Option<String>) -> Fut,
    Fut: Future<Output = ServiceResult<Page<T>>>,
{
    // `None` once the last page has been fetched.
    let first: Option<Option<String>> = Some(None);

    stream::try_unfold(first, move |token| {
        let pending = token.map(&mut fetch);
        async move {
            let Some(pending) = pending else {
                return Ok::<_, ServiceError>(None);
            };
            let page = pending.await?;
            Ok(Some((page.items, page.next_page_token.map(Some))))
        }
    })
    .map_ok(|items| stream::iter(items.into_iter().map(Ok::<T, ServiceError>)))
    .try_flatten()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketAttrs {
    pub name: String,
    pub created: SystemTime,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectAttrs {
    pub name: String,
    pub generation: i64,
    pub event_based_hold: bool,
    pub temporary_hold: bool,
}

impl ObjectAttrs {
    pub fn is_held(&self) -> bool {
        self.event_based_hold || self.temporary_hold
    }
}

/// The dataset operations the cleaners need from a warehouse service.
pub trait DatasetService: Clone + Send + Sync + 'static {
    fn list_datasets(
        &self,
        project_id: &str,
        page_token: Option<String>,
    ) -> impl Future<Output = ServiceResult<Page<String>>> + Send;

    fn delete_dataset(
        &self,
        project_id: &str,
        dataset_id: &str,
        delete_contents: bool,
    ) -> impl Future<Output = ServiceResult<()>> + Send;
}

/// The bucket and object operations the cleaners need from an object store.
pub trait StorageService: Clone + Send + Sync + 'static {
    fn list_buckets(
        &self,
        project_id: &str,
        prefix: Option<&str>,
        page_token: Option<String>,
    ) -> impl Future<Output = ServiceResult<Page<BucketAttrs>>> + Send;

    /// Fails with `ServiceError::NotFound` when the bucket does not exist.
    fn bucket_attrs(&self, bucket: &str) -> impl Future<Output = ServiceResult<BucketAttrs>> + Send;

    fn create_bucket(
        &self,
        project_id: &str,
        bucket: &str,
    ) -> impl Future<Output = ServiceResult<()>> + Send;

    fn delete_bucket(&self, bucket: &str) -> impl Future<Output = ServiceResult<()>> + Send;

    /// Lists live objects, or every generation when `versions` is set.
    fn list_objects(
        &self,
        bucket: &str,
        versions: bool,
        page_token: Option<String>,
    ) -> impl Future<Output = ServiceResult<Page<ObjectAttrs>>> + Send;

    fn release_object_holds(
        &self,
        bucket: &str,
        object: &str,
    ) -> impl Future<Output = ServiceResult<()>> + Send;

    /// Deletes one generation, or the live generation when `generation` is `None`.
    fn delete_object(
        &self,
        bucket: &str,
        object: &str,
        generation: Option<i64>,
    ) -> impl Future<Output = ServiceResult<()>> + Send;
}
