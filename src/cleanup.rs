//! src/cleanup.rs
//!
//! The resource cleaner. Deletes datasets and buckets left behind by earlier
//! test runs (anything managed and older than `EXPIRY`) plus any the caller
//! names explicitly, and makes sure the buckets a test depends on exist.

use crate::{
    cloud::{paginate, DatasetService, ObjectAttrs, ServiceError, StorageService},
    config::TestContext,
    error::{Error, Result},
    naming::{is_expired, unique_bucket_name},
    report::TestReport,
    retry::retry,
};
use futures::TryStreamExt;
use std::{
    collections::HashSet,
    time::{Duration, SystemTime},
};

const DELETE_ATTEMPTS: u32 = 10;
const DATASET_DELETE_DELAY: Duration = Duration::from_secs(10);
const STORAGE_DELETE_DELAY: Duration = Duration::from_secs(1);

const CREATE_ATTEMPTS: u32 = 10;
const BUCKET_CREATE_DELAY: Duration = Duration::from_secs(30);

const BUCKET_GONE_POLLS: u32 = 10;
const BUCKET_GONE_DELAY: Duration = Duration::from_secs(10);

/// Keeps the names of managed resources that expired before `now`.
pub fn select_expired<I>(names: I, now: SystemTime) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    names
        .into_iter()
        .filter(|name| is_expired(name, now))
        .collect()
}

// --- Datasets ---

/// Deletes `names` and every expired managed dataset in the project.
///
/// A listing error aborts before anything is deleted. A dataset that still
/// cannot be deleted after retrying fails the report but does not stop the
/// remaining deletions.
pub async fn cleanup_datasets<C: DatasetService>(
    report: &TestReport,
    client: &C,
    ctx: &TestContext,
    names: &[&str],
) -> Result<()> {
    let mut all: HashSet<String> = names.iter().map(|n| n.to_string()).collect();

    let listed: Vec<String> =
        match paginate(|token| client.list_datasets(&ctx.project_id, token))
            .try_collect()
            .await
        {
            Ok(listed) => listed,
            Err(e) => {
                report.error(format!("Cannot list datasets (project={}): {e}", ctx.project_id));
                return Err(e.into());
            }
        };
    all.extend(select_expired(listed, SystemTime::now()));

    tracing::info!(project = %ctx.project_id, count = all.len(), "Cleaning up datasets");
    for dataset in &all {
        delete_dataset(report, client, &ctx.project_id, dataset).await;
    }
    Ok(())
}

async fn delete_dataset<C: DatasetService>(
    report: &TestReport,
    client: &C,
    project_id: &str,
    dataset: &str,
) -> bool {
    let deleted = retry(report, DELETE_ATTEMPTS, DATASET_DELETE_DELAY, |attempt| {
        let client = client.clone();
        let project_id = project_id.to_string();
        let dataset = dataset.to_string();
        async move {
            match client.delete_dataset(&project_id, &dataset, true).await {
                Ok(()) => {}
                Err(ServiceError::NotFound(_)) => {
                    attempt.log(format!("dataset {dataset} is already gone"));
                }
                Err(e) => attempt.error(format!("cannot clean up dataset {dataset}: {e}")),
            }
            Ok(())
        }
    })
    .await;

    if !deleted {
        tracing::warn!(dataset, "Giving up on dataset; the next cleanup will retry it");
    }
    deleted
}

// --- Buckets ---

/// Deletes `names` and every expired managed bucket in the project, emptying
/// each bucket first.
///
/// A bucket listing error aborts the whole cleanup. An object listing error
/// only skips that bucket; it stays around until a later run expires it.
pub async fn cleanup_buckets<C: StorageService>(
    report: &TestReport,
    client: &C,
    ctx: &TestContext,
    names: &[&str],
) -> Result<()> {
    let mut all: HashSet<String> = names.iter().map(|n| n.to_string()).collect();

    let listed: Vec<String> =
        match paginate(|token| client.list_buckets(&ctx.project_id, None, token))
            .map_ok(|attrs| attrs.name)
            .try_collect()
            .await
        {
            Ok(listed) => listed,
            Err(e) => {
                report.error(format!("Cannot list buckets (project={}): {e}", ctx.project_id));
                return Err(e.into());
            }
        };
    all.extend(select_expired(listed, SystemTime::now()));

    tracing::info!(project = %ctx.project_id, count = all.len(), "Cleaning up buckets");
    for bucket in &all {
        let objects: Vec<ObjectAttrs> =
            match paginate(|token| client.list_objects(bucket, false, token))
                .try_collect()
                .await
            {
                Ok(objects) => objects,
                Err(e) => {
                    report.log(format!("Cannot iterate objects (bucket={bucket}): {e}"));
                    continue;
                }
            };

        for object in &objects {
            delete_object(report, client, bucket, &object.name).await;
        }
        delete_bucket(report, client, bucket).await;
    }
    Ok(())
}

async fn delete_object<C: StorageService>(
    report: &TestReport,
    client: &C,
    bucket: &str,
    object: &str,
) -> bool {
    retry(report, DELETE_ATTEMPTS, STORAGE_DELETE_DELAY, |attempt| {
        let client = client.clone();
        let bucket = bucket.to_string();
        let object = object.to_string();
        async move {
            if let Err(e) = client.delete_object(&bucket, &object, None).await {
                attempt.error(format!(
                    "cannot clean up object (bucket={bucket}, object={object}): {e}"
                ));
            }
            Ok(())
        }
    })
    .await
}

async fn delete_bucket<C: StorageService>(report: &TestReport, client: &C, bucket: &str) -> bool {
    retry(report, DELETE_ATTEMPTS, STORAGE_DELETE_DELAY, |attempt| {
        let client = client.clone();
        let bucket = bucket.to_string();
        async move {
            if let Err(e) = client.delete_bucket(&bucket).await {
                attempt.error(format!("cannot clean up bucket (bucket={bucket}): {e}"));
            }
            Ok(())
        }
    })
    .await
}

/// Makes sure every bucket in `names` exists, creating the missing ones.
///
/// Any error other than "bucket does not exist" is a failed precondition: it
/// is reported and returned right away, before the remaining names are checked.
pub async fn buckets_must_exist<C: StorageService>(
    report: &TestReport,
    client: &C,
    ctx: &TestContext,
    names: &[&str],
) -> Result<()> {
    for &bucket in names {
        let ensured = match client.bucket_attrs(bucket).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_not_found() => {
                tracing::info!(bucket, project = %ctx.project_id, "Creating missing bucket");
                client.create_bucket(&ctx.project_id, bucket).await
            }
            Err(e) => Err(e),
        };

        if let Err(e) = ensured {
            let message = format!("bucket ensuring failed (bucket={bucket}): {e}");
            report.error(&message);
            return Err(Error::Precondition(message));
        }
    }
    Ok(())
}

/// Deletes `bucket` and every generation of every object in it, releasing
/// holds where needed, then waits for the deletion to become visible.
/// Succeeds without doing anything when the bucket cannot be read.
pub async fn delete_bucket_if_exists<C: StorageService>(client: &C, bucket: &str) -> Result<()> {
    if client.bucket_attrs(bucket).await.is_err() {
        return Ok(());
    }

    let objects: Vec<ObjectAttrs> = paginate(|token| client.list_objects(bucket, true, token))
        .try_collect()
        .await
        .inspect_err(|e| tracing::warn!(bucket, error = %e, "Cannot list objects"))?;

    for object in &objects {
        if object.is_held() {
            client
                .release_object_holds(bucket, &object.name)
                .await
                .inspect_err(|e| {
                    tracing::warn!(bucket, object = %object.name, error = %e, "Cannot release holds")
                })?;
        }
        client
            .delete_object(bucket, &object.name, Some(object.generation))
            .await
            .inspect_err(|e| {
                tracing::warn!(bucket, object = %object.name, error = %e, "Cannot delete object")
            })?;
    }

    client.delete_bucket(bucket).await?;

    // Deletion takes a while to propagate.
    for _ in 0..BUCKET_GONE_POLLS {
        if client.bucket_attrs(bucket).await.is_err() {
            return Ok(());
        }
        tokio::time::sleep(BUCKET_GONE_DELAY).await;
    }
    Err(Error::BucketStillExists(bucket.to_string()))
}

/// Waits until `bucket` is readable. Returns `false` (and fails the report)
/// if it never shows up.
pub async fn wait_for_bucket_to_exist<C: StorageService>(
    report: &TestReport,
    client: &C,
    bucket: &str,
) -> bool {
    retry(report, CREATE_ATTEMPTS, BUCKET_CREATE_DELAY, |attempt| {
        let client = client.clone();
        let bucket = bucket.to_string();
        async move {
            if client.bucket_attrs(&bucket).await.is_err() {
                return Err(attempt.retry_now());
            }
            Ok(())
        }
    })
    .await
}

/// Creates `bucket` from scratch, deleting any existing bucket of that name
/// along with its contents.
pub async fn clean_bucket<C: StorageService>(
    report: &TestReport,
    client: &C,
    ctx: &TestContext,
    bucket: &str,
) -> Result<()> {
    delete_bucket_if_exists(client, bucket).await?;

    // The old bucket can take a while to disappear.
    let created = retry(report, CREATE_ATTEMPTS, BUCKET_CREATE_DELAY, |attempt| {
        let client = client.clone();
        let project_id = ctx.project_id.clone();
        let bucket = bucket.to_string();
        async move {
            if let Err(e) = client.create_bucket(&project_id, &bucket).await {
                if let ServiceError::AlreadyExists(_) = e {
                    if let Err(e) = delete_bucket_if_exists(&client, &bucket).await {
                        tracing::warn!(bucket = %bucket, error = %e, "Cannot delete leftover bucket");
                    }
                }
                attempt.error(format!("create bucket {bucket}: {e}"));
            }
            Ok(())
        }
    })
    .await;

    if !created {
        return Err(Error::Precondition(format!("cannot create bucket {bucket}")));
    }
    wait_for_bucket_to_exist(report, client, bucket).await;
    Ok(())
}

/// Creates a fresh bucket named `<prefix>-<uuid>` and returns its name.
pub async fn create_test_bucket<C: StorageService>(
    report: &TestReport,
    client: &C,
    ctx: &TestContext,
    prefix: &str,
) -> Result<String> {
    let bucket = unique_bucket_name(prefix);
    clean_bucket(report, client, ctx, &bucket).await?;
    Ok(bucket)
}

/// Deletes buckets under `prefix` that were created more than `expire_age` ago.
/// Stops at the first error.
pub async fn delete_expired_buckets<C: StorageService>(
    client: &C,
    project_id: &str,
    prefix: &str,
    expire_age: Duration,
) -> Result<()> {
    let buckets: Vec<_> = paginate(|token| client.list_buckets(project_id, Some(prefix), token))
        .try_collect()
        .await?;

    let now = SystemTime::now();
    for bucket in buckets {
        let age = now.duration_since(bucket.created).unwrap_or_default();
        if age > expire_age {
            tracing::info!(bucket = %bucket.name, ?age, ?expire_age, "Deleting expired bucket");
            delete_bucket_if_exists(client, &bucket.name).await?;
        }
    }
    Ok(())
}
