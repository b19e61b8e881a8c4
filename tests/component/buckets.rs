//! tests/component/buckets.rs
//!
//! Bucket cleanup and bucket preconditions against the in-memory store.

use crate::common::harness::{self, hours, minutes, name_aged, PROJECT};
use sample_harness::{
    cleanup::{
        buckets_must_exist, clean_bucket, cleanup_buckets, create_test_bucket,
        delete_bucket_if_exists, delete_expired_buckets, wait_for_bucket_to_exist,
    },
    cloud::{InMemoryStorage, ServiceError},
    Error, TestReport,
};
use std::time::SystemTime;
use test_log::test;

fn storage_with(buckets: &[(&str, SystemTime)]) -> InMemoryStorage {
    let storage = InMemoryStorage::new();
    for (name, created) in buckets {
        storage.insert_bucket(PROJECT, name, *created);
    }
    storage
}

#[test(tokio::test)]
async fn test_expired_buckets_are_emptied_then_deleted() {
    let old = name_aged("bucket", 1, hours(2));
    let fresh = name_aged("bucket", 2, minutes(10));
    let storage = storage_with(&[
        (old.as_str(), SystemTime::now()),
        (fresh.as_str(), SystemTime::now()),
    ]);
    storage.insert_object(&old, "a.txt").unwrap();
    storage.insert_object(&old, "b.txt").unwrap();
    storage.insert_object(&fresh, "keep.txt").unwrap();
    let report = TestReport::new("expired_buckets");

    cleanup_buckets(&report, &storage, &harness::context(), &[])
        .await
        .unwrap();

    report.assert_passed();
    assert_eq!(storage.bucket_names(), vec![fresh.clone()]);
    assert_eq!(storage.object_count(&fresh), 1);
}

#[test(tokio::test)]
async fn test_unlistable_bucket_is_skipped() {
    let skipped = name_aged("bucket", 1, hours(2));
    let deleted = name_aged("bucket", 2, hours(2));
    let storage = storage_with(&[
        (skipped.as_str(), SystemTime::now()),
        (deleted.as_str(), SystemTime::now()),
    ]);
    storage.set_object_listing_error(&skipped, ServiceError::Unavailable("listing".into()));
    let report = TestReport::new("unlistable_bucket");

    cleanup_buckets(&report, &storage, &harness::context(), &["explicit-missing-ok"])
        .await
        .unwrap_or_else(|e| panic!("cleanup failed: {e}"));

    assert!(storage.contains_bucket(&skipped));
    assert!(!storage.contains_bucket(&deleted));
    assert!(report
        .entries()
        .iter()
        .any(|e| e.contains(&format!("Cannot iterate objects (bucket={skipped})"))));
}

#[test(tokio::test)]
async fn test_bucket_listing_error_aborts() {
    let storage = storage_with(&[("explicit", SystemTime::now())]);
    storage.set_bucket_listing_error(Some(ServiceError::Other("denied".into())));
    let report = TestReport::new("bucket_listing_error");

    let result = cleanup_buckets(&report, &storage, &harness::context(), &["explicit"]).await;

    assert!(matches!(result, Err(Error::Service(ServiceError::Other(_)))));
    assert!(report.failed());
    assert!(storage.contains_bucket("explicit"));
}

#[test(tokio::test(start_paused = true))]
async fn test_flaky_object_delete_is_retried() {
    let old = name_aged("bucket", 1, hours(2));
    let storage = storage_with(&[(old.as_str(), SystemTime::now())]);
    storage.insert_object(&old, "flaky.txt").unwrap();
    storage.fail_deletes(
        &format!("{old}/flaky.txt"),
        3,
        ServiceError::Unavailable("try later".into()),
    );
    let report = TestReport::new("flaky_object");

    cleanup_buckets(&report, &storage, &harness::context(), &[])
        .await
        .unwrap();

    report.assert_passed();
    assert!(storage.bucket_names().is_empty());
}

#[test(tokio::test(start_paused = true))]
async fn test_stuck_bucket_does_not_block_the_rest() {
    let stuck = name_aged("bucket", 1, hours(2));
    let other = name_aged("bucket", 2, hours(2));
    let storage = storage_with(&[
        (stuck.as_str(), SystemTime::now()),
        (other.as_str(), SystemTime::now()),
    ]);
    storage.insert_object(&other, "a.txt").unwrap();
    storage.fail_deletes(&stuck, u32::MAX, ServiceError::Unavailable("stuck".into()));
    let report = TestReport::new("stuck_bucket");

    cleanup_buckets(&report, &storage, &harness::context(), &[])
        .await
        .unwrap_or_else(|e| panic!("cleanup failed: {e}"));

    assert_eq!(storage.bucket_names(), vec![stuck.clone()]);
    assert!(report.failed());
    let entries = report.entries();
    assert_eq!(entries.len(), 1);
    assert!(entries[0].starts_with("Attempt 10: FAIL"));
    assert!(entries[0].contains(&format!("cannot clean up bucket (bucket={stuck})")));
}

#[test(tokio::test)]
async fn test_buckets_must_exist_is_idempotent() {
    let storage = storage_with(&[("already-there", SystemTime::now())]);
    let report = TestReport::new("must_exist");
    let ctx = harness::context();

    buckets_must_exist(&report, &storage, &ctx, &["already-there", "fresh-bucket"])
        .await
        .unwrap();
    buckets_must_exist(&report, &storage, &ctx, &["fresh-bucket"])
        .await
        .unwrap();

    report.assert_passed();
    assert_eq!(storage.created(), vec!["fresh-bucket".to_string()]);
    assert!(storage.contains_bucket("already-there"));
}

#[test(tokio::test)]
async fn test_unexpected_attrs_error_is_a_failed_precondition() {
    let storage = InMemoryStorage::new();
    storage.fail_attrs("broken", u32::MAX, ServiceError::Unavailable("timeout".into()));
    let report = TestReport::new("precondition");

    let result =
        buckets_must_exist(&report, &storage, &harness::context(), &["broken", "after"]).await;

    assert!(matches!(result, Err(Error::Precondition(_))));
    assert!(report.failed());
    assert!(storage.created().is_empty());
}

#[test(tokio::test(start_paused = true))]
async fn test_clean_bucket_recreates_an_empty_bucket() {
    let storage = storage_with(&[("reused", SystemTime::now())]);
    storage.insert_object("reused", "old.txt").unwrap();
    storage.insert_object("reused", "old.txt").unwrap();
    storage.insert_object("reused", "held.txt").unwrap();
    storage.set_holds("reused", "held.txt", false, true);
    let report = TestReport::new("clean_bucket");

    clean_bucket(&report, &storage, &harness::context(), "reused")
        .await
        .unwrap();

    report.assert_passed();
    assert!(storage.contains_bucket("reused"));
    assert_eq!(storage.object_count("reused"), 0);
    assert_eq!(storage.created(), vec!["reused".to_string()]);
}

#[test(tokio::test)]
async fn test_create_test_bucket_uses_prefix() -> anyhow::Result<()> {
    let storage = InMemoryStorage::new();
    let report = TestReport::new("create_test_bucket");

    let bucket = create_test_bucket(&report, &storage, &harness::context(), "golden").await?;

    report.assert_passed();
    assert!(bucket.starts_with("golden-"));
    assert!(storage.contains_bucket(&bucket));
    Ok(())
}

#[test(tokio::test)]
async fn test_delete_bucket_if_exists_ignores_missing_bucket() -> anyhow::Result<()> {
    let storage = InMemoryStorage::new();
    delete_bucket_if_exists(&storage, "nothing-here").await?;
    assert!(storage.bucket_names().is_empty());
    Ok(())
}

#[test(tokio::test)]
async fn test_delete_expired_buckets_uses_created_time() -> anyhow::Result<()> {
    let now = SystemTime::now();
    let storage = storage_with(&[
        ("golden-old", now - hours(3)),
        ("golden-young", now - minutes(5)),
        ("other-old", now - hours(3)),
    ]);
    storage.insert_object("golden-old", "leftover.txt")?;

    delete_expired_buckets(&storage, PROJECT, "golden-", hours(1)).await?;

    assert_eq!(
        storage.bucket_names(),
        vec!["golden-young".to_string(), "other-old".to_string()]
    );
    Ok(())
}

#[test(tokio::test(start_paused = true))]
async fn test_delete_bucket_if_exists_gives_up_on_lingering_bucket() {
    let storage = storage_with(&[("sticky", SystemTime::now())]);
    storage.insert_object("sticky", "a.txt").unwrap();
    storage.linger_after_delete("sticky");

    let result = delete_bucket_if_exists(&storage, "sticky").await;

    assert!(matches!(result, Err(Error::BucketStillExists(ref b)) if b == "sticky"));
    assert_eq!(storage.object_count("sticky"), 0);
}

#[test(tokio::test(start_paused = true))]
async fn test_clean_bucket_deletes_bucket_that_reappears_on_create() {
    let storage = storage_with(&[("hidden", SystemTime::now())]);
    storage.insert_object("hidden", "old.txt").unwrap();
    // The first existence check misses the bucket, so creating it collides.
    storage.fail_attrs("hidden", 1, ServiceError::Unavailable("flaky".into()));
    let report = TestReport::new("clean_bucket_collision");

    clean_bucket(&report, &storage, &harness::context(), "hidden")
        .await
        .unwrap();

    report.assert_passed();
    assert!(storage.contains_bucket("hidden"));
    assert_eq!(storage.object_count("hidden"), 0);
    assert_eq!(storage.created(), vec!["hidden".to_string()]);
}

#[test(tokio::test(start_paused = true))]
async fn test_wait_for_missing_bucket_fails_the_report() {
    let storage = InMemoryStorage::new();
    let report = TestReport::new("wait_for_bucket");

    let found = wait_for_bucket_to_exist(&report, &storage, "never-created").await;

    assert!(!found);
    assert!(report.failed());
    assert!(report.entries()[0].starts_with("Attempt 10: FAIL"));
}
