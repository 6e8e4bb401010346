//! Idempotent bucket creation.

use tokio_util::sync::CancellationToken;

use crate::store::{CreateBucketOutcome, ObjectStore, StoreError};

/// Errors ensuring a bucket exists.
#[derive(Debug, thiserror::Error)]
pub enum ProvisionError {
    /// The store rejected the existence check or the creation.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Cancelled before the bucket was confirmed.
    #[error("Provisioning of bucket {bucket} was cancelled")]
    Cancelled {
        /// Bucket name.
        bucket: String,
    },
}

/// What [`ensure_bucket`] found or did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BucketStatus {
    /// The bucket was already there.
    Existing,
    /// This call created it.
    Created,
}

/// Makes sure `bucket` exists, creating it if needed.
///
/// Safe to call repeatedly. A creation that races with another creator
/// counts as success.
///
/// # Errors
///
/// Returns [`ProvisionError`] if the bucket cannot be checked or created, or
/// `cancel` fires first.
pub async fn ensure_bucket(
    store: &dyn ObjectStore,
    bucket: &str,
    cancel: &CancellationToken,
) -> Result<BucketStatus, ProvisionError> {
    let cancelled = || ProvisionError::Cancelled {
        bucket: bucket.to_string(),
    };

    let exists = tokio::select! {
        biased;
        () = cancel.cancelled() => return Err(cancelled()),
        exists = store.head_bucket(bucket) => exists?,
    };
    if exists {
        log::debug!("Bucket {bucket} exists");
        return Ok(BucketStatus::Existing);
    }

    let outcome = tokio::select! {
        biased;
        () = cancel.cancelled() => return Err(cancelled()),
        outcome = store.create_bucket(bucket) => outcome?,
    };
    match outcome {
        CreateBucketOutcome::Created => {
            log::info!("Created bucket {bucket}");
            Ok(BucketStatus::Created)
        }
        CreateBucketOutcome::AlreadyExists => {
            log::debug!("Bucket {bucket} was created concurrently");
            Ok(BucketStatus::Existing)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;

    #[tokio::test]
    async fn creates_missing_bucket_once() {
        let store = MemoryStore::new();
        let cancel = CancellationToken::new();

        assert_eq!(
            ensure_bucket(&store, "b", &cancel).await.unwrap(),
            BucketStatus::Created
        );
        assert_eq!(
            ensure_bucket(&store, "b", &cancel).await.unwrap(),
            BucketStatus::Existing
        );
        assert_eq!(store.stats().create_bucket_calls, 1);
    }

    #[tokio::test]
    async fn concurrent_creation_counts_as_success() {
        let store = MemoryStore::new();
        store.hide_bucket_from_head("b");
        store.insert_bucket("b");

        assert_eq!(
            ensure_bucket(&store, "b", &CancellationToken::new())
                .await
                .unwrap(),
            BucketStatus::Existing
        );
    }

    #[tokio::test]
    async fn cancelled_before_start() {
        let store = MemoryStore::new();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = ensure_bucket(&store, "b", &cancel).await.unwrap_err();
        assert!(matches!(err, ProvisionError::Cancelled { .. }));
        assert_eq!(store.stats().create_bucket_calls, 0);
    }

    #[tokio::test]
    async fn creation_failure_is_fatal() {
        let store = MemoryStore::new();
        store.fail_bucket_creation();

        let err = ensure_bucket(&store, "b", &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ProvisionError::Store(StoreError::CreateBucket { .. })
        ));
    }
}
