//! Object store capability consumed by the sync engine.
//!
//! [`ObjectStore`] is the narrow surface the scheduler needs from an
//! S3-compatible backend. [`crate::s3::S3Store`] implements it over the AWS
//! SDK and [`crate::memory::MemoryStore`] implements it in-process.

use std::collections::HashMap;
use std::path::Path;

use bucket_sync_models::DIGEST_METADATA_KEY;

/// Boxed error from the underlying transport.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors returned by [`ObjectStore`] operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Missing required environment variable.
    #[error("Missing environment variable: {name}")]
    MissingEnv {
        /// Name of the missing environment variable.
        name: String,
    },

    /// `HeadBucket` failed for a reason other than "not found".
    #[error("Failed to head bucket s3://{bucket}: {source}")]
    HeadBucket {
        /// Bucket name.
        bucket: String,
        /// Underlying SDK error.
        source: BoxError,
    },

    /// `CreateBucket` failed.
    #[error("Failed to create bucket s3://{bucket}: {source}")]
    CreateBucket {
        /// Bucket name.
        bucket: String,
        /// Underlying SDK error.
        source: BoxError,
    },

    /// `PutObject` failed.
    #[error("Failed to upload s3://{bucket}/{key}: {source}")]
    Put {
        /// Bucket name.
        bucket: String,
        /// Object key.
        key: String,
        /// Underlying SDK error.
        source: BoxError,
    },

    /// `GetObject` failed.
    #[error("Failed to download s3://{bucket}/{key}: {source}")]
    Get {
        /// Bucket name.
        bucket: String,
        /// Object key.
        key: String,
        /// Underlying SDK error.
        source: BoxError,
    },

    /// `HeadObject` failed for a reason other than "not found".
    #[error("Failed to head s3://{bucket}/{key}: {source}")]
    Head {
        /// Bucket name.
        bucket: String,
        /// Object key.
        key: String,
        /// Underlying SDK error.
        source: BoxError,
    },

    /// `ListObjectsV2` failed.
    #[error("Failed to list s3://{bucket}/{prefix}: {source}")]
    List {
        /// Bucket name.
        bucket: String,
        /// Key prefix.
        prefix: String,
        /// Underlying SDK error.
        source: BoxError,
    },

    /// I/O error reading or writing local files.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result of a `CreateBucket` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateBucketOutcome {
    /// The bucket was created by this call.
    Created,
    /// The bucket already existed (possibly created by a concurrent caller).
    AlreadyExists,
}

/// Metadata of a stored object, as returned by `HeadObject`/`GetObject`.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ObjectMeta {
    /// Content length in bytes.
    pub size: u64,
    /// `ETag` as reported by the store, if any.
    pub etag: Option<String>,
    /// User metadata, keys without the `x-amz-meta-` prefix.
    pub metadata: HashMap<String, String>,
}

impl ObjectMeta {
    /// Looks up a user metadata value, ignoring key case.
    #[must_use]
    pub fn metadata_value(&self, name: &str) -> Option<&str> {
        self.metadata
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// The stored content digest, or `""` if the object carries none.
    #[must_use]
    pub fn digest(&self) -> &str {
        self.metadata_value(DIGEST_METADATA_KEY).unwrap_or("")
    }
}

/// One entry of a `ListObjectsV2` listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectSummary {
    /// Full object key.
    pub key: String,
    /// Content length in bytes.
    pub size: u64,
}

/// The S3-compatible operations the sync engine consumes.
///
/// Implementations are shared across every worker of a batch, so they must
/// be usable concurrently through `&self`.
#[async_trait::async_trait]
pub trait ObjectStore: Send + Sync {
    /// Returns whether `bucket` exists.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::HeadBucket`] on failures other than "not found".
    async fn head_bucket(&self, bucket: &str) -> Result<bool, StoreError>;

    /// Creates `bucket`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::CreateBucket`] on failures other than "already
    /// exists".
    async fn create_bucket(&self, bucket: &str) -> Result<CreateBucketOutcome, StoreError>;

    /// Uploads the file at `source` to `key`, attaching `metadata`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Put`] on transport failures, [`StoreError::Io`]
    /// if `source` cannot be read.
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        source: &Path,
        metadata: &HashMap<String, String>,
    ) -> Result<(), StoreError>;

    /// Streams the body of `key` into `dest`.
    ///
    /// Returns `None` (leaving `dest` untouched) if the object does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Get`] on transport failures, [`StoreError::Io`]
    /// if `dest` cannot be written.
    async fn get_object(
        &self,
        bucket: &str,
        key: &str,
        dest: &Path,
    ) -> Result<Option<ObjectMeta>, StoreError>;

    /// Fetches the metadata of `key` without its body.
    ///
    /// Returns `None` if the object does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Head`] on failures other than "not found".
    async fn head_object(&self, bucket: &str, key: &str) -> Result<Option<ObjectMeta>, StoreError>;

    /// Lists every object under `prefix`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::List`] on transport failures.
    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
    ) -> Result<Vec<ObjectSummary>, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_lookup_ignores_case() {
        let mut meta = ObjectMeta::default();
        meta.metadata.insert("MD5".to_string(), "abc".to_string());
        assert_eq!(meta.digest(), "abc");
        assert_eq!(meta.metadata_value("md5"), Some("abc"));
    }

    #[test]
    fn missing_digest_is_empty() {
        let meta = ObjectMeta::default();
        assert_eq!(meta.digest(), "");
    }
}
