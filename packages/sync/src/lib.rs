#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Concurrent directory sync between a local tree and an S3-compatible
//! bucket.
//!
//! [`SyncClient::push`] uploads every file under a root directory and
//! [`SyncClient::pull`] downloads every object under a key prefix. Each file
//! is handled by its own task; an admission gate bounds how many transfers
//! run at once (see [`scheduler`]).
//!
//! ## Smart sync
//!
//! Every upload attaches the file's MD5 digest as `md5` object metadata. In
//! [`SyncMode::Digest`] the local digest is compared with that metadata
//! (fetched via `HeadObject`) and matching files are skipped with the reason
//! `"unchanged (MD5 match)"`. The stored digest is trusted as-is: the object
//! body is never re-hashed, so a body that diverged from its metadata goes
//! unnoticed.
//!
//! ## Failure policy
//!
//! Traversal failures, bucket provisioning failures, and (for pulls) listing
//! failures abort the batch with a [`SyncError`]. Anything that goes wrong
//! with a single file is recorded in that file's [`TransferResult`] and the
//! rest of the batch carries on, so callers must check
//! [`TransferSummary::error_count`] even when the call returns `Ok`.

pub mod aggregate;
pub mod digest;
pub mod enumerate;
pub mod key;
pub mod memory;
pub mod probe;
pub mod progress;
pub mod provision;
pub mod s3;
pub mod scheduler;
pub mod store;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub use bucket_sync_models::{
    DEFAULT_CONCURRENCY, DIGEST_METADATA_KEY, SKIP_REASON_UNCHANGED, SyncMode, SyncOptions,
    TransferResult, TransferSummary, TransferTask, UploadResult, UploadSummary,
};
pub use tokio_util::sync::CancellationToken;

use crate::enumerate::EnumerateError;
use crate::key::KeyError;
use crate::progress::{ProgressCallback, null_progress};
use crate::provision::ProvisionError;
use crate::scheduler::{Scheduler, TaskContext};
use crate::store::{ObjectStore, StoreError};

/// Errors that abort a whole batch.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// The local tree could not be listed.
    #[error(transparent)]
    Enumerate(#[from] EnumerateError),

    /// The bucket could not be checked or created.
    #[error(transparent)]
    Provision(#[from] ProvisionError),

    /// The remote objects could not be listed.
    #[error(transparent)]
    List(StoreError),

    /// The local root could not be prepared.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Cancelled before any transfer started.
    #[error("Sync was cancelled")]
    Cancelled,
}

/// Why a single file failed. Rendered into [`TransferResult::error`].
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    /// The path and key could not be mapped onto each other.
    #[error(transparent)]
    Key(#[from] KeyError),

    /// The local file could not be hashed.
    #[error("Failed to hash {}: {source}", path.display())]
    Digest {
        /// File being hashed.
        path: PathBuf,
        /// Underlying read error.
        source: std::io::Error,
    },

    /// The remote digest could not be fetched.
    #[error("Failed to probe remote digest: {0}")]
    Probe(#[source] StoreError),

    /// The upload or download failed.
    #[error(transparent)]
    Transfer(#[from] StoreError),

    /// The object was listed but was gone by the time it was fetched.
    #[error("Object {key} disappeared before it could be downloaded")]
    Vanished {
        /// Object key.
        key: String,
    },

    /// Local filesystem error while placing a download.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The batch was cancelled while this file was in progress.
    #[error("{}", scheduler::CANCELLED)]
    Cancelled,
}

/// What happened to a file that did not fail.
enum Outcome {
    Transferred,
    Skipped,
}

impl Outcome {
    fn into_result(self, path: PathBuf, key: String) -> TransferResult {
        match self {
            Self::Transferred => TransferResult::transferred(path, key),
            Self::Skipped => TransferResult::skipped(path, key, SKIP_REASON_UNCHANGED),
        }
    }
}

/// Client for syncing directory trees with a bucket.
pub struct SyncClient {
    store: Arc<dyn ObjectStore>,
    progress: Arc<dyn ProgressCallback>,
}

impl std::fmt::Debug for SyncClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncClient").finish_non_exhaustive()
    }
}

impl SyncClient {
    /// Creates a client over `store`. The store is shared by every worker.
    #[must_use]
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self {
            store,
            progress: null_progress(),
        }
    }

    /// Reports per-file progress to `progress`.
    #[must_use]
    pub fn with_progress(mut self, progress: Arc<dyn ProgressCallback>) -> Self {
        self.progress = progress;
        self
    }

    /// The underlying store.
    #[must_use]
    pub const fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    fn scheduler(&self, options: &SyncOptions, cancel: &CancellationToken) -> Scheduler {
        Scheduler::new(options.effective_concurrency(), cancel.clone())
            .with_progress(self.progress.clone())
    }

    /// Uploads every file under `root` to `options.bucket` under
    /// `options.prefix`.
    ///
    /// Lists the tree first, then makes sure the bucket exists (unless
    /// `options.ensure_bucket` is off), then transfers all files
    /// concurrently.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Enumerate`] if the tree cannot be listed and
    /// [`SyncError::Provision`] if the bucket cannot be ensured. Per-file
    /// failures are reported in the summary instead.
    pub async fn push(
        &self,
        root: &Path,
        options: &SyncOptions,
        cancel: &CancellationToken,
    ) -> Result<TransferSummary, SyncError> {
        log::info!(
            "Pushing {} -> s3://{}/{} ({:?}, concurrency {})",
            root.display(),
            options.bucket,
            options.prefix,
            options.mode,
            options.effective_concurrency(),
        );

        let files = enumerate::list_files(root)?;

        if options.ensure_bucket {
            provision::ensure_bucket(self.store.as_ref(), &options.bucket, cancel).await?;
        }

        let mut tasks = Vec::with_capacity(files.len());
        let mut rejected = Vec::new();
        for path in files {
            match key::object_key(root, &path, &options.prefix) {
                Ok(key) => tasks.push(TransferTask::new(path, key)),
                Err(e) => {
                    let e = TransferError::from(e);
                    log::warn!("  {}: {e}", path.display());
                    rejected.push(TransferResult::failed(path, String::new(), e.to_string()));
                }
            }
        }

        let job = Arc::new(PushJob {
            store: self.store.clone(),
            bucket: options.bucket.clone(),
            mode: options.mode,
        });

        let summary = self
            .scheduler(options, cancel)
            .run_with_rejected(tasks, rejected, move |task, ctx| {
                let job = job.clone();
                async move { job.run(task, &ctx).await }
            })
            .await;

        log::info!("Push complete: {summary}");
        Ok(summary)
    }

    /// Downloads every object under `options.prefix` into `root`.
    ///
    /// Keys ending in `/` are treated as directory markers and ignored. The
    /// bucket is never created.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Io`] if `root` cannot be created and
    /// [`SyncError::List`] if the objects cannot be listed. Per-file
    /// failures are reported in the summary instead.
    pub async fn pull(
        &self,
        root: &Path,
        options: &SyncOptions,
        cancel: &CancellationToken,
    ) -> Result<TransferSummary, SyncError> {
        log::info!(
            "Pulling s3://{}/{} -> {} ({:?}, concurrency {})",
            options.bucket,
            options.prefix,
            root.display(),
            options.mode,
            options.effective_concurrency(),
        );

        tokio::fs::create_dir_all(root).await?;

        let listing_prefix = key::listing_prefix(&options.prefix);
        let objects = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(SyncError::Cancelled),
            objects = self.store.list_objects(&options.bucket, &listing_prefix) => {
                objects.map_err(SyncError::List)?
            }
        };

        let mut tasks = Vec::with_capacity(objects.len());
        let mut rejected = Vec::new();
        for key in objects.into_iter().map(|object| object.key) {
            if key.ends_with('/') {
                continue;
            }
            match key::local_path(root, &key, &options.prefix) {
                Ok(path) => tasks.push(TransferTask::new(path, key)),
                Err(e) => {
                    let e = TransferError::from(e);
                    log::warn!("  s3://{}/{key}: {e}", options.bucket);
                    rejected.push(TransferResult::failed(PathBuf::new(), key, e.to_string()));
                }
            }
        }

        let job = Arc::new(PullJob {
            store: self.store.clone(),
            bucket: options.bucket.clone(),
            mode: options.mode,
        });

        let summary = self
            .scheduler(options, cancel)
            .run_with_rejected(tasks, rejected, move |task, ctx| {
                let job = job.clone();
                async move { job.run(task, &ctx).await }
            })
            .await;

        log::info!("Pull complete: {summary}");
        Ok(summary)
    }
}

/// Uploads `root` with a [`SyncClient`] that reports no progress.
///
/// # Errors
///
/// See [`SyncClient::push`].
pub async fn push_directory(
    store: Arc<dyn ObjectStore>,
    root: &Path,
    options: &SyncOptions,
    cancel: &CancellationToken,
) -> Result<TransferSummary, SyncError> {
    SyncClient::new(store).push(root, options, cancel).await
}

/// Downloads into `root` with a [`SyncClient`] that reports no progress.
///
/// # Errors
///
/// See [`SyncClient::pull`].
pub async fn pull_directory(
    store: Arc<dyn ObjectStore>,
    root: &Path,
    options: &SyncOptions,
    cancel: &CancellationToken,
) -> Result<TransferSummary, SyncError> {
    SyncClient::new(store).pull(root, options, cancel).await
}

/// Shared, read-only state of a push batch.
struct PushJob {
    store: Arc<dyn ObjectStore>,
    bucket: String,
    mode: SyncMode,
}

impl PushJob {
    async fn run(&self, task: TransferTask, ctx: &TaskContext) -> TransferResult {
        let TransferTask {
            local_path: path,
            object_key: key,
        } = task;

        match self.transfer(&path, &key, ctx).await {
            Ok(outcome) => outcome.into_result(path, key),
            Err(e) => {
                log::warn!(
                    "  {} -> s3://{}/{key}: {e}",
                    path.display(),
                    self.bucket
                );
                TransferResult::failed(path, key, e.to_string())
            }
        }
    }

    async fn transfer(
        &self,
        path: &Path,
        key: &str,
        ctx: &TaskContext,
    ) -> Result<Outcome, TransferError> {
        let local_digest = ctx
            .cancellable(digest::file_digest(path))
            .await
            .ok_or(TransferError::Cancelled)?
            .map_err(|source| TransferError::Digest {
                path: path.to_path_buf(),
                source,
            })?;

        if self.mode.compares_digest() {
            let remote = ctx
                .cancellable(probe::probe_digest(self.store.as_ref(), &self.bucket, key))
                .await
                .ok_or(TransferError::Cancelled)?
                .map_err(TransferError::Probe)?;

            if remote.matches(&local_digest) {
                log::debug!(
                    "  {} -> s3://{}/{key}: skipped (unchanged)",
                    path.display(),
                    self.bucket
                );
                return Ok(Outcome::Skipped);
            }
        }

        let metadata = HashMap::from([(DIGEST_METADATA_KEY.to_string(), local_digest)]);
        ctx.cancellable(self.store.put_object(&self.bucket, key, path, &metadata))
            .await
            .ok_or(TransferError::Cancelled)??;

        log::info!(
            "Pushed {} -> s3://{}/{key}",
            path.display(),
            self.bucket
        );
        Ok(Outcome::Transferred)
    }
}

/// Shared, read-only state of a pull batch.
struct PullJob {
    store: Arc<dyn ObjectStore>,
    bucket: String,
    mode: SyncMode,
}

impl PullJob {
    async fn run(&self, task: TransferTask, ctx: &TaskContext) -> TransferResult {
        let TransferTask {
            local_path: path,
            object_key: key,
        } = task;

        match self.transfer(&path, &key, ctx).await {
            Ok(outcome) => outcome.into_result(path, key),
            Err(e) => {
                log::warn!(
                    "  s3://{}/{key} -> {}: {e}",
                    self.bucket,
                    path.display()
                );
                TransferResult::failed(path, key, e.to_string())
            }
        }
    }

    async fn transfer(
        &self,
        path: &Path,
        key: &str,
        ctx: &TaskContext,
    ) -> Result<Outcome, TransferError> {
        if self.mode.compares_digest() && tokio::fs::try_exists(path).await? {
            let local_digest = ctx
                .cancellable(digest::file_digest(path))
                .await
                .ok_or(TransferError::Cancelled)?
                .map_err(|source| TransferError::Digest {
                    path: path.to_path_buf(),
                    source,
                })?;

            let remote = ctx
                .cancellable(probe::probe_digest(self.store.as_ref(), &self.bucket, key))
                .await
                .ok_or(TransferError::Cancelled)?
                .map_err(TransferError::Probe)?;

            if remote.matches(&local_digest) {
                log::debug!(
                    "  s3://{}/{key} -> {}: skipped (unchanged)",
                    self.bucket,
                    path.display()
                );
                return Ok(Outcome::Skipped);
            }
        }

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        // Download next to the target and rename, so a failed transfer never
        // leaves a truncated file in place.
        let partial = partial_path(path);
        let fetched = ctx
            .cancellable(self.store.get_object(&self.bucket, key, &partial))
            .await;

        match fetched {
            Some(Ok(Some(_))) => {
                tokio::fs::rename(&partial, path).await?;
                log::info!(
                    "Pulled s3://{}/{key} -> {}",
                    self.bucket,
                    path.display()
                );
                Ok(Outcome::Transferred)
            }
            Some(Ok(None)) => Err(TransferError::Vanished {
                key: key.to_string(),
            }),
            Some(Err(e)) => {
                remove_partial(&partial).await;
                Err(e.into())
            }
            None => {
                remove_partial(&partial).await;
                Err(TransferError::Cancelled)
            }
        }
    }
}

/// Temporary download location for `path`.
fn partial_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{name}.part"))
}

async fn remove_partial(partial: &Path) {
    if let Err(e) = tokio::fs::remove_file(partial).await
        && e.kind() != std::io::ErrorKind::NotFound
    {
        log::debug!("Failed to remove {}: {e}", partial.display());
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::memory::MemoryStore;

    fn sample_tree() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "hello").unwrap();
        std::fs::create_dir_all(dir.path().join("b")).unwrap();
        std::fs::write(dir.path().join("b/c.txt"), "").unwrap();
        dir
    }

    fn store_with_bucket() -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        store.insert_bucket("bucket");
        store
    }

    fn options(mode: SyncMode) -> SyncOptions {
        SyncOptions::new("bucket")
            .with_prefix("prefix")
            .with_mode(mode)
    }

    #[tokio::test]
    async fn unconditional_push_uploads_every_file() {
        let tree = sample_tree();
        let store = store_with_bucket();

        let summary = push_directory(
            store.clone(),
            tree.path(),
            &options(SyncMode::Unconditional),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(summary.total_files, 2);
        assert_eq!(summary.success_count, 2);
        assert_eq!(summary.error_count, 0);
        assert_eq!(summary.skipped_count, 0);
        assert_eq!(summary.results.len(), 2);
        assert_eq!(store.keys("bucket"), ["prefix/a.txt", "prefix/b/c.txt"]);
        assert_eq!(store.stats().head_calls, 0);

        let empty = store.object("bucket", "prefix/b/c.txt").unwrap();
        assert_eq!(
            empty.metadata.get(DIGEST_METADATA_KEY).map(String::as_str),
            Some("d41d8cd98f00b204e9800998ecf8427e")
        );
    }

    #[tokio::test]
    async fn second_sync_run_skips_everything() {
        let tree = sample_tree();
        let store = store_with_bucket();
        let cancel = CancellationToken::new();

        push_directory(store.clone(), tree.path(), &options(SyncMode::Unconditional), &cancel)
            .await
            .unwrap();
        store.reset_stats();

        let summary = push_directory(store.clone(), tree.path(), &options(SyncMode::Digest), &cancel)
            .await
            .unwrap();

        assert_eq!(summary.total_files, 2);
        assert_eq!(summary.success_count, 2);
        assert_eq!(summary.skipped_count, 2);
        assert_eq!(store.stats().put_calls, 0);
        assert!(summary.results.iter().all(|r| {
            r.skipped && r.skip_reason.as_deref() == Some(SKIP_REASON_UNCHANGED)
        }));
    }

    #[tokio::test]
    async fn changed_file_is_reuploaded_alone() {
        let tree = sample_tree();
        let store = store_with_bucket();
        let cancel = CancellationToken::new();

        push_directory(store.clone(), tree.path(), &options(SyncMode::Digest), &cancel)
            .await
            .unwrap();
        std::fs::write(tree.path().join("a.txt"), "Hello, World!").unwrap();
        store.reset_stats();

        let summary = push_directory(store.clone(), tree.path(), &options(SyncMode::Digest), &cancel)
            .await
            .unwrap();

        assert_eq!(summary.success_count, 2);
        assert_eq!(summary.skipped_count, 1);
        assert_eq!(store.stats().put_calls, 1);

        let updated = summary
            .results
            .iter()
            .find(|r| r.object_key == "prefix/a.txt")
            .unwrap();
        assert!(!updated.skipped);

        let object = store.object("bucket", "prefix/a.txt").unwrap();
        assert_eq!(object.data, b"Hello, World!");
        assert_eq!(
            object.metadata.get(DIGEST_METADATA_KEY).map(String::as_str),
            Some("65a8e27d8879283831b664bd8b7f0ad4")
        );
    }

    #[tokio::test]
    async fn remote_object_without_digest_is_uploaded() {
        let tree = sample_tree();
        let store = store_with_bucket();
        store.insert_object("bucket", "prefix/a.txt", b"hello".to_vec(), HashMap::new());

        let summary = push_directory(
            store.clone(),
            tree.path(),
            &options(SyncMode::Digest),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(summary.skipped_count, 0);
        assert_eq!(store.stats().put_calls, 2);
    }

    #[tokio::test]
    async fn one_failing_upload_does_not_stop_the_batch() {
        let tree = sample_tree();
        for i in 0..10 {
            std::fs::write(tree.path().join(format!("f{i}.txt")), i.to_string()).unwrap();
        }
        let store = store_with_bucket();
        store.fail_puts_for("prefix/f3.txt");

        let summary = push_directory(
            store.clone(),
            tree.path(),
            &options(SyncMode::Unconditional),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(summary.total_files, 12);
        assert_eq!(summary.success_count, 11);
        assert_eq!(summary.error_count, 1);
        assert_eq!(summary.success_count + summary.error_count, summary.total_files);
        let failed = summary.failures().next().unwrap();
        assert_eq!(failed.object_key, "prefix/f3.txt");
        assert!(summary.first_error.as_deref().unwrap().contains("injected"));
        assert_eq!(store.keys("bucket").len(), 11);
    }

    #[tokio::test]
    async fn probe_failure_is_a_per_file_error() {
        let tree = sample_tree();
        let store = store_with_bucket();
        store.fail_heads_for("prefix/a.txt");

        let summary = push_directory(
            store.clone(),
            tree.path(),
            &options(SyncMode::Digest),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(summary.error_count, 1);
        assert_eq!(summary.success_count, 1);
        assert!(
            summary
                .first_error
                .as_deref()
                .unwrap()
                .starts_with("Failed to probe remote digest")
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn transfers_in_flight_respect_the_gate() {
        let tree = tempfile::tempdir().unwrap();
        for i in 0..30 {
            std::fs::write(tree.path().join(format!("{i}.bin")), [i as u8; 64]).unwrap();
        }

        for concurrency in [1, 4, 96] {
            let store = Arc::new(MemoryStore::new().with_latency(Duration::from_millis(10)));
            let summary = push_directory(
                store.clone(),
                tree.path(),
                &options(SyncMode::Unconditional).with_concurrency(concurrency),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

            assert_eq!(summary.success_count, 30);
            let max = store.stats().max_in_flight;
            assert!(max <= concurrency, "{max} in flight with gate {concurrency}");
        }
    }

    #[tokio::test]
    async fn missing_root_aborts_before_any_upload() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());

        let err = push_directory(
            store.clone(),
            &dir.path().join("missing"),
            &options(SyncMode::Unconditional),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, SyncError::Enumerate(_)));
        assert_eq!(store.stats().create_bucket_calls, 0);
        assert_eq!(store.stats().put_calls, 0);
    }

    #[tokio::test]
    async fn provisioning_failure_aborts_before_any_upload() {
        let tree = sample_tree();
        let store = Arc::new(MemoryStore::new());
        store.fail_bucket_creation();

        let err = push_directory(
            store.clone(),
            tree.path(),
            &options(SyncMode::Unconditional),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, SyncError::Provision(_)));
        assert_eq!(store.stats().put_calls, 0);
    }

    #[tokio::test]
    async fn push_creates_missing_bucket() {
        let tree = sample_tree();
        let store = Arc::new(MemoryStore::new());

        let summary = push_directory(
            store.clone(),
            tree.path(),
            &options(SyncMode::Unconditional),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(summary.success_count, 2);
        assert_eq!(store.stats().create_bucket_calls, 1);
    }

    #[tokio::test]
    async fn empty_tree_yields_empty_summary() {
        let tree = tempfile::tempdir().unwrap();
        let store = store_with_bucket();

        let summary = push_directory(
            store,
            tree.path(),
            &options(SyncMode::Digest),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(summary, TransferSummary::default());
    }

    #[tokio::test]
    async fn cancelled_push_reports_each_file_as_failed() {
        let tree = sample_tree();
        let store = store_with_bucket();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let summary = push_directory(
            store.clone(),
            tree.path(),
            &options(SyncMode::Unconditional).with_ensure_bucket(false),
            &cancel,
        )
        .await
        .unwrap();

        assert_eq!(summary.total_files, 2);
        assert_eq!(summary.error_count, 2);
        assert_eq!(summary.first_error.as_deref(), Some(scheduler::CANCELLED));
        assert_eq!(store.stats().put_calls, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn cancelling_mid_batch_aborts_in_flight_uploads() {
        let tree = tempfile::tempdir().unwrap();
        for i in 0..6 {
            std::fs::write(tree.path().join(format!("{i}.txt")), i.to_string()).unwrap();
        }
        let store = Arc::new(MemoryStore::new().with_latency(Duration::from_secs(5)));
        store.insert_bucket("bucket");
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let started = std::time::Instant::now();
        let summary = push_directory(
            store.clone(),
            tree.path(),
            &options(SyncMode::Unconditional).with_concurrency(2),
            &cancel,
        )
        .await
        .unwrap();
        let elapsed = started.elapsed();

        assert!(elapsed < Duration::from_secs(2), "took {elapsed:?}");
        assert_eq!(summary.total_files, 6);
        assert_eq!(summary.error_count, 6);
        assert!(summary.results.iter().all(|r| {
            r.error.as_deref() == Some(scheduler::CANCELLED)
                && r.object_key.starts_with("prefix/")
                && r.object_key.ends_with(".txt")
        }));
        assert!(store.stats().put_calls <= 2);
        assert!(store.keys("bucket").is_empty());
    }

    #[tokio::test]
    async fn queued_files_keep_their_keys_when_cancelled() {
        let tree = sample_tree();
        let store = store_with_bucket();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let summary = push_directory(
            store,
            tree.path(),
            &options(SyncMode::Digest).with_ensure_bucket(false),
            &cancel,
        )
        .await
        .unwrap();

        let mut keys: Vec<_> = summary.results.iter().map(|r| r.object_key.as_str()).collect();
        keys.sort_unstable();
        assert_eq!(keys, ["prefix/a.txt", "prefix/b/c.txt"]);
        assert!(
            summary
                .results
                .iter()
                .all(|r| r.file_path.starts_with(tree.path()))
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn pull_reports_unreadable_local_target() {
        let store = store_with_bucket();
        store.insert_object("bucket", "prefix/sub/x.txt", b"x".to_vec(), HashMap::new());

        let target = tempfile::tempdir().unwrap();
        std::fs::write(target.path().join("sub"), "not a directory").unwrap();

        let summary = pull_directory(
            store.clone(),
            target.path(),
            &options(SyncMode::Digest),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(summary.error_count, 1);
        let error = summary.first_error.as_deref().unwrap();
        assert!(error.starts_with("I/O error"), "{error}");
        assert!(error.contains("Not a directory"), "{error}");
        assert_eq!(store.stats().head_calls, 0);
        assert_eq!(store.stats().get_calls, 0);
    }

    #[tokio::test]
    async fn pull_restores_pushed_tree() {
        let tree = sample_tree();
        let store = store_with_bucket();
        let cancel = CancellationToken::new();
        push_directory(store.clone(), tree.path(), &options(SyncMode::Digest), &cancel)
            .await
            .unwrap();

        let target = tempfile::tempdir().unwrap();
        let summary = pull_directory(store.clone(), target.path(), &options(SyncMode::Digest), &cancel)
            .await
            .unwrap();

        assert_eq!(summary.total_files, 2);
        assert_eq!(summary.success_count, 2);
        assert_eq!(summary.skipped_count, 0);
        assert_eq!(
            std::fs::read_to_string(target.path().join("a.txt")).unwrap(),
            "hello"
        );
        assert_eq!(
            std::fs::read_to_string(target.path().join("b/c.txt")).unwrap(),
            ""
        );
        assert!(!target.path().join(".a.txt.part").exists());

        store.reset_stats();
        let again = pull_directory(store.clone(), target.path(), &options(SyncMode::Digest), &cancel)
            .await
            .unwrap();
        assert_eq!(again.skipped_count, 2);
        assert_eq!(store.stats().get_calls, 0);
    }

    #[tokio::test]
    async fn pull_isolates_failures_and_ignores_other_prefixes() {
        let store = store_with_bucket();
        store.insert_object("bucket", "prefix/ok.txt", b"ok".to_vec(), HashMap::new());
        store.insert_object("bucket", "prefix/bad.txt", b"bad".to_vec(), HashMap::new());
        store.insert_object("bucket", "prefix/dir/", Vec::new(), HashMap::new());
        store.insert_object("bucket", "prefixed/other.txt", b"x".to_vec(), HashMap::new());
        store.fail_gets_for("prefix/bad.txt");

        let target = tempfile::tempdir().unwrap();
        let summary = pull_directory(
            store.clone(),
            target.path(),
            &options(SyncMode::Unconditional),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(summary.total_files, 2);
        assert_eq!(summary.success_count, 1);
        assert_eq!(summary.error_count, 1);
        assert!(target.path().join("ok.txt").exists());
        assert!(!target.path().join("bad.txt").exists());
        assert!(!target.path().join(".bad.txt.part").exists());
    }

    #[tokio::test]
    async fn pull_rejects_keys_escaping_the_root() {
        let store = store_with_bucket();
        store.insert_object("bucket", "prefix/ok.txt", b"ok".to_vec(), HashMap::new());
        store.insert_object("bucket", "prefix/../escape.txt", b"x".to_vec(), HashMap::new());

        let target = tempfile::tempdir().unwrap();
        let summary = pull_directory(
            store.clone(),
            target.path(),
            &options(SyncMode::Unconditional),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(summary.total_files, 2);
        assert_eq!(summary.success_count, 1);
        let failed = summary.failures().next().unwrap();
        assert_eq!(failed.object_key, "prefix/../escape.txt");
        assert_eq!(store.stats().get_calls, 1);
        assert!(!target.path().parent().unwrap().join("escape.txt").exists());
    }

    #[tokio::test]
    async fn pull_from_missing_bucket_is_fatal() {
        let store = Arc::new(MemoryStore::new());
        let target = tempfile::tempdir().unwrap();

        let err = pull_directory(
            store,
            target.path(),
            &options(SyncMode::Unconditional),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, SyncError::List(_)));
    }

    #[test]
    fn partial_path_is_hidden_sibling() {
        assert_eq!(
            partial_path(Path::new("/a/b/c.txt")),
            Path::new("/a/b/.c.txt.part")
        );
    }
}
