#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Transfer task, result, and summary types for bucket sync.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Default number of transfers allowed in flight at once.
pub const DEFAULT_CONCURRENCY: usize = 96;

/// Object metadata key under which the content digest is stored.
pub const DIGEST_METADATA_KEY: &str = "md5";

/// Skip reason recorded when the remote digest matches the local one.
pub const SKIP_REASON_UNCHANGED: &str = "unchanged (MD5 match)";

/// Transfer policy for a batch.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// Transfer every file regardless of remote state.
    #[default]
    Unconditional,
    /// Skip files whose remote `md5` metadata matches the local digest.
    Digest,
}

impl SyncMode {
    /// Maps the boolean "sync" flag onto a mode.
    #[must_use]
    pub const fn from_sync_flag(sync: bool) -> Self {
        if sync {
            Self::Digest
        } else {
            Self::Unconditional
        }
    }

    /// Whether files are compared by digest before transfer.
    #[must_use]
    pub const fn compares_digest(self) -> bool {
        matches!(self, Self::Digest)
    }
}

/// Options for a single push or pull batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncOptions {
    /// Remote bucket name.
    pub bucket: String,
    /// Key prefix under which the tree is stored. May be empty.
    #[serde(default)]
    pub prefix: String,
    /// Transfer policy.
    #[serde(default)]
    pub mode: SyncMode,
    /// Maximum number of transfers in flight at once.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Create the bucket before pushing if it does not exist.
    #[serde(default = "default_true")]
    pub ensure_bucket: bool,
}

impl SyncOptions {
    /// Creates options for `bucket` with defaults for everything else.
    #[must_use]
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            prefix: String::new(),
            mode: SyncMode::default(),
            concurrency: DEFAULT_CONCURRENCY,
            ensure_bucket: true,
        }
    }

    /// Sets the key prefix.
    #[must_use]
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Sets the transfer policy.
    #[must_use]
    pub const fn with_mode(mut self, mode: SyncMode) -> Self {
        self.mode = mode;
        self
    }

    /// Sets the admission gate size. Zero is treated as one.
    #[must_use]
    pub const fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Enables or disables bucket provisioning before a push.
    #[must_use]
    pub const fn with_ensure_bucket(mut self, ensure_bucket: bool) -> Self {
        self.ensure_bucket = ensure_bucket;
        self
    }

    /// Effective admission gate size (never zero).
    #[must_use]
    pub fn effective_concurrency(&self) -> usize {
        self.concurrency.max(1)
    }
}

const fn default_concurrency() -> usize {
    DEFAULT_CONCURRENCY
}

const fn default_true() -> bool {
    true
}

/// A single file to transfer. Consumed by exactly one worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferTask {
    /// Local file path.
    pub local_path: PathBuf,
    /// Remote object key.
    pub object_key: String,
}

impl TransferTask {
    /// Creates a task.
    #[must_use]
    pub fn new(local_path: impl Into<PathBuf>, object_key: impl Into<String>) -> Self {
        Self {
            local_path: local_path.into(),
            object_key: object_key.into(),
        }
    }
}

/// Outcome of one file's transfer.
///
/// A skip always counts as a success.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferResult {
    /// Local file path.
    pub file_path: PathBuf,
    /// Remote object key. Empty if key translation failed.
    pub object_key: String,
    /// Whether the file ended up in the desired state.
    pub success: bool,
    /// Rendered error for failed files.
    pub error: Option<String>,
    /// Whether the transfer was skipped.
    pub skipped: bool,
    /// Why the transfer was skipped.
    pub skip_reason: Option<String>,
}

/// Upload-direction name for [`TransferResult`].
pub type UploadResult = TransferResult;

impl TransferResult {
    /// A file that was transferred.
    #[must_use]
    pub fn transferred(file_path: impl Into<PathBuf>, object_key: impl Into<String>) -> Self {
        Self {
            file_path: file_path.into(),
            object_key: object_key.into(),
            success: true,
            error: None,
            skipped: false,
            skip_reason: None,
        }
    }

    /// A file that needed no transfer.
    #[must_use]
    pub fn skipped(
        file_path: impl Into<PathBuf>,
        object_key: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            file_path: file_path.into(),
            object_key: object_key.into(),
            success: true,
            error: None,
            skipped: true,
            skip_reason: Some(reason.into()),
        }
    }

    /// A file whose transfer failed.
    #[must_use]
    pub fn failed(
        file_path: impl Into<PathBuf>,
        object_key: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            file_path: file_path.into(),
            object_key: object_key.into(),
            success: false,
            error: Some(error.into()),
            skipped: false,
            skip_reason: None,
        }
    }

    /// The local path as a [`Path`].
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.file_path
    }
}

/// Aggregate report for a batch.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferSummary {
    /// Number of files in the batch.
    pub total_files: usize,
    /// Files transferred or skipped.
    pub success_count: usize,
    /// Files that failed.
    pub error_count: usize,
    /// Files skipped (subset of `success_count`).
    pub skipped_count: usize,
    /// Per-file results in completion order.
    pub results: Vec<TransferResult>,
    /// First error in completion order.
    pub first_error: Option<String>,
}

/// Upload-direction name for [`TransferSummary`].
pub type UploadSummary = TransferSummary;

impl TransferSummary {
    /// Builds a summary from every result of a batch.
    #[must_use]
    pub fn from_results(results: Vec<TransferResult>) -> Self {
        let mut summary = Self {
            total_files: results.len(),
            ..Self::default()
        };

        for result in &results {
            if result.success {
                summary.success_count += 1;
                if result.skipped {
                    summary.skipped_count += 1;
                }
            } else {
                summary.error_count += 1;
                if summary.first_error.is_none() {
                    summary.first_error = Some(
                        result
                            .error
                            .clone()
                            .unwrap_or_else(|| "unknown error".to_string()),
                    );
                }
            }
        }

        summary.results = results;
        summary
    }

    /// Number of files actually transferred.
    #[must_use]
    pub const fn transferred_count(&self) -> usize {
        self.success_count - self.skipped_count
    }

    /// Whether every file succeeded.
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        self.error_count == 0
    }

    /// Iterates over the failed results.
    pub fn failures(&self) -> impl Iterator<Item = &TransferResult> {
        self.results.iter().filter(|r| !r.success)
    }
}

impl std::fmt::Display for TransferSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} files: {} succeeded ({} skipped), {} failed",
            self.total_files, self.success_count, self.skipped_count, self.error_count
        )
    }
}
