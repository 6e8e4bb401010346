//! Remote digest lookup via `HeadObject`.

use crate::store::{ObjectStore, StoreError};

/// What the store holds for a key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteState {
    /// No object exists at the key; it must be transferred.
    Missing,
    /// An object exists. `digest` is empty if it carries no `md5` metadata.
    Present {
        /// Stored content digest.
        digest: String,
    },
}

impl RemoteState {
    /// Whether the remote object's stored digest equals `local_digest`.
    ///
    /// An object without a stored digest never matches.
    #[must_use]
    pub fn matches(&self, local_digest: &str) -> bool {
        match self {
            Self::Missing => false,
            Self::Present { digest } => !digest.is_empty() && digest == local_digest,
        }
    }
}

/// Fetches the stored digest of `key` without downloading its body.
///
/// # Errors
///
/// Returns [`StoreError`] on transport failures. A missing object is
/// [`RemoteState::Missing`], not an error.
pub async fn probe_digest(
    store: &dyn ObjectStore,
    bucket: &str,
    key: &str,
) -> Result<RemoteState, StoreError> {
    let state = match store.head_object(bucket, key).await? {
        Some(meta) => RemoteState::Present {
            digest: meta.digest().to_ascii_lowercase(),
        },
        None => RemoteState::Missing,
    };
    log::trace!("Probed s3://{bucket}/{key}: {state:?}");
    Ok(state)
}
