//! Mapping between local paths and remote object keys.

use std::path::{Component, Path, PathBuf};

/// Errors translating between paths and keys.
#[derive(Debug, thiserror::Error)]
pub enum KeyError {
    /// The file is not below the sync root.
    #[error("{} is not under {}", path.display(), root.display())]
    NotUnderRoot {
        /// Sync root.
        root: PathBuf,
        /// Offending path.
        path: PathBuf,
    },

    /// A path component is not valid UTF-8 and cannot become a key.
    #[error("{} is not valid UTF-8", path.display())]
    NonUtf8 {
        /// Offending path.
        path: PathBuf,
    },

    /// A remote key does not map to a safe path below the root.
    #[error("Object key {key:?} does not map to a path under the sync root")]
    UnsafeKey {
        /// Offending key.
        key: String,
    },
}

/// Joins `prefix` and `relative` with exactly one `/` between them.
#[must_use]
pub fn join_prefix(prefix: &str, relative: &str) -> String {
    if prefix.is_empty() {
        relative.to_string()
    } else if prefix.ends_with('/') {
        format!("{prefix}{relative}")
    } else {
        format!("{prefix}/{relative}")
    }
}

/// Computes the object key for `path`, a file under `root`.
///
/// The key is `prefix/relative`, with platform separators replaced by `/`.
///
/// # Errors
///
/// Returns [`KeyError::NotUnderRoot`] if `path` is not below `root`, or
/// [`KeyError::NonUtf8`] if the relative path is not valid UTF-8.
pub fn object_key(root: &Path, path: &Path, prefix: &str) -> Result<String, KeyError> {
    let relative = path
        .strip_prefix(root)
        .map_err(|_| KeyError::NotUnderRoot {
            root: root.to_path_buf(),
            path: path.to_path_buf(),
        })?;

    let mut parts = Vec::new();
    for component in relative.components() {
        match component {
            Component::Normal(part) => {
                parts.push(part.to_str().ok_or_else(|| KeyError::NonUtf8 {
                    path: path.to_path_buf(),
                })?);
            }
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(KeyError::NotUnderRoot {
                    root: root.to_path_buf(),
                    path: path.to_path_buf(),
                });
            }
        }
    }

    if parts.is_empty() {
        return Err(KeyError::NotUnderRoot {
            root: root.to_path_buf(),
            path: path.to_path_buf(),
        });
    }

    Ok(join_prefix(prefix, &parts.join("/")))
}

/// The listing prefix that selects every key written under `prefix`.
#[must_use]
pub fn listing_prefix(prefix: &str) -> String {
    if prefix.is_empty() || prefix.ends_with('/') {
        prefix.to_string()
    } else {
        format!("{prefix}/")
    }
}

/// Maps an object key under `prefix` back to a local path under `root`.
///
/// # Errors
///
/// Returns [`KeyError::UnsafeKey`] if the key is outside the prefix, empty
/// after stripping it, or contains components that would escape `root`.
pub fn local_path(root: &Path, key: &str, prefix: &str) -> Result<PathBuf, KeyError> {
    let unsafe_key = || KeyError::UnsafeKey {
        key: key.to_string(),
    };

    let relative = key
        .strip_prefix(&listing_prefix(prefix))
        .ok_or_else(unsafe_key)?;

    let mut path = root.to_path_buf();
    let mut pushed = false;
    for part in relative.split('/') {
        match part {
            "" | "." => {}
            ".." => return Err(unsafe_key()),
            part if part.contains('\\') || Path::new(part).is_absolute() => {
                return Err(unsafe_key());
            }
            part => {
                path.push(part);
                pushed = true;
            }
        }
    }

    if pushed { Ok(path) } else { Err(unsafe_key()) }
}
