//! Streaming MD5 content digests.

use std::path::Path;

/// Read buffer size for hashing.
const CHUNK_SIZE: usize = 256 * 1024;

/// Computes the lowercase hex MD5 digest of a local file.
///
/// Runs the read loop on a blocking thread so large files do not stall the
/// async runtime.
///
/// # Errors
///
/// Returns an I/O error if the file cannot be opened or read.
pub async fn file_digest(path: &Path) -> Result<String, std::io::Error> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || file_digest_sync(&path))
        .await
        .map_err(std::io::Error::other)?
}

/// Synchronous variant of [`file_digest`]. Reads in fixed-size chunks.
///
/// # Errors
///
/// Returns an I/O error if the file cannot be opened or read.
pub fn file_digest_sync(path: &Path) -> Result<String, std::io::Error> {
    let file = std::fs::File::open(path)?;
    reader_digest(file)
}

/// Computes the MD5 digest of an in-memory buffer.
#[must_use]
pub fn bytes_digest(data: &[u8]) -> String {
    let mut context = md5::Context::new();
    context.consume(data);
    format!("{:x}", context.finalize())
}

/// Computes the MD5 digest of everything `reader` yields.
///
/// # Errors
///
/// Returns any error from `reader`.
pub fn reader_digest(mut reader: impl std::io::Read) -> Result<String, std::io::Error> {
    let mut context = md5::Context::new();
    let mut buffer = vec![0u8; CHUNK_SIZE];
    loop {
        let n = match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        context.consume(&buffer[..n]);
    }
    Ok(format!("{:x}", context.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_has_well_known_digest() {
        assert_eq!(
            reader_digest(std::io::empty()).unwrap(),
            "d41d8cd98f00b204e9800998ecf8427e"
        );
    }

    #[tokio::test]
    async fn known_content_digest() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hello.txt");
        std::fs::write(&path, "Hello, World!").unwrap();

        assert_eq!(
            file_digest(&path).await.unwrap(),
            "65a8e27d8879283831b664bd8b7f0ad4"
        );
    }

    #[tokio::test]
    async fn digest_is_stable_across_calls() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("big.bin");
        // Spans several read chunks.
        let data: Vec<u8> = (0..(CHUNK_SIZE * 3 + 17)).map(|i| (i % 251) as u8).collect();
        std::fs::write(&path, &data).unwrap();

        let first = file_digest(&path).await.unwrap();
        let second = file_digest(&path).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 32);
        assert_eq!(first, reader_digest(data.as_slice()).unwrap());
        assert_eq!(first, bytes_digest(&data));
    }

    #[tokio::test]
    async fn missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = file_digest(&dir.path().join("nope")).await.unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::NotFound);
    }
}
