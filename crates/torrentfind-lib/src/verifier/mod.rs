mod piece_hash;
mod util;

use std::future::Future;
use std::path::Path;

pub use piece_hash::PieceHashVerifier;

use crate::MetainfoDescriptor;

/// Decides whether a candidate directory contains a torrent's data.
///
/// `candidate` is the parent directory of the data: the directory that contains the file of a
/// single-file torrent, or the one that contains the top-level directory of a multi-file torrent.
pub trait DataVerifier: Send + Sync {
    fn verify(&self, candidate: &Path, descriptor: &MetainfoDescriptor) -> impl Future<Output = bool> + Send;
}

/// Checks that every file of a torrent exists, optionally comparing file sizes too
#[derive(Debug, Clone, Copy, Default)]
pub struct ExistenceVerifier {
    check_sizes: bool,
}

impl ExistenceVerifier {
    pub fn new() -> Self {
        ExistenceVerifier::default()
    }

    pub fn with_size_check() -> Self {
        ExistenceVerifier { check_sizes: true }
    }
}

impl DataVerifier for ExistenceVerifier {
    #[tracing::instrument(level = "trace", skip_all, fields(name = descriptor.name(), ?candidate))]
    async fn verify(&self, candidate: &Path, descriptor: &MetainfoDescriptor) -> bool {
        if let Err(e) = descriptor.validate() {
            tracing::debug!("refusing to verify a broken descriptor: {}", e);
            return false;
        }

        for (relative_path, expected_length) in descriptor.expected_files() {
            let path = candidate.join(relative_path);
            let metadata = match tokio::fs::metadata(&path).await {
                Ok(metadata) => metadata,
                Err(e) => {
                    tracing::trace!(?path, "expected file is missing: {}", e);
                    return false;
                }
            };

            if !metadata.is_file() {
                tracing::trace!(?path, "expected a regular file");
                return false;
            }

            if self.check_sizes && metadata.len() != expected_length {
                tracing::trace!(?path, expected_length, actual_length = metadata.len(), "file size mismatch");
                return false;
            }
        }

        true
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::{FileEntry, InfoHash};

    fn write(path: &Path, contents: &[u8]) {
        fs::create_dir_all(path.parent().expect("path has a parent")).expect("failed to create parent dirs");
        fs::write(path, contents).expect("failed to create a file");
    }

    fn show() -> MetainfoDescriptor {
        MetainfoDescriptor::multi_file(
            "showX",
            InfoHash::new([1; 20]),
            [
                FileEntry::new("s01e01.mkv", 100).expect("valid entry"),
                FileEntry::new("s01e02.mkv", 100).expect("valid entry"),
            ],
        )
        .expect("valid descriptor")
    }

    #[tokio::test]
    async fn single_file_needs_a_regular_file() {
        let dir = tempfile::tempdir().expect("failed to create a temp dir");
        let descriptor = MetainfoDescriptor::single_file("movie.mkv", InfoHash::new([0; 20]), 500).expect("valid");

        assert!(!ExistenceVerifier::new().verify(dir.path(), &descriptor).await);

        fs::create_dir(dir.path().join("movie.mkv")).expect("failed to create a dir");
        assert!(!ExistenceVerifier::new().verify(dir.path(), &descriptor).await);

        fs::remove_dir(dir.path().join("movie.mkv")).expect("failed to remove a dir");
        write(&dir.path().join("movie.mkv"), b"data");
        assert!(ExistenceVerifier::new().verify(dir.path(), &descriptor).await);
    }

    #[tokio::test]
    async fn multi_file_needs_every_file() {
        let dir = tempfile::tempdir().expect("failed to create a temp dir");
        write(&dir.path().join("showX/s01e01.mkv"), b"data");

        assert!(!ExistenceVerifier::new().verify(dir.path(), &show()).await);

        write(&dir.path().join("showX/s01e02.mkv"), b"data");
        assert!(ExistenceVerifier::new().verify(dir.path(), &show()).await);

        fs::remove_file(dir.path().join("showX/s01e01.mkv")).expect("failed to remove a file");
        assert!(!ExistenceVerifier::new().verify(dir.path(), &show()).await);
    }

    #[tokio::test]
    async fn empty_multi_file_never_verifies() {
        let dir = tempfile::tempdir().expect("failed to create a temp dir");
        write(&dir.path().join("empty/anything"), b"data");
        let descriptor = MetainfoDescriptor::multi_file("empty", InfoHash::new([2; 20]), []).expect("valid layout");

        assert!(!ExistenceVerifier::new().verify(dir.path(), &descriptor).await);
        assert!(!ExistenceVerifier::with_size_check().verify(dir.path(), &descriptor).await);
    }

    #[tokio::test]
    async fn size_check_is_optional() {
        let dir = tempfile::tempdir().expect("failed to create a temp dir");
        write(&dir.path().join("showX/s01e01.mkv"), &[0; 100]);
        write(&dir.path().join("showX/s01e02.mkv"), &[0; 99]);

        assert!(ExistenceVerifier::new().verify(dir.path(), &show()).await);
        assert!(!ExistenceVerifier::with_size_check().verify(dir.path(), &show()).await);

        write(&dir.path().join("showX/s01e02.mkv"), &[0; 100]);
        assert!(ExistenceVerifier::with_size_check().verify(dir.path(), &show()).await);
    }
}
