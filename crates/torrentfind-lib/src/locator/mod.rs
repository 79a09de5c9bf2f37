//! Searching for files and directories beneath a set of root directories.
//!
//! Roots are searched in lexicographic order. Inside of a root, the search goes breadth-first with
//! subdirectories visited in name order, so the shallowest match wins. Symlinks are never followed
//! while walking, which keeps symlink cycles from trapping the search. Subdirectories that can't be
//! read are skipped.

mod collect;

use std::collections::{BTreeSet, VecDeque};
use std::ffi::OsStr;
use std::fs::FileType;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

pub use collect::Collect;

use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EntryKind {
    File,
    Directory,
}

impl EntryKind {
    fn matches(&self, file_type: &FileType) -> bool {
        match self {
            EntryKind::File => file_type.is_file(),
            EntryKind::Directory => file_type.is_dir(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FileLocator {
    roots: BTreeSet<PathBuf>,
}

impl FileLocator {
    /// Fails if any of the roots doesn't exist or isn't a directory
    pub fn new<P: Into<PathBuf>>(roots: impl IntoIterator<Item = P>) -> Result<Self> {
        let mut canonical_roots = BTreeSet::new();
        for root in roots {
            let root = root.into();
            let canonical_root = std::fs::canonicalize(&root).map_err(|e| root_error(&root, e))?;
            if !canonical_root.is_dir() {
                return Err(Error::NotADirectory(root));
            }
            canonical_roots.insert(canonical_root);
        }

        Ok(FileLocator { roots: canonical_roots })
    }

    pub fn roots(&self) -> impl Iterator<Item = &Path> {
        self.roots.iter().map(PathBuf::as_path)
    }

    /// Returns the directory that contains a regular file called `name`
    pub async fn locate_file(&self, name: &str) -> Result<Option<PathBuf>> {
        self.locate(name, EntryKind::File).await
    }

    /// Returns the directory that contains a directory called `name`
    pub async fn locate_directory(&self, name: &str) -> Result<Option<PathBuf>> {
        self.locate(name, EntryKind::Directory).await
    }

    /// Lazily lists every path beneath the roots whose name ends with `extension`. Each call starts
    /// a fresh traversal
    pub fn collect(&self, extension: &str) -> Result<Collect> {
        for root in self.roots.iter() {
            check_root_sync(root)?;
        }
        Ok(Collect::new(self.roots.iter().cloned().collect(), extension))
    }

    #[tracing::instrument(level = "trace", skip(self), err(level = "debug"))]
    async fn locate(&self, name: &str, kind: EntryKind) -> Result<Option<PathBuf>> {
        let mut root_error = None;
        for root in self.roots.iter() {
            if let Err(e) = check_root(root).await {
                tracing::warn!("skipping a broken search root: {}", e);
                root_error.get_or_insert(e);
                continue;
            }

            if let Some(parent) = search_root(root, OsStr::new(name), kind).await {
                return Ok(Some(parent));
            }
        }

        match root_error {
            Some(e) => Err(e),
            None => Ok(None),
        }
    }
}

async fn search_root(root: &Path, name: &OsStr, kind: EntryKind) -> Option<PathBuf> {
    let mut queue = VecDeque::from([root.to_path_buf()]);

    while let Some(dir) = queue.pop_front() {
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) => {
                tracing::debug!(?dir, "skipping an unreadable directory: {}", e);
                continue;
            }
        };

        let mut subdirs = Vec::new();
        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    tracing::debug!(?dir, "error while reading a directory, skipping the rest of it: {}", e);
                    break;
                }
            };

            let Ok(file_type) = entry.file_type().await else {
                continue;
            };

            if entry.file_name().as_os_str() == name {
                let matches = if file_type.is_symlink() {
                    tokio::fs::metadata(entry.path())
                        .await
                        .is_ok_and(|metadata| kind.matches(&metadata.file_type()))
                } else {
                    kind.matches(&file_type)
                };

                if matches {
                    return Some(dir);
                }
            }

            if file_type.is_dir() {
                subdirs.push(entry.path());
            }
        }

        subdirs.sort();
        queue.extend(subdirs);
    }

    None
}

async fn check_root(root: &Path) -> Result<()> {
    match tokio::fs::metadata(root).await {
        Ok(metadata) if metadata.is_dir() => Ok(()),
        Ok(_) => Err(Error::NotADirectory(root.to_path_buf())),
        Err(e) => Err(root_error(root, e)),
    }
}

fn check_root_sync(root: &Path) -> Result<()> {
    match std::fs::metadata(root) {
        Ok(metadata) if metadata.is_dir() => Ok(()),
        Ok(_) => Err(Error::NotADirectory(root.to_path_buf())),
        Err(e) => Err(root_error(root, e)),
    }
}

fn root_error(root: &Path, e: std::io::Error) -> Error {
    match e.kind() {
        ErrorKind::NotFound => Error::RootNotFound(root.to_path_buf()),
        _ => Error::Io(e),
    }
}
