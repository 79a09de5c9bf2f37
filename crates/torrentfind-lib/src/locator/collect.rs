use std::path::PathBuf;
use std::vec;

use walkdir::WalkDir;

/// Lazy traversal returned by [`super::FileLocator::collect`]
pub struct Collect {
    roots: vec::IntoIter<PathBuf>,
    current: Option<walkdir::IntoIter>,
    extension: String,
}

impl Collect {
    pub(super) fn new(roots: Vec<PathBuf>, extension: &str) -> Self {
        Collect {
            roots: roots.into_iter(),
            current: None,
            extension: extension.to_string(),
        }
    }

    fn has_extension(&self, entry: &walkdir::DirEntry) -> bool {
        entry
            .file_name()
            .as_encoded_bytes()
            .ends_with(self.extension.as_bytes())
    }
}

impl Iterator for Collect {
    type Item = PathBuf;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.current.is_none() {
                let root = self.roots.next()?;
                self.current = Some(WalkDir::new(root).min_depth(1).follow_links(false).into_iter());
            }

            match self.current.as_mut()?.next() {
                Some(Ok(entry)) => {
                    if self.has_extension(&entry) {
                        return Some(entry.into_path());
                    }
                }
                Some(Err(e)) => {
                    tracing::debug!("skipping an unreadable entry: {}", e);
                }
                None => self.current = None,
            }
        }
    }
}
