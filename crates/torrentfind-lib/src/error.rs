use std::path::PathBuf;
use std::result;

use thiserror::Error;

pub type Result<T> = result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid torrent descriptor: {0}")]
    InvalidDescriptor(String),
    #[error("search root doesn't exist: {0:?}")]
    RootNotFound(PathBuf),
    #[error("search root is not a directory: {0:?}")]
    NotADirectory(PathBuf),
    #[error("error while decoding the torrent file {path:?}: {source}")]
    Decoding {
        path: PathBuf,
        #[source]
        source: serde_bencode::Error,
    },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn invalid_descriptor(reason: impl Into<String>) -> Self {
        Error::InvalidDescriptor(reason.into())
    }
}
