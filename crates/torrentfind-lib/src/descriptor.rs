use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use crate::{Error, Result};

/// SHA1 hash of the bencoded `info` dictionary of a torrent
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InfoHash([u8; 20]);

impl InfoHash {
    pub fn new(hash: [u8; 20]) -> Self {
        InfoHash(hash)
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }
}

impl fmt::Display for InfoHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for InfoHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "InfoHash({})", self)
    }
}

/// A single file of a multi-file torrent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    /// Path relative to the torrent's directory, e.g. "Season 1/s01e01.mkv"
    path: PathBuf,
    length: u64,
}

impl FileEntry {
    pub fn new(path: impl Into<PathBuf>, length: u64) -> Result<Self> {
        let path = path.into();
        let mut components = 0;
        for component in path.components() {
            match component {
                Component::Normal(_) => components += 1,
                _ => {
                    return Err(Error::invalid_descriptor(format!(
                        "file path must be relative and can't contain '..': {path:?}"
                    )))
                }
            }
        }
        if components == 0 {
            return Err(Error::invalid_descriptor("empty file path"));
        }

        Ok(FileEntry { path, length })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn length(&self) -> u64 {
        self.length
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Layout {
    SingleFile { length: u64 },
    MultiFile { entries: Vec<FileEntry> },
}

impl Layout {
    pub fn is_multi_file(&self) -> bool {
        matches!(self, Layout::MultiFile { .. })
    }

    pub fn total_length(&self) -> u64 {
        match self {
            Layout::SingleFile { length } => *length,
            Layout::MultiFile { entries } => entries.iter().map(FileEntry::length).sum(),
        }
    }
}

/// Piece hashes of a torrent. Only needed for the piece hash verification
#[derive(Debug, PartialEq, Eq)]
pub struct PieceInfo {
    piece_length: u64,
    hashes: Vec<[u8; 20]>,
}

impl PieceInfo {
    /// `pieces` are concatenated 20-byte SHA1 hashes, as stored in a torrent file
    pub fn new(piece_length: u64, pieces: &[u8]) -> Result<Self> {
        if piece_length == 0 {
            return Err(Error::invalid_descriptor("piece length can't be zero"));
        }
        if pieces.len() % 20 != 0 {
            return Err(Error::invalid_descriptor(format!(
                "length of the 'pieces' field is not a multiple of 20: {}",
                pieces.len()
            )));
        }

        let hashes = pieces
            .chunks_exact(20)
            .map(|chunk| {
                let mut hash = [0; 20];
                hash.copy_from_slice(chunk);
                hash
            })
            .collect();

        Ok(PieceInfo { piece_length, hashes })
    }

    pub fn piece_length(&self) -> u64 {
        self.piece_length
    }

    pub fn hashes(&self) -> &[[u8; 20]] {
        &self.hashes
    }
}

/// Decoded form of a torrent file.
///
/// Two descriptors are equal iff their info hashes are equal, so duplicate torrent files that
/// describe the same content collapse when put into a set.
#[derive(Debug, Clone)]
pub struct MetainfoDescriptor {
    name: String,
    info_hash: InfoHash,
    layout: Layout,
    source_path: Option<PathBuf>,
    pieces: Option<Arc<PieceInfo>>,
}

impl MetainfoDescriptor {
    pub fn new(name: impl Into<String>, info_hash: InfoHash, layout: Layout) -> Result<Self> {
        let name = name.into();
        validate_name(&name)?;

        Ok(MetainfoDescriptor {
            name,
            info_hash,
            layout,
            source_path: None,
            pieces: None,
        })
    }

    pub fn single_file(name: impl Into<String>, info_hash: InfoHash, length: u64) -> Result<Self> {
        Self::new(name, info_hash, Layout::SingleFile { length })
    }

    pub fn multi_file(
        name: impl Into<String>,
        info_hash: InfoHash,
        entries: impl IntoIterator<Item = FileEntry>,
    ) -> Result<Self> {
        Self::new(
            name,
            info_hash,
            Layout::MultiFile {
                entries: entries.into_iter().collect(),
            },
        )
    }

    /// Builds a descriptor from the raw `length`/`files` fields of a torrent, exactly one of
    /// which has to be present
    pub fn from_parts(
        name: impl Into<String>,
        info_hash: InfoHash,
        length: Option<u64>,
        files: Option<Vec<FileEntry>>,
    ) -> Result<Self> {
        let layout = match (length, files) {
            (Some(length), None) => Layout::SingleFile { length },
            (None, Some(entries)) => Layout::MultiFile { entries },
            (Some(_), Some(_)) => {
                return Err(Error::invalid_descriptor(
                    "both 'length' and 'files' are present",
                ))
            }
            (None, None) => {
                return Err(Error::invalid_descriptor(
                    "both 'length' and 'files' are missing",
                ))
            }
        };

        let descriptor = Self::new(name, info_hash, layout)?;
        descriptor.validate()?;
        Ok(descriptor)
    }

    pub fn with_source_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.source_path = Some(path.into());
        self
    }

    pub fn with_pieces(mut self, pieces: PieceInfo) -> Self {
        self.pieces = Some(Arc::new(pieces));
        self
    }

    /// Checks things that the layout's type can't express, i.e. that a multi-file torrent
    /// actually has files in it
    pub fn validate(&self) -> Result<()> {
        match &self.layout {
            Layout::MultiFile { entries } if entries.is_empty() => Err(Error::invalid_descriptor(format!(
                "multi-file torrent {:?} has no files",
                self.name
            ))),
            _ => Ok(()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn info_hash(&self) -> InfoHash {
        self.info_hash
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn source_path(&self) -> Option<&Path> {
        self.source_path.as_deref()
    }

    pub fn pieces(&self) -> Option<&PieceInfo> {
        self.pieces.as_deref()
    }

    /// Paths (relative to the data's parent directory) and lengths of every file of the torrent
    pub fn expected_files(&self) -> Vec<(PathBuf, u64)> {
        match &self.layout {
            Layout::SingleFile { length } => vec![(PathBuf::from(&self.name), *length)],
            Layout::MultiFile { entries } => entries
                .iter()
                .map(|entry| (Path::new(&self.name).join(entry.path()), entry.length()))
                .collect(),
        }
    }
}

impl PartialEq for MetainfoDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.info_hash == other.info_hash
    }
}

impl Eq for MetainfoDescriptor {}

impl Hash for MetainfoDescriptor {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.info_hash.hash(state)
    }
}

fn validate_name(name: &str) -> Result<()> {
    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(()),
        _ => Err(Error::invalid_descriptor(format!(
            "torrent name must be a single path component: {name:?}"
        ))),
    }
}

/// Result of a search for a single torrent's data
#[derive(Debug, Clone)]
pub struct LocatedData {
    descriptor: MetainfoDescriptor,
    /// Verified directory that contains the torrent's data
    location: Option<PathBuf>,
}

impl LocatedData {
    pub fn new(descriptor: MetainfoDescriptor, location: Option<PathBuf>) -> Self {
        LocatedData { descriptor, location }
    }

    pub fn unmatched(descriptor: MetainfoDescriptor) -> Self {
        LocatedData::new(descriptor, None)
    }

    pub fn descriptor(&self) -> &MetainfoDescriptor {
        &self.descriptor
    }

    pub fn location(&self) -> Option<&Path> {
        self.location.as_deref()
    }

    pub fn is_matched(&self) -> bool {
        self.location.is_some()
    }

    pub fn into_parts(self) -> (MetainfoDescriptor, Option<PathBuf>) {
        (self.descriptor, self.location)
    }
}
