//! Decoding of torrent files into [`MetainfoDescriptor`]s

use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_bencode::value::Value;
use serde_with::{serde_as, Bytes};
use sha1::{Digest, Sha1};

use crate::descriptor::{FileEntry, InfoHash, MetainfoDescriptor, PieceInfo};
use crate::{Error, Result};

pub const TORRENT_FILE_EXTENSION: &str = ".torrent";

/// Multiple File Mode info
#[derive(Debug, Deserialize)]
pub struct File {
    /// A list containing one or more string elements that together represent the path and filename.
    /// "dir1/dir2/file.ext" -> ["dir1", "dir2", "file.ext"]
    pub path: Vec<String>,
    /// Length of the file in bytes
    pub length: u64,
}

#[serde_as]
#[derive(Debug, Deserialize)]
pub struct Info {
    /// Filename (Single File Mode) / Name of the directory (Multi File Mode)
    pub name: String,
    /// Concatenated piece hashes (20-byte SHA1 hash values). Must be a multiple of 20
    #[serde_as(as = "Bytes")]
    pub pieces: Vec<u8>,
    /// Number of bytes in each piece
    #[serde(rename = "piece length")]
    pub piece_length: u64,
    /// Length of the file in bytes (Single File Mode)
    #[serde(default)]
    pub length: Option<u64>,
    /// A list of Files (Multi File Mode)
    #[serde(default)]
    pub files: Option<Vec<File>>,
}

/// Only the `info` dictionary matters here. It's kept as a raw value, so that the info hash is
/// calculated over every key of the dictionary, including the ones that [`Info`] doesn't know about
#[derive(Debug, Deserialize)]
struct RawMetaInfo {
    info: Value,
}

/// Reads and decodes a torrent file
#[tracing::instrument(level = "debug", err(level = "debug"))]
pub async fn decode(path: &Path) -> Result<MetainfoDescriptor> {
    let contents = tokio::fs::read(path).await?;
    decode_bytes(&contents, Some(path))
}

pub fn decode_bytes(contents: &[u8], source_path: Option<&Path>) -> Result<MetainfoDescriptor> {
    let decoding_error = |source| Error::Decoding {
        path: source_path.map(Path::to_path_buf).unwrap_or_default(),
        source,
    };

    let raw: RawMetaInfo = serde_bencode::from_bytes(contents).map_err(decoding_error)?;
    let info_bytes = serde_bencode::to_bytes(&raw.info).map_err(decoding_error)?;
    let info_hash = InfoHash::new(Sha1::new_with_prefix(&info_bytes).finalize().into());
    let info: Info = serde_bencode::from_bytes(&info_bytes).map_err(decoding_error)?;

    let files = info
        .files
        .map(|files| files.into_iter().map(file_entry).collect::<Result<Vec<_>>>())
        .transpose()?;

    let pieces = PieceInfo::new(info.piece_length, &info.pieces)?;
    let descriptor = MetainfoDescriptor::from_parts(info.name, info_hash, info.length, files)?.with_pieces(pieces);

    Ok(match source_path {
        Some(path) => descriptor.with_source_path(path),
        None => descriptor,
    })
}

fn file_entry(file: File) -> Result<FileEntry> {
    let mut path = PathBuf::new();
    for part in file.path.iter() {
        if part.is_empty() || part.contains(['/', '\\']) {
            return Err(Error::InvalidDescriptor(format!("bad file path component: {:?}", part)));
        }
        path.push(part);
    }

    FileEntry::new(path, file.length)
}
