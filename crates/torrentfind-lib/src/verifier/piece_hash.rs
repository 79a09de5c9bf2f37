use std::future::Future;
use std::io::SeekFrom;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use sha1::{Digest, Sha1};
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::task::JoinSet;

use super::util::{find_file_offset, FileInfo};
use super::{DataVerifier, ExistenceVerifier};
use crate::util::piece_size_from_idx;
use crate::{MetainfoDescriptor, PieceInfo};

const MAX_VERIFICATION_MEMORY_USAGE_B: usize = 256_000_000;

/// Recalculates piece hashes of the candidate's data and compares them with the ones stored in
/// the torrent file. Descriptors without piece hashes never verify.
#[derive(Debug, Clone, Copy)]
pub struct PieceHashVerifier {
    max_memory_usage: usize,
}

impl Default for PieceHashVerifier {
    fn default() -> Self {
        PieceHashVerifier {
            max_memory_usage: MAX_VERIFICATION_MEMORY_USAGE_B,
        }
    }
}

impl PieceHashVerifier {
    pub fn new() -> Self {
        PieceHashVerifier::default()
    }

    /// Limits how much memory can be used by pieces that are being hashed at the same time
    pub fn with_max_memory_usage(max_memory_usage: usize) -> Self {
        PieceHashVerifier { max_memory_usage }
    }

    /// Returns the index of the first piece that failed verification, if any
    async fn check_all_pieces(
        &self,
        candidate: &Path,
        descriptor: &MetainfoDescriptor,
        pieces: &PieceInfo,
    ) -> anyhow::Result<Option<u32>> {
        let file_infos: Arc<[FileInfo]> = descriptor
            .expected_files()
            .into_iter()
            .map(|(path, length)| FileInfo {
                path: candidate.join(path),
                length,
            })
            .collect();

        let piece_length = try_into!(pieces.piece_length(), usize)?;
        let torrent_length = try_into!(descriptor.layout().total_length(), usize)?;
        let piece_hashes = pieces.hashes();
        let number_of_pieces = piece_hashes.len();

        if number_of_pieces != torrent_length.div_ceil(piece_length) {
            anyhow::bail!(
                "torrent has {} piece hashes, but its data needs {}",
                number_of_pieces,
                torrent_length.div_ceil(piece_length)
            );
        }

        let max_parallel_hashing_tasks = usize::max(2, self.max_memory_usage / piece_length);
        let number_of_pieces_u32 = try_into!(number_of_pieces, u32)?;

        let mut current_piece_idx = 0;
        let mut smallest_failing_piece: Option<u32> = None;
        let mut piece_hash_verification_tasks = JoinSet::new();
        loop {
            while smallest_failing_piece.is_none()
                && piece_hash_verification_tasks.len() < max_parallel_hashing_tasks
                && current_piece_idx < number_of_pieces_u32
            {
                let expected_hash = *piece_hashes
                    .get(try_into!(current_piece_idx, usize)?)
                    .context("bug: piece hash index is out of bounds")?;

                piece_hash_verification_tasks.spawn(verify_piece_hash(
                    file_infos.clone(),
                    current_piece_idx,
                    piece_length,
                    piece_size_from_idx(number_of_pieces, torrent_length, piece_length, current_piece_idx)?,
                    expected_hash,
                ));

                current_piece_idx += 1;
            }

            let Some(result) = piece_hash_verification_tasks.join_next().await else {
                break;
            };

            match result.context("bug: piece hash verification task panicked?")? {
                Ok((piece_idx, true)) => tracing::trace!(piece_idx, "piece is valid"),
                Ok((piece_idx, false)) => {
                    smallest_failing_piece = Some(smallest_failing_piece.map_or(piece_idx, |idx| idx.min(piece_idx)));
                }
                Err(e) => {
                    piece_hash_verification_tasks.abort_all();
                    return Err(e.context("piece hashing task"));
                }
            }
        }

        Ok(smallest_failing_piece)
    }
}

impl DataVerifier for PieceHashVerifier {
    #[tracing::instrument(level = "debug", skip_all, fields(name = descriptor.name(), ?candidate))]
    async fn verify(&self, candidate: &Path, descriptor: &MetainfoDescriptor) -> bool {
        let Some(pieces) = descriptor.pieces() else {
            tracing::debug!("torrent has no piece hashes, unable to verify its data");
            return false;
        };

        // Files with wrong sizes can't have correct pieces, so don't bother hashing them
        if !ExistenceVerifier::with_size_check().verify(candidate, descriptor).await {
            return false;
        }

        match self.check_all_pieces(candidate, descriptor, pieces).await {
            Ok(None) => true,
            Ok(Some(piece_idx)) => {
                tracing::debug!(piece_idx, "piece hash mismatch");
                false
            }
            Err(e) => {
                tracing::debug!("error while verifying piece hashes: {:#}", e);
                false
            }
        }
    }
}

fn verify_piece_hash(
    file_infos: Arc<[FileInfo]>,
    piece_idx: u32,
    piece_length: usize,
    expected_piece_length: usize,
    expected_hash: [u8; 20],
) -> impl Future<Output = anyhow::Result<(u32, bool)>> {
    async move {
        let global_offset = try_into!(piece_idx, u64)? * try_into!(piece_length, u64)?;
        let mut piece = vec![0; expected_piece_length];
        read_piece(&file_infos, global_offset, &mut piece)
            .await
            .with_context(|| format!("error while reading piece {}", piece_idx))?;

        let calculated_hash: [u8; 20] = Sha1::new_with_prefix(&piece).finalize().into();

        Ok((piece_idx, calculated_hash == expected_hash))
    }
}

/// Fills `piece` with the torrent's data starting at `global_offset`. A piece can span any number
/// of files
async fn read_piece(file_infos: &[FileInfo], global_offset: u64, piece: &mut [u8]) -> anyhow::Result<()> {
    let Some(start) = find_file_offset(file_infos, global_offset) else {
        anyhow::bail!("bug: piece starts past the end of the data?");
    };

    let mut file_idx = start.file_idx;
    let mut offset_into_file = start.offset_into_file;
    let mut filled = 0;
    while filled < piece.len() {
        let file_info = file_infos
            .get(file_idx)
            .context("bug: piece ends past the end of the data?")?;
        let bytes_left_in_file = try_into!(file_info.length - offset_into_file, usize)?;
        let to_read = bytes_left_in_file.min(piece.len() - filled);

        if to_read > 0 {
            let mut file = tokio::fs::File::open(&file_info.path)
                .await
                .with_context(|| format!("error while opening {:?}", file_info.path))?;
            file.seek(SeekFrom::Start(offset_into_file))
                .await
                .context("error while seeking a piece's position in file")?;
            file.read_exact(&mut piece[filled..filled + to_read])
                .await
                .with_context(|| format!("error while reading from {:?}", file_info.path))?;
        }

        filled += to_read;
        file_idx += 1;
        offset_into_file = 0;
    }

    Ok(())
}
