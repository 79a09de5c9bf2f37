use std::path::PathBuf;

#[derive(Debug)]
pub(super) struct FileInfo {
    pub path: PathBuf,
    pub length: u64,
}

#[derive(Debug, PartialEq, Eq)]
pub(super) struct FileOffset {
    pub file_idx: usize,
    pub offset_into_file: u64,
}

/// Finds the file that contains the byte at `global_offset` of the torrent's data
pub(super) fn find_file_offset(file_infos: &[FileInfo], global_offset: u64) -> Option<FileOffset> {
    let mut file_start = 0;
    for (file_idx, file_info) in file_infos.iter().enumerate() {
        let file_end = file_start + file_info.length;
        // Empty files never contain anything and are skipped by this check
        if global_offset < file_end {
            return Some(FileOffset {
                file_idx,
                offset_into_file: global_offset - file_start,
            });
        }
        file_start = file_end;
    }

    None
}
