use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser, Debug)]
#[command(version, about = "Finds data of torrents that is already on disk")]
pub struct Arguments {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Search for the data of every torrent under the given roots
    Find {
        /// Torrent files or directories with torrent files
        #[arg(value_name = "TORRENT", required = true)]
        torrents: Vec<PathBuf>,
        /// Directories to search in
        #[arg(short, long = "root", value_name = "DIR", required = true)]
        roots: Vec<PathBuf>,
        /// Give up on searches still running after this many seconds
        #[arg(short, long, value_name = "SECS")]
        timeout: Option<u64>,
        #[arg(long, value_enum, default_value_t = Verification::Existence)]
        verify: Verification,
        /// Maximum number of searches running at the same time
        #[arg(long, value_name = "N")]
        max_in_flight: Option<usize>,
    },
    /// Check whether a directory contains the data of a torrent
    Verify {
        #[arg(value_name = "TORRENT")]
        torrent: PathBuf,
        /// Directory that contains the torrent's file or top-level directory
        #[arg(value_name = "DIR")]
        candidate: PathBuf,
        #[arg(long, value_enum, default_value_t = Verification::Existence)]
        verify: Verification,
    },
    /// List torrent files that describe the same data
    Dupes {
        #[arg(value_name = "DIR", required = true)]
        dirs: Vec<PathBuf>,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verification {
    /// Every file exists
    Existence,
    /// Every piece hash matches
    Hash,
}
