#[macro_use]
pub mod macros;

pub mod data_locator;
pub mod descriptor;
pub mod find;
pub mod locator;
pub mod metainfo;
pub mod util;
pub mod verifier;

mod error;

pub use data_locator::{DataLocator, DataSearch, SearchState};
pub use descriptor::{FileEntry, InfoHash, Layout, LocatedData, MetainfoDescriptor, PieceInfo};
pub use error::{Error, Result};
pub use find::{FindProgress, FindResults, FindService};
pub use locator::FileLocator;
pub use verifier::{DataVerifier, ExistenceVerifier, PieceHashVerifier};
