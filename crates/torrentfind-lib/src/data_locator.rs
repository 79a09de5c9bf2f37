use std::fmt;
use std::future::{self, Future};
use std::path::PathBuf;
use std::time::Duration;

use crate::util::Elapsed;
use crate::verifier::{DataVerifier, ExistenceVerifier};
use crate::{FileLocator, LocatedData, MetainfoDescriptor};

const SLOW_SEARCH_THRESHOLD: Duration = Duration::from_secs(5);

/// Lifecycle of a search for a single torrent's data. Every search ends up either matched,
/// unmatched, or cancelled, and never goes back to searching
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchState {
    Pending,
    Searching,
    Verifying,
    Matched,
    Unmatched,
    Cancelled,
}

impl fmt::Display for SearchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self {
            SearchState::Pending => "pending",
            SearchState::Searching => "searching",
            SearchState::Verifying => "verifying",
            SearchState::Matched => "matched",
            SearchState::Unmatched => "unmatched",
            SearchState::Cancelled => "cancelled",
        };
        f.write_str(state)
    }
}

/// Something that can find a torrent's data. [`crate::FindService`] runs one search per torrent
pub trait DataSearch: Send + Sync + 'static {
    fn find(&self, descriptor: MetainfoDescriptor) -> impl Future<Output = LocatedData> + Send;
}

#[derive(Debug)]
pub struct DataLocator<V = ExistenceVerifier> {
    locator: FileLocator,
    verifier: V,
}

impl DataLocator<ExistenceVerifier> {
    pub fn with_existence_check(locator: FileLocator) -> Self {
        DataLocator::new(locator, ExistenceVerifier::new())
    }
}

impl<V: DataVerifier> DataLocator<V> {
    pub fn new(locator: FileLocator, verifier: V) -> Self {
        DataLocator { locator, verifier }
    }

    /// Searches for the torrent's data until `cancel` resolves. A cancelled search is reported as
    /// not found
    #[tracing::instrument(level = "debug", skip_all, fields(name = descriptor.name(), info_hash = %descriptor.info_hash()))]
    pub async fn find_until(&self, descriptor: MetainfoDescriptor, cancel: impl Future<Output = ()>) -> LocatedData {
        let outcome = tokio::select! {
            biased;
            _ = cancel => None,
            location = self.search(&descriptor).with_elapsed("data search", Some(SLOW_SEARCH_THRESHOLD)) => Some(location),
        };

        match outcome {
            Some(location) => LocatedData::new(descriptor, location),
            None => {
                tracing::debug!(state = %SearchState::Cancelled);
                LocatedData::unmatched(descriptor)
            }
        }
    }

    async fn search(&self, descriptor: &MetainfoDescriptor) -> Option<PathBuf> {
        tracing::trace!(state = %SearchState::Searching);
        let candidate = if descriptor.layout().is_multi_file() {
            self.locator.locate_directory(descriptor.name()).await
        } else {
            self.locator.locate_file(descriptor.name()).await
        };

        let candidate = match candidate {
            Ok(Some(candidate)) => candidate,
            Ok(None) => {
                tracing::trace!(state = %SearchState::Unmatched, "nothing with a matching name");
                return None;
            }
            Err(e) => {
                tracing::warn!(state = %SearchState::Unmatched, "search failed: {}", e);
                return None;
            }
        };

        tracing::trace!(state = %SearchState::Verifying, ?candidate);
        if self.verifier.verify(&candidate, descriptor).await {
            tracing::debug!(state = %SearchState::Matched, ?candidate);
            Some(candidate)
        } else {
            tracing::debug!(state = %SearchState::Unmatched, ?candidate, "candidate failed verification");
            None
        }
    }
}

impl<V: DataVerifier + 'static> DataSearch for DataLocator<V> {
    async fn find(&self, descriptor: MetainfoDescriptor) -> LocatedData {
        self.find_until(descriptor, future::pending()).await
    }
}
