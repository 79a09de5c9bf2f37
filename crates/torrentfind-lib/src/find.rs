use std::collections::{HashMap, HashSet};
use std::future::{self, Future};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::oneshot;
use tokio::task::{self, JoinError, JoinSet};

use crate::{DataSearch, LocatedData, MetainfoDescriptor, SearchState};

/// Emitted every time one more torrent's data is found
#[derive(Debug, Clone)]
pub struct FindProgress {
    pub found: usize,
    pub total: usize,
    pub descriptor: MetainfoDescriptor,
    pub location: PathBuf,
}

/// Everything a [`FindService`] managed to resolve. When the search was cancelled, torrents whose
/// searches were still running are absent.
#[derive(Debug, Default)]
pub struct FindResults {
    results: Vec<LocatedData>,
    cancelled: bool,
}

impl FindResults {
    pub fn results(&self) -> &[LocatedData] {
        &self.results
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn matched(&self) -> impl Iterator<Item = &LocatedData> {
        self.results.iter().filter(|located| located.is_matched())
    }

    pub fn unmatched(&self) -> impl Iterator<Item = &LocatedData> {
        self.results.iter().filter(|located| !located.is_matched())
    }
}

impl IntoIterator for FindResults {
    type Item = LocatedData;
    type IntoIter = std::vec::IntoIter<LocatedData>;

    fn into_iter(self) -> Self::IntoIter {
        self.results.into_iter()
    }
}

/// Runs one search per torrent concurrently and collects the results as they complete
#[derive(Debug)]
pub struct FindService<S> {
    search: Arc<S>,
    progress: Option<UnboundedSender<FindProgress>>,
    max_in_flight: usize,
}

impl<S: DataSearch> FindService<S> {
    pub fn new(search: S) -> Self {
        FindService {
            search: Arc::new(search),
            progress: None,
            max_in_flight: usize::MAX,
        }
    }

    /// Sends a [`FindProgress`] event for every found torrent. A closed receiver is ignored
    pub fn with_progress(mut self, progress: UnboundedSender<FindProgress>) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Limits how many searches can be running at the same time. Every torrent still gets its own
    /// search, later ones just wait for a free slot
    pub fn with_max_in_flight(mut self, max_in_flight: usize) -> Self {
        self.max_in_flight = max_in_flight.max(1);
        self
    }

    pub async fn find(&self, descriptors: impl IntoIterator<Item = MetainfoDescriptor>) -> FindResults {
        self.find_until(descriptors, future::pending()).await
    }

    /// Same as [`FindService::find`], but stops as soon as something is sent through `cancel`.
    /// Dropping the sender without sending anything doesn't stop the search
    pub async fn find_cancellable(
        &self,
        descriptors: impl IntoIterator<Item = MetainfoDescriptor>,
        cancel: oneshot::Receiver<()>,
    ) -> FindResults {
        self.find_until(descriptors, cancelled_by(cancel)).await
    }

    /// Same as [`FindService::find`], but gives up on searches still running after `timeout`
    pub async fn find_with_timeout(
        &self,
        descriptors: impl IntoIterator<Item = MetainfoDescriptor>,
        timeout: Duration,
    ) -> FindResults {
        self.find_until(descriptors, tokio::time::sleep(timeout)).await
    }

    /// Stops either when something is sent through `cancel` or once `timeout` elapses, whichever
    /// happens first
    pub async fn find_cancellable_with_timeout(
        &self,
        descriptors: impl IntoIterator<Item = MetainfoDescriptor>,
        cancel: oneshot::Receiver<()>,
        timeout: Duration,
    ) -> FindResults {
        let deadline = tokio::time::sleep(timeout);
        let cancelled = async move {
            tokio::select! {
                _ = cancelled_by(cancel) => {},
                _ = deadline => tracing::debug!(?timeout, "deadline reached"),
            }
        };

        self.find_until(descriptors, cancelled).await
    }

    /// Resolves every unique descriptor unless `cancel` resolves first. On cancellation all
    /// running searches are aborted and only the completed ones are returned
    #[tracing::instrument(level = "debug", skip_all, fields(total))]
    pub async fn find_until(
        &self,
        descriptors: impl IntoIterator<Item = MetainfoDescriptor>,
        cancel: impl Future<Output = ()>,
    ) -> FindResults {
        let unique: HashSet<MetainfoDescriptor> = descriptors.into_iter().collect();
        let total = unique.len();
        tracing::Span::current().record("total", total);

        for descriptor in unique.iter() {
            tracing::trace!(state = %SearchState::Pending, name = descriptor.name());
        }
        let mut pending = unique.into_iter();
        let mut progress = Progress {
            results: Vec::with_capacity(total),
            found: 0,
            total,
        };
        let mut in_flight: HashMap<task::Id, MetainfoDescriptor> = HashMap::new();
        let mut search_tasks = JoinSet::new();
        tokio::pin!(cancel);

        loop {
            while search_tasks.len() < self.max_in_flight {
                let Some(descriptor) = pending.next() else {
                    break;
                };
                let search = self.search.clone();
                let task_descriptor = descriptor.clone();
                let handle = search_tasks.spawn(async move { search.find(task_descriptor).await });
                in_flight.insert(handle.id(), descriptor);
            }

            if search_tasks.is_empty() {
                break;
            }

            tokio::select! {
                biased;
                _ = &mut cancel => {
                    tracing::debug!(completed = progress.results.len(), "cancellation requested, aborting searches");
                    search_tasks.abort_all();
                    // Searches that completed before being aborted still count
                    while let Some(search_result) = search_tasks.join_next_with_id().await {
                        if let Some(located) = take_result(search_result, &mut in_flight) {
                            self.record(&mut progress, located);
                        }
                    }
                    return FindResults { results: progress.results, cancelled: true };
                }
                Some(search_result) = search_tasks.join_next_with_id() => {
                    if let Some(located) = take_result(search_result, &mut in_flight) {
                        self.record(&mut progress, located);
                    }
                }
            }
        }

        FindResults {
            results: progress.results,
            cancelled: false,
        }
    }

    fn record(&self, progress: &mut Progress, located: LocatedData) {
        if let Some(location) = located.location() {
            progress.found += 1;
            tracing::debug!("{}/{} found", progress.found, progress.total);
            self.report_progress(progress.found, progress.total, &located, location.to_path_buf());
        }

        progress.results.push(located);
    }

    fn report_progress(&self, found: usize, total: usize, located: &LocatedData, location: PathBuf) {
        let Some(progress) = &self.progress else {
            return;
        };

        let event = FindProgress {
            found,
            total,
            descriptor: located.descriptor().clone(),
            location,
        };
        if progress.send(event).is_err() {
            tracing::trace!("progress receiver is gone");
        }
    }
}

struct Progress {
    results: Vec<LocatedData>,
    found: usize,
    total: usize,
}

/// Resolves once something is sent through `cancel`. A dropped sender never cancels anything
async fn cancelled_by(cancel: oneshot::Receiver<()>) {
    if cancel.await.is_err() {
        future::pending::<()>().await;
    }
}

/// Turns a joined search task into its result. An aborted search has none, while a panicked one is
/// reported as not found
fn take_result(
    search_result: Result<(task::Id, LocatedData), JoinError>,
    in_flight: &mut HashMap<task::Id, MetainfoDescriptor>,
) -> Option<LocatedData> {
    match search_result {
        Ok((id, located)) => {
            in_flight.remove(&id);
            Some(located)
        }
        Err(e) if e.is_cancelled() => {
            in_flight.remove(&e.id());
            None
        }
        Err(e) => {
            tracing::error!("bug: search task failed: {}", e);
            in_flight.remove(&e.id()).map(LocatedData::unmatched)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use tokio::sync::mpsc;

    use super::*;
    use crate::{DataLocator, FileLocator, InfoHash};

    fn descriptor(idx: u8) -> MetainfoDescriptor {
        MetainfoDescriptor::single_file(format!("file{}", idx), InfoHash::new([idx; 20]), 1).expect("valid descriptor")
    }

    /// Takes `delay` to search for anything and finds only torrents listed in `found`
    #[derive(Default)]
    struct DelayedSearch {
        delays: HashMap<InfoHash, Duration>,
        found: HashSet<InfoHash>,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl DelayedSearch {
        fn delay(mut self, descriptor: &MetainfoDescriptor, delay: Duration) -> Self {
            self.delays.insert(descriptor.info_hash(), delay);
            self
        }

        fn found(mut self, descriptor: &MetainfoDescriptor) -> Self {
            self.found.insert(descriptor.info_hash());
            self
        }
    }

    impl DataSearch for DelayedSearch {
        async fn find(&self, descriptor: MetainfoDescriptor) -> LocatedData {
            let in_flight = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(in_flight, Ordering::SeqCst);

            let delay = self.delays.get(&descriptor.info_hash()).copied().unwrap_or(Duration::ZERO);
            tokio::time::sleep(delay).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            let location = self
                .found
                .contains(&descriptor.info_hash())
                .then(|| PathBuf::from("/data"));
            LocatedData::new(descriptor, location)
        }
    }

    fn ten_with_three_fast() -> (Vec<MetainfoDescriptor>, DelayedSearch) {
        let descriptors: Vec<_> = (0..10).map(descriptor).collect();
        let search = descriptors.iter().enumerate().fold(DelayedSearch::default(), |search, (idx, d)| {
            let delay = if idx < 3 { 1 } else { 10 };
            search.delay(d, Duration::from_secs(delay)).found(d)
        });
        (descriptors, search)
    }

    #[tokio::test]
    async fn every_descriptor_gets_a_result() {
        let descriptors: Vec<_> = (0..5).map(descriptor).collect();
        let search = DelayedSearch::default().found(&descriptors[1]).found(&descriptors[3]);

        let results = FindService::new(search).find(descriptors.clone()).await;

        assert!(!results.is_cancelled());
        assert_eq!(results.len(), 5);
        assert_eq!(results.matched().count(), 2);
        assert_eq!(results.unmatched().count(), 3);
        let returned: HashSet<_> = results.into_iter().map(|located| located.into_parts().0).collect();
        assert_eq!(returned, descriptors.into_iter().collect());
    }

    #[tokio::test]
    async fn duplicate_metainfo_files_collapse() {
        let original = descriptor(1);
        let copy = MetainfoDescriptor::single_file("renamed", original.info_hash(), 1).expect("valid descriptor");

        let results = FindService::new(DelayedSearch::default()).find([original, copy]).await;

        assert_eq!(results.len(), 1);
    }

    #[tokio::test]
    async fn empty_input_resolves_immediately() {
        let results = FindService::new(DelayedSearch::default()).find(Vec::new()).await;

        assert!(results.is_empty());
        assert!(!results.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_returns_completed_searches() {
        let (descriptors, search) = ten_with_three_fast();
        let service = FindService::new(search);
        let (cancel_tx, cancel_rx) = oneshot::channel();

        let find = tokio::spawn(async move { service.find_cancellable(descriptors, cancel_rx).await });
        tokio::time::sleep(Duration::from_secs(5)).await;
        cancel_tx.send(()).expect("find is still running");

        let results = find.await.expect("find task panicked");
        assert!(results.is_cancelled());
        assert_eq!(results.len(), 3);
        assert!(results
            .results()
            .iter()
            .all(|located| located.descriptor().info_hash().as_bytes()[0] < 3));
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_cancel_sender_does_not_cancel() {
        let (descriptors, search) = ten_with_three_fast();
        let (cancel_tx, cancel_rx) = oneshot::channel();
        drop(cancel_tx);

        let results = FindService::new(search).find_cancellable(descriptors, cancel_rx).await;

        assert!(!results.is_cancelled());
        assert_eq!(results.len(), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_is_relative_to_the_call() {
        let (descriptors, search) = ten_with_three_fast();

        let results = FindService::new(search)
            .find_with_timeout(descriptors, Duration::from_secs(5))
            .await;

        assert!(results.is_cancelled());
        assert_eq!(results.len(), 3);
    }

    #[tokio::test]
    async fn progress_is_reported_for_every_match() {
        let descriptors: Vec<_> = (0..4).map(descriptor).collect();
        let search = DelayedSearch::default()
            .found(&descriptors[0])
            .found(&descriptors[1])
            .found(&descriptors[2]);
        let (progress_tx, mut progress_rx) = mpsc::unbounded_channel();

        let results = FindService::new(search)
            .with_progress(progress_tx)
            .find(descriptors)
            .await;

        let mut events = Vec::new();
        while let Ok(event) = progress_rx.try_recv() {
            events.push(event);
        }

        assert_eq!(results.matched().count(), 3);
        assert_eq!(events.iter().map(|event| event.found).collect::<Vec<_>>(), vec![1, 2, 3]);
        assert!(events.iter().all(|event| event.total == 4));
        assert!(events.iter().all(|event| event.location == PathBuf::from("/data")));
    }

    #[tokio::test]
    async fn closed_progress_receiver_does_not_change_results() {
        let descriptors: Vec<_> = (0..3).map(descriptor).collect();
        let search = DelayedSearch::default().found(&descriptors[0]);
        let (progress_tx, progress_rx) = mpsc::unbounded_channel();
        drop(progress_rx);

        let results = FindService::new(search)
            .with_progress(progress_tx)
            .find(descriptors)
            .await;

        assert_eq!(results.len(), 3);
        assert_eq!(results.matched().count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn in_flight_searches_are_bounded() {
        let descriptors: Vec<_> = (0..6).map(descriptor).collect();
        let search = descriptors
            .iter()
            .fold(DelayedSearch::default(), |search, d| search.delay(d, Duration::from_secs(1)));
        let search = Arc::new(search);

        let service = FindService {
            search: search.clone(),
            progress: None,
            max_in_flight: usize::MAX,
        }
        .with_max_in_flight(2);
        let results = service.find(descriptors).await;

        assert_eq!(results.len(), 6);
        assert_eq!(search.max_in_flight.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn repeated_searches_agree() {
        let root = tempfile::tempdir().expect("failed to create a temp dir");
        fs::write(root.path().join("file1"), b"x").expect("failed to create a file");
        fs::write(root.path().join("file3"), b"x").expect("failed to create a file");
        let descriptors: Vec<_> = (0..5).map(descriptor).collect();

        let locator = FileLocator::new([root.path()]).expect("valid root");
        let service = FindService::new(DataLocator::with_existence_check(locator));

        let outcomes = |results: FindResults| -> HashMap<InfoHash, bool> {
            results
                .into_iter()
                .map(|located| (located.descriptor().info_hash(), located.is_matched()))
                .collect()
        };
        let first = outcomes(service.find(descriptors.clone()).await);
        let second = outcomes(service.find(descriptors).await);

        assert_eq!(first, second);
        assert_eq!(first.values().filter(|matched| **matched).count(), 2);
    }

    /// Cancels the whole search while finding the first torrent, the rest never finish
    struct CancellingSearch {
        cancel_tx: std::sync::Mutex<Option<oneshot::Sender<()>>>,
    }

    impl DataSearch for CancellingSearch {
        async fn find(&self, descriptor: MetainfoDescriptor) -> LocatedData {
            if descriptor.info_hash().as_bytes()[0] != 0 {
                future::pending::<()>().await;
            }

            let cancel_tx = self.cancel_tx.lock().expect("poisoned lock").take();
            if let Some(cancel_tx) = cancel_tx {
                cancel_tx.send(()).expect("find is still running");
            }
            LocatedData::new(descriptor, Some(PathBuf::from("/data")))
        }
    }

    /// Panics while searching for the second torrent
    struct PanickingSearch;

    impl DataSearch for PanickingSearch {
        async fn find(&self, descriptor: MetainfoDescriptor) -> LocatedData {
            if descriptor.info_hash().as_bytes()[0] == 1 {
                panic!("search blew up");
            }
            LocatedData::new(descriptor, Some(PathBuf::from("/data")))
        }
    }

    #[tokio::test]
    async fn searches_completed_before_cancellation_are_kept() {
        let (cancel_tx, cancel_rx) = oneshot::channel();
        let search = CancellingSearch {
            cancel_tx: std::sync::Mutex::new(Some(cancel_tx)),
        };
        let (progress_tx, mut progress_rx) = mpsc::unbounded_channel();

        let results = FindService::new(search)
            .with_progress(progress_tx)
            .find_cancellable((0..3).map(descriptor), cancel_rx)
            .await;

        assert!(results.is_cancelled());
        assert_eq!(results.len(), 1);
        assert_eq!(results.matched().count(), 1);
        assert_eq!(results.results()[0].descriptor(), &descriptor(0));
        assert_eq!(progress_rx.try_recv().expect("match was reported").found, 1);
    }

    #[tokio::test]
    async fn panicked_search_counts_as_not_found() {
        let results = FindService::new(PanickingSearch).find((0..3).map(descriptor)).await;

        assert!(!results.is_cancelled());
        assert_eq!(results.len(), 3);
        assert_eq!(results.matched().count(), 2);
        let unmatched: Vec<_> = results.unmatched().map(|located| located.descriptor().clone()).collect();
        assert_eq!(unmatched, vec![descriptor(1)]);
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_applies_without_a_cancel_request() {
        let (descriptors, search) = ten_with_three_fast();
        let (_cancel_tx, cancel_rx) = oneshot::channel();

        let results = FindService::new(search)
            .find_cancellable_with_timeout(descriptors, cancel_rx, Duration::from_secs(5))
            .await;

        assert!(results.is_cancelled());
        assert_eq!(results.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_request_beats_the_deadline() {
        let (descriptors, search) = ten_with_three_fast();
        let service = FindService::new(search);
        let (cancel_tx, cancel_rx) = oneshot::channel();

        let find = tokio::spawn(async move {
            service
                .find_cancellable_with_timeout(descriptors, cancel_rx, Duration::from_secs(60))
                .await
        });
        tokio::time::sleep(Duration::from_secs(5)).await;
        cancel_tx.send(()).expect("find is still running");

        let results = find.await.expect("find task panicked");
        assert!(results.is_cancelled());
        assert_eq!(results.len(), 3);
    }
}
