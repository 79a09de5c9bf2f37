use tokio::sync::mpsc::UnboundedReceiver;
use torrentfind_lib::FindProgress;

/// Logs "N/M found" lines while a search is running. Exits once the search drops its sender
pub struct ProgressPrinter {
    rx: UnboundedReceiver<FindProgress>,
}

impl ProgressPrinter {
    pub fn new(rx: UnboundedReceiver<FindProgress>) -> Self {
        ProgressPrinter { rx }
    }

    pub async fn handle(&mut self) -> usize {
        let mut last_found = 0;
        while let Some(FindProgress {
            found,
            total,
            descriptor,
            location,
        }) = self.rx.recv().await
        {
            tracing::info!("{}/{} found - {} in {}", found, total, descriptor.name(), location.display());
            last_found = found;
        }

        tracing::debug!("search is over, stopping the progress printer");
        last_found
    }
}
