mod args;
mod progress;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::sync::{mpsc, oneshot};
use torrentfind_lib::metainfo::{self, TORRENT_FILE_EXTENSION};
use torrentfind_lib::{
    DataLocator, DataVerifier, ExistenceVerifier, FileLocator, FindResults, FindService, InfoHash,
    MetainfoDescriptor, PieceHashVerifier,
};
use tracing_subscriber::filter::{EnvFilter, LevelFilter};

use crate::args::{Arguments, Command, Verification};
use crate::progress::ProgressPrinter;

const TRACING_ENV: &str = "TORRENTFIND_LOG";

#[tokio::main]
#[tracing::instrument(err)]
async fn main() -> anyhow::Result<ExitCode> {
    setup_logger();

    let args = Arguments::parse();

    match args.command {
        Command::Find {
            torrents,
            roots,
            timeout,
            verify,
            max_in_flight,
        } => {
            let locator = FileLocator::new(roots).context("invalid search root")?;
            let descriptors = load_descriptors(&torrents).await?;
            let timeout = timeout.map(Duration::from_secs);

            let results = match verify {
                Verification::Existence => {
                    let data_locator = DataLocator::new(locator, ExistenceVerifier::new());
                    find(data_locator, descriptors, timeout, max_in_flight).await?
                }
                Verification::Hash => {
                    let data_locator = DataLocator::new(locator, PieceHashVerifier::new());
                    find(data_locator, descriptors, timeout, max_in_flight).await?
                }
            };

            print_results(results);
            Ok(ExitCode::SUCCESS)
        }
        Command::Verify {
            torrent,
            candidate,
            verify,
        } => {
            let verified = verify_candidate(&torrent, &candidate, verify).await?;

            if verified {
                println!("ok");
                Ok(ExitCode::SUCCESS)
            } else {
                println!("missing");
                Ok(ExitCode::FAILURE)
            }
        }
        Command::Dupes { dirs } => {
            print_duplicates(&dirs).await?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn find<V: DataVerifier + 'static>(
    data_locator: DataLocator<V>,
    descriptors: Vec<MetainfoDescriptor>,
    timeout: Option<Duration>,
    max_in_flight: Option<usize>,
) -> anyhow::Result<FindResults> {
    let (progress_tx, progress_rx) = mpsc::unbounded_channel();
    let mut service = FindService::new(data_locator).with_progress(progress_tx);
    if let Some(max_in_flight) = max_in_flight {
        service = service.with_max_in_flight(max_in_flight);
    }

    let mut printer = ProgressPrinter::new(progress_rx);
    let printer_handle = tokio::spawn(async move { printer.handle().await });

    let (cancel_tx, cancel_rx) = oneshot::channel();
    let canceller_handle = tokio::spawn(cancel_on_interrupt(cancel_tx));

    let results = match timeout {
        Some(timeout) => {
            service
                .find_cancellable_with_timeout(descriptors, cancel_rx, timeout)
                .await
        }
        None => service.find_cancellable(descriptors, cancel_rx).await,
    };
    canceller_handle.abort();

    // The printer exits once the service's progress sender is gone
    drop(service);
    let found = printer_handle.await.context("progress printer task")?;
    tracing::debug!(found, "search finished");

    Ok(results)
}

/// Checks one torrent's data in `candidate`, which has to be an existing directory
async fn verify_candidate(torrent: &Path, candidate: &Path, verify: Verification) -> anyhow::Result<bool> {
    let descriptor = metainfo::decode(torrent).await?;
    let metadata = tokio::fs::metadata(candidate)
        .await
        .with_context(|| format!("error while reading {:?}", candidate))?;
    anyhow::ensure!(metadata.is_dir(), "{:?} is not a directory", candidate);

    let verified = match verify {
        Verification::Existence => ExistenceVerifier::new().verify(candidate, &descriptor).await,
        Verification::Hash => PieceHashVerifier::new().verify(candidate, &descriptor).await,
    };
    Ok(verified)
}

/// Cancels the search on Ctrl-C
async fn cancel_on_interrupt(cancel_tx: oneshot::Sender<()>) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        // Dropping the sender leaves the search running
        tracing::warn!("unable to listen for Ctrl-C: {}", e);
        return;
    }

    tracing::info!("interrupted, stopping the search");
    if cancel_tx.send(()).is_err() {
        tracing::trace!("search is already over");
    }
}

/// Decodes every torrent file, looking into directories for `.torrent` files. Broken torrent files
/// are skipped
async fn load_descriptors(torrents: &[PathBuf]) -> anyhow::Result<Vec<MetainfoDescriptor>> {
    let mut paths = Vec::new();
    for torrent in torrents {
        let metadata = tokio::fs::metadata(torrent)
            .await
            .with_context(|| format!("error while reading {:?}", torrent))?;

        if metadata.is_dir() {
            paths.extend(FileLocator::new([torrent])?.collect(TORRENT_FILE_EXTENSION)?);
        } else {
            paths.push(torrent.clone());
        }
    }

    let mut descriptors = Vec::with_capacity(paths.len());
    for path in paths {
        match metainfo::decode(&path).await {
            Ok(descriptor) => descriptors.push(descriptor),
            Err(e) => tracing::warn!("skipping {:?}: {}", path, e),
        }
    }

    tracing::info!("loaded {} torrent files", descriptors.len());
    Ok(descriptors)
}

fn print_results(results: FindResults) {
    if results.is_cancelled() {
        tracing::warn!(
            "search was interrupted, only {} torrents were resolved before that",
            results.len()
        );
    }
    tracing::info!("{} found, {} not found", results.matched().count(), results.unmatched().count());

    let mut lines: Vec<_> = results
        .into_iter()
        .map(|located| {
            let (descriptor, location) = located.into_parts();
            let location = location.map_or_else(|| "-".to_string(), |location| location.display().to_string());
            (descriptor.name().to_string(), location)
        })
        .collect();
    lines.sort();

    for (name, location) in lines {
        println!("{}\t{}", name, location);
    }
}

async fn print_duplicates(dirs: &[PathBuf]) -> anyhow::Result<()> {
    let locator = FileLocator::new(dirs).context("invalid directory")?;

    let mut by_info_hash: BTreeMap<InfoHash, (String, Vec<PathBuf>)> = BTreeMap::new();
    for path in locator.collect(TORRENT_FILE_EXTENSION)? {
        match metainfo::decode(&path).await {
            Ok(descriptor) => {
                by_info_hash
                    .entry(descriptor.info_hash())
                    .or_insert_with(|| (descriptor.name().to_string(), Vec::new()))
                    .1
                    .push(path);
            }
            Err(e) => tracing::warn!("skipping {:?}: {}", path, e),
        }
    }

    for (info_hash, (name, mut paths)) in by_info_hash {
        if paths.len() < 2 {
            continue;
        }

        paths.sort();
        println!("{}\t{}", info_hash, name);
        for path in paths {
            println!("\t{}", path.display());
        }
    }

    Ok(())
}

fn setup_logger() {
    let env_filter = EnvFilter::builder()
        .with_env_var(TRACING_ENV)
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();

    let subscriber = tracing_subscriber::fmt()
        .compact()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("Error setting a global tracing::subscriber");
}
