//! Disposable, cancellable HTTP downloads
//!
//! [`Download::new`] starts fetching immediately into a temp file in the
//! requested directory. The result is delivered exactly once: await
//! [`Download::done`] to receive it, or call [`Download::stop`] to cancel.
//! On success the caller owns the returned [`NamedTempFile`]; dropping it
//! removes the data from disk. A cancelled or undelivered fetch removes its
//! partial file itself, so exactly one of delivery and cleanup ever happens.

use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// Errors a download can complete with
#[derive(Error, Debug)]
pub enum DownloadError {
    /// Transport, filesystem, or task failure
    #[error("cannot download {url:?}: {reason}")]
    Fetch { url: String, reason: String },

    /// The server answered with a non-OK status
    #[error("cannot download {url:?}: bad http response: {status}")]
    BadStatus {
        url: String,
        status: reqwest::StatusCode,
    },
}

/// Completed download outcome: the fetched file, rewound to the start, or
/// the error that stopped it.
pub type Status = std::result::Result<NamedTempFile, DownloadError>;

/// An in-flight download
pub struct Download {
    url: String,
    done: oneshot::Receiver<Status>,
    stop: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl Download {
    /// Start downloading `url` into a temp file under `dir` (the system
    /// temp directory when `None`).
    pub fn new(url: impl Into<String>, dir: Option<PathBuf>) -> Download {
        let url = url.into();
        let (done_tx, done_rx) = oneshot::channel();
        let (stop_tx, stop_rx) = oneshot::channel();
        let task = tokio::spawn(run(url.clone(), dir, done_tx, stop_rx));
        Download {
            url,
            done: done_rx,
            stop: stop_tx,
            task,
        }
    }

    /// Wait for the single-shot completion status.
    ///
    /// The caller owns the returned file; dropping it removes the data.
    pub async fn done(self) -> Status {
        match self.done.await {
            Ok(status) => status,
            Err(_) => Err(DownloadError::Fetch {
                url: self.url,
                reason: "download task failed".to_string(),
            }),
        }
    }

    /// Cancel the download and wait for its cleanup to finish.
    ///
    /// If delivery raced ahead of the cancellation, the fetched file is
    /// discarded and removed; either way nothing is left on disk.
    pub async fn stop(self) {
        let Download {
            url, done, stop, task, ..
        } = self;
        // Dropping the receiver guarantees an already-sent file is
        // discarded (and thereby removed) instead of delivered.
        drop(done);
        let _ = stop.send(());
        if task.await.is_err() {
            tracing::warn!(url = %url, "download task panicked during stop");
        }
    }
}

async fn run(
    url: String,
    dir: Option<PathBuf>,
    done: oneshot::Sender<Status>,
    stop: oneshot::Receiver<()>,
) {
    tokio::select! {
        status = fetch(&url, dir.as_deref()) => {
            // A failed send means the receiver is gone; the temp file is
            // dropped here and removed with it.
            let _ = done.send(status);
        }
        _ = stop => {
            // The fetch future is dropped mid-flight, taking its partial
            // temp file with it.
            tracing::debug!(url = %url, "download cancelled");
        }
    }
}

async fn fetch(url: &str, dir: Option<&Path>) -> Status {
    let mut file = match dir {
        Some(dir) => NamedTempFile::new_in(dir),
        None => NamedTempFile::new(),
    }
    .map_err(|e| fetch_error(url, e))?;

    let mut response = reqwest::get(url).await.map_err(|e| fetch_error(url, e))?;
    if response.status() != reqwest::StatusCode::OK {
        return Err(DownloadError::BadStatus {
            url: url.to_string(),
            status: response.status(),
        });
    }

    while let Some(chunk) = response.chunk().await.map_err(|e| fetch_error(url, e))? {
        file.as_file_mut()
            .write_all(&chunk)
            .map_err(|e| fetch_error(url, e))?;
    }

    file.as_file_mut()
        .seek(SeekFrom::Start(0))
        .map_err(|e| fetch_error(url, e))?;
    Ok(file)
}

fn fetch_error(url: &str, reason: impl std::fmt::Display) -> DownloadError {
    DownloadError::Fetch {
        url: url.to_string(),
        reason: reason.to_string(),
    }
}
