use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::handle::{DownloadEvent, DownloadHandle};
use super::repository::{DefaultRepository, Repository, RepositoryError, Transfer};
use crate::api::TransportError;
use crate::config::PeriscopeConfig;
use crate::domain::{DownloadFile, PeriscopeError};
use crate::utils::resolve_in_current_dir;

const EVENT_BUFFER: usize = 64;

/// Validates sources, offers to restart an incomplete download, and runs
/// downloads against a [`Repository`].
#[derive(Clone)]
pub struct Periscope {
    repo: Arc<dyn Repository>,
    active: Arc<AtomicBool>,
}

impl Periscope {
    pub fn new(config: PeriscopeConfig) -> Result<Self, PeriscopeError> {
        let repo = DefaultRepository::new(config).map_err(PeriscopeError::DownloadFailure)?;
        Ok(Self::with_repository(repo))
    }

    pub fn with_repository(repo: impl Repository) -> Self {
        Self {
            repo: Arc::new(repo),
            active: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Checks that `source` parses as a URL. Nothing is fetched.
    pub async fn validate(&self, source: &str) -> Result<DownloadFile, PeriscopeError> {
        let file = DownloadFile::parse(source)?;
        debug!(source = %file.source(), "validated source");
        Ok(file)
    }

    /// The incomplete download left behind by an earlier run, if any.
    ///
    /// The record stays in place until a download of it succeeds.
    pub async fn restart(&self) -> Result<Option<DownloadFile>, PeriscopeError> {
        let source = self.repo.incomplete_download().await.map_err(map_error)?;
        Ok(source.map(DownloadFile::new))
    }

    /// Starts downloading `file`.
    ///
    /// `destination` is resolved against the working directory; without one
    /// the file lands in the working directory under the source's file name.
    /// Only one download may run at a time.
    pub async fn download(
        &self,
        mut file: DownloadFile,
        destination: Option<&str>,
    ) -> Result<DownloadHandle, PeriscopeError> {
        let slot = ActiveSlot::acquire(&self.active).ok_or(PeriscopeError::DownloadInProgress)?;

        let destination = resolve_in_current_dir(file.source(), destination)
            .map_err(|e| PeriscopeError::DownloadFailure(e.into()))?;
        file.set_destination(destination);

        let transfer = self.repo.download(file).await;

        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let cancel = CancellationToken::new();
        tokio::spawn(drive(transfer, tx, cancel.clone(), slot));

        Ok(DownloadHandle::new(rx, cancel))
    }
}

/// Forwards `transfer` to the handle until it ends, fails, or is cancelled.
/// Dropping the transfer is what aborts the request.
async fn drive(
    mut transfer: Transfer,
    tx: mpsc::Sender<DownloadEvent>,
    cancel: CancellationToken,
    _slot: ActiveSlot,
) {
    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!("download cancelled");
                return;
            }
            next = transfer.next() => next,
        };

        let Some(item) = next else {
            return;
        };
        let failed = item.is_err();
        let event = item.map_err(map_error);
        if let Err(e) = &event {
            warn!(error = %e, "download failed");
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!("download cancelled");
                return;
            }
            sent = tx.send(event) => {
                if sent.is_err() {
                    return;
                }
            }
        }

        if failed {
            return;
        }
    }
}

/// Engine errors keep their cause; only the outer kind is chosen here.
fn map_error(error: RepositoryError) -> PeriscopeError {
    match error {
        RepositoryError::Transport(TransportError::Offline(_)) => {
            PeriscopeError::NetworkUnavailable(error)
        }
        RepositoryError::Transport(TransportError::NotFound(_)) => {
            PeriscopeError::ResourceNotFound(error)
        }
        other => PeriscopeError::DownloadFailure(other),
    }
}

/// Claim on the single download slot, released on drop.
struct ActiveSlot(Arc<AtomicBool>);

impl ActiveSlot {
    fn acquire(flag: &Arc<AtomicBool>) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag.clone()))
    }
}

impl Drop for ActiveSlot {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}
