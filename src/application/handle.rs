use std::pin::Pin;
use std::task::{Context, Poll};

use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::domain::{DownloadFile, PeriscopeError};

pub type DownloadEvent = Result<DownloadFile, PeriscopeError>;

/// A running download.
///
/// Yields progress updates in the order bytes arrived, then either the
/// completed file or a single error. Cancelling, or dropping the handle,
/// aborts the transfer; no items are yielded after that.
///
/// The incomplete-download record is cleared only after the completed file
/// has been yielded, and the stream ends once that is done. A consumer that
/// cancels between the completed file and end-of-stream may leave the record
/// set even though the file is in place. Drain to `None` (or use
/// [`wait`](Self::wait)) to rely on it being cleared.
pub struct DownloadHandle {
    events: mpsc::Receiver<DownloadEvent>,
    cancel: CancellationToken,
}

impl DownloadHandle {
    pub(crate) fn new(events: mpsc::Receiver<DownloadEvent>, cancel: CancellationToken) -> Self {
        Self { events, cancel }
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Drains the handle and returns the last file it produced.
    ///
    /// `Ok(None)` means the download was cancelled before anything arrived.
    pub async fn wait(mut self) -> Result<Option<DownloadFile>, PeriscopeError> {
        let mut last = None;
        while let Some(event) = self.next().await {
            last = Some(event?);
        }
        Ok(last)
    }
}

impl Stream for DownloadHandle {
    type Item = DownloadEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.cancel.is_cancelled() {
            return Poll::Ready(None);
        }
        self.events.poll_recv(cx)
    }
}

impl Drop for DownloadHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
