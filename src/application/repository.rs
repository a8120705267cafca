use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use futures::{stream, stream::BoxStream, StreamExt};
use tempfile::TempPath;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};
use url::Url;

use crate::api::{ByteStream, HttpClient, Transport, TransportError};
use crate::config::PeriscopeConfig;
use crate::domain::{DownloadFile, ProgressSnapshot};
use crate::state::{StateError, StateStore};

#[derive(Error, Debug)]
pub enum RepositoryError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error(transparent)]
    State(#[from] StateError),
}

pub type Transfer = BoxStream<'static, Result<DownloadFile, RepositoryError>>;

/// Interface for downloading a file from a valid URL
#[async_trait]
pub trait Repository: Send + Sync + 'static {
    /// Marks `file` as in progress, then returns its transfer.
    ///
    /// The stream yields one item per progress update, then the file with its
    /// resolved destination. Dropping the stream cancels the transfer.
    async fn download(&self, file: DownloadFile) -> Transfer;

    /// Source of a download that did not complete successfully.
    async fn incomplete_download(&self) -> Result<Option<Url>, RepositoryError>;
}

pub struct DefaultRepository<T = HttpClient> {
    transport: Arc<T>,
    state: Arc<StateStore>,
    temp_dir: PathBuf,
}

impl DefaultRepository<HttpClient> {
    pub fn new(config: PeriscopeConfig) -> Result<Self, RepositoryError> {
        let transport = HttpClient::new(config.client)?;
        Ok(Self::with_transport(
            transport,
            StateStore::new(config.state_path),
            config.temp_dir,
        ))
    }
}

impl<T: Transport> DefaultRepository<T> {
    pub fn with_transport(transport: T, state: StateStore, temp_dir: impl Into<PathBuf>) -> Self {
        Self {
            transport: Arc::new(transport),
            state: Arc::new(state),
            temp_dir: temp_dir.into(),
        }
    }
}

#[async_trait]
impl<T: Transport> Repository for DefaultRepository<T> {
    async fn download(&self, file: DownloadFile) -> Transfer {
        if let Err(e) = self.state.write(Some(file.source())).await {
            return stream::once(async move { Err(RepositoryError::from(e)) }).boxed();
        }

        info!(%file, "starting download");
        stream::unfold(
            TransferState::Start {
                transport: self.transport.clone(),
                state: self.state.clone(),
                temp_dir: self.temp_dir.clone(),
                file,
            },
            advance::<T>,
        )
        .boxed()
    }

    async fn incomplete_download(&self) -> Result<Option<Url>, RepositoryError> {
        Ok(self.state.read().await?)
    }
}

enum TransferState<T> {
    Start {
        transport: Arc<T>,
        state: Arc<StateStore>,
        temp_dir: PathBuf,
        file: DownloadFile,
    },
    Downloading {
        state: Arc<StateStore>,
        file: DownloadFile,
        body: ByteStream,
        out: tokio::fs::File,
        // Removes the partial file when dropped.
        partial: TempPath,
        received: u64,
        total: Option<u64>,
    },
    Clearing {
        state: Arc<StateStore>,
    },
    Finished,
}

type Step<T> = Option<(Result<DownloadFile, RepositoryError>, TransferState<T>)>;

fn fail<T>(error: impl Into<RepositoryError>) -> Step<T> {
    Some((Err(error.into()), TransferState::Finished))
}

async fn advance<T: Transport>(state: TransferState<T>) -> Step<T> {
    match state {
        TransferState::Start {
            transport,
            state,
            temp_dir,
            mut file,
        } => {
            let (total, body) = match transport.open(file.source()).await {
                Ok(opened) => opened,
                Err(e) => return fail(e),
            };

            let staging_dir = match file.destination().and_then(|d| d.parent()) {
                Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
                _ => temp_dir,
            };
            let (out, partial) = match create_partial(&staging_dir).await {
                Ok(created) => created,
                Err(e) => return fail(e),
            };
            debug!(partial = %partial.display(), ?total, "receiving body");

            file.set_progress(ProgressSnapshot {
                total_units: total.unwrap_or(0),
                completed_units: 0,
            });

            Some((
                Ok(file.clone()),
                TransferState::Downloading {
                    state,
                    file,
                    body,
                    out,
                    partial,
                    received: 0,
                    total,
                },
            ))
        }
        TransferState::Downloading {
            state,
            mut file,
            mut body,
            mut out,
            partial,
            mut received,
            total,
        } => match body.next().await {
            Some(Ok(chunk)) => {
                if let Err(e) = out.write_all(&chunk).await {
                    discard(partial);
                    return fail(e);
                }
                received += chunk.len() as u64;

                // A server that under-reports its length must not push
                // completed past total.
                let total_units = total.map(|t| t.max(received)).unwrap_or(0);
                file.set_progress(ProgressSnapshot {
                    total_units,
                    completed_units: received,
                });

                Some((
                    Ok(file.clone()),
                    TransferState::Downloading {
                        state,
                        file,
                        body,
                        out,
                        partial,
                        received,
                        total,
                    },
                ))
            }
            Some(Err(e)) => {
                discard(partial);
                fail(e)
            }
            None => {
                if let Err(e) = finish_file(out).await {
                    discard(partial);
                    return fail(e);
                }

                match place(partial, file.destination().cloned()).await {
                    Ok(destination) => {
                        info!(source = %file.source(), destination = %destination.display(), received, "download complete");
                        file.set_destination(destination);
                        Some((Ok(file), TransferState::Clearing { state }))
                    }
                    Err(e) => fail(e),
                }
            }
        },
        TransferState::Clearing { state } => {
            if let Err(e) = state.clear().await {
                warn!(error = %e, "failed to clear in-progress download");
            }
            None
        }
        TransferState::Finished => None,
    }
}

async fn create_partial(dir: &Path) -> io::Result<(tokio::fs::File, TempPath)> {
    tokio::fs::create_dir_all(dir).await?;
    let dir = dir.to_path_buf();
    let named = tokio::task::spawn_blocking(move || {
        tempfile::Builder::new()
            .prefix(".periscope-")
            .suffix(".part")
            .tempfile_in(dir)
    })
    .await
    .map_err(io::Error::other)??;
    let (file, path) = named.into_parts();
    Ok((tokio::fs::File::from_std(file), path))
}

async fn finish_file(mut out: tokio::fs::File) -> io::Result<()> {
    out.flush().await?;
    out.sync_all().await
}

/// Moves the finished partial onto `destination`, replacing any existing
/// file. With no destination the partial is kept where it is.
async fn place(partial: TempPath, destination: Option<PathBuf>) -> io::Result<PathBuf> {
    match destination {
        Some(destination) => {
            if let Some(parent) = destination.parent() {
                if !parent.as_os_str().is_empty() {
                    tokio::fs::create_dir_all(parent).await?;
                }
            }
            partial.persist(&destination).map_err(|e| e.error)?;
            Ok(destination)
        }
        None => partial.keep().map_err(|e| e.error),
    }
}

fn discard(partial: TempPath) {
    let path = partial.to_path_buf();
    match partial.close() {
        Ok(()) => debug!(partial = %path.display(), "removed partial download"),
        Err(e) => warn!(partial = %path.display(), error = %e, "failed to remove partial download"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::testing::{Script, ScriptedTransport};
    use futures::TryStreamExt;
    use reqwest::StatusCode;

    fn repository(
        transport: ScriptedTransport,
        dir: &Path,
    ) -> DefaultRepository<ScriptedTransport> {
        DefaultRepository::with_transport(
            transport,
            StateStore::new(dir.join("state.json")),
            dir.join("tmp"),
        )
    }

    fn file_to(source: &str, destination: PathBuf) -> DownloadFile {
        let mut file = DownloadFile::parse(source).unwrap();
        file.set_destination(destination);
        file
    }

    fn entries(dir: &Path) -> Vec<PathBuf> {
        match std::fs::read_dir(dir) {
            Ok(rd) => rd.map(|e| e.unwrap().path()).collect(),
            Err(_) => Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_download_moves_file_into_place() {
        let dir = tempfile::tempdir().unwrap();
        let repo = repository(ScriptedTransport::body(vec!["hello ", "world"]), dir.path());
        let destination = dir.path().join("out").join("a.bin");

        let updates: Vec<DownloadFile> = repo
            .download(file_to("http://example.com/a.bin", destination.clone()))
            .await
            .try_collect()
            .await
            .unwrap();

        let last = updates.last().unwrap();
        assert_eq!(last.destination(), Some(&destination));
        assert_eq!(last.size(), 11);
        assert_eq!(std::fs::read(&destination).unwrap(), b"hello world");
        assert_eq!(entries(&dir.path().join("out")), vec![destination]);
        assert_eq!(repo.incomplete_download().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_progress_is_monotonic_and_bounded() {
        let dir = tempfile::tempdir().unwrap();
        let repo = repository(
            ScriptedTransport::body(vec!["aaaa", "bbbb", "cc"]),
            dir.path(),
        );

        let updates: Vec<DownloadFile> = repo
            .download(file_to("http://example.com/a.bin", dir.path().join("a.bin")))
            .await
            .try_collect()
            .await
            .unwrap();

        let completed: Vec<u64> = updates
            .iter()
            .map(|f| f.progress().unwrap().completed_units)
            .collect();
        assert_eq!(completed, vec![0, 4, 8, 10, 10]);
        for update in &updates {
            let progress = update.progress().unwrap();
            assert!(progress.completed_units <= progress.total_units);
            assert_eq!(update.size(), progress.total_units);
        }
    }

    #[tokio::test]
    async fn test_total_is_raised_when_server_under_reports() {
        let dir = tempfile::tempdir().unwrap();
        let transport = ScriptedTransport {
            total: Some(2),
            script: Script::Body(vec!["abc", "def"]),
        };
        let repo = repository(transport, dir.path());

        let updates: Vec<DownloadFile> = repo
            .download(file_to("http://example.com/a.bin", dir.path().join("a.bin")))
            .await
            .try_collect()
            .await
            .unwrap();

        let last = updates.last().unwrap().progress().unwrap();
        assert_eq!(last.completed_units, 6);
        assert_eq!(last.total_units, 6);
    }

    #[tokio::test]
    async fn test_unknown_length_reports_zero_total() {
        let dir = tempfile::tempdir().unwrap();
        let transport = ScriptedTransport {
            total: None,
            script: Script::Body(vec!["abc"]),
        };
        let repo = repository(transport, dir.path());

        let updates: Vec<DownloadFile> = repo
            .download(file_to("http://example.com/a.bin", dir.path().join("a.bin")))
            .await
            .try_collect()
            .await
            .unwrap();

        let last = updates.last().unwrap();
        assert_eq!(last.size(), 0);
        assert_eq!(last.progress().unwrap().completed_units, 3);
    }

    #[tokio::test]
    async fn test_download_without_destination_keeps_staged_file() {
        let dir = tempfile::tempdir().unwrap();
        let repo = repository(ScriptedTransport::body(vec!["data"]), dir.path());

        let updates: Vec<DownloadFile> = repo
            .download(DownloadFile::parse("http://example.com/a.bin").unwrap())
            .await
            .try_collect()
            .await
            .unwrap();

        let kept = updates.last().unwrap().destination().unwrap().clone();
        assert!(kept.starts_with(dir.path().join("tmp")));
        assert_eq!(std::fs::read(&kept).unwrap(), b"data");
    }

    #[tokio::test]
    async fn test_download_overwrites_existing_destination() {
        let dir = tempfile::tempdir().unwrap();
        let destination = dir.path().join("a.bin");
        std::fs::write(&destination, b"stale contents").unwrap();
        let repo = repository(ScriptedTransport::body(vec!["fresh"]), dir.path());

        let result: Result<Vec<DownloadFile>, _> = repo
            .download(file_to("http://example.com/a.bin", destination.clone()))
            .await
            .try_collect()
            .await;

        assert!(result.is_ok());
        assert_eq!(std::fs::read(&destination).unwrap(), b"fresh");
    }

    #[tokio::test]
    async fn test_interrupted_transfer_removes_partial_and_keeps_state() {
        let dir = tempfile::tempdir().unwrap();
        let out_dir = dir.path().join("out");
        let transport = ScriptedTransport {
            total: Some(100),
            script: Script::Interrupted(vec!["partial"]),
        };
        let repo = repository(transport, dir.path());

        let mut transfer = repo
            .download(file_to("http://example.com/a.bin", out_dir.join("a.bin")))
            .await;

        let mut saw_error = false;
        while let Some(item) = transfer.next().await {
            if let Err(e) = item {
                assert!(matches!(
                    e,
                    RepositoryError::Transport(TransportError::Interrupted(_))
                ));
                saw_error = true;
            }
        }

        assert!(saw_error);
        assert!(entries(&out_dir).is_empty());
        assert_eq!(
            repo.incomplete_download().await.unwrap(),
            Some(Url::parse("http://example.com/a.bin").unwrap())
        );
    }

    #[tokio::test]
    async fn test_refused_request_creates_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let transport = ScriptedTransport {
            total: None,
            script: Script::Refused(|| TransportError::NotFound(StatusCode::NOT_FOUND)),
        };
        let repo = repository(transport, dir.path());

        let result: Result<Vec<DownloadFile>, _> = repo
            .download(file_to("http://example.com/a.bin", dir.path().join("out/a.bin")))
            .await
            .try_collect()
            .await;

        assert!(matches!(
            result,
            Err(RepositoryError::Transport(TransportError::NotFound(_)))
        ));
        assert!(!dir.path().join("out").exists());
        assert!(repo.incomplete_download().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_partial_is_staged_next_to_destination() {
        let dir = tempfile::tempdir().unwrap();
        let out_dir = dir.path().join("deep").join("out");

        let (_out, partial) = create_partial(&out_dir).await.unwrap();

        assert_eq!(partial.parent(), Some(out_dir.as_path()));
        let name = partial.file_name().unwrap().to_str().unwrap().to_string();
        assert!(name.starts_with(".periscope-") && name.ends_with(".part"));
        assert!(partial.exists());
        drop(partial);
        assert!(entries(&out_dir).is_empty());
    }

    #[tokio::test]
    async fn test_dropping_transfer_removes_partial() {
        let dir = tempfile::tempdir().unwrap();
        let transport = ScriptedTransport {
            total: Some(10),
            script: Script::Stalled,
        };
        let repo = repository(transport, dir.path());
        let out_dir = dir.path().join("out");

        let mut transfer = repo
            .download(file_to("http://example.com/a.bin", out_dir.join("a.bin")))
            .await;
        let first = transfer.next().await.unwrap().unwrap();
        assert_eq!(first.progress().unwrap().completed_units, 0);
        assert_eq!(entries(&out_dir).len(), 1);

        drop(transfer);

        assert!(entries(&out_dir).is_empty());
        assert!(repo.incomplete_download().await.unwrap().is_some());
    }
}
