//! Durable single-slot record of the source of an incomplete download.
//!
//! The record is a small JSON document, `{"inProgressSource": "<url>"}`.
//! A missing file means no incomplete download is known.

use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use url::Url;

#[derive(Error, Debug)]
pub enum StateError {
    #[error("failed to access state file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to encode state: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Serialize, Deserialize, Debug, Default)]
struct PersistedState {
    #[serde(rename = "inProgressSource", skip_serializing_if = "Option::is_none")]
    in_progress_source: Option<Url>,
}

pub struct StateStore {
    path: PathBuf,
    // Serializes every read and write against the file.
    lock: Mutex<()>,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn read(&self) -> Result<Option<Url>, StateError> {
        let _guard = self.lock.lock().await;

        let content = match fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(StateError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        match serde_json::from_str::<PersistedState>(&content) {
            Ok(state) => Ok(state.in_progress_source),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "ignoring corrupt state file");
                Ok(None)
            }
        }
    }

    pub async fn write(&self, source: Option<&Url>) -> Result<(), StateError> {
        let _guard = self.lock.lock().await;

        match source {
            Some(source) => {
                let state = PersistedState {
                    in_progress_source: Some(source.clone()),
                };
                let json = serde_json::to_vec_pretty(&state)?;
                self.replace(&json).await?;
                debug!(%source, "marked download in progress");
            }
            None => match fs::remove_file(&self.path).await {
                Ok(()) => debug!("cleared in-progress download"),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(source) => {
                    return Err(StateError::Io {
                        path: self.path.clone(),
                        source,
                    })
                }
            },
        }
        Ok(())
    }

    pub async fn clear(&self) -> Result<(), StateError> {
        self.write(None).await
    }

    /// Write-then-rename so readers never observe a torn record.
    async fn replace(&self, contents: &[u8]) -> Result<(), StateError> {
        let io_err = |source: io::Error| StateError::Io {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await.map_err(io_err)?;
            }
        }

        let mut staging = self.path.clone().into_os_string();
        staging.push(".tmp");
        let staging = PathBuf::from(staging);

        fs::write(&staging, contents).await.map_err(io_err)?;
        fs::rename(&staging, &self.path).await.map_err(io_err)?;
        Ok(())
    }
}
