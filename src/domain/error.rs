use thiserror::Error;

use crate::application::RepositoryError;

#[derive(Debug, Error)]
pub enum PeriscopeError {
    #[error("The network is currently unavailable: {0}")]
    NetworkUnavailable(#[source] RepositoryError),

    #[error("The specified resource is not a valid URL: {0}")]
    InvalidSource(String),

    #[error("The specified resource was not found: {0}")]
    ResourceNotFound(#[source] RepositoryError),

    #[error("The specified resource failed to download: {0}")]
    DownloadFailure(#[source] RepositoryError),

    #[error("Another download is already in progress")]
    DownloadInProgress,
}
