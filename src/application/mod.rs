pub mod handle;
pub mod periscope;
pub mod repository;

#[cfg(test)]
pub(crate) mod testing;

pub use handle::{DownloadEvent, DownloadHandle};
pub use periscope::Periscope;
pub use repository::{DefaultRepository, Repository, RepositoryError, Transfer};
