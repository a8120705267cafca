pub mod error;
pub mod model;

pub use error::PeriscopeError;
pub use model::{DownloadFile, ProgressSnapshot};
