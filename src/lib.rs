//! Download a single remote resource to a local destination.
//!
//! [`Periscope`] validates sources, streams progress for a running download,
//! and remembers which download was left incomplete so a later run can offer
//! to start it again.

pub mod api;
pub mod application;
pub mod config;
pub mod domain;
pub mod state;
pub mod utils;

pub use application::{DownloadHandle, Periscope, Repository};
pub use config::PeriscopeConfig;
pub use domain::{DownloadFile, PeriscopeError, ProgressSnapshot};
