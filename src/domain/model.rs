use std::fmt;
use std::path::PathBuf;

use bytes::Bytes;
use url::Url;

use super::PeriscopeError;

/// Point-in-time byte counts for an in-flight transfer.
///
/// `total_units` is 0 while the server has not announced a length.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProgressSnapshot {
    pub total_units: u64,
    pub completed_units: u64,
}

impl ProgressSnapshot {
    pub fn fraction(&self) -> f32 {
        if self.total_units > 0 {
            self.completed_units as f32 / self.total_units as f32
        } else {
            0.0
        }
    }
}

/// A file to be downloaded, its destination, size, and overall progress.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadFile {
    source: Url,
    destination: Option<PathBuf>,
    size: u64,
    progress: Option<ProgressSnapshot>,
    resume_data: Option<Bytes>,
}

impl DownloadFile {
    pub fn new(source: Url) -> Self {
        Self {
            source,
            destination: None,
            size: 0,
            progress: None,
            resume_data: None,
        }
    }

    /// Syntactic check only; any scheme is accepted and nothing is fetched.
    pub fn parse(source: &str) -> Result<Self, PeriscopeError> {
        Url::parse(source)
            .map(Self::new)
            .map_err(|_| PeriscopeError::InvalidSource(source.to_string()))
    }

    pub fn source(&self) -> &Url {
        &self.source
    }

    pub fn destination(&self) -> Option<&PathBuf> {
        self.destination.as_ref()
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn progress(&self) -> Option<ProgressSnapshot> {
        self.progress
    }

    /// Continuation data from the transport. Never interpreted here.
    pub fn resume_data(&self) -> Option<&Bytes> {
        self.resume_data.as_ref()
    }

    pub(crate) fn set_destination(&mut self, destination: PathBuf) {
        self.destination = Some(destination);
    }

    pub(crate) fn set_progress(&mut self, progress: ProgressSnapshot) {
        self.size = progress.total_units;
        self.progress = Some(progress);
    }
}

impl fmt::Display for DownloadFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.destination {
            Some(destination) => write!(f, "{} -> {}", self.source, destination.display()),
            None => write!(f, "{} -> (unresolved)", self.source),
        }
    }
}
