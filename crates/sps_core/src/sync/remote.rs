//! Remote status source contract.
//!
//! # Responsibility
//! - Define how the sync core obtains a full snapshot of current proposals.
//! - Provide a file-backed source reading a JSON snapshot.
//!
//! # Invariants
//! - Every successful fetch returns the complete current set, never a delta.

use crate::model::proposal::Proposal;
use async_trait::async_trait;
use log::debug;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Snapshot retrieval failure. The store is never touched when this occurs.
#[derive(Debug)]
pub enum FetchError {
    /// Transport-level failure reported by the source.
    Transport(String),
    /// Payload could not be decoded into proposals.
    Decode(String),
    Io(std::io::Error),
    TimedOut(Duration),
    Cancelled,
}

impl Display for FetchError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transport(message) => write!(f, "remote source failed: {message}"),
            Self::Decode(message) => write!(f, "cannot decode snapshot: {message}"),
            Self::Io(err) => write!(f, "cannot read snapshot: {err}"),
            Self::TimedOut(limit) => {
                write!(f, "snapshot fetch timed out after {}ms", limit.as_millis())
            }
            Self::Cancelled => write!(f, "snapshot fetch cancelled"),
        }
    }
}

impl Error for FetchError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for FetchError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

/// Producer of complete proposal snapshots.
#[async_trait]
pub trait RemoteStatusSource: Send + Sync {
    async fn fetch_snapshot(&self) -> Result<Vec<Proposal>, FetchError>;
}

/// Source reading a JSON array of proposals from a file on every fetch.
#[derive(Debug, Clone)]
pub struct JsonFileSource {
    path: PathBuf,
}

impl JsonFileSource {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl RemoteStatusSource for JsonFileSource {
    async fn fetch_snapshot(&self) -> Result<Vec<Proposal>, FetchError> {
        let raw = tokio::fs::read_to_string(&self.path).await?;
        let proposals = parse_snapshot(&raw)?;
        debug!(
            "event=fetch_snapshot module=remote status=ok source=file proposals={}",
            proposals.len()
        );
        Ok(proposals)
    }
}

/// Decodes a JSON snapshot document.
pub fn parse_snapshot(raw: &str) -> Result<Vec<Proposal>, FetchError> {
    serde_json::from_str(raw).map_err(|err| FetchError::Decode(err.to_string()))
}
