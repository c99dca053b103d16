use std::{fmt, io};

use serde::{Deserialize, Serialize};
use serde_json::Error as JsonError;
use thiserror::Error;
use tokio::sync::mpsc::error::SendError as TokioSendError;

use crate::event::{Event, SyncMessage};

/// Failure kinds surfaced by the cache, the path resolver and the sync channel.
///
/// Stale paths are an expected condition of a live graph, so none of these are fatal. Callers
/// treat any failure from a resolution as "no path available".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
pub enum NoteGraphError {
    /// Empty or unparseable path. Caller error, never retried.
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Item Not Found: {0}")]
    NotFound(String),
    /// A parent/child edge named by a path does not exist. Absorbed by path repair.
    #[error("Broken path: {0}")]
    BrokenPath(String),
    #[error("No path to root: {0}")]
    Orphan(String),
    #[error("Cycle detected without reaching root: {0}")]
    Cycle(String),
    #[error("Cache changed during resolution: {0}")]
    StaleCache(String),
    #[error("Sync channel error: {0}")]
    Channel(String),
    #[error("File System error: {0}")]
    Io(String),
    #[error("(De)Serialization error: {0}")]
    Serialization(String),
}

impl NoteGraphError {
    /// Whether a fresh attempt against a newer cache revision could succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, NoteGraphError::InvalidInput(_))
    }
}

impl From<toml::de::Error> for NoteGraphError {
    fn from(src: toml::de::Error) -> NoteGraphError {
        NoteGraphError::Serialization(format!("Toml deserialization error: {src}"))
    }
}

impl From<toml::ser::Error> for NoteGraphError {
    fn from(src: toml::ser::Error) -> NoteGraphError {
        NoteGraphError::Serialization(format!("Toml serialization error: {src}"))
    }
}

impl From<JsonError> for NoteGraphError {
    fn from(src: JsonError) -> NoteGraphError {
        NoteGraphError::Serialization(format!("JSON (de)serialization error: {src}"))
    }
}

impl From<io::Error> for NoteGraphError {
    fn from(x: io::Error) -> Self {
        match x.kind() {
            io::ErrorKind::NotFound => NoteGraphError::NotFound(format!("{x}")),
            _ => NoteGraphError::Io(format!("IOError: {}", x.kind())),
        }
    }
}

impl From<fmt::Error> for NoteGraphError {
    fn from(x: fmt::Error) -> Self {
        NoteGraphError::Serialization(format!("{x}"))
    }
}

impl From<TokioSendError<Event>> for NoteGraphError {
    fn from(x: TokioSendError<Event>) -> Self {
        NoteGraphError::Channel(format!(
            "Channel send Error, could not transmit cache event {:?}",
            x.0
        ))
    }
}

impl From<TokioSendError<SyncMessage>> for NoteGraphError {
    fn from(x: TokioSendError<SyncMessage>) -> Self {
        NoteGraphError::Channel(format!(
            "Channel send Error, could not transmit sync message {:?}",
            x.0
        ))
    }
}
