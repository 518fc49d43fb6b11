//! Result sinks.
//!
//! The engine hands every collected result to each configured sink. Sinks
//! may buffer; `close` must leave everything written.

mod json;
mod sqlite;

pub use json::JsonFileSink;
pub use sqlite::{SqliteResultStore, StoredResult};

use std::path::PathBuf;
use thiserror::Error;

use crate::model::MetricResult;

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Migration error: {0}")]
    Migration(String),
    #[error("failed to write {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Batch-oriented destination for metric results.
pub trait ResultSink: Send {
    fn name(&self) -> &str;

    fn save(&mut self, results: &[MetricResult]) -> Result<(), SinkError>;

    fn flush(&mut self) -> Result<(), SinkError>;

    /// Flush and release the destination.
    fn close(&mut self) -> Result<(), SinkError> {
        self.flush()
    }
}
