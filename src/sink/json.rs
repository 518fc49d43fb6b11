use std::fs;
use std::path::{Path, PathBuf};

use super::{ResultSink, SinkError};
use crate::model::MetricResult;

/// Collects results in memory and writes them as one pretty JSON array on close.
pub struct JsonFileSink {
    path: PathBuf,
    results: Vec<MetricResult>,
}

impl JsonFileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            results: Vec::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_err(&self, source: std::io::Error) -> SinkError {
        SinkError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

impl ResultSink for JsonFileSink {
    fn name(&self) -> &str {
        "json"
    }

    fn save(&mut self, results: &[MetricResult]) -> Result<(), SinkError> {
        self.results.extend_from_slice(results);
        Ok(())
    }

    fn flush(&mut self) -> Result<(), SinkError> {
        Ok(())
    }

    fn close(&mut self) -> Result<(), SinkError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| self.io_err(e))?;
        }
        let body = serde_json::to_string_pretty(&self.results)?;
        fs::write(&self.path, body).map_err(|e| self.io_err(e))?;
        tracing::info!("Wrote {} results to {}", self.results.len(), self.path.display());
        Ok(())
    }
}
