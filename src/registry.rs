//! Failure registry: hosts that failed to connect and should be skipped.
//!
//! Hosts are kept only as fingerprints. The blacklist file holds one
//! fingerprint per line and survives restarts until [`FailureRegistry::clear`]
//! is called. A second, human-readable error log records which system and
//! masked endpoint failed.

use chrono::Local;
use std::collections::HashSet;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use thiserror::Error;

use crate::fingerprint::Fingerprinter;
use crate::mask::mask_host;
use crate::model::DatabaseType;

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to write {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Default)]
struct RegistryState {
    /// Loaded and newly recorded fingerprints.
    known: HashSet<String>,
    /// Fingerprints recorded since the last persist.
    pending: Vec<String>,
    /// Error log entries (without timestamp) since the last persist.
    pending_errors: Vec<String>,
}

/// Thread-safe record of failed hosts.
pub struct FailureRegistry {
    fingerprinter: Fingerprinter,
    blacklist_path: Option<PathBuf>,
    error_log_path: Option<PathBuf>,
    state: Mutex<RegistryState>,
}

impl FailureRegistry {
    /// A registry that never touches the filesystem.
    pub fn in_memory(fingerprinter: Fingerprinter) -> Self {
        Self {
            fingerprinter,
            blacklist_path: None,
            error_log_path: None,
            state: Mutex::new(RegistryState::default()),
        }
    }

    pub fn with_paths(
        blacklist_path: impl Into<PathBuf>,
        error_log_path: Option<PathBuf>,
        fingerprinter: Fingerprinter,
    ) -> Self {
        Self {
            fingerprinter,
            blacklist_path: Some(blacklist_path.into()),
            error_log_path,
            state: Mutex::new(RegistryState::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn fingerprint(&self, host: &str) -> String {
        self.fingerprinter.fingerprint(host)
    }

    pub fn is_blacklisted(&self, host: &str) -> bool {
        let fp = self.fingerprint(host);
        self.state().known.contains(&fp)
    }

    /// Record a failed host. Returns `true` if it was not already known.
    pub fn record_failure(&self, host: &str) -> bool {
        let fp = self.fingerprint(host);
        let mut state = self.state();
        if state.known.insert(fp.clone()) {
            state.pending.push(fp);
            true
        } else {
            false
        }
    }

    /// Record a failed host together with an error log entry.
    pub fn record_connection_error(
        &self,
        system_name: &str,
        db_type: DatabaseType,
        host: &str,
        port: u16,
    ) -> bool {
        let entry = format!("{}|{}|{}:{}", system_name, db_type, mask_host(host), port);
        let added = self.record_failure(host);
        let mut state = self.state();
        if !state.pending_errors.contains(&entry) {
            state.pending_errors.push(entry);
        }
        added
    }

    /// Merge the persisted blacklist into memory. A missing file is empty.
    pub fn load_from_disk(&self) -> Result<usize, RegistryError> {
        let Some(path) = &self.blacklist_path else {
            return Ok(0);
        };

        let entries = read_entries(path)?;
        let count = entries.len();
        self.state().known.extend(entries);

        tracing::debug!("Loaded {} blacklisted hosts from {}", count, path.display());
        Ok(count)
    }

    /// Append newly recorded failures to disk, skipping lines already there.
    ///
    /// Returns the number of blacklist lines written.
    pub fn persist(&self) -> Result<usize, RegistryError> {
        let mut state = self.state();

        let written = match &self.blacklist_path {
            Some(path) if !state.pending.is_empty() => {
                let existing: HashSet<String> = read_entries(path)?.into_iter().collect();
                let fresh: Vec<String> = state
                    .pending
                    .iter()
                    .filter(|fp| !existing.contains(*fp))
                    .map(|fp| fp.to_string())
                    .collect();
                append_lines(path, &fresh)?;
                fresh.len()
            }
            _ => 0,
        };
        state.pending.clear();

        if let Some(path) = &self.error_log_path {
            if !state.pending_errors.is_empty() {
                let existing = read_error_keys(path)?;
                let stamp = Local::now().format("%Y-%m-%d %H:%M:%S");
                let fresh: Vec<String> = state
                    .pending_errors
                    .iter()
                    .filter(|entry| !existing.contains(*entry))
                    .map(|entry| format!("{}|{}", stamp, entry))
                    .collect();
                append_lines(path, &fresh)?;
            }
        }
        state.pending_errors.clear();

        if written > 0 {
            tracing::info!("Persisted {} new blacklisted hosts", written);
        }
        Ok(written)
    }

    /// Forget every failure, in memory and on disk.
    pub fn clear(&self) -> Result<(), RegistryError> {
        let mut state = self.state();
        *state = RegistryState::default();

        for path in [&self.blacklist_path, &self.error_log_path].into_iter().flatten() {
            match fs::remove_file(path) {
                Ok(()) => tracing::info!("Removed {}", path.display()),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(source) => {
                    return Err(RegistryError::Write {
                        path: path.clone(),
                        source,
                    })
                }
            }
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.state().known.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Known fingerprints, sorted.
    pub fn snapshot(&self) -> Vec<String> {
        let mut fps: Vec<String> = self.state().known.iter().cloned().collect();
        fps.sort();
        fps
    }
}

/// Trimmed lines of a registry file, skipping blanks and `#` comments.
fn read_entries(path: &Path) -> Result<Vec<String>, RegistryError> {
    match fs::read_to_string(path) {
        Ok(content) => Ok(content
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !l.starts_with('#'))
            .map(str::to_string)
            .collect()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(source) => Err(RegistryError::Read {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Error log lines with their leading timestamp removed.
fn read_error_keys(path: &Path) -> Result<HashSet<String>, RegistryError> {
    Ok(read_entries(path)?
        .into_iter()
        .filter_map(|line| line.split_once('|').map(|(_, rest)| rest.to_string()))
        .collect())
}

fn append_lines(path: &Path, lines: &[String]) -> Result<(), RegistryError> {
    if lines.is_empty() {
        return Ok(());
    }

    let write_err = |source: io::Error| RegistryError::Write {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(write_err)?;
    }

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(write_err)?;

    for line in lines {
        writeln!(file, "{}", line).map_err(write_err)?;
    }
    Ok(())
}
