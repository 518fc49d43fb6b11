//! Runtime settings for dbcollect.
//!
//! Loads configuration from environment variables with sensible defaults.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::dispatcher::DispatcherConfig;
use crate::probe::ProbeConfig;

/// Runtime settings for a collection run.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Worker count shared by the probe and collection passes (default: 7)
    pub threads: usize,
    /// Deadline for one task including all retries (default: 30s)
    pub task_timeout: Duration,
    /// Deadline for one connection probe (default: 15s)
    pub probe_timeout: Duration,
    /// Deadline for opening a connection (default: 10s)
    pub connect_timeout: Duration,
    /// Upper bound of the random delay before each probe (default: 100ms)
    pub probe_jitter: Duration,
    /// Directory holding the blacklist and error log (default: "logs")
    pub log_dir: PathBuf,
    pub blacklist_file: String,
    pub error_log_file: String,
    /// SQLite result store, disabled when unset
    pub db_path: Option<PathBuf>,
    /// Results buffered by the SQLite store before a write (default: 500)
    pub sink_batch_size: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            threads: 7,
            task_timeout: Duration::from_secs(30),
            probe_timeout: Duration::from_secs(15),
            connect_timeout: Duration::from_secs(10),
            probe_jitter: Duration::from_millis(100),
            log_dir: PathBuf::from("logs"),
            blacklist_file: "db_conn_blacklist.txt".to_string(),
            error_log_file: "db_conn_error.txt".to_string(),
            db_path: None,
            sink_batch_size: 500,
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `DBCOLLECT_THREADS`: worker count (default: 7)
    /// - `DBCOLLECT_TASK_TIMEOUT_SECS`: per-task deadline (default: 30)
    /// - `DBCOLLECT_PROBE_TIMEOUT_SECS`: per-probe deadline (default: 15)
    /// - `DBCOLLECT_LOG_DIR`: blacklist/error log directory (default: "logs")
    /// - `DBCOLLECT_DB_PATH`: SQLite result store path (default: unset)
    pub fn load() -> Self {
        let mut cfg = Self::default();
        cfg.apply_overrides(|key| env::var(key).ok());
        cfg
    }

    /// Apply overrides from a key lookup; malformed values keep the default.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(threads) = parse_var::<usize, _>(&lookup, "DBCOLLECT_THREADS") {
            if threads > 0 {
                self.threads = threads;
            }
        }

        if let Some(secs) = parse_var::<u64, _>(&lookup, "DBCOLLECT_TASK_TIMEOUT_SECS") {
            if secs > 0 {
                self.task_timeout = Duration::from_secs(secs);
            }
        }

        if let Some(secs) = parse_var::<u64, _>(&lookup, "DBCOLLECT_PROBE_TIMEOUT_SECS") {
            if secs > 0 {
                self.probe_timeout = Duration::from_secs(secs);
            }
        }

        if let Some(dir) = lookup("DBCOLLECT_LOG_DIR").filter(|d| !d.trim().is_empty()) {
            self.log_dir = PathBuf::from(dir);
        }

        if let Some(path) = lookup("DBCOLLECT_DB_PATH").filter(|p| !p.trim().is_empty()) {
            self.db_path = Some(PathBuf::from(path));
        }
    }

    pub fn blacklist_path(&self) -> PathBuf {
        self.log_dir.join(&self.blacklist_file)
    }

    pub fn error_log_path(&self) -> PathBuf {
        self.log_dir.join(&self.error_log_file)
    }

    pub fn dispatcher_config(&self) -> DispatcherConfig {
        DispatcherConfig {
            concurrency: self.threads.max(1),
            task_timeout: self.task_timeout,
        }
    }

    pub fn probe_config(&self) -> ProbeConfig {
        ProbeConfig {
            concurrency: self.threads.max(1),
            timeout: self.probe_timeout,
            jitter: self.probe_jitter,
        }
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Option<T>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    lookup(key).and_then(|v| v.trim().parse().ok())
}
