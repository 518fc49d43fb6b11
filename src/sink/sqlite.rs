//! SQLite result store.

use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::{params, Connection, Result as SqlResult};
use std::path::Path;

use super::{ResultSink, SinkError};
use crate::model::{MetricResult, Payload};

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.9f";

/// A result row as read back from the store.
#[derive(Debug, Clone)]
pub struct StoredResult {
    pub id: i64,
    pub run_id: String,
    pub system_name: String,
    pub database_name: String,
    pub node_ip: String,
    pub node_port: u16,
    pub db_type: String,
    pub node_role: String,
    pub metric_name: String,
    pub metric_type: String,
    pub success: bool,
    pub failure_kind: Option<String>,
    pub error_message: Option<String>,
    pub payload: Option<Payload>,
    pub execute_time: DateTime<Utc>,
    pub collect_time: Option<DateTime<Utc>>,
}

/// Writes results into a SQLite file, one transaction per batch.
pub struct SqliteResultStore {
    conn: Connection,
    run_id: String,
    batch_size: usize,
    buffer: Vec<MetricResult>,
}

impl SqliteResultStore {
    /// Open (or create) the store at `path`.
    pub fn open<P: AsRef<Path>>(path: P, batch_size: usize) -> Result<Self, SinkError> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn,
            run_id: Utc::now().format("%Y%m%d%H%M%S%3f").to_string(),
            batch_size: batch_size.max(1),
            buffer: Vec::new(),
        };
        store.init()?;
        Ok(store)
    }

    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = run_id.into();
        self
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Results waiting for the next batch write.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    fn init(&self) -> Result<(), SinkError> {
        self.conn
            .execute_batch(include_str!("../../migrations/000001_init.up.sql"))
            .map_err(|e| SinkError::Migration(format!("Migration 1 failed: {}", e)))?;
        Ok(())
    }

    fn write_batch(&mut self) -> Result<(), SinkError> {
        if self.buffer.is_empty() {
            return Ok(());
        }

        {
            let tx = self.conn.transaction()?;
            {
                let mut stmt = tx.prepare(
                    "INSERT INTO metric_results (run_id, system_name, database_name, node_ip, \
                     node_port, db_type, node_role, metric_name, description, metric_type, \
                     success, failure_kind, error_message, payload, execute_time, collect_time) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, \
                     ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
                )?;

                for r in &self.buffer {
                    let payload = r.payload().map(serde_json::to_string).transpose()?;
                    stmt.execute(params![
                        self.run_id,
                        r.system_name,
                        r.database_name,
                        r.node_ip,
                        r.node_port,
                        r.db_type.as_str(),
                        r.node_role.as_str(),
                        r.metric_name,
                        r.description,
                        r.metric_type.as_str(),
                        r.success(),
                        r.failure_kind().map(|k| k.to_string()),
                        r.error_message(),
                        payload,
                        r.execute_time.format(TIME_FORMAT).to_string(),
                        r.collect_time.map(|t| t.format(TIME_FORMAT).to_string()),
                    ])?;
                }
            }
            tx.commit()?;
        }

        tracing::debug!("Wrote {} results to run {}", self.buffer.len(), self.run_id);
        self.buffer.clear();
        Ok(())
    }

    /// All results stored for a run, in insertion order.
    pub fn results_for_run(&self, run_id: &str) -> Result<Vec<StoredResult>, SinkError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, run_id, system_name, database_name, node_ip, node_port, db_type, \
             node_role, metric_name, metric_type, success, failure_kind, error_message, payload, \
             execute_time, collect_time \
             FROM metric_results WHERE run_id = ?1 ORDER BY id ASC",
        )?;

        let results = stmt
            .query_map(params![run_id], |row| {
                let payload: Option<String> = row.get(13)?;
                let execute_time: String = row.get(14)?;
                let collect_time: Option<String> = row.get(15)?;
                Ok(StoredResult {
                    id: row.get(0)?,
                    run_id: row.get(1)?,
                    system_name: row.get(2)?,
                    database_name: row.get(3)?,
                    node_ip: row.get(4)?,
                    node_port: row.get(5)?,
                    db_type: row.get(6)?,
                    node_role: row.get(7)?,
                    metric_name: row.get(8)?,
                    metric_type: row.get(9)?,
                    success: row.get(10)?,
                    failure_kind: row.get(11)?,
                    error_message: row.get(12)?,
                    payload: payload.and_then(|p| serde_json::from_str(&p).ok()),
                    execute_time: parse_db_time(&execute_time).unwrap_or_else(Utc::now),
                    collect_time: collect_time.as_deref().and_then(parse_db_time),
                })
            })?
            .collect::<SqlResult<Vec<_>>>()?;

        Ok(results)
    }

    /// Run ids present in the store, newest first.
    pub fn run_ids(&self) -> Result<Vec<String>, SinkError> {
        let mut stmt = self
            .conn
            .prepare("SELECT run_id FROM metric_results GROUP BY run_id ORDER BY MAX(id) DESC")?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<SqlResult<Vec<String>>>()?;
        Ok(ids)
    }

    pub fn count(&self) -> Result<i64, SinkError> {
        Ok(self
            .conn
            .query_row("SELECT COUNT(*) FROM metric_results", [], |r| r.get(0))?)
    }
}

impl ResultSink for SqliteResultStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    fn save(&mut self, results: &[MetricResult]) -> Result<(), SinkError> {
        for chunk in results.chunks(self.batch_size) {
            self.buffer.extend_from_slice(chunk);
            if self.buffer.len() >= self.batch_size {
                self.write_batch()?;
            }
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<(), SinkError> {
        self.write_batch()
    }
}

fn parse_db_time(s: &str) -> Option<DateTime<Utc>> {
    let formats = [TIME_FORMAT, "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%d %H:%M:%S"];

    for fmt in &formats {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(DateTime::from_naive_utc_and_offset(dt, Utc));
        }
    }

    DateTime::parse_from_rfc3339(s).ok().map(|dt| dt.with_timezone(&Utc))
}
