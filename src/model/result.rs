//! Uniform output record of a metric execution.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

use super::{DatabaseType, ExecutionTask, MetricKind, NodeRole};

/// One result row keyed by column label, in column order.
pub type Row = Map<String, Value>;

/// Successful payload of a metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "shape", rename_all = "lowercase")]
pub enum Payload {
    /// A single value labelled by the metric description or name.
    Scalar {
        label: String,
        value: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        unit: Option<String>,
    },
    /// Labelled rows: one for SINGLE metrics with columns, any number for MULTI.
    Rows { columns: Vec<String>, rows: Vec<Row> },
}

impl Payload {
    /// Column labels; a scalar has exactly one.
    pub fn columns(&self) -> Vec<String> {
        match self {
            Payload::Scalar { label, .. } => vec![label.clone()],
            Payload::Rows { columns, .. } => columns.clone(),
        }
    }

    /// Rows as label -> value maps; a scalar is one single-entry row.
    pub fn rows(&self) -> Vec<Row> {
        match self {
            Payload::Scalar { label, value, .. } => {
                let mut row = Row::new();
                row.insert(label.clone(), value.clone());
                vec![row]
            }
            Payload::Rows { rows, .. } => rows.clone(),
        }
    }

    pub fn value(&self) -> Option<&Value> {
        match self {
            Payload::Scalar { value, .. } => Some(value),
            Payload::Rows { .. } => None,
        }
    }

    pub fn row_count(&self) -> usize {
        match self {
            Payload::Scalar { .. } => 1,
            Payload::Rows { rows, .. } => rows.len(),
        }
    }
}

/// Why a task produced no payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The host was already known to be unreachable.
    Skipped,
    Connection,
    Execution,
    Timeout,
    /// No driver exists for the database type.
    DriverUnavailable,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureKind::Skipped => "skipped",
            FailureKind::Connection => "connection",
            FailureKind::Execution => "execution",
            FailureKind::Timeout => "timeout",
            FailureKind::DriverUnavailable => "driver_unavailable",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum Outcome {
    Success { payload: Payload },
    Failure { kind: FailureKind, message: String },
}

/// One result per executed task, successful or not.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricResult {
    pub system_name: String,
    pub database_name: String,
    /// Masked node address.
    pub node_ip: String,
    pub node_port: u16,
    pub db_type: DatabaseType,
    pub node_role: NodeRole,
    pub metric_name: String,
    pub description: Option<String>,
    pub metric_type: MetricKind,
    pub execute_time: DateTime<Utc>,
    pub collect_time: Option<DateTime<Utc>>,
    pub outcome: Outcome,
}

impl MetricResult {
    /// Open a result for a task that is about to run.
    pub fn start(task: &ExecutionTask) -> PendingResult {
        let database_name = task
            .node
            .database_name()
            .map(str::to_string)
            .unwrap_or_else(|| task.system.db_type.to_string());

        PendingResult {
            system_name: task.system.name.clone(),
            database_name,
            node_ip: crate::mask::mask_host(&task.node.host),
            node_port: task.node.port,
            db_type: task.system.db_type,
            node_role: task.node.role,
            metric_name: task.metric.name.clone(),
            description: task.metric.description.clone(),
            metric_type: task.metric.kind,
            execute_time: Utc::now(),
        }
    }

    pub fn success(&self) -> bool {
        matches!(self.outcome, Outcome::Success { .. })
    }

    pub fn payload(&self) -> Option<&Payload> {
        match &self.outcome {
            Outcome::Success { payload } => Some(payload),
            Outcome::Failure { .. } => None,
        }
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        match &self.outcome {
            Outcome::Failure { kind, .. } => Some(*kind),
            Outcome::Success { .. } => None,
        }
    }

    pub fn error_message(&self) -> Option<&str> {
        match &self.outcome {
            Outcome::Failure { message, .. } => Some(message),
            Outcome::Success { .. } => None,
        }
    }

    /// Column labels of the payload, empty on failure.
    pub fn columns(&self) -> Vec<String> {
        self.payload().map(Payload::columns).unwrap_or_default()
    }

    /// Payload rows, empty on failure.
    pub fn rows(&self) -> Vec<Row> {
        self.payload().map(Payload::rows).unwrap_or_default()
    }

    pub fn value(&self) -> Option<&Value> {
        self.payload().and_then(Payload::value)
    }
}

/// A result whose task is still running.
///
/// Finishing consumes it, so a result cannot change once produced.
#[derive(Debug, Clone)]
pub struct PendingResult {
    system_name: String,
    database_name: String,
    node_ip: String,
    node_port: u16,
    db_type: DatabaseType,
    node_role: NodeRole,
    metric_name: String,
    description: Option<String>,
    metric_type: MetricKind,
    execute_time: DateTime<Utc>,
}

impl PendingResult {
    pub fn succeed(self, payload: Payload) -> MetricResult {
        self.finish(Outcome::Success { payload })
    }

    pub fn fail(self, kind: FailureKind, message: impl Into<String>) -> MetricResult {
        self.finish(Outcome::Failure {
            kind,
            message: message.into(),
        })
    }

    fn finish(self, outcome: Outcome) -> MetricResult {
        MetricResult {
            system_name: self.system_name,
            database_name: self.database_name,
            node_ip: self.node_ip,
            node_port: self.node_port,
            db_type: self.db_type,
            node_role: self.node_role,
            metric_name: self.metric_name,
            description: self.description,
            metric_type: self.metric_type,
            execute_time: self.execute_time,
            collect_time: Some(Utc::now()),
            outcome,
        }
    }
}
