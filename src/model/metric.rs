//! Metric definitions loaded from the metrics catalogue.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use super::DatabaseType;

/// Result shape of a metric query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MetricKind {
    /// One value, or one row when columns are declared.
    Single,
    /// Any number of rows.
    Multi,
}

impl MetricKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "SINGLE" => Some(Self::Single),
            "MULTI" => Some(Self::Multi),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Single => "SINGLE",
            Self::Multi => "MULTI",
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which nodes of a system a metric runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    First,
    #[default]
    All,
    Master,
    Standby,
}

impl ExecutionMode {
    /// Parse a configured mode.
    ///
    /// A missing mode means `all`. The retired `role` mode quietly becomes
    /// `first`; anything unrecognised becomes `first` with a warning.
    pub fn normalize(raw: Option<&str>) -> Self {
        let Some(raw) = raw.map(str::trim).filter(|r| !r.is_empty()) else {
            return Self::All;
        };

        match raw.to_ascii_lowercase().as_str() {
            "first" => Self::First,
            "all" => Self::All,
            "master" => Self::Master,
            "standby" => Self::Standby,
            "role" => {
                tracing::debug!("Execution mode 'role' is retired, using 'first'");
                Self::First
            }
            other => {
                tracing::warn!("Unknown execution mode '{}', using 'first'", other);
                Self::First
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::First => "first",
            Self::All => "all",
            Self::Master => "master",
            Self::Standby => "standby",
        }
    }
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-metric retry settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub enabled: bool,
    pub max_attempts: u32,
    /// Base delay before every attempt after the first.
    pub delay_ms: u64,
    /// Extra delay added per attempt already made.
    pub backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            enabled: false,
            max_attempts: 1,
            delay_ms: 0,
            backoff_ms: 0,
        }
    }
}

/// Alerting threshold attached to a metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Threshold {
    pub level: String,
    pub operator: String,
    pub value: Value,
}

impl Threshold {
    /// Check a collected value against this threshold.
    ///
    /// Numbers (and numeric strings) are compared numerically; anything else
    /// only supports `==` and `!=` on the string form. Unknown operators never
    /// breach.
    pub fn is_breached(&self, observed: &Value) -> bool {
        if let (Some(lhs), Some(rhs)) = (as_number(observed), as_number(&self.value)) {
            return match self.operator.trim() {
                ">" | "gt" => lhs > rhs,
                ">=" | "ge" => lhs >= rhs,
                "<" | "lt" => lhs < rhs,
                "<=" | "le" => lhs <= rhs,
                "==" | "=" | "eq" => lhs == rhs,
                "!=" | "<>" | "ne" => lhs != rhs,
                _ => false,
            };
        }

        let lhs = as_text(observed);
        let rhs = as_text(&self.value);
        match self.operator.trim() {
            "==" | "=" | "eq" => lhs == rhs,
            "!=" | "<>" | "ne" => lhs != rhs,
            _ => false,
        }
    }
}

fn as_number(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_text(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// One named SQL query to be run against databases of a given type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricDefinition {
    pub db_type: DatabaseType,
    pub kind: MetricKind,
    pub name: String,
    pub description: Option<String>,
    pub sql: String,
    /// Declared output labels, positional.
    pub columns: Vec<String>,
    pub unit: Option<String>,
    pub mode: ExecutionMode,
    pub retry: Option<RetryPolicy>,
    pub threshold: Option<Threshold>,
}

impl MetricDefinition {
    pub fn new(
        db_type: DatabaseType,
        kind: MetricKind,
        name: impl Into<String>,
        sql: impl Into<String>,
    ) -> Self {
        Self {
            db_type,
            kind,
            name: name.into(),
            description: None,
            sql: sql.into(),
            columns: Vec::new(),
            unit: None,
            mode: ExecutionMode::default(),
            retry: None,
            threshold: None,
        }
    }

    pub fn with_mode(mut self, mode: ExecutionMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = Some(retry);
        self
    }

    /// Label for a single-value result: the description, else the name.
    pub fn label(&self) -> &str {
        self.description
            .as_deref()
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .unwrap_or(&self.name)
    }
}
