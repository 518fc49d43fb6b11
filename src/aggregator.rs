//! Result shaping and collection.

use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use tokio::sync::mpsc;

use crate::connector::QueryOutput;
use crate::model::{
    DatabaseType, FailureKind, MetricDefinition, MetricKind, MetricResult, Payload, Row,
};

/// Turn raw query output into the payload for `metric`.
///
/// - SINGLE with declared columns: the first row as one labelled row.
/// - SINGLE without columns: one value labelled by description or name.
/// - MULTI: every row, labelled.
///
/// Declared columns override driver labels by position. An empty result is a
/// valid, empty payload.
pub fn shape_payload(metric: &MetricDefinition, output: QueryOutput) -> Payload {
    let QueryOutput { columns: driver_columns, rows } = output;

    match metric.kind {
        MetricKind::Single if metric.columns.is_empty() => {
            if rows.len() > 1 {
                tracing::debug!(
                    "Metric {} returned {} rows, using the first",
                    metric.name,
                    rows.len()
                );
            }
            let value = rows
                .into_iter()
                .next()
                .map(|row| extract_single_value(&driver_columns, row))
                .unwrap_or(Value::Null);

            Payload::Scalar {
                label: metric.label().to_string(),
                value,
                unit: metric.unit.clone(),
            }
        }
        MetricKind::Single => {
            let columns = column_labels(&metric.columns, &driver_columns);
            let rows = rows.into_iter().take(1).map(|row| label_row(&columns, row)).collect();
            Payload::Rows { columns, rows }
        }
        MetricKind::Multi => {
            let columns = column_labels(&metric.columns, &driver_columns);
            let rows = rows.into_iter().map(|row| label_row(&columns, row)).collect();
            Payload::Rows { columns, rows }
        }
    }
}

/// Declared label at each position, else the driver's label.
fn column_labels(declared: &[String], driver: &[String]) -> Vec<String> {
    if driver.is_empty() {
        return declared.to_vec();
    }

    driver
        .iter()
        .enumerate()
        .map(|(i, label)| {
            declared
                .get(i)
                .filter(|d| !d.trim().is_empty())
                .unwrap_or(label)
                .clone()
        })
        .collect()
}

fn label_row(columns: &[String], cells: Vec<Value>) -> Row {
    let mut row = Row::new();
    for (i, cell) in cells.into_iter().enumerate() {
        let label = columns.get(i).cloned().unwrap_or_else(|| format!("column_{}", i + 1));
        row.insert(label, cell);
    }
    row
}

/// First cell of a row, or the value cell of a `SHOW` name/value pair.
fn extract_single_value(columns: &[String], row: Vec<Value>) -> Value {
    let is_name_value_pair = columns.len() == 2 && {
        let first = columns[0].to_ascii_lowercase();
        let second = columns[1].to_ascii_lowercase();
        (first.contains("variable") || first.contains("name")) && second.contains("value")
    };

    let idx = if is_name_value_pair { 1 } else { 0 };
    row.into_iter().nth(idx).unwrap_or(Value::Null)
}

/// All results of one run. Order carries no meaning.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ResultSet {
    results: Vec<MetricResult>,
}

impl ResultSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, result: MetricResult) {
        self.results.push(result);
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, MetricResult> {
        self.results.iter()
    }

    pub fn as_slice(&self) -> &[MetricResult] {
        &self.results
    }

    pub fn summary(&self) -> RunSummary {
        RunSummary::from_results(&self.results)
    }
}

impl IntoIterator for ResultSet {
    type Item = MetricResult;
    type IntoIter = std::vec::IntoIter<MetricResult>;

    fn into_iter(self) -> Self::IntoIter {
        self.results.into_iter()
    }
}

impl<'a> IntoIterator for &'a ResultSet {
    type Item = &'a MetricResult;
    type IntoIter = std::slice::Iter<'a, MetricResult>;

    fn into_iter(self) -> Self::IntoIter {
        self.results.iter()
    }
}

impl FromIterator<MetricResult> for ResultSet {
    fn from_iter<I: IntoIterator<Item = MetricResult>>(iter: I) -> Self {
        Self {
            results: iter.into_iter().collect(),
        }
    }
}

/// Drain results from the workers until every sender is gone.
pub async fn collect_results(mut rx: mpsc::Receiver<MetricResult>, expected: usize) -> ResultSet {
    let mut results = Vec::with_capacity(expected);
    while let Some(result) = rx.recv().await {
        results.push(result);
    }

    if results.len() != expected {
        tracing::error!("Expected {} results but collected {}", expected, results.len());
    }

    ResultSet { results }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TypeCounts {
    pub total: usize,
    pub succeeded: usize,
    pub driver_unavailable: usize,
}

/// Counts over a finished run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub timed_out: usize,
    /// Tasks on a database type this build cannot query.
    pub driver_unavailable: usize,
    pub by_type: BTreeMap<DatabaseType, TypeCounts>,
}

impl RunSummary {
    pub fn from_results(results: &[MetricResult]) -> Self {
        let mut summary = Self::default();
        for result in results {
            summary.total += 1;
            let counts = summary.by_type.entry(result.db_type).or_default();
            counts.total += 1;

            if result.success() {
                summary.succeeded += 1;
                counts.succeeded += 1;
                continue;
            }

            summary.failed += 1;
            match result.failure_kind() {
                Some(FailureKind::Skipped) => summary.skipped += 1,
                Some(FailureKind::Timeout) => summary.timed_out += 1,
                Some(FailureKind::DriverUnavailable) => {
                    summary.driver_unavailable += 1;
                    counts.driver_unavailable += 1;
                }
                _ => {}
            }
        }
        summary
    }

    pub fn success_rate(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.succeeded as f64 * 100.0 / self.total as f64
    }

    pub fn log(&self) {
        tracing::info!("{}", self);
        for (db_type, counts) in &self.by_type {
            tracing::info!("  {}: {}/{} succeeded", db_type, counts.succeeded, counts.total);
            if counts.driver_unavailable > 0 {
                tracing::warn!(
                    "  {}: {} tasks not run, no driver is available for this database type",
                    db_type,
                    counts.driver_unavailable
                );
            }
        }
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Collected {} results: {} succeeded, {} failed \
             ({} skipped, {} timed out, {} without driver), {:.1}% success",
            self.total,
            self.succeeded,
            self.failed,
            self.skipped,
            self.timed_out,
            self.driver_unavailable,
            self.success_rate()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DatabaseNode, DatabaseSystem, ExecutionTask, NodeRole};
    use serde_json::json;
    use std::sync::Arc;

    fn single(name: &str) -> MetricDefinition {
        MetricDefinition::new(DatabaseType::Mysql, MetricKind::Single, name, "SELECT 1")
    }

    fn output(columns: &[&str], rows: Vec<Vec<Value>>) -> QueryOutput {
        QueryOutput::new(columns.iter().map(|c| c.to_string()).collect(), rows)
    }

    #[test]
    fn test_single_without_columns_uses_name() {
        let payload =
            shape_payload(&single("uptime"), output(&["Uptime"], vec![vec![json!(3600)]]));
        assert_eq!(payload.columns(), vec!["uptime".to_string()]);
        assert_eq!(payload.value(), Some(&json!(3600)));
    }

    #[test]
    fn test_single_without_columns_uses_description() {
        let metric = single("uptime").with_description("Server uptime");
        let payload = shape_payload(&metric, output(&["x"], vec![vec![json!(1)]]));
        assert_eq!(payload.columns(), vec!["Server uptime".to_string()]);
    }

    #[test]
    fn test_single_show_pair_takes_value_column() {
        let payload = shape_payload(
            &single("max_connections"),
            output(&["Variable_name", "Value"], vec![vec![json!("max_connections"), json!("151")]]),
        );
        assert_eq!(payload.value(), Some(&json!("151")));

        let payload = shape_payload(
            &single("other"),
            output(&["a", "b"], vec![vec![json!("first"), json!("second")]]),
        );
        assert_eq!(payload.value(), Some(&json!("first")));
    }

    #[test]
    fn test_single_empty_result_is_null() {
        let payload = shape_payload(&single("uptime"), output(&[], vec![]));
        assert_eq!(payload.value(), Some(&Value::Null));
    }

    #[test]
    fn test_single_with_columns_keeps_order() {
        let metric = single("conn").with_columns(["current", "max", "ratio"]);
        let payload = shape_payload(
            &metric,
            output(
                &["c", "m", "r"],
                vec![
                    vec![json!(10), json!(151), json!(6.6)],
                    vec![json!(0), json!(0), json!(0)],
                ],
            ),
        );

        assert_eq!(payload.columns(), vec!["current", "max", "ratio"]);
        let rows = payload.rows();
        assert_eq!(rows.len(), 1);
        let keys: Vec<&String> = rows[0].keys().collect();
        assert_eq!(keys, vec!["current", "max", "ratio"]);
        assert_eq!(rows[0]["max"], json!(151));
    }

    #[test]
    fn test_partial_declared_columns_fall_back_to_driver_labels() {
        let metric = single("conn").with_columns(["current"]);
        let payload = shape_payload(&metric, output(&["c", "m"], vec![vec![json!(1), json!(2)]]));
        assert_eq!(payload.columns(), vec!["current", "m"]);
    }

    #[test]
    fn test_multi_one_row_per_sql_row() {
        let metric =
            MetricDefinition::new(DatabaseType::Mysql, MetricKind::Multi, "sessions", "SELECT ...");
        let payload = shape_payload(
            &metric,
            output(
                &["user", "count"],
                vec![vec![json!("a"), json!(1)], vec![json!("b"), json!(2)]],
            ),
        );
        assert_eq!(payload.row_count(), 2);
        assert_eq!(payload.rows()[1]["user"], json!("b"));

        let empty = shape_payload(&metric, output(&[], vec![]));
        assert_eq!(empty.row_count(), 0);
    }

    fn result(kind: Option<FailureKind>, db_type: DatabaseType) -> MetricResult {
        let node = DatabaseNode::new("10.0.0.1", 3306).with_role(NodeRole::Master);
        let system = DatabaseSystem::new("S1", db_type).with_node(node.clone());
        let metric = MetricDefinition::new(db_type, MetricKind::Single, "m", "SELECT 1");
        let task = ExecutionTask::new(Arc::new(system), node, Arc::new(metric));
        let pending = MetricResult::start(&task);
        match kind {
            None => pending.succeed(Payload::Scalar {
                label: "m".into(),
                value: json!(1),
                unit: None,
            }),
            Some(kind) => pending.fail(kind, "failed"),
        }
    }

    #[test]
    fn test_summary_counts() {
        let results: ResultSet = vec![
            result(None, DatabaseType::Mysql),
            result(Some(FailureKind::Skipped), DatabaseType::Mysql),
            result(Some(FailureKind::Timeout), DatabaseType::Postgresql),
            result(Some(FailureKind::Execution), DatabaseType::Postgresql),
        ]
        .into_iter()
        .collect();

        let summary = results.summary();
        assert_eq!(summary.total, 4);
        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.failed, 3);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.timed_out, 1);
        let mysql = summary.by_type[&DatabaseType::Mysql];
        assert_eq!(
            mysql,
            TypeCounts {
                total: 2,
                succeeded: 1,
                driver_unavailable: 0
            }
        );
        assert_eq!(summary.success_rate(), 25.0);
    }

    #[test]
    fn test_summary_counts_missing_drivers() {
        let results: ResultSet = vec![
            result(None, DatabaseType::Mysql),
            result(Some(FailureKind::DriverUnavailable), DatabaseType::Oracle),
            result(Some(FailureKind::DriverUnavailable), DatabaseType::Oracle),
            result(Some(FailureKind::DriverUnavailable), DatabaseType::Dm),
        ]
        .into_iter()
        .collect();

        let summary = results.summary();
        assert_eq!(summary.failed, 3);
        assert_eq!(summary.driver_unavailable, 3);
        assert_eq!(summary.by_type[&DatabaseType::Oracle].driver_unavailable, 2);
        assert_eq!(summary.by_type[&DatabaseType::Dm].driver_unavailable, 1);
        assert_eq!(summary.by_type[&DatabaseType::Mysql].driver_unavailable, 0);
        assert!(summary.to_string().contains("3 without driver"));
    }

    #[tokio::test]
    async fn test_collect_until_senders_drop() {
        let (tx, rx) = mpsc::channel(4);
        let collector = tokio::spawn(collect_results(rx, 3));

        for _ in 0..3 {
            let tx = tx.clone();
            tokio::spawn(async move {
                tx.send(result(None, DatabaseType::Mysql)).await.unwrap();
            });
        }
        drop(tx);

        let results = collector.await.unwrap();
        assert_eq!(results.len(), 3);
    }
}
