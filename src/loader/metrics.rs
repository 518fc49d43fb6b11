use serde::Deserialize;
use std::path::Path;

use super::{ConfigError, Parsed};
use crate::model::{
    DatabaseType, ExecutionMode, MetricDefinition, MetricKind, RetryPolicy, Threshold,
};

/// A metrics file is a list, a `metrics:` wrapped list, or a single metric.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawDocument {
    List(Vec<RawMetric>),
    Wrapped { metrics: Vec<RawMetric> },
    Single(RawMetric),
}

#[derive(Debug, Deserialize)]
struct RawMetric {
    #[serde(rename = "type")]
    kind: Option<String>,
    name: Option<String>,
    description: Option<String>,
    sql: Option<String>,
    #[serde(default)]
    columns: Vec<String>,
    unit: Option<String>,
    execution_strategy: Option<RawStrategy>,
    threshold: Option<RawThreshold>,
}

#[derive(Debug, Deserialize)]
struct RawStrategy {
    mode: Option<String>,
    retry_policy: Option<RawRetry>,
}

#[derive(Debug, Deserialize)]
struct RawRetry {
    #[serde(default)]
    enabled: bool,
    max_attempts: Option<u32>,
    #[serde(default)]
    delay_ms: u64,
    #[serde(default)]
    backoff_ms: u64,
}

#[derive(Debug, Deserialize)]
struct RawThreshold {
    #[serde(default)]
    level: String,
    #[serde(default)]
    operator: String,
    #[serde(default)]
    value: serde_json::Value,
}

pub(super) fn parse(
    path: &Path,
    content: &str,
    db_type: DatabaseType,
) -> Result<Parsed<MetricDefinition>, ConfigError> {
    let mut parsed = Parsed {
        items: Vec::new(),
        problems: Vec::new(),
    };

    if content.trim().is_empty() {
        tracing::warn!("{} is empty", path.display());
        return Ok(parsed);
    }

    let doc: RawDocument = serde_yaml::from_str(content).map_err(|source| ConfigError::Yaml {
        path: path.to_path_buf(),
        source,
    })?;
    let raw = match doc {
        RawDocument::List(list) | RawDocument::Wrapped { metrics: list } => list,
        RawDocument::Single(metric) => vec![metric],
    };

    for (index, metric) in raw.into_iter().enumerate() {
        match convert(metric, db_type) {
            Ok(def) => parsed.items.push(def),
            Err(problem) => parsed
                .problems
                .push(format!("{}: metric #{}: {}", path.display(), index + 1, problem)),
        }
    }

    Ok(parsed)
}

fn convert(raw: RawMetric, db_type: DatabaseType) -> Result<MetricDefinition, String> {
    let name = non_blank(raw.name).ok_or("missing name")?;
    let sql = non_blank(raw.sql).ok_or_else(|| format!("'{}' has no sql", name))?;
    let kind_str = non_blank(raw.kind).ok_or_else(|| format!("'{}' has no type", name))?;
    let kind = MetricKind::parse(&kind_str).ok_or_else(|| {
        format!("'{}' has invalid type '{}', expected SINGLE or MULTI", name, kind_str)
    })?;

    let (mode, retry) = match raw.execution_strategy {
        Some(strategy) => (
            ExecutionMode::normalize(strategy.mode.as_deref()),
            strategy.retry_policy.map(|r| RetryPolicy {
                enabled: r.enabled,
                max_attempts: r.max_attempts.unwrap_or(1).max(1),
                delay_ms: r.delay_ms,
                backoff_ms: r.backoff_ms,
            }),
        ),
        None => (ExecutionMode::default(), None),
    };

    Ok(MetricDefinition {
        db_type,
        kind,
        name,
        description: non_blank(raw.description),
        sql,
        columns: raw.columns,
        unit: non_blank(raw.unit),
        mode,
        retry,
        threshold: raw.threshold.map(|t| Threshold {
            level: t.level,
            operator: t.operator,
            value: t.value,
        }),
    })
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_str(content: &str) -> Parsed<MetricDefinition> {
        parse(Path::new("oracle-metrics.yml"), content, DatabaseType::Oracle).unwrap()
    }

    #[test]
    fn test_plain_list() {
        let yaml = r#"
- type: single
  name: sessions
  sql: SELECT count(*) FROM v$session
  unit: count
- type: MULTI
  name: tablespaces
  sql: SELECT * FROM dba_tablespaces
  execution_strategy:
    mode: standby
"#;
        let parsed = parse_str(yaml);
        assert!(parsed.problems.is_empty());
        assert_eq!(parsed.items.len(), 2);
        assert_eq!(parsed.items[0].kind, MetricKind::Single);
        assert_eq!(parsed.items[0].unit.as_deref(), Some("count"));
        assert_eq!(parsed.items[1].mode, ExecutionMode::Standby);
    }

    #[test]
    fn test_legacy_role_mode() {
        let yaml = r#"
- type: SINGLE
  name: a
  sql: SELECT 1 FROM dual
  execution_strategy:
    mode: role
"#;
        assert_eq!(parse_str(yaml).items[0].mode, ExecutionMode::First);
    }

    #[test]
    fn test_invalid_entries_are_problems() {
        let yaml = r#"
- type: SINGLE
  sql: SELECT 1 FROM dual
- type: TABLE
  name: bad_type
  sql: SELECT 1 FROM dual
- type: MULTI
  name: no_sql
- type: MULTI
  name: ok
  sql: SELECT 1 FROM dual
"#;
        let parsed = parse_str(yaml);
        assert_eq!(parsed.items.len(), 1);
        assert_eq!(parsed.items[0].name, "ok");
        assert_eq!(parsed.problems.len(), 3);
        assert!(parsed.problems[1].contains("invalid type 'TABLE'"));
        assert!(parsed.problems[2].contains("has no sql"));
    }

    #[test]
    fn test_retry_defaults() {
        let yaml = r#"
type: SINGLE
name: a
sql: SELECT 1 FROM dual
execution_strategy:
  retry_policy:
    enabled: true
"#;
        let metric = &parse_str(yaml).items[0];
        assert_eq!(metric.mode, ExecutionMode::All);
        let retry = metric.retry.unwrap();
        assert!(retry.enabled);
        assert_eq!(retry.max_attempts, 1);
    }

    #[test]
    fn test_empty_file() {
        assert!(parse_str("  \n").items.is_empty());
    }
}
