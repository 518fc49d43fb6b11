//! End-to-end runs of the collection engine against configuration on disk.

use async_trait::async_trait;
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::{tempdir, TempDir};
use tokio_test::{assert_err, assert_ok};

use dbcollect::config::AppConfig;
use dbcollect::connector::{ConnectError, Connection, ConnectionFactory, QueryError, QueryOutput};
use dbcollect::fingerprint::Fingerprinter;
use dbcollect::model::{
    DatabaseNode, DatabaseSystem, DatabaseType, FailureKind, MetricDefinition, MetricKind,
    SystemCatalog,
};
use dbcollect::registry::FailureRegistry;
use dbcollect::{CollectionEngine, EngineError};

#[derive(Default)]
struct Counters {
    opens: AtomicUsize,
    probes: AtomicUsize,
    queries: AtomicUsize,
    closes: AtomicUsize,
    releases: AtomicUsize,
}

/// In-memory database fleet.
#[derive(Default)]
struct FakeFleet {
    counters: Arc<Counters>,
    down: HashSet<String>,
    broken_sql: HashSet<String>,
    slow_sql: HashMap<String, Duration>,
    outputs: Arc<Mutex<HashMap<String, QueryOutput>>>,
}

impl FakeFleet {
    fn down(mut self, host: &str) -> Self {
        self.down.insert(host.to_string());
        self
    }

    fn broken(mut self, sql: &str) -> Self {
        self.broken_sql.insert(sql.to_string());
        self
    }

    fn slow(mut self, sql: &str, delay: Duration) -> Self {
        self.slow_sql.insert(sql.to_string(), delay);
        self
    }

    fn returns(self, sql: &str, columns: &[&str], rows: Vec<Vec<serde_json::Value>>) -> Self {
        let output = QueryOutput::new(columns.iter().map(|c| c.to_string()).collect(), rows);
        self.outputs.lock().unwrap().insert(sql.to_string(), output);
        self
    }

    fn opens(&self) -> usize {
        self.counters.opens.load(Ordering::SeqCst)
    }

    fn probes(&self) -> usize {
        self.counters.probes.load(Ordering::SeqCst)
    }

    fn queries(&self) -> usize {
        self.counters.queries.load(Ordering::SeqCst)
    }

    fn closes(&self) -> usize {
        self.counters.closes.load(Ordering::SeqCst)
    }

    fn releases(&self) -> usize {
        self.counters.releases.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConnectionFactory for FakeFleet {
    async fn open(
        &self,
        _system: &DatabaseSystem,
        node: &DatabaseNode,
    ) -> Result<Box<dyn Connection>, ConnectError> {
        self.counters.opens.fetch_add(1, Ordering::SeqCst);
        if self.down.contains(&node.host) {
            return Err(ConnectError::Unreachable("connection refused".into()));
        }
        Ok(Box::new(FakeSession {
            counters: Arc::clone(&self.counters),
            broken_sql: self.broken_sql.clone(),
            slow_sql: self.slow_sql.clone(),
            outputs: Arc::clone(&self.outputs),
        }))
    }

    async fn probe(
        &self,
        _system: &DatabaseSystem,
        node: &DatabaseNode,
    ) -> Result<(), ConnectError> {
        self.counters.probes.fetch_add(1, Ordering::SeqCst);
        if self.down.contains(&node.host) {
            return Err(ConnectError::Unreachable("connection refused".into()));
        }
        Ok(())
    }
}

struct FakeSession {
    counters: Arc<Counters>,
    broken_sql: HashSet<String>,
    slow_sql: HashMap<String, Duration>,
    outputs: Arc<Mutex<HashMap<String, QueryOutput>>>,
}

#[async_trait]
impl Connection for FakeSession {
    async fn query(&mut self, sql: &str) -> Result<QueryOutput, QueryError> {
        self.counters.queries.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.slow_sql.get(sql) {
            tokio::time::sleep(*delay).await;
        }
        if self.broken_sql.contains(sql) {
            return Err(QueryError::Sql("table does not exist".into()));
        }
        let output = self.outputs.lock().unwrap().get(sql).cloned();
        Ok(output.unwrap_or_else(|| {
            QueryOutput::new(vec!["Value".into()], vec![vec![json!("3600")]])
        }))
    }

    async fn close(&mut self) {
        self.counters.closes.fetch_add(1, Ordering::SeqCst);
    }
}

impl Drop for FakeSession {
    fn drop(&mut self) {
        self.counters.releases.fetch_add(1, Ordering::SeqCst);
    }
}

const S1_CONFIG: &str = r#"
S1:
  enable: true
  username: monitor
  password: secret
  nodes:
    - host: 10.0.0.1
      port: 3306
      role: master
"#;

const UPTIME_METRIC: &str = r#"
- type: SINGLE
  name: uptime
  sql: SHOW GLOBAL STATUS LIKE 'Uptime'
  execution_strategy:
    mode: first
"#;

struct Workspace {
    dir: TempDir,
}

impl Workspace {
    fn new(config: &str, metrics: &str) -> Self {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("configs")).unwrap();
        fs::create_dir_all(dir.path().join("metrics")).unwrap();
        fs::write(dir.path().join("configs/mysql-config.yml"), config).unwrap();
        fs::write(dir.path().join("metrics/mysql-metrics.yml"), metrics).unwrap();
        Self { dir }
    }

    fn configs(&self) -> std::path::PathBuf {
        self.dir.path().join("configs")
    }

    fn metrics(&self) -> std::path::PathBuf {
        self.dir.path().join("metrics")
    }

    fn registry(&self) -> Arc<FailureRegistry> {
        let logs = self.dir.path().join("logs");
        Arc::new(FailureRegistry::with_paths(
            logs.join("db_conn_blacklist.txt"),
            Some(logs.join("db_conn_error.txt")),
            Fingerprinter::new("0123456789abcdef0123456789abcdef"),
        ))
    }

    fn engine(&self, fleet: &Arc<FakeFleet>) -> CollectionEngine {
        self.engine_with(fleet, AppConfig::default().task_timeout)
    }

    fn engine_with(&self, fleet: &Arc<FakeFleet>, task_timeout: Duration) -> CollectionEngine {
        let config = AppConfig {
            threads: 4,
            probe_jitter: Duration::ZERO,
            task_timeout,
            log_dir: self.dir.path().join("logs"),
            ..AppConfig::default()
        };
        let factory = Arc::clone(fleet) as Arc<dyn ConnectionFactory>;
        CollectionEngine::new(config, factory, self.registry())
    }
}

fn blacklist_exists(dir: &Path) -> bool {
    dir.join("logs/db_conn_blacklist.txt").exists()
}

#[tokio::test]
async fn single_metric_on_master_node() {
    let ws = Workspace::new(S1_CONFIG, UPTIME_METRIC);
    let fleet = Arc::new(FakeFleet::default());

    let results = assert_ok!(ws.engine(&fleet).run(&ws.configs(), &ws.metrics()).await);

    assert_eq!(results.len(), 1);
    let result = &results.as_slice()[0];
    assert_eq!(result.system_name, "S1");
    assert_eq!(result.metric_name, "uptime");
    assert!(result.success());
    assert_eq!(result.columns(), vec!["uptime"]);
    assert_eq!(result.value(), Some(&json!("3600")));
    assert!(!blacklist_exists(ws.dir.path()));
}

#[tokio::test]
async fn blacklisted_host_is_never_contacted() {
    let ws = Workspace::new(S1_CONFIG, UPTIME_METRIC);
    let earlier = ws.registry();
    earlier.record_failure("10.0.0.1");
    earlier.persist().unwrap();

    let fleet = Arc::new(FakeFleet::default());
    let results = ws.engine(&fleet).run(&ws.configs(), &ws.metrics()).await.unwrap();

    assert_eq!(results.len(), 1);
    let result = &results.as_slice()[0];
    assert!(!result.success());
    assert!(result.error_message().unwrap().contains("skipped"));
    assert_eq!(fleet.opens(), 0);
    assert_eq!(fleet.probes(), 0);
}

#[tokio::test]
async fn unreachable_host_is_remembered_across_runs() {
    let ws = Workspace::new(S1_CONFIG, UPTIME_METRIC);
    let down = Arc::new(FakeFleet::default().down("10.0.0.1"));
    let first = ws.engine(&down).run(&ws.configs(), &ws.metrics()).await.unwrap();
    assert!(!first.as_slice()[0].success());
    assert!(blacklist_exists(ws.dir.path()));

    let error_log = fs::read_to_string(ws.dir.path().join("logs/db_conn_error.txt")).unwrap();
    assert!(error_log.contains("|S1|mysql|***.***.0.1:3306"));
    assert!(!error_log.contains("10.0.0.1"));

    let healthy = Arc::new(FakeFleet::default());
    let second = ws.engine(&healthy).run(&ws.configs(), &ws.metrics()).await.unwrap();
    assert!(!second.as_slice()[0].success());
    assert_eq!(healthy.opens(), 0);
}

#[tokio::test]
async fn master_mode_without_master_yields_nothing() {
    let config = r#"
S1:
  enable: true
  username: monitor
  password: secret
  nodes:
    - host: 10.0.0.1
      role: slave
    - host: 10.0.0.2
      role: standby
"#;
    let metrics = r#"
- type: SINGLE
  name: binlog
  sql: SHOW MASTER STATUS
  execution_strategy:
    mode: master
"#;
    let ws = Workspace::new(config, metrics);
    let fleet = Arc::new(FakeFleet::default());

    let results = ws.engine(&fleet).run(&ws.configs(), &ws.metrics()).await.unwrap();
    assert!(results.is_empty());
    assert_eq!(fleet.opens(), 0);
}

#[tokio::test]
async fn enabled_system_without_nodes_plans_nothing() {
    let ws = Workspace::new(S1_CONFIG, UPTIME_METRIC);
    let fleet = Arc::new(FakeFleet::default());
    let engine = ws.engine(&fleet);

    let empty = DatabaseSystem::new("EMPTY", DatabaseType::Mysql).with_credentials("u", "p");
    let systems: SystemCatalog = [(empty.name.clone(), Arc::new(empty))].into_iter().collect();
    let metric = Arc::new(MetricDefinition::new(
        DatabaseType::Mysql,
        MetricKind::Single,
        "uptime",
        "SELECT 1",
    ));

    assert!(engine.plan(&systems, &[metric]).is_empty());
}

#[tokio::test]
async fn declared_columns_label_the_single_row() {
    let metrics = r#"
- type: SINGLE
  name: connections
  sql: SHOW GLOBAL STATUS LIKE 'Threads_connected'
  columns: [variable, current]
  execution_strategy:
    mode: first
"#;
    let ws = Workspace::new(S1_CONFIG, metrics);
    let fleet = Arc::new(FakeFleet::default().returns(
        "SHOW GLOBAL STATUS LIKE 'Threads_connected'",
        &["Variable_name", "Value"],
        vec![vec![json!("Threads_connected"), json!("12")]],
    ));

    let results = ws.engine(&fleet).run(&ws.configs(), &ws.metrics()).await.unwrap();
    let rows = results.as_slice()[0].rows();
    assert_eq!(rows.len(), 1);
    let keys: Vec<&String> = rows[0].keys().collect();
    assert_eq!(keys, vec!["variable", "current"]);
    assert_eq!(rows[0]["current"], json!("12"));
}

#[tokio::test]
async fn failing_sql_is_attempted_max_attempts_times() {
    let metrics = r#"
- type: MULTI
  name: replicas
  sql: SELECT * FROM missing_table
  execution_strategy:
    mode: first
    retry_policy:
      enabled: true
      max_attempts: 3
      delay_ms: 10
      backoff_ms: 0
"#;
    let ws = Workspace::new(S1_CONFIG, metrics);
    let fleet = Arc::new(FakeFleet::default().broken("SELECT * FROM missing_table"));

    let results = ws.engine(&fleet).run(&ws.configs(), &ws.metrics()).await.unwrap();
    assert_eq!(results.len(), 1);
    assert!(!results.as_slice()[0].success());
    assert_eq!(fleet.queries(), 3);
    assert!(!blacklist_exists(ws.dir.path()));
}

#[tokio::test(start_paused = true)]
async fn mixed_outcomes_release_every_session() {
    let metrics = r#"
- type: SINGLE
  name: uptime
  sql: SHOW GLOBAL STATUS LIKE 'Uptime'
  execution_strategy:
    mode: first
- type: MULTI
  name: replicas
  sql: SELECT * FROM missing_table
  execution_strategy:
    mode: first
    retry_policy:
      enabled: true
      max_attempts: 2
      delay_ms: 0
      backoff_ms: 0
- type: MULTI
  name: processlist
  sql: SELECT * FROM information_schema.processlist
  execution_strategy:
    mode: first
"#;
    let ws = Workspace::new(S1_CONFIG, metrics);
    let fleet = Arc::new(
        FakeFleet::default()
            .broken("SELECT * FROM missing_table")
            .slow("SELECT * FROM information_schema.processlist", Duration::from_secs(120)),
    );

    let engine = ws.engine_with(&fleet, Duration::from_secs(5));
    let results = assert_ok!(engine.run(&ws.configs(), &ws.metrics()).await);

    let outcome = |name: &str| {
        let result = results.iter().find(|r| r.metric_name == name).unwrap();
        (result.success(), result.failure_kind())
    };
    assert_eq!(outcome("uptime"), (true, None));
    assert_eq!(outcome("replicas"), (false, Some(FailureKind::Execution)));
    assert_eq!(outcome("processlist"), (false, Some(FailureKind::Timeout)));

    assert_eq!(fleet.opens(), 4);
    assert_eq!(fleet.releases(), fleet.opens());
    assert_eq!(fleet.closes(), 3);
    assert!(!blacklist_exists(ws.dir.path()));
}

#[tokio::test]
async fn repeated_runs_produce_the_same_content() {
    let ws = Workspace::new(S1_CONFIG, UPTIME_METRIC);
    let fleet = Arc::new(FakeFleet::default());
    let engine = ws.engine(&fleet);

    let content = |results: dbcollect::aggregator::ResultSet| {
        let mut rows: Vec<(String, String, bool, Vec<String>)> = results
            .into_iter()
            .map(|r| (r.system_name.clone(), r.metric_name.clone(), r.success(), r.columns()))
            .collect();
        rows.sort();
        rows
    };

    let first = engine.run(&ws.configs(), &ws.metrics()).await.unwrap();
    let second = engine.run(&ws.configs(), &ws.metrics()).await.unwrap();
    assert_eq!(content(first), content(second));
}

#[tokio::test]
async fn invalid_configuration_aborts_before_connecting() {
    let config = r#"
S1:
  enable: true
  username: monitor
  nodes:
    - host: 10.0.0.1
"#;
    let ws = Workspace::new(config, UPTIME_METRIC);
    let fleet = Arc::new(FakeFleet::default());

    let err = assert_err!(ws.engine(&fleet).run(&ws.configs(), &ws.metrics()).await);
    assert!(matches!(err, EngineError::Config(_)));
    assert!(err.to_string().contains("has no password"));
    assert_eq!(fleet.probes(), 0);
}
