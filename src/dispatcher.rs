//! Concurrent dispatcher: runs planned tasks under one worker limit.
//!
//! Every task yields exactly one [`MetricResult`]; task failures never
//! escape as errors.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, Semaphore};

use crate::aggregator::{collect_results, shape_payload, ResultSet};
use crate::connector::{ConnectError, ConnectionFactory, QueryError, QueryOutput};
use crate::mask::mask_host;
use crate::model::{ExecutionTask, FailureKind, MetricResult};
use crate::registry::FailureRegistry;
use crate::retry::{Deadline, RetryController, Retryable};

const RESULT_CHANNEL_CAPACITY: usize = 1000;

/// Why a task failed.
#[derive(Error, Debug)]
pub enum TaskError {
    #[error("skipped: previously failed connection to {0}")]
    Skipped(String),
    #[error("connection failed: {0}")]
    Connect(#[from] ConnectError),
    #[error("query failed: {0}")]
    Query(#[from] QueryError),
    #[error("task timed out after {0:?}")]
    Timeout(Duration),
}

impl TaskError {
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            TaskError::Skipped(_) => FailureKind::Skipped,
            TaskError::Connect(ConnectError::DriverUnavailable(_)) => {
                FailureKind::DriverUnavailable
            }
            TaskError::Connect(_) => FailureKind::Connection,
            TaskError::Query(_) => FailureKind::Execution,
            TaskError::Timeout(_) => FailureKind::Timeout,
        }
    }
}

impl Retryable for TaskError {
    fn is_retryable(&self) -> bool {
        match self {
            TaskError::Connect(ConnectError::DriverUnavailable(_))
            | TaskError::Connect(ConnectError::Config(_)) => false,
            TaskError::Connect(_) | TaskError::Query(_) => true,
            TaskError::Skipped(_) | TaskError::Timeout(_) => false,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DispatcherConfig {
    pub concurrency: usize,
    /// Deadline for one task including every retry.
    pub task_timeout: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            concurrency: 7,
            task_timeout: Duration::from_secs(30),
        }
    }
}

pub struct Dispatcher {
    factory: Arc<dyn ConnectionFactory>,
    registry: Arc<FailureRegistry>,
    config: DispatcherConfig,
    failed_hosts: Arc<HashSet<String>>,
}

impl Dispatcher {
    pub fn new(
        factory: Arc<dyn ConnectionFactory>,
        registry: Arc<FailureRegistry>,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            factory,
            registry,
            config,
            failed_hosts: Arc::new(HashSet::new()),
        }
    }

    /// Hosts found unreachable by the probe pass; their tasks are skipped.
    pub fn with_failed_hosts(mut self, hosts: HashSet<String>) -> Self {
        self.failed_hosts = Arc::new(hosts);
        self
    }

    /// Run every task and collect one result per task.
    pub async fn dispatch(&self, tasks: Vec<ExecutionTask>) -> ResultSet {
        let expected = tasks.len();
        if expected == 0 {
            return ResultSet::new();
        }

        tracing::info!(
            "Dispatching {} tasks with {} workers",
            expected,
            self.config.concurrency.max(1)
        );

        let (tx, rx) = mpsc::channel(RESULT_CHANNEL_CAPACITY);
        let collector = tokio::spawn(collect_results(rx, expected));
        let semaphore = Arc::new(Semaphore::new(self.config.concurrency.max(1)));

        let mut handles = Vec::with_capacity(expected);
        for task in tasks {
            let worker = Worker {
                factory: Arc::clone(&self.factory),
                registry: Arc::clone(&self.registry),
                failed_hosts: Arc::clone(&self.failed_hosts),
                task_timeout: self.config.task_timeout,
            };
            let semaphore = Arc::clone(&semaphore);
            let tx = tx.clone();

            handles.push(tokio::spawn(async move {
                let result = match semaphore.acquire_owned().await {
                    Ok(_permit) => worker.execute(task).await,
                    Err(_) => MetricResult::start(&task)
                        .fail(FailureKind::Execution, "worker pool closed"),
                };

                if tx.send(result).await.is_err() {
                    tracing::error!("Result collector closed, dropping result");
                }
            }));
        }
        drop(tx);

        for handle in handles {
            if let Err(e) = handle.await {
                tracing::error!("Metric worker panicked: {}", e);
            }
        }

        match collector.await {
            Ok(results) => results,
            Err(e) => {
                tracing::error!("Result collector failed: {}", e);
                ResultSet::new()
            }
        }
    }
}

struct Worker {
    factory: Arc<dyn ConnectionFactory>,
    registry: Arc<FailureRegistry>,
    failed_hosts: Arc<HashSet<String>>,
    task_timeout: Duration,
}

impl Worker {
    async fn execute(&self, task: ExecutionTask) -> MetricResult {
        let pending = MetricResult::start(&task);
        let host = task.node.host.as_str();

        if self.failed_hosts.contains(host) || self.registry.is_blacklisted(host) {
            tracing::debug!("Skipping {}: host previously failed", task);
            let err = TaskError::Skipped(mask_host(host));
            return pending.fail(err.failure_kind(), err.to_string());
        }

        let controller = RetryController::from_policy(task.metric.retry.as_ref());
        let attempts = controller.run(|attempt| self.attempt(&task, attempt));

        let (result, attempts_made) = match Deadline(self.task_timeout).run(attempts).await {
            Some(outcome) => (outcome.result, outcome.attempts),
            None => (Err(TaskError::Timeout(self.task_timeout)), 0),
        };

        match result {
            Ok(output) => {
                let payload = shape_payload(&task.metric, output);
                tracing::debug!("Collected {} ({} rows)", task, payload.row_count());
                pending.succeed(payload)
            }
            Err(err) => {
                if let TaskError::Connect(e) = &err {
                    if e.is_host_failure() {
                        self.registry.record_connection_error(
                            &task.system.name,
                            task.system.db_type,
                            &task.node.host,
                            task.node.port,
                        );
                    }
                }

                if attempts_made > 0 {
                    tracing::error!(
                        "Metric {} failed after {} attempt(s): {}",
                        task,
                        attempts_made,
                        err
                    );
                } else {
                    tracing::error!("Metric {} failed: {}", task, err);
                }
                pending.fail(err.failure_kind(), err.to_string())
            }
        }
    }

    /// One attempt on a fresh connection, released before returning.
    async fn attempt(&self, task: &ExecutionTask, attempt: u32) -> Result<QueryOutput, TaskError> {
        if attempt > 1 {
            tracing::debug!("Retrying {} (attempt {})", task, attempt);
        }

        let mut conn = self.factory.open(&task.system, &task.node).await?;
        let output = conn.query(&task.metric.sql).await;
        conn.close().await;
        Ok(output?)
    }
}
