//! Connection probe pass.
//!
//! Connects to every node of every enabled system before metrics are
//! collected. Unreachable hosts go to the failure registry, and the set of
//! failed hosts is handed to the dispatcher so their tasks are skipped.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;

use crate::connector::{ConnectError, ConnectionFactory};
use crate::mask::mask_host;
use crate::model::{DatabaseNode, DatabaseSystem, DatabaseType, GroupedSystems};
use crate::registry::FailureRegistry;

/// Probe settings.
#[derive(Debug, Clone)]
pub struct ProbeConfig {
    pub concurrency: usize,
    pub timeout: Duration,
    /// Upper bound of a random delay before each probe.
    pub jitter: Duration,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            concurrency: 7,
            timeout: Duration::from_secs(15),
            jitter: Duration::from_millis(100),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProbeStatus {
    Reachable,
    /// The host refused, failed authentication or could not be resolved.
    Unreachable(String),
    TimedOut,
    /// Already in the failure registry; not contacted.
    Skipped,
    /// Failed for a reason that says nothing about the host.
    Error(String),
}

impl ProbeStatus {
    /// Whether tasks for this host should be skipped.
    pub fn is_failed_host(&self) -> bool {
        matches!(self, ProbeStatus::Unreachable(_) | ProbeStatus::TimedOut | ProbeStatus::Skipped)
    }
}

impl fmt::Display for ProbeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeStatus::Reachable => f.write_str("reachable"),
            ProbeStatus::Unreachable(msg) => write!(f, "unreachable: {}", msg),
            ProbeStatus::TimedOut => f.write_str("timed out"),
            ProbeStatus::Skipped => f.write_str("skipped (previously failed)"),
            ProbeStatus::Error(msg) => write!(f, "error: {}", msg),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProbeOutcome {
    pub system_name: String,
    pub db_type: DatabaseType,
    pub host: String,
    pub port: u16,
    pub status: ProbeStatus,
    pub latency: Option<Duration>,
}

/// Outcomes of one probe pass.
#[derive(Debug, Clone, Default)]
pub struct ProbeReport {
    pub outcomes: Vec<ProbeOutcome>,
}

impl ProbeReport {
    pub fn total(&self) -> usize {
        self.outcomes.len()
    }

    pub fn reachable(&self) -> usize {
        self.count(|s| matches!(s, ProbeStatus::Reachable))
    }

    pub fn failed(&self) -> usize {
        self.count(|s| !matches!(s, ProbeStatus::Reachable | ProbeStatus::Skipped))
    }

    pub fn skipped(&self) -> usize {
        self.count(|s| matches!(s, ProbeStatus::Skipped))
    }

    fn count<F: Fn(&ProbeStatus) -> bool>(&self, pred: F) -> usize {
        self.outcomes.iter().filter(|o| pred(&o.status)).count()
    }

    /// Hosts whose metric tasks should be skipped.
    pub fn failed_hosts(&self) -> HashSet<String> {
        self.outcomes
            .iter()
            .filter(|o| o.status.is_failed_host())
            .map(|o| o.host.clone())
            .collect()
    }

    pub fn log(&self) {
        tracing::info!(
            "Connection probe: {} nodes, {} reachable, {} failed, {} skipped",
            self.total(),
            self.reachable(),
            self.failed(),
            self.skipped()
        );
        for o in self.outcomes.iter().filter(|o| !matches!(o.status, ProbeStatus::Reachable)) {
            tracing::warn!(
                "  {} ({}) {}:{} {}",
                o.system_name,
                o.db_type,
                mask_host(&o.host),
                o.port,
                o.status
            );
        }
    }
}

/// Runs the probe pass against a factory.
pub struct ConnectionProbe {
    factory: Arc<dyn ConnectionFactory>,
    registry: Arc<FailureRegistry>,
    config: ProbeConfig,
}

impl ConnectionProbe {
    pub fn new(
        factory: Arc<dyn ConnectionFactory>,
        registry: Arc<FailureRegistry>,
        config: ProbeConfig,
    ) -> Self {
        Self {
            factory,
            registry,
            config,
        }
    }

    /// Probe every node of every enabled system.
    pub async fn run(&self, systems: &GroupedSystems) -> ProbeReport {
        let semaphore = Arc::new(Semaphore::new(self.config.concurrency.max(1)));
        let mut handles = Vec::new();

        for system in systems.values().flat_map(|by_name| by_name.values()) {
            if !system.enabled {
                continue;
            }

            for node in &system.nodes {
                let system = Arc::clone(system);
                let node = node.clone();
                let factory = Arc::clone(&self.factory);
                let registry = Arc::clone(&self.registry);
                let semaphore = Arc::clone(&semaphore);
                let config = self.config.clone();

                handles.push(tokio::spawn(async move {
                    let (status, latency) = match semaphore.acquire_owned().await {
                        Ok(_permit) => {
                            probe_node(factory.as_ref(), &registry, &system, &node, &config).await
                        }
                        Err(_) => (ProbeStatus::Error("worker pool closed".to_string()), None),
                    };
                    ProbeOutcome {
                        system_name: system.name.clone(),
                        db_type: system.db_type,
                        host: node.host,
                        port: node.port,
                        status,
                        latency,
                    }
                }));
            }
        }

        let mut report = ProbeReport::default();
        for handle in handles {
            match handle.await {
                Ok(outcome) => report.outcomes.push(outcome),
                Err(e) => tracing::error!("Probe worker panicked: {}", e),
            }
        }
        report
    }
}

async fn probe_node(
    factory: &dyn ConnectionFactory,
    registry: &FailureRegistry,
    system: &DatabaseSystem,
    node: &DatabaseNode,
    config: &ProbeConfig,
) -> (ProbeStatus, Option<Duration>) {
    if registry.is_blacklisted(&node.host) {
        return (ProbeStatus::Skipped, None);
    }

    // Add jitter to avoid thundering herd
    let jitter_ms = config.jitter.as_millis() as u64;
    if jitter_ms > 0 {
        let jitter = rand::random::<u64>() % jitter_ms;
        tokio::time::sleep(Duration::from_millis(jitter)).await;
    }

    let start = Instant::now();
    let status = match tokio::time::timeout(config.timeout, factory.probe(system, node)).await {
        Ok(Ok(())) => ProbeStatus::Reachable,
        Ok(Err(ConnectError::Timeout(_))) | Err(_) => ProbeStatus::TimedOut,
        Ok(Err(e)) if e.is_host_failure() => ProbeStatus::Unreachable(e.to_string()),
        Ok(Err(e)) => ProbeStatus::Error(e.to_string()),
    };

    if status.is_failed_host() {
        registry.record_connection_error(&system.name, system.db_type, &node.host, node.port);
    }

    let latency = matches!(status, ProbeStatus::Reachable).then(|| start.elapsed());
    (status, latency)
}
