//! Collection engine.
//!
//! Ties one run together: load and validate configuration, probe every node,
//! plan tasks, dispatch them and summarize the results. The failure registry
//! is loaded before the probe and persisted after each pass.

use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

use crate::aggregator::ResultSet;
use crate::config::AppConfig;
use crate::connector::ConnectionFactory;
use crate::dispatcher::Dispatcher;
use crate::loader::{validate, ConfigError, ConfigLoader};
use crate::model::{group_by_type, ExecutionTask, MetricDefinition, SystemCatalog};
use crate::planner;
use crate::probe::{ConnectionProbe, ProbeReport};
use crate::registry::{FailureRegistry, RegistryError};
use crate::sink::{ResultSink, SinkError};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("failure registry error: {0}")]
    Registry(#[from] RegistryError),
}

pub struct CollectionEngine {
    config: AppConfig,
    loader: ConfigLoader,
    factory: Arc<dyn ConnectionFactory>,
    registry: Arc<FailureRegistry>,
}

impl CollectionEngine {
    pub fn new(
        config: AppConfig,
        factory: Arc<dyn ConnectionFactory>,
        registry: Arc<FailureRegistry>,
    ) -> Self {
        Self {
            config,
            loader: ConfigLoader::default(),
            factory,
            registry,
        }
    }

    pub fn with_loader(mut self, loader: ConfigLoader) -> Self {
        self.loader = loader;
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<FailureRegistry> {
        &self.registry
    }

    /// Load and validate systems and metrics.
    pub fn load(
        &self,
        config_path: &Path,
        metrics_path: &Path,
    ) -> Result<(SystemCatalog, Vec<Arc<MetricDefinition>>), EngineError> {
        let systems = self.loader.load_database_systems(config_path)?;
        let metrics = self.loader.load_metric_definitions(metrics_path)?;
        validate(&systems, &metrics)?;
        Ok((systems, metrics))
    }

    /// Full run from configuration on disk.
    ///
    /// Only configuration problems fail the run; every task yields a result.
    pub async fn run(
        &self,
        config_path: &Path,
        metrics_path: &Path,
    ) -> Result<ResultSet, EngineError> {
        let (systems, metrics) = self.load(config_path, metrics_path)?;
        Ok(self.collect(&systems, &metrics).await)
    }

    /// Probe, plan, dispatch and summarize for already-loaded configuration.
    pub async fn collect(
        &self,
        systems: &SystemCatalog,
        metrics: &[Arc<MetricDefinition>],
    ) -> ResultSet {
        self.load_registry();

        let report = self.probe(systems).await;
        report.log();
        self.persist_registry();

        let tasks = self.plan(systems, metrics);
        tracing::info!(
            "Planned {} tasks for {} systems and {} metrics",
            tasks.len(),
            systems.len(),
            metrics.len()
        );

        let dispatcher = Dispatcher::new(
            Arc::clone(&self.factory),
            Arc::clone(&self.registry),
            self.config.dispatcher_config(),
        )
        .with_failed_hosts(report.failed_hosts());
        let results = dispatcher.dispatch(tasks).await;
        self.persist_registry();

        results.summary().log();
        results
    }

    /// Probe every node of the configured systems without collecting metrics.
    ///
    /// Recorded failures are forgotten first so every node is contacted again.
    pub async fn test_connections(&self, config_path: &Path) -> Result<ProbeReport, EngineError> {
        let systems = self.loader.load_database_systems(config_path)?;
        validate(&systems, &[])?;

        self.clear_failures()?;
        let report = self.probe(&systems).await;
        report.log();
        self.persist_registry();
        Ok(report)
    }

    /// Tasks a run would execute, without connecting anywhere.
    pub fn plan(
        &self,
        systems: &SystemCatalog,
        metrics: &[Arc<MetricDefinition>],
    ) -> Vec<ExecutionTask> {
        planner::plan(systems, metrics)
    }

    /// Forget every recorded host failure.
    pub fn clear_failures(&self) -> Result<(), EngineError> {
        self.registry.clear()?;
        tracing::info!("Cleared connection failure records");
        Ok(())
    }

    /// Hand results to every sink and close them.
    ///
    /// Returns the sinks that failed; the others have been written.
    pub fn deliver(
        &self,
        results: &ResultSet,
        sinks: &mut [Box<dyn ResultSink>],
    ) -> Vec<(String, SinkError)> {
        let mut failures = Vec::new();
        for sink in sinks.iter_mut() {
            let outcome = sink.save(results.as_slice()).and_then(|_| sink.close());
            if let Err(e) = outcome {
                tracing::error!("Sink {} failed: {}", sink.name(), e);
                failures.push((sink.name().to_string(), e));
            }
        }
        failures
    }

    async fn probe(&self, systems: &SystemCatalog) -> ProbeReport {
        let probe = ConnectionProbe::new(
            Arc::clone(&self.factory),
            Arc::clone(&self.registry),
            self.config.probe_config(),
        );
        probe.run(&group_by_type(systems)).await
    }

    fn load_registry(&self) {
        match self.registry.load_from_disk() {
            Ok(count) if count > 0 => {
                tracing::info!("{} hosts are blacklisted from earlier runs", count)
            }
            Ok(_) => {}
            Err(e) => tracing::warn!("Could not load failure registry: {}", e),
        }
    }

    fn persist_registry(&self) {
        if let Err(e) = self.registry.persist() {
            tracing::warn!("Could not persist failure registry: {}", e);
        }
    }
}
