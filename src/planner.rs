//! Execution planner: expands systems x metrics into node-level tasks.
//!
//! Pure; the same configuration always yields the same task list.

use std::sync::Arc;

use crate::model::{
    DatabaseNode, DatabaseSystem, ExecutionMode, ExecutionTask, MetricDefinition, NodeRole,
    SystemCatalog,
};

/// Nodes of `system` a metric with `mode` runs on.
pub fn resolve_targets(system: &DatabaseSystem, mode: ExecutionMode) -> Vec<&DatabaseNode> {
    match mode {
        ExecutionMode::First => system.nodes.first().into_iter().collect(),
        ExecutionMode::All => system.nodes.iter().collect(),
        ExecutionMode::Master => system.nodes_with_role(NodeRole::Master).collect(),
        ExecutionMode::Standby => system.nodes_with_role(NodeRole::Standby).collect(),
    }
}

/// Build one task per (enabled system, matching metric, target node).
///
/// Metrics only apply to systems of their own database type. A role mode
/// with no matching node yields no tasks for that pair.
pub fn plan(systems: &SystemCatalog, metrics: &[Arc<MetricDefinition>]) -> Vec<ExecutionTask> {
    let mut tasks = Vec::new();

    for system in systems.values() {
        if !system.enabled {
            tracing::debug!("System {} is disabled, skipping", system.name);
            continue;
        }

        for metric in metrics.iter().filter(|m| m.db_type == system.db_type) {
            let targets = resolve_targets(system, metric.mode);
            if targets.is_empty() {
                tracing::info!(
                    "No {} node for metric {} on system {}, nothing to run",
                    metric.mode,
                    metric.name,
                    system.name
                );
                continue;
            }

            for node in targets {
                let task = ExecutionTask::new(Arc::clone(system), node.clone(), Arc::clone(metric));
                tasks.push(task);
            }
        }
    }

    tracing::debug!("Planned {} tasks", tasks.len());
    tasks
}
