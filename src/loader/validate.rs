use std::sync::Arc;

use super::ConfigError;
use crate::model::{MetricDefinition, SystemCatalog};

/// Check loaded configuration before any connection is made.
///
/// Disabled systems are not checked. Every problem is reported at once.
pub fn validate(
    systems: &SystemCatalog,
    metrics: &[Arc<MetricDefinition>],
) -> Result<(), ConfigError> {
    let mut problems = Vec::new();

    for system in systems.values().filter(|s| s.enabled) {
        if system.nodes.is_empty() {
            problems.push(format!("system '{}' has no nodes", system.name));
        }
        if system.username.trim().is_empty() {
            problems.push(format!("system '{}' has no username", system.name));
        }
        if system.password.is_empty() {
            problems.push(format!("system '{}' has no password", system.name));
        }
        for (i, node) in system.nodes.iter().enumerate() {
            if node.host.trim().is_empty() {
                problems.push(format!("system '{}' node #{} has no host", system.name, i + 1));
            }
            if node.port == 0 {
                problems.push(format!("system '{}' node #{} has port 0", system.name, i + 1));
            }
        }
    }

    for metric in metrics {
        if metric.name.trim().is_empty() || metric.sql.trim().is_empty() {
            problems.push(format!("{} metric '{}' is incomplete", metric.db_type, metric.name));
        }
    }

    if problems.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::Invalid(problems))
    }
}
