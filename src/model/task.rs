use std::fmt;
use std::sync::Arc;

use super::{DatabaseNode, DatabaseSystem, MetricDefinition};

/// One metric to run on one node of one system.
#[derive(Debug)]
pub struct ExecutionTask {
    pub system: Arc<DatabaseSystem>,
    pub node: DatabaseNode,
    pub metric: Arc<MetricDefinition>,
}

impl ExecutionTask {
    pub fn new(
        system: Arc<DatabaseSystem>,
        node: DatabaseNode,
        metric: Arc<MetricDefinition>,
    ) -> Self {
        Self { system, node, metric }
    }
}

impl fmt::Display for ExecutionTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}@{}:{}",
            self.system.name,
            self.metric.name,
            crate::mask::mask_host(&self.node.host),
            self.node.port
        )
    }
}
