//! Scripted connection factory for tests.

use async_trait::async_trait;
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::{ConnectError, Connection, ConnectionFactory, QueryError, QueryOutput};
use crate::model::{DatabaseNode, DatabaseSystem};

#[derive(Default)]
struct Script {
    opens: AtomicUsize,
    probes: AtomicUsize,
    queries: AtomicUsize,
    closes: AtomicUsize,
    /// Connections dropped, closed or not.
    releases: AtomicUsize,
    unreachable: Mutex<HashSet<String>>,
    outputs: Mutex<HashMap<String, QueryOutput>>,
    /// Remaining failures per SQL text.
    flaky: Mutex<HashMap<String, u32>>,
    query_delay: Mutex<Duration>,
    slow: Mutex<HashMap<String, Duration>>,
}

#[derive(Clone, Default)]
pub(crate) struct ScriptedFactory {
    script: Arc<Script>,
}

impl ScriptedFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn unreachable(self, host: &str) -> Self {
        self.script.unreachable.lock().unwrap().insert(host.to_string());
        self
    }

    pub fn respond(self, sql: &str, output: QueryOutput) -> Self {
        self.script.outputs.lock().unwrap().insert(sql.to_string(), output);
        self
    }

    /// Fail the first `times` runs of `sql`.
    pub fn flaky(self, sql: &str, times: u32) -> Self {
        self.script.flaky.lock().unwrap().insert(sql.to_string(), times);
        self
    }

    pub fn query_delay(self, delay: Duration) -> Self {
        *self.script.query_delay.lock().unwrap() = delay;
        self
    }

    /// Delay only `sql`, on top of any global delay.
    pub fn slow(self, sql: &str, delay: Duration) -> Self {
        self.script.slow.lock().unwrap().insert(sql.to_string(), delay);
        self
    }

    pub fn opens(&self) -> usize {
        self.script.opens.load(Ordering::SeqCst)
    }

    pub fn probes(&self) -> usize {
        self.script.probes.load(Ordering::SeqCst)
    }

    pub fn queries(&self) -> usize {
        self.script.queries.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.script.closes.load(Ordering::SeqCst)
    }

    pub fn releases(&self) -> usize {
        self.script.releases.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConnectionFactory for ScriptedFactory {
    async fn open(
        &self,
        _system: &DatabaseSystem,
        node: &DatabaseNode,
    ) -> Result<Box<dyn Connection>, ConnectError> {
        self.script.opens.fetch_add(1, Ordering::SeqCst);
        if self.script.unreachable.lock().unwrap().contains(&node.host) {
            return Err(ConnectError::Unreachable("connection refused".into()));
        }
        Ok(Box::new(ScriptedConnection {
            script: Arc::clone(&self.script),
        }))
    }

    async fn probe(
        &self,
        _system: &DatabaseSystem,
        node: &DatabaseNode,
    ) -> Result<(), ConnectError> {
        self.script.probes.fetch_add(1, Ordering::SeqCst);
        if self.script.unreachable.lock().unwrap().contains(&node.host) {
            return Err(ConnectError::Unreachable("connection refused".into()));
        }
        Ok(())
    }
}

struct ScriptedConnection {
    script: Arc<Script>,
}

#[async_trait]
impl Connection for ScriptedConnection {
    async fn query(&mut self, sql: &str) -> Result<QueryOutput, QueryError> {
        self.script.queries.fetch_add(1, Ordering::SeqCst);

        let delay = *self.script.query_delay.lock().unwrap();
        let extra = self.script.slow.lock().unwrap().get(sql).copied().unwrap_or_default();
        if !(delay + extra).is_zero() {
            tokio::time::sleep(delay + extra).await;
        }

        {
            let mut flaky = self.script.flaky.lock().unwrap();
            if let Some(remaining) = flaky.get_mut(sql) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(QueryError::Sql("deadlock detected".into()));
                }
            }
        }

        let output = self.script.outputs.lock().unwrap().get(sql).cloned();
        Ok(output.unwrap_or_else(|| {
            QueryOutput::new(vec!["value".into()], vec![vec![json!(1)]])
        }))
    }

    async fn close(&mut self) {
        self.script.closes.fetch_add(1, Ordering::SeqCst);
    }
}

impl Drop for ScriptedConnection {
    fn drop(&mut self) {
        self.script.releases.fetch_add(1, Ordering::SeqCst);
    }
}
