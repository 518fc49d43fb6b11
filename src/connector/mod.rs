//! Connections to monitored databases.
//!
//! The engine only sees the [`ConnectionFactory`] and [`Connection`] traits.
//! [`DriverConnectionFactory`] backs them with real drivers.

mod driver;
#[cfg(test)]
mod mock;
mod mysql;
mod postgres;
mod tcp;

pub use driver::*;
pub use tcp::*;

#[cfg(test)]
pub(crate) use mock::ScriptedFactory;

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

use crate::model::{DatabaseNode, DatabaseSystem, DatabaseType};

/// Failure to open a session with a node.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConnectError {
    #[error("host unreachable: {0}")]
    Unreachable(String),
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("connect timed out after {0:?}")]
    Timeout(Duration),
    #[error("no driver available for {0}")]
    DriverUnavailable(DatabaseType),
    #[error("invalid connection settings: {0}")]
    Config(String),
}

impl ConnectError {
    /// Whether this failure says something about the host itself.
    pub fn is_host_failure(&self) -> bool {
        matches!(
            self,
            ConnectError::Unreachable(_) | ConnectError::Auth(_) | ConnectError::Timeout(_)
        )
    }
}

/// Failure while running SQL on an open session.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum QueryError {
    #[error("SQL error: {0}")]
    Sql(String),
    #[error("connection lost: {0}")]
    ConnectionLost(String),
}

/// Raw tabular output of one query.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryOutput {
    /// Driver-reported column labels.
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl QueryOutput {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        Self { columns, rows }
    }
}

/// An open session with one node.
#[async_trait]
pub trait Connection: Send {
    async fn query(&mut self, sql: &str) -> Result<QueryOutput, QueryError>;

    /// Release the session. Dropping without closing also releases it.
    async fn close(&mut self);
}

/// Opens sessions with database nodes.
#[async_trait]
pub trait ConnectionFactory: Send + Sync {
    async fn open(
        &self,
        system: &DatabaseSystem,
        node: &DatabaseNode,
    ) -> Result<Box<dyn Connection>, ConnectError>;

    /// Lightweight connect-and-authenticate check, no metric SQL.
    async fn probe(
        &self,
        system: &DatabaseSystem,
        node: &DatabaseNode,
    ) -> Result<(), ConnectError> {
        let mut conn = self.open(system, node).await?;
        conn.close().await;
        Ok(())
    }
}
