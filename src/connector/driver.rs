//! Driver-backed connection factory.

use async_trait::async_trait;
use serde_json::Value;
use sqlx::{Column, Row};
use std::time::Duration;

use super::{
    check_reachable, mysql, postgres, ConnectError, Connection, ConnectionFactory, QueryError,
    QueryOutput,
};
use crate::model::{DatabaseNode, DatabaseSystem, DatabaseType};

/// Opens MySQL and PostgreSQL sessions through `sqlx`.
///
/// Oracle and DM have no driver here: `open` reports
/// [`ConnectError::DriverUnavailable`] and `probe` only checks that the
/// listener accepts TCP connections.
#[derive(Debug, Clone)]
pub struct DriverConnectionFactory {
    connect_timeout: Duration,
}

impl DriverConnectionFactory {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

#[async_trait]
impl ConnectionFactory for DriverConnectionFactory {
    async fn open(
        &self,
        system: &DatabaseSystem,
        node: &DatabaseNode,
    ) -> Result<Box<dyn Connection>, ConnectError> {
        if node.host.trim().is_empty() || node.port == 0 {
            let reason = format!("invalid endpoint for system {}", system.name);
            return Err(ConnectError::Config(reason));
        }

        let connect = async {
            match system.db_type {
                DatabaseType::Mysql => mysql::connect(system, node).await,
                DatabaseType::Postgresql => postgres::connect(system, node).await,
                DatabaseType::Oracle | DatabaseType::Dm => {
                    Err(ConnectError::DriverUnavailable(system.db_type))
                }
            }
        };

        tokio::time::timeout(self.connect_timeout, connect)
            .await
            .map_err(|_| ConnectError::Timeout(self.connect_timeout))?
    }

    async fn probe(
        &self,
        system: &DatabaseSystem,
        node: &DatabaseNode,
    ) -> Result<(), ConnectError> {
        match system.db_type {
            DatabaseType::Oracle | DatabaseType::Dm => {
                check_reachable(&node.host, node.port, self.connect_timeout).await
            }
            DatabaseType::Mysql | DatabaseType::Postgresql => {
                let mut conn = self.open(system, node).await?;
                conn.close().await;
                Ok(())
            }
        }
    }
}

/// Map a driver error raised while connecting.
pub(super) fn classify_connect_error(err: sqlx::Error) -> ConnectError {
    match err {
        sqlx::Error::Database(db) => ConnectError::Auth(db.message().to_string()),
        sqlx::Error::Configuration(e) => ConnectError::Config(e.to_string()),
        other => ConnectError::Unreachable(other.to_string()),
    }
}

/// Map a driver error raised while querying.
pub(super) fn classify_query_error(err: sqlx::Error) -> QueryError {
    match err {
        sqlx::Error::Io(e) => QueryError::ConnectionLost(e.to_string()),
        sqlx::Error::Protocol(msg) => QueryError::ConnectionLost(msg),
        other => QueryError::Sql(other.to_string()),
    }
}

/// Convert driver rows into positional JSON cells.
pub(super) fn rows_to_output<R, F>(rows: &[R], decode: F) -> QueryOutput
where
    R: Row,
    F: Fn(&R, usize) -> Value,
{
    let columns: Vec<String> = rows
        .first()
        .map(|row| row.columns().iter().map(|c| c.name().to_string()).collect())
        .unwrap_or_default();

    let rows = rows
        .iter()
        .map(|row| (0..row.len()).map(|idx| decode(row, idx)).collect())
        .collect();

    QueryOutput { columns, rows }
}

/// Fallback cell value for a type no decoder understands.
pub(super) fn type_marker(type_name: &str) -> Value {
    Value::String(format!("<{}>", type_name))
}

pub(super) fn decimal_value(d: rust_decimal::Decimal) -> Value {
    let text = d.normalize().to_string();
    serde_json::from_str::<serde_json::Number>(&text)
        .map(Value::Number)
        .unwrap_or(Value::String(text))
}
