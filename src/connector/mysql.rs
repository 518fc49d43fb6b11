use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::Decimal;
use serde_json::Value;
use sqlx::mysql::{MySqlConnectOptions, MySqlConnection, MySqlRow};
use sqlx::{Connection as _, Row, TypeInfo, ValueRef};

use super::driver::{
    classify_connect_error, classify_query_error, decimal_value, rows_to_output, type_marker,
};
use super::{ConnectError, Connection, QueryError, QueryOutput};
use crate::model::{DatabaseNode, DatabaseSystem};

pub(super) async fn connect(
    system: &DatabaseSystem,
    node: &DatabaseNode,
) -> Result<Box<dyn Connection>, ConnectError> {
    let mut options = MySqlConnectOptions::new()
        .host(&node.host)
        .port(node.port)
        .username(&system.username)
        .password(&system.password);

    if let Some(db) = node.database_name() {
        options = options.database(db);
    }

    let conn = MySqlConnection::connect_with(&options)
        .await
        .map_err(classify_connect_error)?;

    Ok(Box::new(MySqlSession { conn: Some(conn) }))
}

struct MySqlSession {
    conn: Option<MySqlConnection>,
}

#[async_trait]
impl Connection for MySqlSession {
    async fn query(&mut self, sql: &str) -> Result<QueryOutput, QueryError> {
        let conn = self
            .conn
            .as_mut()
            .ok_or_else(|| QueryError::ConnectionLost("session already closed".to_string()))?;

        let rows = sqlx::Executor::fetch_all(&mut *conn, sqlx::raw_sql(sql))
            .await
            .map_err(classify_query_error)?;

        Ok(rows_to_output(&rows, decode_cell))
    }

    async fn close(&mut self) {
        if let Some(conn) = self.conn.take() {
            if let Err(e) = conn.close().await {
                tracing::debug!("Error closing MySQL session: {}", e);
            }
        }
    }
}

fn decode_cell(row: &MySqlRow, idx: usize) -> Value {
    let type_name = match row.try_get_raw(idx) {
        Ok(raw) if raw.is_null() => return Value::Null,
        Ok(raw) => raw.type_info().name().to_string(),
        Err(_) => return Value::Null,
    };

    if let Ok(v) = row.try_get::<i64, _>(idx) {
        return Value::from(v);
    }
    if let Ok(v) = row.try_get::<u64, _>(idx) {
        return Value::from(v);
    }
    if let Ok(v) = row.try_get::<f64, _>(idx) {
        return Value::from(v);
    }
    if let Ok(v) = row.try_get::<f32, _>(idx) {
        return Value::from(f64::from(v));
    }
    if let Ok(v) = row.try_get::<Decimal, _>(idx) {
        return decimal_value(v);
    }
    if let Ok(v) = row.try_get::<String, _>(idx) {
        return Value::String(v);
    }
    if let Ok(v) = row.try_get::<DateTime<Utc>, _>(idx) {
        return Value::String(v.to_rfc3339());
    }
    if let Ok(v) = row.try_get::<NaiveDateTime, _>(idx) {
        return Value::String(v.to_string());
    }
    if let Ok(v) = row.try_get::<NaiveDate, _>(idx) {
        return Value::String(v.to_string());
    }
    if let Ok(v) = row.try_get::<NaiveTime, _>(idx) {
        return Value::String(v.to_string());
    }
    if let Ok(v) = row.try_get::<Vec<u8>, _>(idx) {
        return Value::String(String::from_utf8_lossy(&v).into_owned());
    }

    type_marker(&type_name)
}
