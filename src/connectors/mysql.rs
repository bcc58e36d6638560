// ABOUTME: MySQL source connector built on mysql_async
// ABOUTME: Extracts full tables or rows past a watermark, preserving column order

use super::{LoadMode, SourceConnector};
use crate::config::EndpointConfig;
use crate::error::{ReplicatorError, Result};
use crate::types::{ExtractedRowSet, ScalarValue};
use crate::utils::{quote_mysql_ident, quote_mysql_table, validate_table_name};
use crate::watermark::WatermarkValue;
use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use mysql_async::consts::{ColumnFlags, ColumnType};
use mysql_async::prelude::*;
use mysql_async::{Column, Conn, OptsBuilder, Params, Value};
use rust_decimal::Decimal;
use std::str::FromStr;

const DEFAULT_PORT: u16 = 3306;

/// Character set id MySQL reports for binary strings and blobs.
const BINARY_CHARSET: u16 = 63;

pub struct MySqlSource {
    endpoint: EndpointConfig,
    conn: Option<Conn>,
}

impl MySqlSource {
    pub fn new(endpoint: EndpointConfig) -> Self {
        Self {
            endpoint,
            conn: None,
        }
    }

    fn opts(&self) -> OptsBuilder {
        OptsBuilder::default()
            .ip_or_hostname(self.endpoint.host.clone())
            .tcp_port(self.endpoint.port.unwrap_or(DEFAULT_PORT))
            .user(self.endpoint.user.clone())
            .pass(self.endpoint.password.clone())
            .db_name(Some(self.endpoint.database.clone()))
    }
}

/// Build the extraction query and its parameters for `table`.
///
/// Incremental reads use a strictly-greater predicate on the watermark
/// column and return rows in watermark order.
pub fn build_extract_query(table: &str, mode: &LoadMode) -> (String, Vec<Value>) {
    let table_sql = quote_mysql_table(table);
    match mode {
        LoadMode::Full => (format!("SELECT * FROM {}", table_sql), Vec::new()),
        LoadMode::Incremental { column, last_value } => {
            let column_sql = quote_mysql_ident(column);
            let param = match last_value {
                WatermarkValue::Id(n) => id_param(*n),
                WatermarkValue::Timestamp(s) => Value::Bytes(s.clone().into_bytes()),
            };
            (
                format!(
                    "SELECT * FROM {} WHERE {} > ? ORDER BY {}",
                    table_sql, column_sql, column_sql
                ),
                vec![param],
            )
        }
    }
}

/// Bind an id watermark as the narrowest MySQL integer that holds it.
fn id_param(n: i128) -> Value {
    if let Ok(v) = i64::try_from(n) {
        Value::Int(v)
    } else if let Ok(v) = u64::try_from(n) {
        Value::UInt(v)
    } else {
        Value::Bytes(n.to_string().into_bytes())
    }
}

#[async_trait]
impl SourceConnector for MySqlSource {
    fn kind(&self) -> &str {
        "mysql"
    }

    fn endpoint(&self) -> String {
        self.endpoint.describe()
    }

    async fn connect(&mut self) -> Result<()> {
        if let Some(mut conn) = self.conn.take() {
            match conn.ping().await {
                Ok(()) => {
                    self.conn = Some(conn);
                    return Ok(());
                }
                Err(e) => {
                    tracing::warn!("MySQL connection is no longer valid ({}), reconnecting", e);
                    let _ = conn.disconnect().await;
                }
            }
        }

        let conn = Conn::new(self.opts())
            .await
            .map_err(|e| ReplicatorError::connection(self.endpoint.describe(), e))?;
        tracing::debug!("Opened MySQL connection to {}", self.endpoint.describe());
        self.conn = Some(conn);
        Ok(())
    }

    async fn extract(&mut self, table: &str, mode: &LoadMode) -> Result<ExtractedRowSet> {
        validate_table_name(table).map_err(|e| ReplicatorError::query(table, e))?;
        self.connect()
            .await
            .map_err(|e| ReplicatorError::query(table, e))?;
        let conn = self
            .conn
            .as_mut()
            .ok_or_else(|| ReplicatorError::query(table, "connection not available"))?;

        let (sql, params) = build_extract_query(table, mode);
        tracing::debug!(table = %table, "Executing: {}", sql);

        let params = if params.is_empty() {
            Params::Empty
        } else {
            Params::Positional(params)
        };

        let mut result = conn
            .exec_iter(sql.as_str(), params)
            .await
            .map_err(|e| ReplicatorError::query(table, e))?;

        let columns: Vec<Column> = result
            .columns()
            .map(|cols| cols.iter().cloned().collect())
            .unwrap_or_default();

        let raw_rows: Vec<mysql_async::Row> = result
            .collect_and_drop()
            .await
            .map_err(|e| ReplicatorError::query(table, e))?;

        if raw_rows.is_empty() {
            tracing::info!(table = %table, rows = 0, "No rows extracted");
            return Ok(ExtractedRowSet::empty());
        }

        let column_names: Vec<String> = columns
            .iter()
            .map(|c| c.name_str().into_owned())
            .collect();

        let rows = raw_rows
            .into_iter()
            .map(|mut row| {
                (0..columns.len())
                    .map(|i| {
                        let value: Value = row.take(i).unwrap_or(Value::NULL);
                        mysql_value_to_scalar(value, &columns[i])
                    })
                    .collect()
            })
            .collect();

        let row_set =
            ExtractedRowSet::new(column_names, rows).map_err(|e| ReplicatorError::query(table, e))?;
        tracing::info!(table = %table, rows = row_set.len(), "Extracted rows");
        Ok(row_set)
    }

    async fn close(&mut self) {
        if let Some(conn) = self.conn.take() {
            match conn.disconnect().await {
                Ok(()) => tracing::debug!("Closed MySQL connection"),
                Err(e) => tracing::warn!("Error while closing MySQL connection: {}", e),
            }
        }
    }
}

/// Convert a MySQL value to a `ScalarValue`, using column metadata to
/// disambiguate the binary protocol's byte and date encodings.
fn mysql_value_to_scalar(value: Value, column: &Column) -> ScalarValue {
    let column_type = column.column_type();
    match value {
        Value::NULL => ScalarValue::Null,
        Value::Int(n) => {
            if column_type == ColumnType::MYSQL_TYPE_TINY && column.column_length() == 1 {
                ScalarValue::Bool(n != 0)
            } else {
                ScalarValue::Int(n)
            }
        }
        Value::UInt(n) => {
            if column.flags().contains(ColumnFlags::UNSIGNED_FLAG) && n > i64::MAX as u64 {
                ScalarValue::UInt(n)
            } else {
                ScalarValue::Int(n as i64)
            }
        }
        Value::Float(f) => ScalarValue::Float(f as f64),
        Value::Double(d) => ScalarValue::Float(d),
        Value::Bytes(bytes) => bytes_to_scalar(bytes, column),
        Value::Date(year, month, day, hour, minute, second, micros) => {
            let Some(date) = NaiveDate::from_ymd_opt(year as i32, month as u32, day as u32) else {
                // Zero dates (0000-00-00) have no calendar representation.
                return ScalarValue::Null;
            };
            if column_type == ColumnType::MYSQL_TYPE_DATE {
                return ScalarValue::Date(date);
            }
            match NaiveTime::from_hms_micro_opt(hour as u32, minute as u32, second as u32, micros) {
                Some(time) => ScalarValue::DateTime(NaiveDateTime::new(date, time)),
                None => ScalarValue::Null,
            }
        }
        Value::Time(negative, days, hours, minutes, seconds, micros) => {
            if !negative && days == 0 {
                if let Some(time) = NaiveTime::from_hms_micro_opt(
                    hours as u32,
                    minutes as u32,
                    seconds as u32,
                    micros,
                ) {
                    return ScalarValue::Time(time);
                }
            }
            // Durations outside a clock day keep MySQL's textual form.
            let total_hours = days * 24 + hours as u32;
            let mut text = format!(
                "{}{:02}:{:02}:{:02}",
                if negative { "-" } else { "" },
                total_hours,
                minutes,
                seconds
            );
            if micros > 0 {
                text.push_str(&format!(".{:06}", micros));
            }
            ScalarValue::Text(text)
        }
    }
}

fn bytes_to_scalar(bytes: Vec<u8>, column: &Column) -> ScalarValue {
    match column.column_type() {
        ColumnType::MYSQL_TYPE_DECIMAL | ColumnType::MYSQL_TYPE_NEWDECIMAL => {
            let text = String::from_utf8_lossy(&bytes);
            match Decimal::from_str(&text) {
                Ok(d) => ScalarValue::Decimal(d),
                Err(_) => ScalarValue::Text(text.into_owned()),
            }
        }
        ColumnType::MYSQL_TYPE_JSON => match serde_json::from_slice(&bytes) {
            Ok(json) => ScalarValue::Json(json),
            Err(_) => ScalarValue::Text(String::from_utf8_lossy(&bytes).into_owned()),
        },
        ColumnType::MYSQL_TYPE_BIT => ScalarValue::Bytes(bytes),
        _ if column.character_set() == BINARY_CHARSET => ScalarValue::Bytes(bytes),
        _ => match String::from_utf8(bytes) {
            Ok(s) => ScalarValue::Text(s),
            Err(e) => ScalarValue::Bytes(e.into_bytes()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_query_selects_everything() {
        let (sql, params) = build_extract_query("products", &LoadMode::Full);
        assert_eq!(sql, "SELECT * FROM `products`");
        assert!(params.is_empty());
    }

    #[test]
    fn test_incremental_query_is_strictly_greater() {
        let mode = LoadMode::Incremental {
            column: "order_date".to_string(),
            last_value: WatermarkValue::Timestamp("2024-01-01 00:00:00".to_string()),
        };
        let (sql, params) = build_extract_query("orders", &mode);
        assert_eq!(
            sql,
            "SELECT * FROM `orders` WHERE `order_date` > ? ORDER BY `order_date`"
        );
        assert_eq!(
            params,
            vec![Value::Bytes(b"2024-01-01 00:00:00".to_vec())]
        );
    }

    #[test]
    fn test_incremental_id_binds_integer() {
        let mode = LoadMode::Incremental {
            column: "order_item_id".to_string(),
            last_value: WatermarkValue::Id(41),
        };
        let (sql, params) = build_extract_query("retail_db.order_items", &mode);
        assert!(sql.starts_with("SELECT * FROM `retail_db`.`order_items` WHERE"));
        assert_eq!(params, vec![Value::Int(41)]);
    }

    #[test]
    fn test_unsigned_bigint_id_binds_unsigned() {
        let mode = LoadMode::Incremental {
            column: "event_id".to_string(),
            last_value: WatermarkValue::Id(u64::MAX.into()),
        };
        let (_, params) = build_extract_query("events", &mode);
        assert_eq!(params, vec![Value::UInt(u64::MAX)]);
    }
}
