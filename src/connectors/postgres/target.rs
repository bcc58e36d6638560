// ABOUTME: PostgreSQL target connector - transactional batched inserts
// ABOUTME: Binds each value with the Rust type matching the target column's declared type

use super::{get_table_columns, ColumnInfo, DEFAULT_SCHEMA, MAX_PARAMS_PER_STATEMENT};
use crate::config::EndpointConfig;
use crate::connectors::TargetConnector;
use crate::error::{ReplicatorError, Result};
use crate::types::{ExtractedRowSet, ScalarValue};
use crate::utils::{quote_ident, split_table_name, validate_table_name};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use std::str::FromStr;
use tokio_postgres::types::ToSql;
use tokio_postgres::Client;

pub struct PostgresTarget {
    endpoint: EndpointConfig,
    batch_size: usize,
    accept_invalid_certs: bool,
    client: Option<Client>,
}

impl PostgresTarget {
    pub fn new(endpoint: EndpointConfig, batch_size: usize, accept_invalid_certs: bool) -> Self {
        Self {
            endpoint,
            batch_size: batch_size.max(1),
            accept_invalid_certs,
            client: None,
        }
    }
}

/// Build a multi-row insert for `num_rows` rows.
///
/// Generates a query like:
/// ```sql
/// INSERT INTO "schema"."table" ("col1", "col2") VALUES ($1, $2::text::"pg_catalog"."interval"), ...
/// ```
///
/// `casts[i]` is `Some(type)` for columns bound as text and converted on the
/// server; it must have one entry per column.
pub fn build_insert_query(
    schema: &str,
    table: &str,
    columns: &[String],
    casts: &[Option<String>],
    num_rows: usize,
) -> String {
    let quoted_columns: Vec<String> = columns.iter().map(|c| quote_ident(c)).collect();

    let num_cols = columns.len();
    let value_rows: Vec<String> = (0..num_rows)
        .map(|row_idx| {
            let placeholders: Vec<String> = (0..num_cols)
                .map(|col_idx| {
                    let n = row_idx * num_cols + col_idx + 1;
                    match casts.get(col_idx).and_then(Option::as_deref) {
                        Some(ty) => format!("${}::text::{}", n, ty),
                        None => format!("${}", n),
                    }
                })
                .collect();
            format!("({})", placeholders.join(", "))
        })
        .collect();

    format!(
        "INSERT INTO {}.{} ({}) VALUES {}",
        quote_ident(schema),
        quote_ident(table),
        quoted_columns.join(", "),
        value_rows.join(", ")
    )
}

/// Match extracted column names to target columns, returning the target's
/// metadata for each. Exact matches win over case-insensitive ones.
fn resolve_columns(
    extracted: &[String],
    target: &[ColumnInfo],
) -> std::result::Result<Vec<ColumnInfo>, String> {
    extracted
        .iter()
        .map(|name| {
            target
                .iter()
                .find(|col| &col.name == name)
                .or_else(|| target.iter().find(|col| col.name.eq_ignore_ascii_case(name)))
                .cloned()
                .ok_or_else(|| format!("column '{}' does not exist in target table", name))
        })
        .collect()
}

#[async_trait]
impl TargetConnector for PostgresTarget {
    fn kind(&self) -> &str {
        "postgres"
    }

    fn endpoint(&self) -> String {
        self.endpoint.describe()
    }

    async fn connect(&mut self) -> Result<()> {
        if let Some(client) = &self.client {
            if !client.is_closed() {
                return Ok(());
            }
            tracing::warn!("PostgreSQL target connection closed, reconnecting");
        }
        self.client = Some(super::connect(&self.endpoint, self.accept_invalid_certs).await?);
        Ok(())
    }

    async fn load(&mut self, table: &str, rows: &ExtractedRowSet) -> Result<u64> {
        if rows.is_empty() {
            return Ok(0);
        }
        validate_table_name(table).map_err(|e| ReplicatorError::load(table, e))?;
        self.connect()
            .await
            .map_err(|e| ReplicatorError::load(table, e))?;

        let default_schema = self
            .endpoint
            .schema
            .clone()
            .unwrap_or_else(|| DEFAULT_SCHEMA.to_string());
        let (schema, table_name) = split_table_name(table, &default_schema);
        let batch_size = self.batch_size;
        let client = self
            .client
            .as_mut()
            .ok_or_else(|| ReplicatorError::load(table, "connection not available"))?;

        let target_columns = get_table_columns(client, schema, table_name)
            .await
            .map_err(|e| ReplicatorError::load(table, e))?;
        if target_columns.is_empty() {
            return Err(ReplicatorError::load(
                table,
                format!("target table {}.{} does not exist", schema, table_name),
            ));
        }
        let columns =
            resolve_columns(rows.column_names(), &target_columns).map_err(|e| ReplicatorError::load(table, e))?;
        let column_names: Vec<String> = columns.iter().map(|c| c.name.clone()).collect();
        let casts: Vec<Option<String>> = columns
            .iter()
            .map(|c| (!binds_natively(&c.data_type)).then(|| c.cast_type()))
            .collect();
        for column in columns.iter().filter(|c| !binds_natively(&c.data_type)) {
            tracing::debug!(
                table = %table,
                "Column '{}' ({}) is bound as text and cast to {}",
                column.name,
                column.data_type,
                column.udt_name
            );
        }

        // Stay under the bind-parameter limit for wide tables.
        let rows_per_batch = batch_size
            .min(MAX_PARAMS_PER_STATEMENT / column_names.len().max(1))
            .max(1);

        let tx = client
            .transaction()
            .await
            .map_err(|e| ReplicatorError::load(table, e))?;

        let mut inserted = 0u64;
        for (batch_idx, chunk) in rows.rows().chunks(rows_per_batch).enumerate() {
            let mut values: Vec<Box<dyn ToSql + Sync + Send>> =
                Vec::with_capacity(chunk.len() * columns.len());
            let mut conversion_error = None;
            'rows: for (row_offset, row) in chunk.iter().enumerate() {
                for (value, column) in row.iter().zip(&columns) {
                    match scalar_to_sql(value, &column.data_type) {
                        Ok(v) => values.push(v),
                        Err(e) => {
                            conversion_error = Some(format!(
                                "row {}: column '{}' ({}): {}",
                                batch_idx * rows_per_batch + row_offset,
                                column.name,
                                column.data_type,
                                e
                            ));
                            break 'rows;
                        }
                    }
                }
            }

            let result = match conversion_error {
                Some(message) => Err(message),
                None => {
                    let query =
                        build_insert_query(schema, table_name, &column_names, &casts, chunk.len());
                    let params: Vec<&(dyn ToSql + Sync)> = values
                        .iter()
                        .map(|v| v.as_ref() as &(dyn ToSql + Sync))
                        .collect();
                    tx.execute(query.as_str(), &params)
                        .await
                        .map_err(|e| format!("batch {} failed: {}", batch_idx + 1, e))
                }
            };

            match result {
                Ok(count) => {
                    inserted += count;
                    tracing::debug!(
                        table = %table,
                        "Inserted batch {} ({} rows)",
                        batch_idx + 1,
                        count
                    );
                }
                Err(message) => {
                    if let Err(e) = tx.rollback().await {
                        tracing::warn!(table = %table, "Rollback failed: {}", e);
                    }
                    tracing::error!(table = %table, "Load rolled back: {}", message);
                    return Err(ReplicatorError::load(table, message));
                }
            }
        }

        tx.commit()
            .await
            .map_err(|e| ReplicatorError::load(table, format!("commit failed: {}", e)))?;

        tracing::info!(table = %table, rows = inserted, "Loaded rows");
        Ok(inserted)
    }

    async fn close(&mut self) {
        if self.client.take().is_some() {
            tracing::debug!("Closed PostgreSQL target connection");
        }
    }
}

/// Declared types (as reported by `information_schema.columns`) that
/// `scalar_to_sql` binds with a matching Rust type.
const NATIVE_TARGET_TYPES: &[&str] = &[
    "smallint",
    "integer",
    "bigint",
    "numeric",
    "decimal",
    "real",
    "double precision",
    "boolean",
    "text",
    "character varying",
    "character",
    "name",
    "citext",
    "bytea",
    "date",
    "time without time zone",
    "timestamp without time zone",
    "timestamp with time zone",
    "json",
    "jsonb",
    "uuid",
];

/// Whether values for `data_type` are bound directly rather than as cast text.
pub fn binds_natively(data_type: &str) -> bool {
    NATIVE_TARGET_TYPES.contains(&data_type)
}

/// Convert a value into a bind parameter for a column of declared type `data_type`
/// (as reported by `information_schema.columns`).
///
/// Any other type (intervals, arrays, enums, network types) is bound as its
/// canonical text and must be cast on the server; see `build_insert_query`.
pub fn scalar_to_sql(
    value: &ScalarValue,
    data_type: &str,
) -> std::result::Result<Box<dyn ToSql + Sync + Send>, String> {
    let null = value.is_null();
    let boxed: Box<dyn ToSql + Sync + Send> = match data_type {
        "smallint" => Box::new(if null { None } else { Some(to_int::<i16>(value)?) }),
        "integer" => Box::new(if null { None } else { Some(to_int::<i32>(value)?) }),
        "bigint" => Box::new(if null { None } else { Some(to_int::<i64>(value)?) }),
        "numeric" | "decimal" => Box::new(if null { None } else { Some(to_decimal(value)?) }),
        "real" => Box::new(if null {
            None
        } else {
            Some(to_f64(value)? as f32)
        }),
        "double precision" => Box::new(if null { None } else { Some(to_f64(value)?) }),
        "boolean" => Box::new(if null { None } else { Some(to_bool(value)?) }),
        "text" | "character varying" | "character" | "name" | "citext" => {
            Box::new(value.to_canonical_string())
        }
        "bytea" => Box::new(match value {
            ScalarValue::Null => None,
            ScalarValue::Bytes(b) => Some(b.clone()),
            other => other.to_canonical_string().map(String::into_bytes),
        }),
        "date" => Box::new(if null { None } else { Some(to_date(value)?) }),
        "time without time zone" => Box::new(if null { None } else { Some(to_time(value)?) }),
        "timestamp without time zone" => Box::new(if null {
            None
        } else {
            Some(to_naive_datetime(value)?)
        }),
        "timestamp with time zone" => Box::new(if null {
            None
        } else {
            Some(to_utc_datetime(value)?)
        }),
        "json" | "jsonb" => Box::new(if null { None } else { Some(to_json(value)) }),
        "uuid" => Box::new(if null { None } else { Some(to_uuid(value)?) }),
        _ => Box::new(value.to_canonical_string()),
    };
    Ok(boxed)
}

fn mismatch(value: &ScalarValue, expected: &str) -> String {
    format!("cannot convert {:?} to {}", value, expected)
}

fn to_int<T: TryFrom<i128>>(value: &ScalarValue) -> std::result::Result<T, String> {
    let n = match value {
        ScalarValue::Bool(b) => i128::from(*b),
        other => other.as_i128().ok_or_else(|| mismatch(other, "integer"))?,
    };
    T::try_from(n).map_err(|_| format!("value {} is out of range", n))
}

fn to_decimal(value: &ScalarValue) -> std::result::Result<Decimal, String> {
    match value {
        ScalarValue::Decimal(d) => Ok(*d),
        ScalarValue::Int(n) => Ok(Decimal::from(*n)),
        ScalarValue::UInt(n) => Ok(Decimal::from(*n)),
        ScalarValue::Float(f) => Decimal::from_f64(*f).ok_or_else(|| mismatch(value, "numeric")),
        ScalarValue::Text(s) => Decimal::from_str(s.trim()).map_err(|_| mismatch(value, "numeric")),
        other => Err(mismatch(other, "numeric")),
    }
}

fn to_f64(value: &ScalarValue) -> std::result::Result<f64, String> {
    match value {
        ScalarValue::Float(f) => Ok(*f),
        ScalarValue::Int(n) => Ok(*n as f64),
        ScalarValue::UInt(n) => Ok(*n as f64),
        ScalarValue::Decimal(d) => {
            rust_decimal::prelude::ToPrimitive::to_f64(d).ok_or_else(|| mismatch(value, "float"))
        }
        ScalarValue::Text(s) => s.trim().parse().map_err(|_| mismatch(value, "float")),
        other => Err(mismatch(other, "float")),
    }
}

fn to_bool(value: &ScalarValue) -> std::result::Result<bool, String> {
    match value {
        ScalarValue::Bool(b) => Ok(*b),
        ScalarValue::Int(n) => Ok(*n != 0),
        ScalarValue::UInt(n) => Ok(*n != 0),
        ScalarValue::Text(s) => match s.trim().to_ascii_lowercase().as_str() {
            "1" | "t" | "true" | "y" | "yes" => Ok(true),
            "0" | "f" | "false" | "n" | "no" => Ok(false),
            _ => Err(mismatch(value, "boolean")),
        },
        other => Err(mismatch(other, "boolean")),
    }
}

fn parse_naive_datetime(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f"))
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

fn to_date(value: &ScalarValue) -> std::result::Result<NaiveDate, String> {
    match value {
        ScalarValue::Date(d) => Ok(*d),
        ScalarValue::DateTime(dt) => Ok(dt.date()),
        ScalarValue::DateTimeTz(dt) => Ok(dt.date_naive()),
        ScalarValue::Text(s) => NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
            .ok()
            .or_else(|| parse_naive_datetime(s).map(|dt| dt.date()))
            .ok_or_else(|| mismatch(value, "date")),
        other => Err(mismatch(other, "date")),
    }
}

fn to_time(value: &ScalarValue) -> std::result::Result<NaiveTime, String> {
    match value {
        ScalarValue::Time(t) => Ok(*t),
        ScalarValue::DateTime(dt) => Ok(dt.time()),
        ScalarValue::Text(s) => {
            NaiveTime::parse_from_str(s.trim(), "%H:%M:%S%.f").map_err(|_| mismatch(value, "time"))
        }
        other => Err(mismatch(other, "time")),
    }
}

fn to_naive_datetime(value: &ScalarValue) -> std::result::Result<NaiveDateTime, String> {
    match value {
        ScalarValue::DateTime(dt) => Ok(*dt),
        ScalarValue::DateTimeTz(dt) => Ok(dt.naive_utc()),
        ScalarValue::Date(d) => d.and_hms_opt(0, 0, 0).ok_or_else(|| mismatch(value, "timestamp")),
        ScalarValue::Text(s) => parse_naive_datetime(s).ok_or_else(|| mismatch(value, "timestamp")),
        other => Err(mismatch(other, "timestamp")),
    }
}

fn to_utc_datetime(value: &ScalarValue) -> std::result::Result<DateTime<Utc>, String> {
    match value {
        ScalarValue::DateTimeTz(dt) => Ok(*dt),
        ScalarValue::Text(s) => DateTime::parse_from_rfc3339(s.trim())
            .or_else(|_| DateTime::parse_from_str(s.trim(), "%Y-%m-%d %H:%M:%S%.f%#z"))
            .map(|dt| dt.with_timezone(&Utc))
            .or_else(|_| to_naive_datetime(value).map(|dt| dt.and_utc())),
        // Naive source timestamps are taken as UTC.
        other => to_naive_datetime(other).map(|dt| dt.and_utc()),
    }
}

fn to_json(value: &ScalarValue) -> serde_json::Value {
    match value {
        ScalarValue::Json(j) => j.clone(),
        ScalarValue::Text(s) => {
            serde_json::from_str(s).unwrap_or_else(|_| serde_json::Value::String(s.clone()))
        }
        other => other
            .to_canonical_string()
            .map(serde_json::Value::String)
            .unwrap_or(serde_json::Value::Null),
    }
}

fn to_uuid(value: &ScalarValue) -> std::result::Result<uuid::Uuid, String> {
    match value {
        ScalarValue::Text(s) => uuid::Uuid::parse_str(s.trim()).map_err(|_| mismatch(value, "uuid")),
        ScalarValue::Bytes(b) => uuid::Uuid::from_slice(b)
            .or_else(|_| {
                std::str::from_utf8(b)
                    .map_err(|_| ())
                    .and_then(|s| uuid::Uuid::parse_str(s.trim()).map_err(|_| ()))
            })
            .map_err(|_| mismatch(value, "uuid")),
        other => Err(mismatch(other, "uuid")),
    }
}
