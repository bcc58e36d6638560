// ABOUTME: PostgreSQL source connector
// ABOUTME: Reads full tables or rows past a watermark and decodes typed column values

use super::DEFAULT_SCHEMA;
use crate::config::EndpointConfig;
use crate::connectors::{LoadMode, SourceConnector};
use crate::error::{ReplicatorError, Result};
use crate::types::{ExtractedRowSet, ScalarValue};
use crate::utils::{quote_ident, quote_pg_table, validate_table_name};
use async_trait::async_trait;
use rust_decimal::Decimal;
use tokio_postgres::types::{ToSql, Type};
use tokio_postgres::{Client, Row};

pub struct PostgresSource {
    endpoint: EndpointConfig,
    accept_invalid_certs: bool,
    client: Option<Client>,
}

impl PostgresSource {
    pub fn new(endpoint: EndpointConfig, accept_invalid_certs: bool) -> Self {
        Self {
            endpoint,
            accept_invalid_certs,
            client: None,
        }
    }

    fn schema(&self) -> &str {
        self.endpoint.schema.as_deref().unwrap_or(DEFAULT_SCHEMA)
    }
}

/// Build the extraction query for `table`.
///
/// `watermark_type` is the server-side type of the watermark column, as
/// `(schema, name)`. The watermark is bound as text and cast to that type so
/// the comparison follows the column's own ordering. `projection` replaces
/// `*` when some columns must be read as text (see `build_projection`).
pub fn build_extract_query(
    table: &str,
    default_schema: Option<&str>,
    mode: &LoadMode,
    watermark_type: Option<(&str, &str)>,
    projection: Option<&str>,
) -> String {
    let table_sql = quote_pg_table(table, default_schema);
    let projection = projection.unwrap_or("*");
    match mode {
        LoadMode::Full => format!("SELECT {} FROM {}", projection, table_sql),
        LoadMode::Incremental { column, .. } => {
            let column_sql = quote_ident(column);
            let param = match watermark_type {
                Some((schema, name)) => {
                    format!("$1::text::{}.{}", quote_ident(schema), quote_ident(name))
                }
                None => "$1".to_string(),
            };
            format!(
                "SELECT {} FROM {} WHERE {} > {} ORDER BY {}",
                projection, table_sql, column_sql, param, column_sql
            )
        }
    }
}

/// Select list that reads every column whose type has no native decoding
/// as `"col"::text AS "col"`. Returns `None` when `*` suffices.
pub fn build_projection<'a>(columns: impl IntoIterator<Item = (&'a str, bool)>) -> Option<String> {
    let mut needs_cast = false;
    let items: Vec<String> = columns
        .into_iter()
        .map(|(name, native)| {
            let quoted = quote_ident(name);
            if native {
                quoted
            } else {
                needs_cast = true;
                format!("{}::text AS {}", quoted, quoted)
            }
        })
        .collect();
    needs_cast.then(|| items.join(", "))
}

#[async_trait]
impl SourceConnector for PostgresSource {
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
            tracing::warn!("PostgreSQL source connection closed, reconnecting");
        }
        self.client = Some(super::connect(&self.endpoint, self.accept_invalid_certs).await?);
        Ok(())
    }

    async fn extract(&mut self, table: &str, mode: &LoadMode) -> Result<ExtractedRowSet> {
        validate_table_name(table).map_err(|e| ReplicatorError::query(table, e))?;
        self.connect()
            .await
            .map_err(|e| ReplicatorError::query(table, e))?;
        let schema = self.schema().to_string();
        let client = self
            .client
            .as_ref()
            .ok_or_else(|| ReplicatorError::query(table, "connection not available"))?;

        // Prepare once with `*` and an untyped parameter to learn the column
        // types and the watermark column's type.
        let describe_sql = build_extract_query(table, Some(&schema), mode, None, None);
        let described = client
            .prepare(&describe_sql)
            .await
            .map_err(|e| ReplicatorError::query(table, e))?;
        let projection = build_projection(
            described
                .columns()
                .iter()
                .map(|c| (c.name(), decodes_natively(c.type_()))),
        );
        if let Some(projection) = &projection {
            tracing::debug!(table = %table, "Reading some columns as text: {}", projection);
        }

        let rows = match mode {
            LoadMode::Full => {
                let sql = build_extract_query(table, Some(&schema), mode, None, projection.as_deref());
                tracing::debug!(table = %table, "Executing: {}", sql);
                client
                    .query(sql.as_str(), &[])
                    .await
                    .map_err(|e| ReplicatorError::query(table, e))?
            }
            LoadMode::Incremental { last_value, .. } => {
                let param_type = described
                    .params()
                    .first()
                    .cloned()
                    .ok_or_else(|| ReplicatorError::query(table, "watermark predicate has no parameter"))?;

                let sql = build_extract_query(
                    table,
                    Some(&schema),
                    mode,
                    Some((param_type.schema(), param_type.name())),
                    projection.as_deref(),
                );
                tracing::debug!(table = %table, "Executing: {}", sql);
                let watermark = last_value.to_string();
                let params: [&(dyn ToSql + Sync); 1] = [&watermark];
                client
                    .query(sql.as_str(), &params)
                    .await
                    .map_err(|e| ReplicatorError::query(table, e))?
            }
        };

        if rows.is_empty() {
            tracing::info!(table = %table, rows = 0, "No rows extracted");
            return Ok(ExtractedRowSet::empty());
        }

        let column_names: Vec<String> = rows[0]
            .columns()
            .iter()
            .map(|c| c.name().to_string())
            .collect();

        let mut values = Vec::with_capacity(rows.len());
        for row in &rows {
            values.push(row_to_scalars(row).map_err(|e| ReplicatorError::query(table, e))?);
        }

        let row_set =
            ExtractedRowSet::new(column_names, values).map_err(|e| ReplicatorError::query(table, e))?;
        tracing::info!(table = %table, rows = row_set.len(), "Extracted rows");
        Ok(row_set)
    }

    async fn close(&mut self) {
        // Dropping the client ends the connection task.
        if self.client.take().is_some() {
            tracing::debug!("Closed PostgreSQL source connection");
        }
    }
}

/// Decode every column of `row` according to its PostgreSQL type.
fn row_to_scalars(row: &Row) -> std::result::Result<Vec<ScalarValue>, String> {
    row.columns()
        .iter()
        .enumerate()
        .map(|(idx, column)| {
            decode_column(row, idx, column.type_())
                .map_err(|e| format!("column '{}' ({}): {}", column.name(), column.type_(), e))
        })
        .collect()
}

/// Whether `decode_column` reads `ty` directly; other types are selected as text.
fn decodes_natively(ty: &Type) -> bool {
    matches!(
        *ty,
        Type::BOOL
            | Type::INT2
            | Type::INT4
            | Type::INT8
            | Type::OID
            | Type::FLOAT4
            | Type::FLOAT8
            | Type::NUMERIC
            | Type::TEXT
            | Type::VARCHAR
            | Type::BPCHAR
            | Type::NAME
            | Type::UNKNOWN
            | Type::BYTEA
            | Type::DATE
            | Type::TIME
            | Type::TIMESTAMP
            | Type::TIMESTAMPTZ
            | Type::JSON
            | Type::JSONB
            | Type::UUID
    )
}

fn decode_column(
    row: &Row,
    idx: usize,
    ty: &Type,
) -> std::result::Result<ScalarValue, String> {
    fn get<'a, T: tokio_postgres::types::FromSql<'a>>(
        row: &'a Row,
        idx: usize,
    ) -> std::result::Result<Option<T>, String> {
        row.try_get::<_, Option<T>>(idx).map_err(|e| e.to_string())
    }

    let value = match *ty {
        Type::BOOL => get::<bool>(row, idx)?.map(ScalarValue::Bool),
        Type::INT2 => get::<i16>(row, idx)?.map(|v| ScalarValue::Int(v.into())),
        Type::INT4 => get::<i32>(row, idx)?.map(|v| ScalarValue::Int(v.into())),
        Type::INT8 => get::<i64>(row, idx)?.map(ScalarValue::Int),
        Type::OID => get::<u32>(row, idx)?.map(|v| ScalarValue::UInt(v.into())),
        Type::FLOAT4 => get::<f32>(row, idx)?.map(|v| ScalarValue::Float(v.into())),
        Type::FLOAT8 => get::<f64>(row, idx)?.map(ScalarValue::Float),
        Type::NUMERIC => get::<Decimal>(row, idx)?.map(ScalarValue::Decimal),
        Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME | Type::UNKNOWN => {
            get::<String>(row, idx)?.map(ScalarValue::Text)
        }
        Type::BYTEA => get::<Vec<u8>>(row, idx)?.map(ScalarValue::Bytes),
        Type::DATE => get::<chrono::NaiveDate>(row, idx)?.map(ScalarValue::Date),
        Type::TIME => get::<chrono::NaiveTime>(row, idx)?.map(ScalarValue::Time),
        Type::TIMESTAMP => get::<chrono::NaiveDateTime>(row, idx)?.map(ScalarValue::DateTime),
        Type::TIMESTAMPTZ => {
            get::<chrono::DateTime<chrono::Utc>>(row, idx)?.map(ScalarValue::DateTimeTz)
        }
        Type::JSON | Type::JSONB => get::<serde_json::Value>(row, idx)?.map(ScalarValue::Json),
        Type::UUID => get::<uuid::Uuid>(row, idx)?.map(|u| ScalarValue::Text(u.to_string())),
        _ => return Err("unsupported column type".to_string()),
    };
    Ok(value.unwrap_or(ScalarValue::Null))
}
