// ABOUTME: Computes the new high-water mark from extracted rows
// ABOUTME: Produces the canonical NEW_WATERMARK_<TABLE>=<value> line for the orchestrator

use super::EnvCheckpointStore;
use crate::catalog::WatermarkType;
use crate::error::{ReplicatorError, Result};
use crate::types::{ExtractedRowSet, ScalarValue};
use std::fmt;

/// A watermark to hand to the checkpoint store after a successful load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewWatermark {
    pub table_name: String,
    pub value: String,
}

impl NewWatermark {
    /// Environment-style key the orchestrator expects, e.g. `NEW_WATERMARK_ORDERS`.
    pub fn output_key(&self) -> String {
        EnvCheckpointStore::output_key(&self.table_name)
    }

    /// `NEW_WATERMARK_<TABLE_UPPER>=<value>`
    pub fn to_line(&self) -> String {
        format!("{}={}", self.output_key(), self.value)
    }
}

impl fmt::Display for NewWatermark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_line())
    }
}

/// Compute the maximum watermark value in `rows`.
///
/// `watermark_column` must be the column named in the catalog entry, even when
/// this run did a full load. Returns `Ok(None)` when there is no column, no
/// rows, the column is absent from the result, or every value is NULL.
/// `id` columns compare numerically and fail with `WatermarkCompute` on a
/// non-integer value; `timestamp` columns compare their canonical strings;
/// untyped columns use the values' natural ordering.
pub fn compute_new_watermark(
    table_name: &str,
    rows: &ExtractedRowSet,
    watermark_column: Option<&str>,
    watermark_type: Option<WatermarkType>,
) -> Result<Option<NewWatermark>> {
    let Some(column) = watermark_column.map(str::trim).filter(|c| !c.is_empty()) else {
        return Ok(None);
    };
    if rows.is_empty() {
        return Ok(None);
    }

    let Some(idx) = rows.column_index(column) else {
        tracing::warn!(
            table = %table_name,
            "Watermark column '{}' not found in extracted columns [{}]",
            column,
            rows.column_names().join(", ")
        );
        return Ok(None);
    };

    let values = rows
        .rows()
        .iter()
        .filter_map(|row| row.get(idx))
        .filter(|v| !v.is_null());

    let max = match watermark_type {
        Some(WatermarkType::Id) => {
            let mut max: Option<i128> = None;
            for value in values {
                let n = value.as_i128().ok_or_else(|| {
                    ReplicatorError::watermark(
                        table_name,
                        format!(
                            "value {:?} in id column '{}' is not an integer",
                            value, column
                        ),
                    )
                })?;
                max = Some(max.map_or(n, |m| m.max(n)));
            }
            max.map(|n| n.to_string())
        }
        Some(WatermarkType::Timestamp) => values
            .filter_map(ScalarValue::to_canonical_string)
            .max(),
        None => values
            .max_by(|a, b| a.natural_cmp(b))
            .and_then(ScalarValue::to_canonical_string),
    };

    Ok(max.map(|value| NewWatermark {
        table_name: table_name.to_string(),
        value,
    }))
}
