// ABOUTME: Decides between full and incremental extraction for a table
// ABOUTME: Any ambiguity in catalog metadata or checkpoint value collapses to a full load

use crate::catalog::{TableEntry, WatermarkType};
use std::fmt;

/// Last watermark value, typed according to the catalog's watermark type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatermarkValue {
    /// Wide enough for both signed and unsigned 64-bit keys.
    Id(i128),
    /// Passed to the source verbatim so comparison follows the source's own rules.
    Timestamp(String),
}

impl fmt::Display for WatermarkValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WatermarkValue::Id(n) => write!(f, "{}", n),
            WatermarkValue::Timestamp(s) => f.write_str(s),
        }
    }
}

/// How a table is extracted in this run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadMode {
    Full,
    /// Rows whose `column` is strictly greater than `last_value`.
    Incremental {
        column: String,
        last_value: WatermarkValue,
    },
}

impl LoadMode {
    pub fn is_incremental(&self) -> bool {
        matches!(self, LoadMode::Incremental { .. })
    }
}

impl fmt::Display for LoadMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadMode::Full => f.write_str("full"),
            LoadMode::Incremental { column, last_value } => {
                write!(f, "incremental({} > {})", column, last_value)
            }
        }
    }
}

/// Whether a checkpoint value means "no watermark recorded".
fn is_absent(value: Option<&str>) -> bool {
    match value.map(str::trim) {
        None => true,
        Some(v) => v.is_empty() || v.eq_ignore_ascii_case("none"),
    }
}

/// Resolve the load mode for `entry` given the last checkpointed value.
///
/// Never fails. Unparsable or unrecognized inputs are logged and fall back
/// to `LoadMode::Full`, preferring a re-read over silently skipped rows.
pub fn resolve_load_mode(entry: &TableEntry, last_watermark: Option<&str>) -> LoadMode {
    let table = entry.table_name.as_str();

    let Some(column) = entry
        .watermark_column
        .as_deref()
        .map(str::trim)
        .filter(|c| !c.is_empty())
    else {
        tracing::info!(table = %table, mode = "full", "No watermark column defined");
        return LoadMode::Full;
    };

    if is_absent(last_watermark) {
        tracing::info!(
            table = %table,
            mode = "full",
            "No previous watermark for column '{}'",
            column
        );
        return LoadMode::Full;
    }
    let raw = last_watermark.unwrap_or_default();

    let last_value = match entry.watermark_type {
        Some(WatermarkType::Id) => match raw.trim().parse::<i128>() {
            Ok(n) => WatermarkValue::Id(n),
            Err(e) => {
                tracing::warn!(
                    table = %table,
                    mode = "full",
                    "Watermark '{}' is not a valid integer id ({}); falling back to full load",
                    raw,
                    e
                );
                return LoadMode::Full;
            }
        },
        Some(WatermarkType::Timestamp) => WatermarkValue::Timestamp(raw.to_string()),
        None => {
            tracing::warn!(
                table = %table,
                mode = "full",
                "Watermark column '{}' has no recognized watermark type; falling back to full load",
                column
            );
            return LoadMode::Full;
        }
    };

    tracing::info!(
        table = %table,
        mode = "incremental",
        watermark = %last_value,
        "Incremental load on column '{}'",
        column
    );
    LoadMode::Incremental {
        column: column.to_string(),
        last_value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(column: Option<&str>, kind: Option<WatermarkType>) -> TableEntry {
        TableEntry {
            table_name: "orders".to_string(),
            to_be_loaded: true,
            watermark_column: column.map(str::to_string),
            watermark_type: kind,
        }
    }

    #[test]
    fn test_no_watermark_column_is_full() {
        let e = entry(None, Some(WatermarkType::Id));
        assert_eq!(resolve_load_mode(&e, Some("10")), LoadMode::Full);

        let e = entry(Some("   "), Some(WatermarkType::Id));
        assert_eq!(resolve_load_mode(&e, Some("10")), LoadMode::Full);
    }

    #[test]
    fn test_absent_checkpoint_is_full_for_every_type() {
        for kind in [Some(WatermarkType::Id), Some(WatermarkType::Timestamp), None] {
            let e = entry(Some("order_id"), kind);
            assert_eq!(resolve_load_mode(&e, None), LoadMode::Full);
            assert_eq!(resolve_load_mode(&e, Some("")), LoadMode::Full);
            assert_eq!(resolve_load_mode(&e, Some("  ")), LoadMode::Full);
            assert_eq!(resolve_load_mode(&e, Some("None")), LoadMode::Full);
            assert_eq!(resolve_load_mode(&e, Some("NONE")), LoadMode::Full);
        }
    }

    #[test]
    fn test_id_watermark_parses_integer() {
        let e = entry(Some("order_id"), Some(WatermarkType::Id));
        assert_eq!(
            resolve_load_mode(&e, Some(" 68883 ")),
            LoadMode::Incremental {
                column: "order_id".to_string(),
                last_value: WatermarkValue::Id(68883),
            }
        );
    }

    #[test]
    fn test_unsigned_bigint_id_stays_incremental() {
        let e = entry(Some("event_id"), Some(WatermarkType::Id));
        assert_eq!(
            resolve_load_mode(&e, Some("18446744073709551615")),
            LoadMode::Incremental {
                column: "event_id".to_string(),
                last_value: WatermarkValue::Id(u64::MAX.into()),
            }
        );
    }

    #[test]
    fn test_unparsable_id_falls_back_to_full() {
        let e = entry(Some("order_id"), Some(WatermarkType::Id));
        assert_eq!(resolve_load_mode(&e, Some("abc")), LoadMode::Full);
        assert_eq!(resolve_load_mode(&e, Some("12.5")), LoadMode::Full);
    }

    #[test]
    fn test_timestamp_passes_through_unmodified() {
        let e = entry(Some("order_date"), Some(WatermarkType::Timestamp));
        assert_eq!(
            resolve_load_mode(&e, Some("2024-01-01 00:00:00")),
            LoadMode::Incremental {
                column: "order_date".to_string(),
                last_value: WatermarkValue::Timestamp("2024-01-01 00:00:00".to_string()),
            }
        );
    }

    #[test]
    fn test_unknown_type_falls_back_to_full() {
        let e = entry(Some("order_date"), None);
        assert_eq!(resolve_load_mode(&e, Some("2024-01-01")), LoadMode::Full);
    }

    #[test]
    fn test_load_mode_display() {
        let mode = LoadMode::Incremental {
            column: "order_id".to_string(),
            last_value: WatermarkValue::Id(5),
        };
        assert_eq!(mode.to_string(), "incremental(order_id > 5)");
        assert_eq!(LoadMode::Full.to_string(), "full");
    }
}
