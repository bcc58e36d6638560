// ABOUTME: Per-table replication pipeline and its run summary
// ABOUTME: Outcomes are recorded per table so one failure never hides another table's result

mod runner;

pub use runner::PipelineRunner;

use crate::error::ReplicatorError;
use crate::watermark::LoadMode;
use std::fmt;

/// Step of a table iteration, reported with failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    ResolveWatermark,
    Extract,
    Load,
    EmitWatermark,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::ResolveWatermark => "resolve_watermark",
            Stage::Extract => "extract",
            Stage::Load => "load",
            Stage::EmitWatermark => "emit_watermark",
        };
        f.write_str(name)
    }
}

/// What happened to one table during a run.
#[derive(Debug)]
pub enum TableOutcome {
    /// Rows were committed to the target.
    Loaded {
        mode: LoadMode,
        rows: u64,
        /// Watermark handed to the checkpoint store, if any.
        watermark: Option<String>,
    },
    /// Extraction returned no rows; nothing was written.
    Skipped { mode: LoadMode },
    Failed {
        stage: Stage,
        error: ReplicatorError,
    },
}

impl TableOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, TableOutcome::Failed { .. })
    }
}

#[derive(Debug)]
pub struct TableReport {
    pub table_name: String,
    pub outcome: TableOutcome,
}

/// Result of one run across all selected tables, in processing order.
#[derive(Debug, Default)]
pub struct RunSummary {
    pub tables: Vec<TableReport>,
    pub duration_ms: u64,
}

impl RunSummary {
    pub fn loaded(&self) -> usize {
        self.tables
            .iter()
            .filter(|t| matches!(t.outcome, TableOutcome::Loaded { .. }))
            .count()
    }

    pub fn skipped(&self) -> usize {
        self.tables
            .iter()
            .filter(|t| matches!(t.outcome, TableOutcome::Skipped { .. }))
            .count()
    }

    pub fn failed(&self) -> usize {
        self.tables.iter().filter(|t| t.outcome.is_failed()).count()
    }

    pub fn rows_loaded(&self) -> u64 {
        self.tables
            .iter()
            .map(|t| match t.outcome {
                TableOutcome::Loaded { rows, .. } => rows,
                _ => 0,
            })
            .sum()
    }

    /// Names of failed tables.
    pub fn failed_tables(&self) -> Vec<&str> {
        self.tables
            .iter()
            .filter(|t| t.outcome.is_failed())
            .map(|t| t.table_name.as_str())
            .collect()
    }

    /// `(table, watermark)` pairs emitted during the run.
    pub fn watermarks(&self) -> Vec<(&str, &str)> {
        self.tables
            .iter()
            .filter_map(|t| match &t.outcome {
                TableOutcome::Loaded {
                    watermark: Some(w), ..
                } => Some((t.table_name.as_str(), w.as_str())),
                _ => None,
            })
            .collect()
    }

    pub fn outcome(&self, table: &str) -> Option<&TableOutcome> {
        self.tables
            .iter()
            .find(|t| t.table_name == table)
            .map(|t| &t.outcome)
    }

    pub fn is_success(&self) -> bool {
        self.failed() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(table: &str, outcome: TableOutcome) -> TableReport {
        TableReport {
            table_name: table.to_string(),
            outcome,
        }
    }

    #[test]
    fn test_summary_counts() {
        let summary = RunSummary {
            tables: vec![
                report(
                    "orders",
                    TableOutcome::Loaded {
                        mode: LoadMode::Full,
                        rows: 3,
                        watermark: Some("2024-01-03".to_string()),
                    },
                ),
                report("departments", TableOutcome::Skipped { mode: LoadMode::Full }),
                report(
                    "order_items",
                    TableOutcome::Failed {
                        stage: Stage::Load,
                        error: ReplicatorError::load("order_items", "duplicate key"),
                    },
                ),
            ],
            duration_ms: 12,
        };

        assert_eq!(summary.loaded(), 1);
        assert_eq!(summary.skipped(), 1);
        assert_eq!(summary.failed(), 1);
        assert_eq!(summary.rows_loaded(), 3);
        assert_eq!(summary.failed_tables(), vec!["order_items"]);
        assert_eq!(summary.watermarks(), vec![("orders", "2024-01-03")]);
        assert!(!summary.is_success());
    }

    #[test]
    fn test_stage_names() {
        assert_eq!(Stage::ResolveWatermark.to_string(), "resolve_watermark");
        assert_eq!(Stage::EmitWatermark.to_string(), "emit_watermark");
    }
}
