// ABOUTME: PipelineRunner drives extract -> load -> emit for each selected table
// ABOUTME: Contains per-table failures and always closes both connectors

use super::{RunSummary, Stage, TableOutcome, TableReport};
use crate::catalog::TableEntry;
use crate::connectors::{SourceConnector, TargetConnector};
use crate::error::{ReplicatorError, Result};
use crate::watermark::{compute_new_watermark, resolve_load_mode, CheckpointStore};
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

/// Runs one replication pass over a list of tables.
///
/// Tables are processed sequentially in the order given. The runner owns
/// both connectors for its lifetime and closes them when `run` returns,
/// on every exit path.
pub struct PipelineRunner {
    source: Box<dyn SourceConnector>,
    target: Box<dyn TargetConnector>,
    checkpoints: Arc<dyn CheckpointStore>,
}

impl PipelineRunner {
    pub fn new(
        source: Box<dyn SourceConnector>,
        target: Box<dyn TargetConnector>,
        checkpoints: Arc<dyn CheckpointStore>,
    ) -> Self {
        Self {
            source,
            target,
            checkpoints,
        }
    }

    /// Process every entry and return the per-table outcomes.
    ///
    /// Only a panic escaping a table iteration fails the run, as
    /// `ReplicatorError::Defect`; both connectors are closed first.
    pub async fn run(mut self, entries: &[TableEntry]) -> Result<RunSummary> {
        let start = Instant::now();
        tracing::info!(
            "Starting run for {} table(s): source {}, target {}",
            entries.len(),
            self.source.endpoint(),
            self.target.endpoint()
        );

        let result = AssertUnwindSafe(self.process_tables(entries))
            .catch_unwind()
            .await;

        self.close().await;

        match result {
            Ok(mut summary) => {
                summary.duration_ms = start.elapsed().as_millis() as u64;
                tracing::info!(
                    "Run complete: {} loaded, {} skipped, {} failed, {} rows in {}ms",
                    summary.loaded(),
                    summary.skipped(),
                    summary.failed(),
                    summary.rows_loaded(),
                    summary.duration_ms
                );
                Ok(summary)
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                tracing::error!("Run aborted by an unexpected panic: {}", message);
                Err(ReplicatorError::Defect(message))
            }
        }
    }

    async fn process_tables(&mut self, entries: &[TableEntry]) -> RunSummary {
        let mut summary = RunSummary::default();
        for entry in entries {
            tracing::info!(table = %entry.table_name, "Processing table");
            let outcome = self.process_table(entry).await;
            match &outcome {
                TableOutcome::Loaded {
                    mode,
                    rows,
                    watermark,
                } => tracing::info!(
                    table = %entry.table_name,
                    mode = %mode,
                    rows = *rows,
                    watermark = watermark.as_deref().unwrap_or("-"),
                    "✓ Table loaded"
                ),
                TableOutcome::Skipped { mode } => tracing::info!(
                    table = %entry.table_name,
                    mode = %mode,
                    "No new rows, skipping load"
                ),
                TableOutcome::Failed { stage, error } => tracing::error!(
                    table = %entry.table_name,
                    stage = %stage,
                    "Failed to process table: {}",
                    error
                ),
            }
            summary.tables.push(TableReport {
                table_name: entry.table_name.clone(),
                outcome,
            });
        }
        summary
    }

    async fn process_table(&mut self, entry: &TableEntry) -> TableOutcome {
        let table = entry.table_name.as_str();

        let last_watermark = match self.checkpoints.get(table).await {
            Ok(value) => value,
            Err(error) => {
                return TableOutcome::Failed {
                    stage: Stage::ResolveWatermark,
                    error,
                }
            }
        };
        let mode = resolve_load_mode(entry, last_watermark.as_deref());

        let rows = match self.source.extract(table, &mode).await {
            Ok(rows) => rows,
            Err(error) => {
                return TableOutcome::Failed {
                    stage: Stage::Extract,
                    error,
                }
            }
        };

        if rows.is_empty() {
            return TableOutcome::Skipped { mode };
        }

        let loaded = match self.target.load(table, &rows).await {
            Ok(count) => count,
            Err(error) => {
                return TableOutcome::Failed {
                    stage: Stage::Load,
                    error,
                }
            }
        };

        let watermark = match compute_new_watermark(
            table,
            &rows,
            entry.watermark_column.as_deref(),
            entry.watermark_type,
        ) {
            Ok(Some(new_watermark)) => {
                if let Err(error) = self.checkpoints.set(table, &new_watermark.value).await {
                    return TableOutcome::Failed {
                        stage: Stage::EmitWatermark,
                        error,
                    };
                }
                tracing::info!(table = %table, watermark = %new_watermark.value, "Emitted {}", new_watermark);
                Some(new_watermark.value)
            }
            Ok(None) => {
                tracing::info!(table = %table, "No new watermark emitted");
                None
            }
            Err(e) => {
                tracing::warn!(table = %table, "Watermark not emitted: {}", e);
                None
            }
        };

        TableOutcome::Loaded {
            mode,
            rows: loaded,
            watermark,
        }
    }

    async fn close(&mut self) {
        self.source.close().await;
        self.target.close().await;
        tracing::debug!("Closed source and target connectors");
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
