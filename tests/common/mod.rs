// ABOUTME: In-memory connectors shared by the integration tests
// ABOUTME: FakeSource applies watermark predicates; FakeTarget stages rows and commits atomically

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use watermark_replicator::catalog::{TableCatalog, TableEntry};
use watermark_replicator::types::Row;
use watermark_replicator::watermark::WatermarkValue;
use watermark_replicator::{
    ExtractedRowSet, LoadMode, ReplicatorError, Result, ScalarValue, SourceConnector,
    TargetConnector,
};

#[derive(Default)]
pub struct SourceState {
    pub tables: HashMap<String, (Vec<String>, Vec<Row>)>,
    pub extracts: Vec<(String, LoadMode)>,
    pub fail_tables: HashSet<String>,
    pub panic_tables: HashSet<String>,
    pub connected: bool,
    pub closed: bool,
}

/// Source whose tables live in memory. Incremental reads keep rows whose
/// watermark column is strictly greater than the last value.
#[derive(Clone, Default)]
pub struct FakeSource {
    pub state: Arc<Mutex<SourceState>>,
}

impl FakeSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_table(self, table: &str, columns: &[&str], rows: Vec<Row>) -> Self {
        self.state.lock().unwrap().tables.insert(
            table.to_string(),
            (columns.iter().map(|c| c.to_string()).collect(), rows),
        );
        self
    }

    pub fn fail_on(self, table: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .fail_tables
            .insert(table.to_string());
        self
    }

    pub fn panic_on(self, table: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .panic_tables
            .insert(table.to_string());
        self
    }

    pub fn extracts(&self) -> Vec<(String, LoadMode)> {
        self.state.lock().unwrap().extracts.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().unwrap().closed
    }
}

fn is_past_watermark(value: &ScalarValue, last: &WatermarkValue) -> bool {
    match last {
        WatermarkValue::Id(n) => value.as_i128().map_or(false, |v| v > *n),
        WatermarkValue::Timestamp(s) => value
            .to_canonical_string()
            .map_or(false, |v| v.as_str() > s.as_str()),
    }
}

#[async_trait]
impl SourceConnector for FakeSource {
    fn kind(&self) -> &str {
        "fake"
    }

    fn endpoint(&self) -> String {
        "fake://source".to_string()
    }

    async fn connect(&mut self) -> Result<()> {
        self.state.lock().unwrap().connected = true;
        Ok(())
    }

    async fn extract(&mut self, table: &str, mode: &LoadMode) -> Result<ExtractedRowSet> {
        let mut state = self.state.lock().unwrap();
        state.extracts.push((table.to_string(), mode.clone()));
        if state.panic_tables.contains(table) {
            drop(state);
            panic!("source exploded on {}", table);
        }
        if state.fail_tables.contains(table) {
            return Err(ReplicatorError::query(table, "table doesn't exist"));
        }
        let Some((columns, rows)) = state.tables.get(table).cloned() else {
            return Err(ReplicatorError::query(table, "unknown table"));
        };

        let rows: Vec<Row> = match mode {
            LoadMode::Full => rows,
            LoadMode::Incremental { column, last_value } => {
                let idx = columns
                    .iter()
                    .position(|c| c == column)
                    .ok_or_else(|| ReplicatorError::query(table, "unknown column"))?;
                rows.into_iter()
                    .filter(|row| is_past_watermark(&row[idx], last_value))
                    .collect()
            }
        };

        if rows.is_empty() {
            return Ok(ExtractedRowSet::empty());
        }
        ExtractedRowSet::new(columns, rows).map_err(|e| ReplicatorError::query(table, e))
    }

    async fn close(&mut self) {
        self.state.lock().unwrap().closed = true;
    }
}

#[derive(Default)]
pub struct TargetState {
    pub committed: HashMap<String, Vec<Row>>,
    pub loads: Vec<String>,
    /// Fail a load of `table` when it reaches this row index.
    pub fail_at_row: HashMap<String, usize>,
    pub closed: bool,
}

/// Target that stages each load and commits it only if every row succeeds.
#[derive(Clone, Default)]
pub struct FakeTarget {
    pub state: Arc<Mutex<TargetState>>,
}

impl FakeTarget {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rows(self, table: &str, rows: Vec<Row>) -> Self {
        self.state
            .lock()
            .unwrap()
            .committed
            .insert(table.to_string(), rows);
        self
    }

    pub fn fail_at_row(self, table: &str, row: usize) -> Self {
        self.state
            .lock()
            .unwrap()
            .fail_at_row
            .insert(table.to_string(), row);
        self
    }

    pub fn row_count(&self, table: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .committed
            .get(table)
            .map_or(0, Vec::len)
    }

    pub fn loads(&self) -> Vec<String> {
        self.state.lock().unwrap().loads.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().unwrap().closed
    }
}

#[async_trait]
impl TargetConnector for FakeTarget {
    fn kind(&self) -> &str {
        "fake"
    }

    fn endpoint(&self) -> String {
        "fake://target".to_string()
    }

    async fn connect(&mut self) -> Result<()> {
        Ok(())
    }

    async fn load(&mut self, table: &str, rows: &ExtractedRowSet) -> Result<u64> {
        let mut state = self.state.lock().unwrap();
        state.loads.push(table.to_string());

        let mut staged = state.committed.get(table).cloned().unwrap_or_default();
        for (idx, row) in rows.rows().iter().enumerate() {
            if state.fail_at_row.get(table) == Some(&idx) {
                return Err(ReplicatorError::load(
                    table,
                    format!("constraint violation at row {}", idx),
                ));
            }
            staged.push(row.clone());
        }
        state.committed.insert(table.to_string(), staged);
        Ok(rows.len() as u64)
    }

    async fn close(&mut self) {
        self.state.lock().unwrap().closed = true;
    }
}

pub fn text(s: &str) -> ScalarValue {
    ScalarValue::Text(s.to_string())
}

pub fn int(n: i64) -> ScalarValue {
    ScalarValue::Int(n)
}

pub const CATALOG_CSV: &str = "\
table_name,to_be_loaded,watermark_column,watermark_type
departments,yes,,
categories,no,category_id,id
products,yes,,
orders,yes,order_date,timestamp
order_items,yes,order_item_id,id
customers,Yes,customer_id,id
";

pub fn catalog() -> TableCatalog {
    TableCatalog::from_reader(CATALOG_CSV.as_bytes()).unwrap()
}

pub fn entry(catalog: &TableCatalog, table: &str) -> TableEntry {
    catalog
        .entries()
        .iter()
        .find(|e| e.table_name == table)
        .cloned()
        .unwrap()
}
