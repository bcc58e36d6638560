// ABOUTME: Table catalog loading and selection
// ABOUTME: Reads the tables_list CSV and filters it by to_be_loaded and a table selector

use crate::error::{ReplicatorError, Result};
use serde::Deserialize;
use std::fmt;
use std::io::Read;
use std::path::Path;
use std::str::FromStr;

/// Default catalog file name, relative to the working directory.
pub const DEFAULT_CATALOG_PATH: &str = "tables_list";

const REQUIRED_COLUMNS: [&str; 2] = ["table_name", "to_be_loaded"];
const LOADABLE_MARKER: &str = "yes";

/// Kind of value stored in a table's watermark column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatermarkType {
    /// Monotonic integer column (auto-increment id).
    Id,
    /// Timestamp-like column compared as an opaque string on the source.
    Timestamp,
}

impl WatermarkType {
    pub fn as_str(&self) -> &'static str {
        match self {
            WatermarkType::Id => "id",
            WatermarkType::Timestamp => "timestamp",
        }
    }
}

impl fmt::Display for WatermarkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WatermarkType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "id" => Ok(WatermarkType::Id),
            "timestamp" => Ok(WatermarkType::Timestamp),
            other => Err(format!("unrecognized watermark type '{}'", other)),
        }
    }
}

/// One row of the catalog as it appears in the source file.
#[derive(Debug, Clone, Deserialize)]
pub struct TableRecord {
    pub table_name: String,
    pub to_be_loaded: String,
    #[serde(default)]
    pub watermark_column: Option<String>,
    #[serde(default)]
    pub watermark_type: Option<String>,
}

/// A table to replicate, with its watermark metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableEntry {
    pub table_name: String,
    pub to_be_loaded: bool,
    /// Non-blank watermark column, if the table is incrementally eligible.
    pub watermark_column: Option<String>,
    /// Recognized watermark type. Unrecognized values are dropped at load time.
    pub watermark_type: Option<WatermarkType>,
}

impl TableEntry {
    pub fn new(table_name: impl Into<String>) -> Self {
        Self {
            table_name: table_name.into(),
            to_be_loaded: true,
            watermark_column: None,
            watermark_type: None,
        }
    }

    pub fn with_watermark(mut self, column: impl Into<String>, kind: WatermarkType) -> Self {
        self.watermark_column = Some(column.into());
        self.watermark_type = Some(kind);
        self
    }

    fn from_record(record: TableRecord) -> Self {
        let watermark_column = non_blank(record.watermark_column);
        let watermark_type = non_blank(record.watermark_type).and_then(|raw| {
            match raw.parse::<WatermarkType>() {
                Ok(kind) => Some(kind),
                Err(e) => {
                    tracing::warn!(
                        table = %record.table_name,
                        "{}; table will be fully loaded",
                        e
                    );
                    None
                }
            }
        });

        Self {
            to_be_loaded: record.to_be_loaded.trim() == LOADABLE_MARKER,
            table_name: record.table_name,
            watermark_column,
            watermark_type,
        }
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Result of applying a selector to the catalog.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableSelection {
    /// Loadable entries, in catalog order.
    pub entries: Vec<TableEntry>,
    /// Requested names that are absent from the catalog or not marked loadable.
    pub missing: Vec<String>,
}

impl TableSelection {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn table_names(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.table_name.as_str()).collect()
    }
}

/// The full set of catalog entries loaded for a run.
#[derive(Debug, Clone)]
pub struct TableCatalog {
    entries: Vec<TableEntry>,
}

impl TableCatalog {
    /// Load the catalog from a CSV file with a header row.
    pub fn from_csv_path(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path).map_err(|e| {
            ReplicatorError::catalog(format!(
                "tables list file not found or unreadable at {}: {}",
                path.display(),
                e
            ))
        })?;
        tracing::info!("Reading table list from {}", path.display());
        Self::from_reader(file)
    }

    /// Load the catalog from any CSV reader.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(reader);

        let headers = csv_reader
            .headers()
            .map_err(|e| ReplicatorError::catalog(format!("failed to read catalog header: {}", e)))?
            .clone();

        if headers.is_empty() {
            return Err(ReplicatorError::catalog("tables list is empty"));
        }

        let missing: Vec<&str> = REQUIRED_COLUMNS
            .iter()
            .copied()
            .filter(|required| !headers.iter().any(|h| h == *required))
            .collect();
        if !missing.is_empty() {
            return Err(ReplicatorError::catalog(format!(
                "tables list must contain 'table_name' and 'to_be_loaded' columns (missing: {})",
                missing.join(", ")
            )));
        }

        let mut records = Vec::new();
        for (idx, row) in csv_reader.deserialize::<TableRecord>().enumerate() {
            let record = row.map_err(|e| {
                ReplicatorError::catalog(format!("invalid catalog record {}: {}", idx + 1, e))
            })?;
            records.push(record);
        }

        Self::from_records(records)
    }

    /// Build a catalog from already-parsed records.
    pub fn from_records(records: Vec<TableRecord>) -> Result<Self> {
        if records.is_empty() {
            return Err(ReplicatorError::catalog("tables list contains no records"));
        }

        let entries = records
            .into_iter()
            .map(TableEntry::from_record)
            .collect::<Vec<_>>();

        if let Some(blank) = entries.iter().position(|e| e.table_name.trim().is_empty()) {
            return Err(ReplicatorError::catalog(format!(
                "catalog record {} has an empty table_name",
                blank + 1
            )));
        }

        Ok(Self { entries })
    }

    pub fn entries(&self) -> &[TableEntry] {
        &self.entries
    }

    /// Entries marked loadable, in catalog order.
    pub fn loadable(&self) -> impl Iterator<Item = &TableEntry> {
        self.entries.iter().filter(|e| e.to_be_loaded)
    }

    /// Apply a selector: the literal `all`, or a comma-separated list of table names.
    ///
    /// Requested names that are not loadable are reported in `missing` and logged
    /// as a warning; they never cause an error.
    pub fn select(&self, selector: &str) -> TableSelection {
        if selector.trim().eq_ignore_ascii_case("all") {
            tracing::info!("Processing all tables marked '{}'", LOADABLE_MARKER);
            return TableSelection {
                entries: self.loadable().cloned().collect(),
                missing: Vec::new(),
            };
        }

        let requested: Vec<&str> = selector
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .collect();

        if requested.is_empty() {
            tracing::warn!("Table list argument was empty after splitting");
            return TableSelection::default();
        }

        let entries: Vec<TableEntry> = self
            .loadable()
            .filter(|e| requested.contains(&e.table_name.as_str()))
            .cloned()
            .collect();

        let mut missing: Vec<String> = Vec::new();
        for name in &requested {
            let found = entries.iter().any(|e| e.table_name == *name);
            if !found && !missing.iter().any(|m| m == name) {
                missing.push(name.to_string());
            }
        }

        if !missing.is_empty() {
            tracing::warn!(
                "Requested tables not found or not marked '{}': {}",
                LOADABLE_MARKER,
                missing.join(", ")
            );
        }

        let selection = TableSelection { entries, missing };
        tracing::info!(
            "Processing specified tables marked '{}': [{}]",
            LOADABLE_MARKER,
            selection.table_names().join(", ")
        );
        selection
    }
}
