// ABOUTME: Typed row model shared by source and target connectors
// ABOUTME: ScalarValue plus ExtractedRowSet with positional column lookup

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::cmp::Ordering;

/// A single column value read from a source table.
#[derive(Debug, Clone, PartialEq)]
pub enum ScalarValue {
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    Decimal(Decimal),
    Text(String),
    Bytes(Vec<u8>),
    Date(NaiveDate),
    Time(NaiveTime),
    DateTime(NaiveDateTime),
    DateTimeTz(DateTime<Utc>),
    Json(serde_json::Value),
}

impl ScalarValue {
    pub fn is_null(&self) -> bool {
        matches!(self, ScalarValue::Null)
    }

    /// Integer view of the value, if it holds a whole number.
    ///
    /// Text is parsed so that numeric columns read as strings (e.g. MySQL
    /// DECIMAL with zero scale) still participate in `id` watermarks.
    pub fn as_i128(&self) -> Option<i128> {
        match self {
            ScalarValue::Int(n) => Some(*n as i128),
            ScalarValue::UInt(n) => Some(*n as i128),
            ScalarValue::Decimal(d) if d.fract().is_zero() => d.to_i64().map(i128::from),
            ScalarValue::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Textual form used for emitted watermarks and text-typed bindings.
    ///
    /// Returns `None` for NULL. Datetimes render as `YYYY-MM-DD HH:MM:SS`
    /// with a microsecond fraction only when it is non-zero, which keeps
    /// values of one column lexicographically sortable. Zoned datetimes are
    /// normalized to UTC and carry an explicit `+00` offset so the server
    /// reads them back as the same instant whatever its session time zone.
    pub fn to_canonical_string(&self) -> Option<String> {
        let text = match self {
            ScalarValue::Null => return None,
            ScalarValue::Bool(b) => b.to_string(),
            ScalarValue::Int(n) => n.to_string(),
            ScalarValue::UInt(n) => n.to_string(),
            ScalarValue::Float(f) => f.to_string(),
            ScalarValue::Decimal(d) => d.to_string(),
            ScalarValue::Text(s) => s.clone(),
            ScalarValue::Bytes(b) => String::from_utf8_lossy(b).into_owned(),
            ScalarValue::Date(d) => d.format("%Y-%m-%d").to_string(),
            ScalarValue::Time(t) => format_time(t),
            ScalarValue::DateTime(dt) => format!(
                "{} {}",
                dt.date().format("%Y-%m-%d"),
                format_time(&dt.time())
            ),
            ScalarValue::DateTimeTz(dt) => {
                let naive = dt.naive_utc();
                format!(
                    "{} {}+00",
                    naive.date().format("%Y-%m-%d"),
                    format_time(&naive.time())
                )
            }
            ScalarValue::Json(j) => j.to_string(),
        };
        Some(text)
    }

    /// Ordering between two values of comparable kinds.
    ///
    /// Numbers compare numerically, temporal values chronologically, text
    /// lexicographically. Mixed or incomparable kinds fall back to comparing
    /// canonical strings. NULL sorts below everything.
    pub fn natural_cmp(&self, other: &ScalarValue) -> Ordering {
        use ScalarValue::*;
        match (self, other) {
            (Null, Null) => Ordering::Equal,
            (Null, _) => Ordering::Less,
            (_, Null) => Ordering::Greater,
            (Date(a), Date(b)) => a.cmp(b),
            (DateTime(a), DateTime(b)) => a.cmp(b),
            (DateTimeTz(a), DateTimeTz(b)) => a.cmp(b),
            (Time(a), Time(b)) => a.cmp(b),
            (Text(a), Text(b)) => a.cmp(b),
            _ => {
                if let (Some(a), Some(b)) = (self.as_i128(), other.as_i128()) {
                    return a.cmp(&b);
                }
                if let (Some(a), Some(b)) = (self.as_f64(), other.as_f64()) {
                    if let Some(ord) = a.partial_cmp(&b) {
                        return ord;
                    }
                }
                self.to_canonical_string()
                    .cmp(&other.to_canonical_string())
            }
        }
    }

    fn as_f64(&self) -> Option<f64> {
        match self {
            ScalarValue::Int(n) => Some(*n as f64),
            ScalarValue::UInt(n) => Some(*n as f64),
            ScalarValue::Float(f) => Some(*f),
            ScalarValue::Decimal(d) => d.to_f64(),
            _ => None,
        }
    }
}

fn format_time(t: &NaiveTime) -> String {
    use chrono::Timelike;
    if t.nanosecond() == 0 {
        t.format("%H:%M:%S").to_string()
    } else {
        t.format("%H:%M:%S%.6f").to_string()
    }
}

/// An ordered row of values, positionally aligned with `ExtractedRowSet::column_names`.
pub type Row = Vec<ScalarValue>;

/// Rows and column names produced by one extract call.
///
/// `column_names[i]` names the `i`-th value of every row. The constructor
/// enforces this, so consumers may index rows by `column_index`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtractedRowSet {
    column_names: Vec<String>,
    rows: Vec<Row>,
}

impl ExtractedRowSet {
    /// Build a row set, rejecting rows whose width differs from the column list.
    pub fn new(column_names: Vec<String>, rows: Vec<Row>) -> Result<Self, String> {
        if let Some((idx, row)) = rows
            .iter()
            .enumerate()
            .find(|(_, row)| row.len() != column_names.len())
        {
            return Err(format!(
                "row {} has {} values but {} columns were reported",
                idx,
                row.len(),
                column_names.len()
            ));
        }
        Ok(Self { column_names, rows })
    }

    /// The empty result: no rows, no columns.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn column_names(&self) -> &[String] {
        &self.column_names
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Position of a column by exact name, falling back to a case-insensitive match.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.column_names
            .iter()
            .position(|c| c == name)
            .or_else(|| {
                self.column_names
                    .iter()
                    .position(|c| c.eq_ignore_ascii_case(name))
            })
    }

    /// Value of `column` in row `row`, if both exist.
    pub fn value(&self, row: usize, column: &str) -> Option<&ScalarValue> {
        let idx = self.column_index(column)?;
        self.rows.get(row).and_then(|r| r.get(idx))
    }
}
