// ABOUTME: Error taxonomy for replication runs
// ABOUTME: Distinguishes fatal run-level failures from per-table recoverable ones

use thiserror::Error;

/// Result alias used throughout the library.
pub type Result<T> = std::result::Result<T, ReplicatorError>;

/// Errors produced while resolving, extracting, loading, or checkpointing tables.
///
/// `Config`, `Connection`, `Catalog` and `Defect` abort a run before (or
/// instead of) processing tables. `Query` and `Load` are contained at the
/// table boundary by the pipeline runner. `WatermarkCompute` only suppresses
/// the watermark for one table.
#[derive(Debug, Error)]
pub enum ReplicatorError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("connection error ({endpoint}): {message}")]
    Connection { endpoint: String, message: String },

    #[error("catalog error: {0}")]
    Catalog(String),

    #[error("query failed for table '{table}': {message}")]
    Query { table: String, message: String },

    #[error("load failed for table '{table}': {message}")]
    Load { table: String, message: String },

    #[error("could not compute watermark for table '{table}': {message}")]
    WatermarkCompute { table: String, message: String },

    #[error("checkpoint store error for table '{table}': {message}")]
    Checkpoint { table: String, message: String },

    #[error("internal defect: {0}")]
    Defect(String),
}

impl ReplicatorError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub fn connection(endpoint: impl Into<String>, message: impl ToString) -> Self {
        Self::Connection {
            endpoint: endpoint.into(),
            message: message.to_string(),
        }
    }

    pub fn catalog(message: impl Into<String>) -> Self {
        Self::Catalog(message.into())
    }

    pub fn query(table: impl Into<String>, message: impl ToString) -> Self {
        Self::Query {
            table: table.into(),
            message: message.to_string(),
        }
    }

    pub fn load(table: impl Into<String>, message: impl ToString) -> Self {
        Self::Load {
            table: table.into(),
            message: message.to_string(),
        }
    }

    pub fn watermark(table: impl Into<String>, message: impl ToString) -> Self {
        Self::WatermarkCompute {
            table: table.into(),
            message: message.to_string(),
        }
    }

    pub fn checkpoint(table: impl Into<String>, message: impl ToString) -> Self {
        Self::Checkpoint {
            table: table.into(),
            message: message.to_string(),
        }
    }

    /// Whether this error must abort the whole run rather than a single table.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Config(_) | Self::Connection { .. } | Self::Catalog(_) | Self::Defect(_)
        )
    }
}
