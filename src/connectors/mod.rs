// ABOUTME: Source and target connector capabilities and the backend registry
// ABOUTME: Concrete backends register constructors keyed by their declared kind

pub mod mysql;
pub mod postgres;
mod registry;

use crate::error::Result;
use crate::types::ExtractedRowSet;
use async_trait::async_trait;

pub use crate::watermark::LoadMode;
pub use registry::{ConnectorFactory, ConnectorOptions, ConnectorRegistry};

/// Default number of rows per INSERT statement on the target.
pub const DEFAULT_BATCH_SIZE: usize = crate::config::DEFAULT_BATCH_SIZE;

/// Reads rows from one backend.
///
/// A connector owns at most one connection. It is established lazily,
/// re-established when found invalid, and released by `close`.
#[async_trait]
pub trait SourceConnector: Send {
    /// Backend kind this connector was registered under.
    fn kind(&self) -> &str;

    /// Password-free endpoint description for logs.
    fn endpoint(&self) -> String;

    /// Ensure a valid connection exists. Idempotent.
    async fn connect(&mut self) -> Result<()>;

    /// Read `table` in full or past the watermark in `mode`.
    ///
    /// No matching rows yields an empty row set, never an error.
    async fn extract(&mut self, table: &str, mode: &LoadMode) -> Result<ExtractedRowSet>;

    /// Release the connection if open. Errors are logged, not returned.
    async fn close(&mut self);
}

/// Writes rows into one backend.
#[async_trait]
pub trait TargetConnector: Send {
    fn kind(&self) -> &str;

    fn endpoint(&self) -> String;

    async fn connect(&mut self) -> Result<()>;

    /// Insert every row of `rows` into `table` inside one transaction.
    ///
    /// Either all rows become visible or none do. Returns the number of rows inserted.
    async fn load(&mut self, table: &str, rows: &ExtractedRowSet) -> Result<u64>;

    async fn close(&mut self);
}
