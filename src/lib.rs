// ABOUTME: Library root for watermark-replicator
// ABOUTME: Per-table incremental replication driven by externally stored watermarks

pub mod catalog;
pub mod config;
pub mod connectors;
pub mod error;
pub mod logging;
pub mod pipeline;
pub mod types;
pub mod utils;
pub mod watermark;

pub use catalog::{TableCatalog, TableEntry, TableSelection, WatermarkType};
pub use config::{EndpointConfig, EnvironmentConfig, ReplicatorConfig};
pub use connectors::{
    ConnectorFactory, ConnectorRegistry, LoadMode, SourceConnector, TargetConnector,
};
pub use error::{ReplicatorError, Result};
pub use pipeline::{PipelineRunner, RunSummary, Stage, TableOutcome};
pub use types::{ExtractedRowSet, ScalarValue};
pub use watermark::{CheckpointStore, NewWatermark};
