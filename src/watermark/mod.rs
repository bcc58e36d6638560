// ABOUTME: Watermark handling for incremental extraction
// ABOUTME: Resolves load modes, computes new high-water marks, and stores checkpoints

pub mod checkpoint;
pub mod emitter;
pub mod resolver;

pub use checkpoint::{
    CheckpointStore, EnvCheckpointStore, JsonFileCheckpointStore, MemoryCheckpointStore,
};
pub use emitter::{compute_new_watermark, NewWatermark};
pub use resolver::{resolve_load_mode, LoadMode, WatermarkValue};
