// ABOUTME: Checkpoint store abstraction for per-table watermarks
// ABOUTME: Orchestrator-variable, JSON file, and in-memory implementations

use crate::error::{ReplicatorError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex as StdMutex;
use tokio::fs;
use tokio::sync::Mutex;

/// Per-table key-value store holding the last watermark between runs.
///
/// The store is owned outside this crate; a run only reads the key of the
/// table it is processing and writes that key after a successful load.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Last recorded watermark for `table`, if any.
    async fn get(&self, table: &str) -> Result<Option<String>>;

    /// Record a new watermark for `table`.
    async fn set(&self, table: &str, value: &str) -> Result<()>;
}

/// Checkpoints exchanged with a workflow orchestrator through process I/O.
///
/// The last watermark arrives as the environment variable
/// `LAST_WATERMARK_<TABLE_UPPER>`. New watermarks are written as
/// `NEW_WATERMARK_<TABLE_UPPER>=<value>` lines to the output (stdout by
/// default), which the orchestrator captures and persists.
pub struct EnvCheckpointStore {
    vars: Option<HashMap<String, String>>,
    output: StdMutex<Box<dyn Write + Send>>,
}

impl EnvCheckpointStore {
    /// Read from the process environment, write to stdout.
    pub fn new() -> Self {
        Self {
            vars: None,
            output: StdMutex::new(Box::new(std::io::stdout())),
        }
    }

    /// Read from a fixed variable map instead of the process environment.
    pub fn from_vars(vars: HashMap<String, String>) -> Self {
        Self {
            vars: Some(vars),
            output: StdMutex::new(Box::new(std::io::stdout())),
        }
    }

    /// Redirect watermark lines to another writer.
    pub fn with_output(mut self, output: Box<dyn Write + Send>) -> Self {
        self.output = StdMutex::new(output);
        self
    }

    pub fn input_key(table: &str) -> String {
        format!("LAST_WATERMARK_{}", variable_suffix(table))
    }

    pub fn output_key(table: &str) -> String {
        format!("NEW_WATERMARK_{}", variable_suffix(table))
    }
}

/// Uppercased table name with every character outside `[A-Za-z0-9_]`
/// mapped to `_`, so `sales.orders` becomes `SALES_ORDERS`.
fn variable_suffix(table: &str) -> String {
    table
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect()
}

impl Default for EnvCheckpointStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CheckpointStore for EnvCheckpointStore {
    async fn get(&self, table: &str) -> Result<Option<String>> {
        let key = Self::input_key(table);
        let value = match &self.vars {
            Some(vars) => vars.get(&key).cloned(),
            None => std::env::var(&key).ok(),
        };
        tracing::debug!(table = %table, "Checkpoint variable {} = {:?}", key, value);
        Ok(value)
    }

    async fn set(&self, table: &str, value: &str) -> Result<()> {
        let line = format!("{}={}", Self::output_key(table), value);
        let mut output = self
            .output
            .lock()
            .map_err(|_| ReplicatorError::checkpoint(table, "watermark output lock poisoned"))?;
        writeln!(output, "{}", line)
            .and_then(|_| output.flush())
            .map_err(|e| ReplicatorError::checkpoint(table, e))?;
        Ok(())
    }
}

/// One persisted checkpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointEntry {
    pub value: String,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct CheckpointFile {
    version: u32,
    tables: HashMap<String, CheckpointEntry>,
}

/// Checkpoints persisted to a JSON file, for runs without an orchestrator.
pub struct JsonFileCheckpointStore {
    path: PathBuf,
    state: Mutex<CheckpointFile>,
}

impl JsonFileCheckpointStore {
    /// Open the store at `path`, starting empty if the file does not exist.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let state = if fs::try_exists(&path).await.unwrap_or(false) {
            let contents = fs::read_to_string(&path).await.map_err(|e| {
                ReplicatorError::config(format!(
                    "failed to read checkpoint file {:?}: {}",
                    path, e
                ))
            })?;
            serde_json::from_str(&contents).map_err(|e| {
                ReplicatorError::config(format!(
                    "failed to parse checkpoint file {:?}: {}",
                    path, e
                ))
            })?
        } else {
            tracing::info!("Checkpoint file {:?} does not exist, starting empty", path);
            CheckpointFile {
                version: 1,
                tables: HashMap::new(),
            }
        };
        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Full entry for `table`, including when it was last written.
    pub async fn entry(&self, table: &str) -> Option<CheckpointEntry> {
        self.state.lock().await.tables.get(table).cloned()
    }

    async fn save(&self, state: &CheckpointFile, table: &str) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| ReplicatorError::checkpoint(table, e))?;
        }
        let contents = serde_json::to_string_pretty(state)
            .map_err(|e| ReplicatorError::checkpoint(table, e))?;

        // Write-then-rename: readers never observe a partially written file.
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, contents)
            .await
            .map_err(|e| ReplicatorError::checkpoint(table, e))?;
        fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| ReplicatorError::checkpoint(table, e))?;
        Ok(())
    }
}

#[async_trait]
impl CheckpointStore for JsonFileCheckpointStore {
    async fn get(&self, table: &str) -> Result<Option<String>> {
        Ok(self
            .state
            .lock()
            .await
            .tables
            .get(table)
            .map(|e| e.value.clone()))
    }

    async fn set(&self, table: &str, value: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        state.tables.insert(
            table.to_string(),
            CheckpointEntry {
                value: value.to_string(),
                updated_at: chrono::Utc::now(),
            },
        );
        self.save(&state, table).await
    }
}

/// In-process checkpoint store.
#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_values<I, K, V>(values: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            values: Mutex::new(
                values
                    .into_iter()
                    .map(|(k, v)| (k.into(), v.into()))
                    .collect(),
            ),
        }
    }

    pub async fn snapshot(&self) -> HashMap<String, String> {
        self.values.lock().await.clone()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn get(&self, table: &str) -> Result<Option<String>> {
        Ok(self.values.lock().await.get(table).cloned())
    }

    async fn set(&self, table: &str, value: &str) -> Result<()> {
        self.values
            .lock()
            .await
            .insert(table.to_string(), value.to_string());
        Ok(())
    }
}
