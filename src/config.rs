// ABOUTME: Environment configuration for source and target endpoints
// ABOUTME: Loads replicator.toml and resolves credentials from the process environment

use crate::error::{ReplicatorError, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

/// Default configuration file, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "replicator.toml";

/// Rows per INSERT batch when the environment does not override it.
pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// Connection attempts after the first one before connector creation fails.
pub const DEFAULT_CONNECT_RETRIES: u32 = 2;

/// Which side of the pipeline an endpoint serves. Selects credential variables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointRole {
    Source,
    Target,
}

impl EndpointRole {
    fn env_prefix(&self) -> &'static str {
        match self {
            EndpointRole::Source => "SOURCE_DB",
            EndpointRole::Target => "TARGET_DB",
        }
    }
}

impl fmt::Display for EndpointRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EndpointRole::Source => f.write_str("source"),
            EndpointRole::Target => f.write_str("target"),
        }
    }
}

/// Connection settings for one database endpoint.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct EndpointConfig {
    /// Backend kind registered in the connector registry (e.g. `mysql`, `postgres`).
    pub kind: String,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default)]
    pub port: Option<u16>,
    pub database: String,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// Schema used to qualify unqualified table names (Postgres only).
    #[serde(default)]
    pub schema: Option<String>,
    /// Negotiate TLS with the server (Postgres only).
    #[serde(default)]
    pub tls: bool,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

impl EndpointConfig {
    pub fn new(kind: impl Into<String>, host: impl Into<String>, database: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            host: host.into(),
            port: None,
            database: database.into(),
            user: None,
            password: None,
            schema: None,
            tls: false,
        }
    }

    pub fn with_credentials(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self.password = Some(password.into());
        self
    }

    /// Normalized backend kind used for registry lookups.
    pub fn backend_kind(&self) -> String {
        self.kind.trim().to_ascii_lowercase()
    }

    /// Fill missing credentials from `<ROLE>_DB_USER` / `<ROLE>_DB_PASS`.
    ///
    /// `lookup` abstracts the environment so callers can supply variables explicitly.
    pub fn resolve_credentials<F>(&mut self, role: EndpointRole, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let prefix = role.env_prefix();
        if self.user.as_deref().map_or(true, |u| u.trim().is_empty()) {
            self.user = lookup(&format!("{}_USER", prefix)).filter(|u| !u.trim().is_empty());
        }
        if self.password.is_none() {
            self.password = lookup(&format!("{}_PASS", prefix));
        }
        if self.user.is_none() {
            return Err(ReplicatorError::config(format!(
                "no user configured for {} endpoint {} (set `user` or {}_USER)",
                role,
                self.describe(),
                prefix
            )));
        }
        Ok(())
    }

    /// Password-free description for logs and error messages.
    pub fn describe(&self) -> String {
        let port = self
            .port
            .map(|p| format!(":{}", p))
            .unwrap_or_default();
        match &self.user {
            Some(user) => format!(
                "{}://{}@{}{}/{}",
                self.backend_kind(),
                user,
                self.host,
                port,
                self.database
            ),
            None => format!(
                "{}://{}{}/{}",
                self.backend_kind(),
                self.host,
                port,
                self.database
            ),
        }
    }
}

/// Settings for one named environment (`dev`, `prod`, ...).
#[derive(Debug, Clone, Deserialize, Default)]
pub struct EnvironmentConfig {
    #[serde(default)]
    pub source: Option<EndpointConfig>,
    #[serde(default)]
    pub target: Option<EndpointConfig>,
    /// Path to the tables_list catalog.
    #[serde(default)]
    pub catalog: Option<PathBuf>,
    #[serde(default)]
    pub batch_size: Option<usize>,
    #[serde(default)]
    pub connect_retries: Option<u32>,
}

/// Fully resolved settings for a run.
#[derive(Debug, Clone)]
pub struct ReplicatorConfig {
    pub environment: String,
    pub source: EndpointConfig,
    pub target: EndpointConfig,
    pub catalog_path: PathBuf,
    pub batch_size: usize,
    pub connect_retries: u32,
}

#[derive(Debug, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    environments: HashMap<String, EnvironmentConfig>,
}

impl ReplicatorConfig {
    /// Read `path` and resolve `environment`, taking credentials from the process environment.
    pub fn load(path: &Path, environment: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            ReplicatorError::config(format!(
                "failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_toml_str(&contents, environment, |key| std::env::var(key).ok())
    }

    /// Parse TOML and resolve `environment`, looking up credentials through `lookup`.
    pub fn from_toml_str<F>(contents: &str, environment: &str, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let file: ConfigFile = toml::from_str(contents)
            .map_err(|e| ReplicatorError::config(format!("invalid config file: {}", e)))?;

        let env = file.environments.get(environment).ok_or_else(|| {
            let mut known: Vec<&str> = file.environments.keys().map(String::as_str).collect();
            known.sort_unstable();
            ReplicatorError::config(format!(
                "environment '{}' not found in configuration (known: {})",
                environment,
                known.join(", ")
            ))
        })?;

        let mut source = env.source.clone().ok_or_else(|| {
            ReplicatorError::config(format!(
                "environment '{}' has no [environments.{}.source] section",
                environment, environment
            ))
        })?;
        let mut target = env.target.clone().ok_or_else(|| {
            ReplicatorError::config(format!(
                "environment '{}' has no [environments.{}.target] section",
                environment, environment
            ))
        })?;

        source.resolve_credentials(EndpointRole::Source, &lookup)?;
        target.resolve_credentials(EndpointRole::Target, &lookup)?;

        let batch_size = env.batch_size.unwrap_or(DEFAULT_BATCH_SIZE);
        if batch_size == 0 {
            return Err(ReplicatorError::config("batch_size must be greater than zero"));
        }

        tracing::info!("Loaded configuration for environment: {}", environment);

        Ok(Self {
            environment: environment.to_string(),
            source,
            target,
            catalog_path: env
                .catalog
                .clone()
                .unwrap_or_else(|| PathBuf::from(crate::catalog::DEFAULT_CATALOG_PATH)),
            batch_size,
            connect_retries: env.connect_retries.unwrap_or(DEFAULT_CONNECT_RETRIES),
        })
    }
}
