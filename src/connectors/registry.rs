// ABOUTME: Registry mapping backend kinds to connector constructors
// ABOUTME: ConnectorFactory builds connectors and performs the initial connect with retry

use super::{SourceConnector, TargetConnector};
use crate::config::{EndpointConfig, DEFAULT_BATCH_SIZE};
use crate::error::{ReplicatorError, Result};
use crate::utils::retry_with_backoff;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// Settings shared by every connector a factory builds.
#[derive(Debug, Clone)]
pub struct ConnectorOptions {
    /// Rows per INSERT statement on targets.
    pub batch_size: usize,
    /// Accept invalid or self-signed TLS certificates.
    pub accept_invalid_certs: bool,
}

impl Default for ConnectorOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            accept_invalid_certs: false,
        }
    }
}

type SourceBuilder =
    Arc<dyn Fn(&EndpointConfig, &ConnectorOptions) -> Box<dyn SourceConnector> + Send + Sync>;
type TargetBuilder =
    Arc<dyn Fn(&EndpointConfig, &ConnectorOptions) -> Box<dyn TargetConnector> + Send + Sync>;

/// Backend kinds known to this process.
///
/// Kinds are matched case-insensitively. Registering a kind twice replaces
/// the earlier constructor.
#[derive(Clone, Default)]
pub struct ConnectorRegistry {
    sources: BTreeMap<String, SourceBuilder>,
    targets: BTreeMap<String, TargetBuilder>,
}

impl ConnectorRegistry {
    /// Registry with no backends.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Registry with the built-in backends: `mysql` and `postgres` sources,
    /// `postgres` target.
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        registry.register_source("mysql", |endpoint, _| {
            Box::new(super::mysql::MySqlSource::new(endpoint.clone()))
        });
        registry.register_source("postgres", |endpoint, options| {
            Box::new(super::postgres::PostgresSource::new(
                endpoint.clone(),
                options.accept_invalid_certs,
            ))
        });
        registry.register_target("postgres", |endpoint, options| {
            Box::new(super::postgres::PostgresTarget::new(
                endpoint.clone(),
                options.batch_size,
                options.accept_invalid_certs,
            ))
        });
        registry
    }

    pub fn register_source<F>(&mut self, kind: &str, builder: F)
    where
        F: Fn(&EndpointConfig, &ConnectorOptions) -> Box<dyn SourceConnector> + Send + Sync + 'static,
    {
        self.sources
            .insert(kind.trim().to_ascii_lowercase(), Arc::new(builder));
    }

    pub fn register_target<F>(&mut self, kind: &str, builder: F)
    where
        F: Fn(&EndpointConfig, &ConnectorOptions) -> Box<dyn TargetConnector> + Send + Sync + 'static,
    {
        self.targets
            .insert(kind.trim().to_ascii_lowercase(), Arc::new(builder));
    }

    pub fn source_kinds(&self) -> Vec<&str> {
        self.sources.keys().map(String::as_str).collect()
    }

    pub fn target_kinds(&self) -> Vec<&str> {
        self.targets.keys().map(String::as_str).collect()
    }
}

impl std::fmt::Debug for ConnectorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectorRegistry")
            .field("sources", &self.source_kinds())
            .field("targets", &self.target_kinds())
            .finish()
    }
}

/// Builds connected source and target connectors from endpoint configuration.
#[derive(Debug, Clone)]
pub struct ConnectorFactory {
    registry: ConnectorRegistry,
    options: ConnectorOptions,
    connect_retries: u32,
    retry_delay: Duration,
}

impl ConnectorFactory {
    pub fn new(registry: ConnectorRegistry) -> Self {
        Self {
            registry,
            options: ConnectorOptions::default(),
            connect_retries: crate::config::DEFAULT_CONNECT_RETRIES,
            retry_delay: Duration::from_secs(1),
        }
    }

    pub fn with_options(mut self, options: ConnectorOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_connect_retries(mut self, retries: u32) -> Self {
        self.connect_retries = retries;
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn registry(&self) -> &ConnectorRegistry {
        &self.registry
    }

    /// Build and connect the source connector for `endpoint`.
    ///
    /// Fails with `ReplicatorError::Connection` if the kind is unknown or every
    /// connect attempt fails.
    pub async fn create_source(&self, endpoint: &EndpointConfig) -> Result<Box<dyn SourceConnector>> {
        let kind = endpoint.backend_kind();
        let builder = self.registry.sources.get(&kind).ok_or_else(|| {
            ReplicatorError::connection(
                endpoint.describe(),
                format!(
                    "unknown source kind '{}' (registered: {})",
                    kind,
                    self.registry.source_kinds().join(", ")
                ),
            )
        })?;

        tracing::info!("Connecting to source {}", endpoint.describe());
        let options = &self.options;
        let connector = retry_with_backoff(
            move || async move {
                let mut connector = builder(endpoint, options);
                connector.connect().await?;
                Ok(connector)
            },
            self.connect_retries,
            self.retry_delay,
        )
        .await
        .map_err(|e| as_connection_error(endpoint, e))?;

        tracing::info!("✓ Source connected ({})", connector.kind());
        Ok(connector)
    }

    /// Build and connect the target connector for `endpoint`.
    pub async fn create_target(&self, endpoint: &EndpointConfig) -> Result<Box<dyn TargetConnector>> {
        let kind = endpoint.backend_kind();
        let builder = self.registry.targets.get(&kind).ok_or_else(|| {
            ReplicatorError::connection(
                endpoint.describe(),
                format!(
                    "unknown target kind '{}' (registered: {})",
                    kind,
                    self.registry.target_kinds().join(", ")
                ),
            )
        })?;

        tracing::info!("Connecting to target {}", endpoint.describe());
        let options = &self.options;
        let connector = retry_with_backoff(
            move || async move {
                let mut connector = builder(endpoint, options);
                connector.connect().await?;
                Ok(connector)
            },
            self.connect_retries,
            self.retry_delay,
        )
        .await
        .map_err(|e| as_connection_error(endpoint, e))?;

        tracing::info!("✓ Target connected ({})", connector.kind());
        Ok(connector)
    }
}

fn as_connection_error(endpoint: &EndpointConfig, err: ReplicatorError) -> ReplicatorError {
    match err {
        ReplicatorError::Connection { .. } => err,
        other => ReplicatorError::connection(endpoint.describe(), other),
    }
}
