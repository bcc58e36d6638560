// ABOUTME: PostgreSQL connection handling shared by the source and target connectors
// ABOUTME: Opens plain or TLS connections and reads column metadata from information_schema

mod source;
mod target;

pub use source::{build_extract_query, build_projection, PostgresSource};
pub use target::{binds_natively, build_insert_query, scalar_to_sql, PostgresTarget};

use crate::config::EndpointConfig;
use crate::error::{ReplicatorError, Result};
use native_tls::TlsConnector;
use postgres_native_tls::MakeTlsConnector;
use tokio_postgres::config::SslMode;
use tokio_postgres::{Client, Config, NoTls};

const DEFAULT_PORT: u16 = 5432;
const DEFAULT_SCHEMA: &str = "public";

/// PostgreSQL caps bind parameters per statement at 65535.
const MAX_PARAMS_PER_STATEMENT: usize = 65_000;

fn pg_config(endpoint: &EndpointConfig) -> Config {
    let mut config = Config::new();
    config
        .host(endpoint.host.as_str())
        .port(endpoint.port.unwrap_or(DEFAULT_PORT))
        .dbname(endpoint.database.as_str())
        .application_name("watermark-replicator")
        // Text casts of zoned timestamps must not depend on the server's default zone.
        .options("-c TimeZone=UTC");
    if let Some(user) = &endpoint.user {
        config.user(user.as_str());
    }
    if let Some(password) = &endpoint.password {
        config.password(password.as_str());
    }
    config
}

/// Open a connection to `endpoint` and drive it on a background task.
///
/// TLS is negotiated when `endpoint.tls` is set; `accept_invalid_certs`
/// disables certificate and hostname verification for self-signed servers.
pub(crate) async fn connect(endpoint: &EndpointConfig, accept_invalid_certs: bool) -> Result<Client> {
    let mut config = pg_config(endpoint);
    let describe = endpoint.describe();

    let client = if endpoint.tls {
        config.ssl_mode(SslMode::Require);
        if accept_invalid_certs {
            tracing::warn!(
                "⚠ Accepting invalid TLS certificates for {}; use only for testing",
                describe
            );
        }
        let connector = TlsConnector::builder()
            .danger_accept_invalid_certs(accept_invalid_certs)
            .danger_accept_invalid_hostnames(accept_invalid_certs)
            .build()
            .map_err(|e| ReplicatorError::connection(&describe, e))?;
        let (client, connection) = config
            .connect(MakeTlsConnector::new(connector))
            .await
            .map_err(|e| ReplicatorError::connection(&describe, e))?;
        let endpoint_name = describe.clone();
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::warn!("PostgreSQL connection error ({}): {}", endpoint_name, e);
            }
        });
        client
    } else {
        let (client, connection) = config
            .connect(NoTls)
            .await
            .map_err(|e| ReplicatorError::connection(&describe, e))?;
        let endpoint_name = describe.clone();
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::warn!("PostgreSQL connection error ({}): {}", endpoint_name, e);
            }
        });
        client
    };

    tracing::debug!("Opened PostgreSQL connection to {}", describe);
    Ok(client)
}

/// A target column as described by `information_schema.columns`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ColumnInfo {
    pub name: String,
    /// SQL-standard type name, e.g. `integer`, `ARRAY`, `USER-DEFINED`.
    pub data_type: String,
    pub udt_schema: String,
    /// Underlying type name, e.g. `int4`, `_text`, or an enum's own name.
    pub udt_name: String,
}

impl ColumnInfo {
    /// Quoted type reference usable in a cast, e.g. `"pg_catalog"."interval"`.
    pub fn cast_type(&self) -> String {
        format!(
            "{}.{}",
            crate::utils::quote_ident(&self.udt_schema),
            crate::utils::quote_ident(&self.udt_name)
        )
    }
}

/// Column metadata for a table in ordinal order.
///
/// Returns an empty list when the table does not exist.
pub(crate) async fn get_table_columns(
    client: &Client,
    schema: &str,
    table: &str,
) -> std::result::Result<Vec<ColumnInfo>, tokio_postgres::Error> {
    let rows = client
        .query(
            "SELECT column_name, data_type, udt_schema, udt_name
             FROM information_schema.columns
             WHERE table_schema = $1 AND table_name = $2
             ORDER BY ordinal_position",
            &[&schema, &table],
        )
        .await?;

    Ok(rows
        .iter()
        .map(|row| ColumnInfo {
            name: row.get(0),
            data_type: row.get(1),
            udt_schema: row.get(2),
            udt_name: row.get(3),
        })
        .collect())
}
