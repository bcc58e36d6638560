// ABOUTME: Utility functions for identifier handling and retries
// ABOUTME: Provides table-name validation, SQL identifier quoting, and connect backoff

use crate::error::{ReplicatorError, Result};
use std::time::Duration;

/// Maximum identifier length accepted for a table name part.
///
/// MySQL allows 64 characters, PostgreSQL 63; the target enforces its own limit.
const MAX_IDENTIFIER_LEN: usize = 64;

/// Retry an async operation with exponential backoff
///
/// Runs `operation` up to `max_retries + 1` times, doubling the delay after
/// each failure. Returns the last error if every attempt fails.
///
/// # Examples
///
/// ```no_run
/// # use watermark_replicator::utils::retry_with_backoff;
/// # use std::time::Duration;
/// # async fn example() -> watermark_replicator::Result<()> {
/// let value = retry_with_backoff(
///     || async { Ok::<_, watermark_replicator::ReplicatorError>(42) },
///     3,
///     Duration::from_millis(500),
/// )
/// .await?;
/// assert_eq!(value, 42);
/// # Ok(())
/// # }
/// ```
pub async fn retry_with_backoff<F, Fut, T>(
    mut operation: F,
    max_retries: u32,
    initial_delay: Duration,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let mut delay = initial_delay;
    let mut last_error = None;

    for attempt in 0..=max_retries {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) => {
                if attempt < max_retries {
                    tracing::warn!(
                        "Operation failed (attempt {}/{}): {}; retrying in {:?}...",
                        attempt + 1,
                        max_retries + 1,
                        e,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
                last_error = Some(e);
            }
        }
    }

    Err(last_error
        .unwrap_or_else(|| ReplicatorError::Defect("operation failed after retries".into())))
}

/// Validate a catalog table name before it is interpolated into SQL
///
/// Accepts `table` or `schema.table`. Each part must start with a letter or
/// underscore and contain only letters, digits, underscores, or `$`.
///
/// # Examples
///
/// ```
/// # use watermark_replicator::utils::validate_table_name;
/// assert!(validate_table_name("order_items").is_ok());
/// assert!(validate_table_name("retail.orders").is_ok());
/// assert!(validate_table_name("orders; DROP TABLE x").is_err());
/// assert!(validate_table_name("a.b.c").is_err());
/// ```
pub fn validate_table_name(table: &str) -> Result<()> {
    let trimmed = table.trim();
    if trimmed.is_empty() {
        return Err(ReplicatorError::config(
            "table name cannot be empty or whitespace-only",
        ));
    }

    let parts: Vec<&str> = trimmed.split('.').collect();
    if parts.len() > 2 {
        return Err(ReplicatorError::config(format!(
            "table name '{}' has more than one schema qualifier",
            sanitize_identifier(trimmed)
        )));
    }

    for part in parts {
        validate_identifier_part(trimmed, part)?;
    }
    Ok(())
}

fn validate_identifier_part(full: &str, part: &str) -> Result<()> {
    if part.len() > MAX_IDENTIFIER_LEN {
        return Err(ReplicatorError::config(format!(
            "identifier '{}' exceeds maximum length of {} characters (got {})",
            sanitize_identifier(part),
            MAX_IDENTIFIER_LEN,
            part.len()
        )));
    }

    let Some(first_char) = part.chars().next() else {
        return Err(ReplicatorError::config(format!(
            "table name '{}' has an empty identifier part",
            sanitize_identifier(full)
        )));
    };

    if !first_char.is_ascii_alphabetic() && first_char != '_' {
        return Err(ReplicatorError::config(format!(
            "identifier '{}' must start with a letter or underscore, not '{}'",
            sanitize_identifier(part),
            first_char
        )));
    }

    for (i, c) in part.chars().enumerate() {
        if !c.is_ascii_alphanumeric() && c != '_' && c != '$' {
            return Err(ReplicatorError::config(format!(
                "identifier '{}' contains invalid character '{}' at position {}",
                sanitize_identifier(part),
                if c.is_control() {
                    format!("\\x{:02x}", c as u32)
                } else {
                    c.to_string()
                },
                i
            )));
        }
    }
    Ok(())
}

/// Strip control characters and cap length so an identifier is safe to log.
pub fn sanitize_identifier(identifier: &str) -> String {
    identifier
        .chars()
        .filter(|c| !c.is_control())
        .take(100)
        .collect()
}

/// Quote a PostgreSQL identifier (schema, table, column)
///
/// Escapes embedded quotes and wraps the identifier in double quotes.
pub fn quote_ident(identifier: &str) -> String {
    let mut quoted = String::with_capacity(identifier.len() + 2);
    quoted.push('"');
    for ch in identifier.chars() {
        if ch == '"' {
            quoted.push('"');
        }
        quoted.push(ch);
    }
    quoted.push('"');
    quoted
}

/// Quote a MySQL identifier (database, table, column)
///
/// # Examples
///
/// ```
/// use watermark_replicator::utils::quote_mysql_ident;
/// assert_eq!(quote_mysql_ident("orders"), "`orders`");
/// assert_eq!(quote_mysql_ident("order`s"), "`order``s`");
/// ```
pub fn quote_mysql_ident(identifier: &str) -> String {
    let mut quoted = String::with_capacity(identifier.len() + 2);
    quoted.push('`');
    for ch in identifier.chars() {
        if ch == '`' {
            quoted.push('`');
        }
        quoted.push(ch);
    }
    quoted.push('`');
    quoted
}

/// Quote a possibly schema-qualified PostgreSQL table name part by part.
///
/// `default_schema` is applied when `table` carries no qualifier.
pub fn quote_pg_table(table: &str, default_schema: Option<&str>) -> String {
    match table.split_once('.') {
        Some((schema, name)) => format!("{}.{}", quote_ident(schema), quote_ident(name)),
        None => match default_schema {
            Some(schema) => format!("{}.{}", quote_ident(schema), quote_ident(table)),
            None => quote_ident(table),
        },
    }
}

/// Quote a possibly schema-qualified MySQL table name part by part.
pub fn quote_mysql_table(table: &str) -> String {
    match table.split_once('.') {
        Some((db, name)) => format!("{}.{}", quote_mysql_ident(db), quote_mysql_ident(name)),
        None => quote_mysql_ident(table),
    }
}

/// Split `schema.table` into its parts, using `default_schema` when unqualified.
pub fn split_table_name<'a>(table: &'a str, default_schema: &'a str) -> (&'a str, &'a str) {
    table.split_once('.').unwrap_or((default_schema, table))
}
