//! Database access through a tunnel
//!
//! Two seams: a [`DatabaseConnector`] that opens connections to a local
//! tunnel endpoint, and a [`RecordStore`] that performs the handful of
//! statements the reconciler needs on one connection.

mod mysql;

pub use mysql::{MySqlConnector, MySqlRecordStore};

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

use envforge_core::domain::environment::DatabaseCredentials;
use envforge_core::domain::record::{FieldValue, is_valid_identifier};

/// Database failures
#[derive(Debug, Error)]
pub enum DbError {
    #[error("Timed out connecting to {addr} after {timeout:?}")]
    ConnectTimeout { addr: SocketAddr, timeout: Duration },

    #[error("Failed to connect to {addr}: {source}")]
    Connect {
        addr: SocketAddr,
        #[source]
        source: sqlx::Error,
    },

    #[error("Query failed: {0}")]
    Query(#[from] sqlx::Error),

    #[error("Invalid identifier: '{0}'")]
    InvalidIdentifier(String),
}

/// A row read back for verification; `None` is SQL NULL
pub type StoredRow = BTreeMap<String, Option<String>>;

/// Opens connections through a local tunnel endpoint
#[async_trait]
pub trait DatabaseConnector: Send + Sync {
    /// Lists the schema names visible to `credentials`
    async fn list_schemas(
        &self,
        addr: SocketAddr,
        credentials: &DatabaseCredentials,
    ) -> Result<Vec<String>, DbError>;

    /// Opens a connection with `schema` selected
    async fn open_store(
        &self,
        addr: SocketAddr,
        credentials: &DatabaseCredentials,
        schema: &str,
    ) -> Result<Box<dyn RecordStore>, DbError>;
}

/// Statements run by the reconciler, all on one connection
///
/// Table and column names are validated identifiers; values are always
/// bound, never interpolated.
#[async_trait]
pub trait RecordStore: Send {
    async fn list_tables(&mut self) -> Result<Vec<String>, DbError>;

    /// Column names of `table`, in table order
    async fn describe(&mut self, table: &str) -> Result<Vec<String>, DbError>;

    async fn begin(&mut self) -> Result<(), DbError>;

    async fn commit(&mut self) -> Result<(), DbError>;

    async fn rollback(&mut self) -> Result<(), DbError>;

    async fn count_by_key(&mut self, table: &str, key_column: &str, key: &str)
    -> Result<u64, DbError>;

    async fn insert(
        &mut self,
        table: &str,
        row: &BTreeMap<String, FieldValue>,
    ) -> Result<(), DbError>;

    async fn update_by_key(
        &mut self,
        table: &str,
        key_column: &str,
        key: &str,
        row: &BTreeMap<String, FieldValue>,
    ) -> Result<(), DbError>;

    /// Reads `columns` of the row with the given key, rendered as text
    async fn fetch_by_key(
        &mut self,
        table: &str,
        key_column: &str,
        key: &str,
        columns: &[String],
    ) -> Result<Option<StoredRow>, DbError>;

    async fn close(self: Box<Self>) -> Result<(), DbError>;
}

/// Backtick-quotes a validated identifier
pub(crate) fn quote(ident: &str) -> Result<String, DbError> {
    if is_valid_identifier(ident) {
        Ok(format!("`{}`", ident))
    } else {
        Err(DbError::InvalidIdentifier(ident.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_identifier() {
        assert_eq!(quote("users").unwrap(), "`users`");
        assert_eq!(quote("country_signup").unwrap(), "`country_signup`");
        assert!(matches!(
            quote("users`; DROP TABLE x"),
            Err(DbError::InvalidIdentifier(_))
        ));
        assert!(quote("").is_err());
    }
}
