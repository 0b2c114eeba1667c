//! MySQL implementation

use async_trait::async_trait;
use sqlx::mysql::{MySql, MySqlArguments, MySqlConnectOptions, MySqlConnection};
use sqlx::query::Query;
use sqlx::{ConnectOptions, Connection, Executor, Row};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::time;
use tracing::{debug, warn};

use envforge_core::domain::environment::DatabaseCredentials;
use envforge_core::domain::record::FieldValue;

use super::{DatabaseConnector, DbError, RecordStore, StoredRow, quote};

/// Connects to MySQL servers behind tunnels
#[derive(Debug, Clone)]
pub struct MySqlConnector {
    connect_timeout: Duration,
}

impl MySqlConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }

    fn options(
        addr: SocketAddr,
        credentials: &DatabaseCredentials,
        schema: Option<&str>,
    ) -> MySqlConnectOptions {
        let options = MySqlConnectOptions::new()
            .host(&addr.ip().to_string())
            .port(addr.port())
            .username(&credentials.user)
            .password(&credentials.password)
            .charset("utf8mb4");

        match schema {
            Some(schema) => options.database(schema),
            None => options,
        }
    }

    async fn connect(
        &self,
        addr: SocketAddr,
        options: MySqlConnectOptions,
    ) -> Result<MySqlConnection, DbError> {
        match time::timeout(self.connect_timeout, options.connect()).await {
            Ok(Ok(conn)) => Ok(conn),
            Ok(Err(source)) => Err(DbError::Connect { addr, source }),
            Err(_) => Err(DbError::ConnectTimeout {
                addr,
                timeout: self.connect_timeout,
            }),
        }
    }
}

#[async_trait]
impl DatabaseConnector for MySqlConnector {
    async fn list_schemas(
        &self,
        addr: SocketAddr,
        credentials: &DatabaseCredentials,
    ) -> Result<Vec<String>, DbError> {
        let mut conn = self
            .connect(addr, Self::options(addr, credentials, None))
            .await?;

        let listed = first_column(&mut conn, "SHOW DATABASES").await;
        let schemas = keep_outcome(listed, conn.close().await, addr)?;
        debug!("{} exposes {} schema(s)", addr, schemas.len());
        Ok(schemas)
    }

    async fn open_store(
        &self,
        addr: SocketAddr,
        credentials: &DatabaseCredentials,
        schema: &str,
    ) -> Result<Box<dyn RecordStore>, DbError> {
        quote(schema)?;
        let conn = self
            .connect(addr, Self::options(addr, credentials, Some(schema)))
            .await?;

        Ok(Box::new(MySqlRecordStore { conn }))
    }
}

/// One MySQL connection with a schema selected
pub struct MySqlRecordStore {
    conn: MySqlConnection,
}

#[async_trait]
impl RecordStore for MySqlRecordStore {
    async fn list_tables(&mut self) -> Result<Vec<String>, DbError> {
        first_column(&mut self.conn, "SHOW TABLES").await
    }

    async fn describe(&mut self, table: &str) -> Result<Vec<String>, DbError> {
        let sql = format!("DESCRIBE {}", quote(table)?);
        first_column(&mut self.conn, &sql).await
    }

    async fn begin(&mut self) -> Result<(), DbError> {
        (&mut self.conn)
            .execute(sqlx::raw_sql("START TRANSACTION"))
            .await?;
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), DbError> {
        (&mut self.conn).execute(sqlx::raw_sql("COMMIT")).await?;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), DbError> {
        (&mut self.conn).execute(sqlx::raw_sql("ROLLBACK")).await?;
        Ok(())
    }

    async fn count_by_key(
        &mut self,
        table: &str,
        key_column: &str,
        key: &str,
    ) -> Result<u64, DbError> {
        let sql = count_sql(table, key_column)?;

        let row = sqlx::query(&sql)
            .bind(key)
            .fetch_one(&mut self.conn)
            .await?;
        let count: i64 = row.try_get(0)?;

        Ok(count.max(0) as u64)
    }

    async fn insert(
        &mut self,
        table: &str,
        row: &BTreeMap<String, FieldValue>,
    ) -> Result<(), DbError> {
        let sql = insert_sql(table, row)?;

        let mut query = sqlx::query(&sql);
        for value in row.values() {
            query = bind_value(query, value);
        }
        query.execute(&mut self.conn).await?;

        Ok(())
    }

    async fn update_by_key(
        &mut self,
        table: &str,
        key_column: &str,
        key: &str,
        row: &BTreeMap<String, FieldValue>,
    ) -> Result<(), DbError> {
        let Some(sql) = update_sql(table, key_column, row)? else {
            return Ok(());
        };

        let mut query = sqlx::query(&sql);
        for (_, value) in assigned(row, key_column) {
            query = bind_value(query, value);
        }
        query.bind(key).execute(&mut self.conn).await?;

        Ok(())
    }

    async fn fetch_by_key(
        &mut self,
        table: &str,
        key_column: &str,
        key: &str,
        columns: &[String],
    ) -> Result<Option<StoredRow>, DbError> {
        if columns.is_empty() {
            return Ok(None);
        }

        let sql = select_sql(table, key_column, columns)?;

        let Some(row) = sqlx::query(&sql)
            .bind(key)
            .fetch_optional(&mut self.conn)
            .await?
        else {
            return Ok(None);
        };

        let mut stored = StoredRow::new();
        for (index, column) in columns.iter().enumerate() {
            let value: Option<String> = row.try_get_unchecked(index)?;
            stored.insert(column.clone(), value);
        }

        Ok(Some(stored))
    }

    async fn close(self: Box<Self>) -> Result<(), DbError> {
        self.conn.close().await?;
        Ok(())
    }
}

/// Returns the statement outcome, logging a failed close instead of
/// letting it replace that outcome
fn keep_outcome<T>(
    outcome: Result<T, DbError>,
    closed: Result<(), sqlx::Error>,
    addr: SocketAddr,
) -> Result<T, DbError> {
    if let Err(e) = closed {
        warn!(error = %e, "Failed to close connection to {}", addr);
    }
    outcome
}

fn count_sql(table: &str, key_column: &str) -> Result<String, DbError> {
    Ok(format!(
        "SELECT COUNT(*) FROM {} WHERE {} = ?",
        quote(table)?,
        quote(key_column)?
    ))
}

/// Columns in map order; values must be bound in the same order
fn insert_sql(table: &str, row: &BTreeMap<String, FieldValue>) -> Result<String, DbError> {
    let columns = row
        .keys()
        .map(|column| quote(column))
        .collect::<Result<Vec<_>, _>>()?;
    let placeholders = vec!["?"; columns.len()].join(", ");

    Ok(format!(
        "INSERT INTO {} ({}) VALUES ({})",
        quote(table)?,
        columns.join(", "),
        placeholders
    ))
}

/// The columns an update writes; the key column never changes
fn assigned<'a>(
    row: &'a BTreeMap<String, FieldValue>,
    key_column: &'a str,
) -> impl Iterator<Item = (&'a String, &'a FieldValue)> {
    row.iter().filter(move |(column, _)| column.as_str() != key_column)
}

/// `None` when there is nothing to assign
fn update_sql(
    table: &str,
    key_column: &str,
    row: &BTreeMap<String, FieldValue>,
) -> Result<Option<String>, DbError> {
    let assignments = assigned(row, key_column)
        .map(|(column, _)| quote(column).map(|quoted| format!("{} = ?", quoted)))
        .collect::<Result<Vec<_>, _>>()?;

    if assignments.is_empty() {
        return Ok(None);
    }

    Ok(Some(format!(
        "UPDATE {} SET {} WHERE {} = ?",
        quote(table)?,
        assignments.join(", "),
        quote(key_column)?
    )))
}

fn select_sql(table: &str, key_column: &str, columns: &[String]) -> Result<String, DbError> {
    let selected = columns
        .iter()
        .map(|column| quote(column).map(|quoted| format!("CAST({} AS CHAR)", quoted)))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(format!(
        "SELECT {} FROM {} WHERE {} = ? LIMIT 1",
        selected.join(", "),
        quote(table)?,
        quote(key_column)?
    ))
}

/// Runs a SHOW/DESCRIBE statement and returns its first column
async fn first_column(conn: &mut MySqlConnection, sql: &str) -> Result<Vec<String>, DbError> {
    let rows = conn.fetch_all(sqlx::raw_sql(sql)).await?;

    rows.iter()
        .map(|row| row.try_get_unchecked::<String, _>(0).map_err(DbError::from))
        .collect()
}

fn bind_value<'q>(
    query: Query<'q, MySql, MySqlArguments>,
    value: &FieldValue,
) -> Query<'q, MySql, MySqlArguments> {
    match value {
        FieldValue::Int(v) => query.bind(*v),
        FieldValue::Text(v) => query.bind(v.clone()),
        FieldValue::Null => query.bind(None::<String>),
    }
}
