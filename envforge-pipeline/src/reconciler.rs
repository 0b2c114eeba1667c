//! Reconciler
//!
//! Makes sure exactly one row keyed by the record's natural key exists in
//! the target table. Absent rows are inserted in full; present rows only
//! get the reconciled columns rewritten. The write is one transaction and
//! is read back afterwards for the log.

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use envforge_core::domain::record::{RecordError, UpsertRecord};

use crate::database::{DbError, RecordStore, StoredRow};

/// Reconcile failures
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("Invalid record: {0}")]
    Record(#[from] RecordError),

    #[error("Table '{0}' does not exist in the target schema")]
    TableMissing(String),

    #[error("Table '{table}' has no column(s): {}", .columns.join(", "))]
    UnknownColumns { table: String, columns: Vec<String> },

    #[error(transparent)]
    Database(#[from] DbError),
}

/// What the write did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReconcileAction {
    Inserted,
    Updated,
}

impl std::fmt::Display for ReconcileAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReconcileAction::Inserted => write!(f, "inserted"),
            ReconcileAction::Updated => write!(f, "updated"),
        }
    }
}

/// Result of a successful reconcile
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconcileOutcome {
    pub action: ReconcileAction,
    /// Values read back after commit; `None` when the read-back failed
    pub verified: Option<StoredRow>,
}

/// Applies one upsert record
#[derive(Debug, Clone)]
pub struct Reconciler {
    record: UpsertRecord,
}

impl Reconciler {
    pub fn new(record: UpsertRecord) -> Result<Self, ReconcileError> {
        record.validate()?;
        Ok(Self { record })
    }

    pub fn record(&self) -> &UpsertRecord {
        &self.record
    }

    /// Upserts the record through `store`
    pub async fn apply(
        &self,
        store: &mut dyn RecordStore,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        self.check_table(store).await?;

        store.begin().await?;

        let written = match self.write(store).await {
            Ok(action) => store.commit().await.map(|_| action).map_err(ReconcileError::from),
            Err(e) => Err(e),
        };

        let action = match written {
            Ok(action) => action,
            Err(e) => {
                if let Err(rollback) = store.rollback().await {
                    warn!("Rollback failed: {}", rollback);
                }
                return Err(e);
            }
        };

        info!(
            "Row {}={} {} in {}",
            self.record.key_column, self.record.key, action, self.record.table
        );

        let verified = self.verify(store).await;
        Ok(ReconcileOutcome { action, verified })
    }

    async fn check_table(&self, store: &mut dyn RecordStore) -> Result<(), ReconcileError> {
        let table = &self.record.table;

        let tables = store.list_tables().await?;
        if !tables.iter().any(|t| t == table) {
            return Err(ReconcileError::TableMissing(table.clone()));
        }

        let columns = store.describe(table).await?;
        debug!("Table {} columns: {}", table, columns.join(", "));

        let mut unknown: Vec<String> = self
            .record
            .insert_row()
            .into_keys()
            .chain(self.record.verify_columns())
            .filter(|column| !columns.contains(column))
            .collect();
        unknown.sort();
        unknown.dedup();

        if !unknown.is_empty() {
            return Err(ReconcileError::UnknownColumns {
                table: table.clone(),
                columns: unknown,
            });
        }

        Ok(())
    }

    async fn write(&self, store: &mut dyn RecordStore) -> Result<ReconcileAction, ReconcileError> {
        let record = &self.record;

        let existing = store
            .count_by_key(&record.table, &record.key_column, &record.key)
            .await?;

        if existing == 0 {
            store.insert(&record.table, &record.insert_row()).await?;
            return Ok(ReconcileAction::Inserted);
        }

        if existing > 1 {
            warn!(
                "{} rows share {}={} in {}, updating all of them",
                existing, record.key_column, record.key, record.table
            );
        }

        store
            .update_by_key(
                &record.table,
                &record.key_column,
                &record.key,
                &record.update_row(),
            )
            .await?;

        Ok(ReconcileAction::Updated)
    }

    async fn verify(&self, store: &mut dyn RecordStore) -> Option<StoredRow> {
        let record = &self.record;
        let columns = record.verify_columns();

        match store
            .fetch_by_key(&record.table, &record.key_column, &record.key, &columns)
            .await
        {
            Ok(Some(row)) => {
                let rendered: Vec<String> = row
                    .iter()
                    .map(|(column, value)| {
                        format!("{}={}", column, value.as_deref().unwrap_or("NULL"))
                    })
                    .collect();
                info!("Verified {}: {}", record.key, rendered.join(", "));
                Some(row)
            }
            Ok(None) => {
                warn!(
                    "Row {}={} not found on read-back",
                    record.key_column, record.key
                );
                None
            }
            Err(e) => {
                warn!("Read-back of {} failed: {}", record.key, e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeServer, FakeStore};
    use envforge_core::domain::record::FieldValue;
    use std::collections::BTreeMap;

    fn record() -> UpsertRecord {
        serde_json::from_value(serde_json::json!({
            "table": "users",
            "key_column": "email",
            "key": "test101@example.com",
            "columns": {
                "name": "Test",
                "status": 1,
                "language": "en",
                "created_by": "envforge"
            },
            "reconciled": ["name", "status", "language"],
            "verify": ["email", "status"]
        }))
        .unwrap()
    }

    fn server() -> FakeServer {
        FakeServer::with_schema("app").table(
            "users",
            &["id", "email", "name", "status", "language", "created_by"],
        )
    }

    #[tokio::test]
    async fn test_inserts_absent_row() {
        let server = server().shared();
        let mut store = FakeStore::new(server.clone());

        let outcome = Reconciler::new(record())
            .unwrap()
            .apply(&mut store)
            .await
            .unwrap();

        assert_eq!(outcome.action, ReconcileAction::Inserted);
        let rows = FakeServer::rows(&server, "users");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["created_by"], FieldValue::from("envforge"));
        assert_eq!(rows[0]["email"], FieldValue::from("test101@example.com"));

        let verified = outcome.verified.unwrap();
        assert_eq!(verified["status"].as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn test_applying_twice_keeps_one_row_with_latest_values() {
        let server = server().shared();
        let mut store = FakeStore::new(server.clone());

        let first = Reconciler::new(record()).unwrap();
        assert_eq!(
            first.apply(&mut store).await.unwrap().action,
            ReconcileAction::Inserted
        );

        let mut changed = record();
        changed.columns.insert("status".to_string(), FieldValue::Int(2));
        changed.columns.insert("language".to_string(), FieldValue::from("es"));
        let second = Reconciler::new(changed).unwrap();
        assert_eq!(
            second.apply(&mut store).await.unwrap().action,
            ReconcileAction::Updated
        );

        let rows = FakeServer::rows(&server, "users");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["status"], FieldValue::Int(2));
        assert_eq!(rows[0]["language"], FieldValue::from("es"));
    }

    #[tokio::test]
    async fn test_update_leaves_other_columns_untouched() {
        let existing: BTreeMap<String, FieldValue> = [
            ("email", FieldValue::from("test101@example.com")),
            ("name", FieldValue::from("Old")),
            ("status", FieldValue::Int(0)),
            ("created_by", FieldValue::from("legacy")),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();

        let server = server().row("users", existing).shared();
        let mut store = FakeStore::new(server.clone());

        let outcome = Reconciler::new(record())
            .unwrap()
            .apply(&mut store)
            .await
            .unwrap();

        assert_eq!(outcome.action, ReconcileAction::Updated);
        let rows = FakeServer::rows(&server, "users");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["name"], FieldValue::from("Test"));
        assert_eq!(rows[0]["created_by"], FieldValue::from("legacy"));
    }

    #[tokio::test]
    async fn test_missing_table() {
        let server = FakeServer::with_schema("app").shared();
        let mut store = FakeStore::new(server);

        let err = Reconciler::new(record())
            .unwrap()
            .apply(&mut store)
            .await
            .unwrap_err();

        assert!(matches!(err, ReconcileError::TableMissing(ref t) if t == "users"));
    }

    #[tokio::test]
    async fn test_unknown_columns_rejected_before_writing() {
        let server = FakeServer::with_schema("app")
            .table("users", &["email", "name", "status"])
            .shared();
        let mut store = FakeStore::new(server.clone());

        let err = Reconciler::new(record())
            .unwrap()
            .apply(&mut store)
            .await
            .unwrap_err();

        match err {
            ReconcileError::UnknownColumns { columns, .. } => {
                assert_eq!(columns, vec!["created_by", "language"])
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert!(FakeServer::rows(&server, "users").is_empty());
    }

    #[tokio::test]
    async fn test_failed_write_rolls_back() {
        let server = server().failing_writes().shared();
        let mut store = FakeStore::new(server.clone());

        let err = Reconciler::new(record())
            .unwrap()
            .apply(&mut store)
            .await
            .unwrap_err();

        assert!(matches!(err, ReconcileError::Database(_)));
        let state = server.lock().unwrap();
        assert_eq!(state.rollbacks, 1);
        assert_eq!(state.commits, 0);
    }

    #[test]
    fn test_invalid_record_rejected() {
        let mut bad = record();
        bad.reconciled.push("missing".to_string());
        assert!(matches!(
            Reconciler::new(bad),
            Err(ReconcileError::Record(RecordError::MissingReconciledValue(_)))
        ));
    }
}
