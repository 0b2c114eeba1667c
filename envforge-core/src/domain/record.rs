//! Upsert record domain types
//!
//! The application row the pipeline reconciles into the resolved database.
//! Its contents are configuration, loaded from JSON, never literals in code.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// A single column value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Int(i64),
    Text(String),
    Null,
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Int(value)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Text(value)
    }
}

impl std::fmt::Display for FieldValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FieldValue::Int(v) => write!(f, "{}", v),
            FieldValue::Text(v) => write!(f, "{}", v),
            FieldValue::Null => write!(f, "NULL"),
        }
    }
}

/// Errors in a record definition
#[derive(Debug, Error)]
pub enum RecordError {
    #[error("Invalid identifier: '{0}'")]
    InvalidIdentifier(String),

    #[error("Reconciled column '{0}' has no value in the record")]
    MissingReconciledValue(String),

    #[error("Record key must not be empty")]
    EmptyKey,

    #[error("Failed to read record file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse record file: {0}")]
    Parse(#[from] serde_json::Error),
}

/// The row to reconcile, keyed by a natural key
///
/// `columns` is the full row used on insert. On update only the columns
/// named in `reconciled` are written; everything else is left untouched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpsertRecord {
    pub table: String,
    pub key_column: String,
    pub key: String,
    pub columns: BTreeMap<String, FieldValue>,
    pub reconciled: Vec<String>,
    /// Columns read back after the write for verification
    #[serde(default)]
    pub verify: Vec<String>,
}

impl UpsertRecord {
    /// Loads a record definition from a JSON file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self, RecordError> {
        let raw = std::fs::read_to_string(path)?;
        let record: UpsertRecord = serde_json::from_str(&raw)?;
        record.validate()?;
        Ok(record)
    }

    /// Checks identifiers and the reconciled subset
    pub fn validate(&self) -> Result<(), RecordError> {
        if self.key.is_empty() {
            return Err(RecordError::EmptyKey);
        }

        let identifiers = std::iter::once(&self.table)
            .chain(std::iter::once(&self.key_column))
            .chain(self.columns.keys())
            .chain(self.reconciled.iter())
            .chain(self.verify.iter());

        for ident in identifiers {
            if !is_valid_identifier(ident) {
                return Err(RecordError::InvalidIdentifier(ident.clone()));
            }
        }

        for column in &self.reconciled {
            if !self.columns.contains_key(column) {
                return Err(RecordError::MissingReconciledValue(column.clone()));
            }
        }

        Ok(())
    }

    /// The full row for an insert, with the natural key filled in
    pub fn insert_row(&self) -> BTreeMap<String, FieldValue> {
        let mut row = self.columns.clone();
        row.insert(self.key_column.clone(), FieldValue::Text(self.key.clone()));
        row
    }

    /// The reconciled subset for an update of an existing row
    pub fn update_row(&self) -> BTreeMap<String, FieldValue> {
        self.reconciled
            .iter()
            .filter(|column| **column != self.key_column)
            .filter_map(|column| {
                self.columns
                    .get(column)
                    .map(|value| (column.clone(), value.clone()))
            })
            .collect()
    }

    /// Columns to read back; falls back to the key column alone
    pub fn verify_columns(&self) -> Vec<String> {
        if self.verify.is_empty() {
            vec![self.key_column.clone()]
        } else {
            self.verify.clone()
        }
    }
}

/// Table and column names are restricted to `[A-Za-z0-9_]+`
pub fn is_valid_identifier(value: &str) -> bool {
    !value.is_empty() && value.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_')
}
