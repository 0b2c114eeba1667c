//! Build domain types

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::params::ParameterError;

/// Name of the parameter that identifies an environment across builds
pub const ENV_NAME: &str = "ENV_NAME";

/// Status of one build attempt on the CI side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BuildStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
}

impl BuildStatus {
    /// Whether the build has stopped and its console text is final
    pub fn is_terminal(self) -> bool {
        matches!(self, BuildStatus::Succeeded | BuildStatus::Failed)
    }
}

impl std::fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BuildStatus::Queued => write!(f, "Queued"),
            BuildStatus::Running => write!(f, "Running"),
            BuildStatus::Succeeded => write!(f, "Succeeded"),
            BuildStatus::Failed => write!(f, "Failed"),
        }
    }
}

/// One build attempt, either triggered by us or matched from history
///
/// Only status polls mutate a handle; builds are never deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildHandle {
    pub number: u64,
    pub status: BuildStatus,
    pub env_name: String,
    pub observed_at: chrono::DateTime<chrono::Utc>,
}

impl BuildHandle {
    pub fn new(number: u64, status: BuildStatus, env_name: impl Into<String>) -> Self {
        Self {
            number,
            status,
            env_name: env_name.into(),
            observed_at: chrono::Utc::now(),
        }
    }

    /// Records the result of a status poll
    pub fn observe(&mut self, status: BuildStatus) {
        self.status = status;
        self.observed_at = chrono::Utc::now();
    }
}

/// Finalized build parameters
///
/// Always carries a valid `ENV_NAME`. Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildParameters {
    values: BTreeMap<String, String>,
}

impl BuildParameters {
    /// Validates and wraps a parameter mapping
    pub fn new(values: BTreeMap<String, String>) -> Result<Self, ParameterError> {
        let env_name = values
            .get(ENV_NAME)
            .ok_or(ParameterError::MissingEnvName)?;

        if !is_valid_env_name(env_name) {
            return Err(ParameterError::InvalidEnvName(env_name.clone()));
        }

        Ok(Self { values })
    }

    /// The environment identifier used as the reuse key
    pub fn env_name(&self) -> &str {
        // Presence is checked in `new`
        self.values.get(ENV_NAME).map(String::as_str).unwrap_or_default()
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn as_map(&self) -> &BTreeMap<String, String> {
        &self.values
    }
}

/// 1 to 3 lowercase ASCII letters
pub fn is_valid_env_name(value: &str) -> bool {
    (1..=3).contains(&value.len()) && value.bytes().all(|b| b.is_ascii_lowercase())
}
