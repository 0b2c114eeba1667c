//! Parameter sources
//!
//! A `ParameterSource` supplies the finalized `BuildParameters` for a run.
//! Two sources exist: an in-memory map and the operator's parameter file.
//!
//! The parameter file is a loose, human-edited format:
//!
//! ```text
//! ENV_NAME
//! Environment name (max 3 lowercase letters)
//! abc
//!
//! BRANCH
//! Branch name to deploy
//! Note: defaults to main when empty
//! main
//! ```
//!
//! A line made only of `[A-Z_]` characters names a parameter. Following
//! lines are skipped while empty, starting with `Note:`, or descriptive
//! (mentioning "name", "branch", "endpoint" or "service"). The first other
//! line is the value.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::domain::build::BuildParameters;

/// Words that mark a line as a description rather than a value
const DESCRIPTION_MARKERS: [&str; 4] = ["name", "branch", "endpoint", "service"];

/// Errors produced while obtaining build parameters
#[derive(Debug, Error)]
pub enum ParameterError {
    #[error("ENV_NAME parameter is missing")]
    MissingEnvName,

    #[error("ENV_NAME '{0}' must be 1-3 lowercase letters")]
    InvalidEnvName(String),

    #[error("Failed to read parameter file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Parameter file {0} contains no parameters")]
    Empty(PathBuf),
}

/// Supplies build parameters
pub trait ParameterSource: Send + Sync {
    /// Returns the finalized parameters
    fn parameters(&self) -> Result<BuildParameters, ParameterError>;
}

/// Parameters held in memory
#[derive(Debug, Clone, Default)]
pub struct StaticParameters {
    values: BTreeMap<String, String>,
}

impl StaticParameters {
    pub fn new(values: BTreeMap<String, String>) -> Self {
        Self { values }
    }
}

impl ParameterSource for StaticParameters {
    fn parameters(&self) -> Result<BuildParameters, ParameterError> {
        BuildParameters::new(self.values.clone())
    }
}

/// Parameters read from the operator's parameter file, with overrides
#[derive(Debug, Clone)]
pub struct ParamsFile {
    path: PathBuf,
    overrides: BTreeMap<String, String>,
}

impl ParamsFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            overrides: BTreeMap::new(),
        }
    }

    /// Values that win over whatever the file says
    pub fn with_overrides(mut self, overrides: impl IntoIterator<Item = (String, String)>) -> Self {
        self.overrides.extend(overrides);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ParameterSource for ParamsFile {
    fn parameters(&self) -> Result<BuildParameters, ParameterError> {
        let raw = std::fs::read_to_string(&self.path).map_err(|source| ParameterError::Io {
            path: self.path.clone(),
            source,
        })?;

        let mut values = parse_params_file(&raw);
        values.extend(self.overrides.clone());

        if values.is_empty() {
            return Err(ParameterError::Empty(self.path.clone()));
        }

        BuildParameters::new(values)
    }
}

/// Parses the parameter file format into a name -> value map
pub fn parse_params_file(raw: &str) -> BTreeMap<String, String> {
    let lines: Vec<&str> = raw.lines().map(str::trim).collect();
    let mut params = BTreeMap::new();
    let mut i = 0;

    while i < lines.len() {
        let line = lines[i];
        i += 1;

        if !is_parameter_name(line) {
            continue;
        }

        while i < lines.len() {
            let current = lines[i];

            if is_parameter_name(current) {
                break;
            }

            i += 1;

            if current.is_empty() || current.starts_with("Note:") || is_description(current) {
                continue;
            }

            params.insert(line.to_string(), current.to_string());
            break;
        }
    }

    params
}

fn is_parameter_name(line: &str) -> bool {
    !line.is_empty() && line.bytes().all(|b| b.is_ascii_uppercase() || b == b'_')
}

fn is_description(line: &str) -> bool {
    let lower = line.to_lowercase();
    DESCRIPTION_MARKERS.iter().any(|word| lower.contains(word))
}
