//! JSON shapes of the Jenkins remote API
//!
//! Only the fields the pipeline reads are modelled; everything else in the
//! payloads is ignored.

use envforge_core::domain::build::BuildStatus;
use serde::Deserialize;
use std::collections::BTreeMap;

use crate::types::{BuildInfo, BuildSummary, JobInfo, QueueItem};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct JobJson {
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_true")]
    pub buildable: bool,
    pub last_build: Option<BuildRefJson>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct BuildHistoryJson {
    #[serde(default)]
    pub builds: Vec<BuildRefJson>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct BuildRefJson {
    pub number: u64,
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct BuildJson {
    pub number: u64,
    #[serde(default)]
    pub building: bool,
    #[serde(default)]
    pub result: Option<String>,
    #[serde(default)]
    pub in_progress: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct BuildActionsJson {
    #[serde(default)]
    pub actions: Vec<Option<ActionJson>>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ActionJson {
    #[serde(default)]
    pub parameters: Vec<ParameterJson>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ParameterJson {
    pub name: String,
    #[serde(default)]
    pub value: serde_json::Value,
}

#[derive(Debug, Deserialize)]
pub(crate) struct QueueItemJson {
    #[serde(default)]
    pub cancelled: bool,
    #[serde(default)]
    pub why: Option<String>,
    pub executable: Option<BuildRefJson>,
}

fn default_true() -> bool {
    true
}

impl From<JobJson> for JobInfo {
    fn from(job: JobJson) -> Self {
        JobInfo {
            name: job.name,
            last_build: job.last_build.map(|b| b.number),
            buildable: job.buildable,
        }
    }
}

impl From<BuildRefJson> for BuildSummary {
    fn from(build: BuildRefJson) -> Self {
        BuildSummary {
            number: build.number,
            url: build.url,
        }
    }
}

impl From<BuildJson> for BuildInfo {
    fn from(build: BuildJson) -> Self {
        let status = if build.building || build.in_progress == Some(true) {
            BuildStatus::Running
        } else {
            match build.result.as_deref() {
                Some("SUCCESS") => BuildStatus::Succeeded,
                // FAILURE, UNSTABLE, ABORTED, NOT_BUILT, or no result at all
                _ => BuildStatus::Failed,
            }
        };

        BuildInfo {
            number: build.number,
            status,
        }
    }
}

impl From<QueueItemJson> for QueueItem {
    fn from(item: QueueItemJson) -> Self {
        QueueItem {
            build_number: item.executable.map(|b| b.number),
            cancelled: item.cancelled,
            reason: item.why,
        }
    }
}

impl BuildActionsJson {
    /// Flattens every parameters action into a name -> value map
    pub fn into_parameters(self) -> BTreeMap<String, String> {
        self.actions
            .into_iter()
            .flatten()
            .flat_map(|action| action.parameters)
            .filter_map(|param| {
                let value = match param.value {
                    serde_json::Value::String(s) => s,
                    serde_json::Value::Bool(b) => b.to_string(),
                    serde_json::Value::Number(n) => n.to_string(),
                    _ => return None,
                };
                Some((param.name, value))
            })
            .collect()
    }
}
