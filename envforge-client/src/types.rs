//! Public types returned by the CI client

use envforge_core::domain::build::BuildStatus;
use serde::{Deserialize, Serialize};

/// Location of a job, possibly nested in folders
///
/// `Environments/CreateClusterNew` addresses the job `CreateClusterNew`
/// inside the folder `Environments`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobPath {
    segments: Vec<String>,
}

impl JobPath {
    /// Parses a slash-separated job path; empty segments are ignored
    pub fn parse(path: &str) -> Option<Self> {
        let segments: Vec<String> = path
            .split('/')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();

        if segments.is_empty() {
            None
        } else {
            Some(Self { segments })
        }
    }

    /// The URL path of the job, e.g. `/job/Environments/job/CreateClusterNew`
    pub fn url_path(&self) -> String {
        self.segments
            .iter()
            .map(|s| format!("/job/{}", s))
            .collect()
    }

    /// Name of the job itself (last segment)
    pub fn name(&self) -> &str {
        self.segments.last().map(String::as_str).unwrap_or_default()
    }
}

impl std::fmt::Display for JobPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.segments.join("/"))
    }
}

/// Transient handle for a triggered build that has no number yet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueueRef(pub u64);

impl QueueRef {
    /// Parses the `Location` header returned by a trigger request,
    /// e.g. `https://ci.example.com/queue/item/123/`
    pub fn from_location(location: &str) -> Option<Self> {
        let mut segments = location.trim_end_matches('/').rsplit('/');
        let id = segments.next()?.parse().ok()?;
        match segments.next() {
            Some("item") => Some(Self(id)),
            _ => None,
        }
    }
}

impl std::fmt::Display for QueueRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "queue item {}", self.0)
    }
}

/// What the server told us after accepting a trigger
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerAck {
    /// The build sits in the queue and has no number yet
    Queued(QueueRef),
    /// The build already has a number
    Started(u64),
    /// Accepted, but no reference came back
    Unreferenced,
}

impl TriggerAck {
    /// Interprets the `Location` header of an accepted trigger
    ///
    /// Queue items look like `.../queue/item/123/`; a build that started
    /// right away is reported as `.../job/<name>/42/`.
    pub fn from_location(location: Option<&str>) -> Self {
        let Some(location) = location else {
            return TriggerAck::Unreferenced;
        };

        if let Some(queue) = QueueRef::from_location(location) {
            return TriggerAck::Queued(queue);
        }

        let mut segments = location.trim_end_matches('/').rsplit('/');
        let number = segments.next().and_then(|s| s.parse().ok());
        // Skip the job name, expect the `job` marker before it
        match (number, segments.nth(1)) {
            (Some(number), Some("job")) => TriggerAck::Started(number),
            _ => TriggerAck::Unreferenced,
        }
    }
}

/// State of a queue item
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueItem {
    /// Build number once the item left the queue
    pub build_number: Option<u64>,
    pub cancelled: bool,
    /// Why the item is still waiting, as reported by the server
    pub reason: Option<String>,
}

/// Job metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobInfo {
    pub name: String,
    pub last_build: Option<u64>,
    pub buildable: bool,
}

/// Status snapshot of a build
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuildInfo {
    pub number: u64,
    pub status: BuildStatus,
}

/// Entry of a job's build history
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildSummary {
    pub number: u64,
    pub url: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_path_url() {
        let job = JobPath::parse("Environments/CreateClusterNew").unwrap();
        assert_eq!(job.url_path(), "/job/Environments/job/CreateClusterNew");
        assert_eq!(job.name(), "CreateClusterNew");
        assert_eq!(job.to_string(), "Environments/CreateClusterNew");
    }

    #[test]
    fn test_job_path_ignores_empty_segments() {
        let job = JobPath::parse("/Environments//CreateClusterNew/").unwrap();
        assert_eq!(job.url_path(), "/job/Environments/job/CreateClusterNew");
        assert!(JobPath::parse(" / ").is_none());
    }

    #[test]
    fn test_queue_ref_from_location() {
        assert_eq!(
            QueueRef::from_location("https://ci.example.com/queue/item/123/"),
            Some(QueueRef(123))
        );
        assert_eq!(
            QueueRef::from_location("https://ci.example.com/queue/item/9"),
            Some(QueueRef(9))
        );
        assert_eq!(
            QueueRef::from_location("https://ci.example.com/job/x/42/"),
            None
        );
        assert_eq!(QueueRef::from_location("garbage"), None);
    }

    #[test]
    fn test_trigger_ack_from_location() {
        assert_eq!(
            TriggerAck::from_location(Some("https://ci.example.com/queue/item/123/")),
            TriggerAck::Queued(QueueRef(123))
        );
        assert_eq!(
            TriggerAck::from_location(Some(
                "https://ci.example.com/job/Environments/job/CreateClusterNew/42/"
            )),
            TriggerAck::Started(42)
        );
        assert_eq!(
            TriggerAck::from_location(Some("https://ci.example.com/job/CreateClusterNew/")),
            TriggerAck::Unreferenced
        );
        assert_eq!(TriggerAck::from_location(None), TriggerAck::Unreferenced);
    }
}
