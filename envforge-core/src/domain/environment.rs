//! Provisioned environment domain types
//!
//! What a finished build tells us about the infrastructure it created.
//! Every field is optional: a build log that does not mention a fact simply
//! leaves it absent.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::net::Ipv4Addr;

/// Kinds of service endpoint announced in a build log
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EndpointKind {
    Elk,
    ScannerApi,
    Alb,
    Cnc,
    Api,
}

impl EndpointKind {
    pub const ALL: [EndpointKind; 5] = [
        EndpointKind::Elk,
        EndpointKind::ScannerApi,
        EndpointKind::Alb,
        EndpointKind::Cnc,
        EndpointKind::Api,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EndpointKind::Elk => "elk",
            EndpointKind::ScannerApi => "scannerapi",
            EndpointKind::Alb => "alb",
            EndpointKind::Cnc => "cnc",
            EndpointKind::Api => "api",
        }
    }
}

impl std::fmt::Display for EndpointKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A user/password pair for a database server
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseCredentials {
    pub user: String,
    pub password: String,
}

impl DatabaseCredentials {
    pub fn new(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            password: password.into(),
        }
    }
}

impl std::fmt::Debug for DatabaseCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseCredentials")
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// PostgreSQL facts some builds print next to the MySQL ones
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostgresFacts {
    pub host: Option<String>,
    pub credentials: Option<DatabaseCredentials>,
}

impl PostgresFacts {
    pub fn is_empty(&self) -> bool {
        self.host.is_none() && self.credentials.is_none()
    }
}

/// Structured view of one build's console text
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvisionedEnvironment {
    pub endpoints: BTreeMap<EndpointKind, String>,

    /// Database credentials; both halves or nothing
    pub database: Option<DatabaseCredentials>,

    /// Hosts believed to run the database server
    pub candidate_hosts: BTreeSet<Ipv4Addr>,

    #[serde(default)]
    pub instance_private_ips: BTreeSet<Ipv4Addr>,

    #[serde(default, skip_serializing_if = "PostgresFacts::is_empty")]
    pub postgres: PostgresFacts,
}

impl ProvisionedEnvironment {
    pub fn endpoint(&self, kind: EndpointKind) -> Option<&str> {
        self.endpoints.get(&kind).map(String::as_str)
    }

    /// True when the database stage has everything it needs
    pub fn is_database_ready(&self) -> bool {
        self.database.is_some() && !self.candidate_hosts.is_empty()
    }
}

/// The candidate host found to expose the expected schema
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedTarget {
    pub host: Ipv4Addr,
    pub schema: String,
}

impl std::fmt::Display for ResolvedTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.host, self.schema)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credentials_debug_is_redacted() {
        let creds = DatabaseCredentials::new("admin", "hunter2");
        let debug = format!("{:?}", creds);
        assert!(debug.contains("admin"));
        assert!(!debug.contains("hunter2"));
    }

    #[test]
    fn test_database_ready_requires_both_facts() {
        let mut env = ProvisionedEnvironment::default();
        assert!(!env.is_database_ready());

        env.database = Some(DatabaseCredentials::new("u", "p"));
        assert!(!env.is_database_ready());

        env.candidate_hosts.insert(Ipv4Addr::new(10, 0, 0, 5));
        assert!(env.is_database_ready());
    }

    #[test]
    fn test_endpoint_kinds_serialize_lowercase() {
        let json = serde_json::to_string(&EndpointKind::ScannerApi).unwrap();
        assert_eq!(json, "\"scannerapi\"");
    }
}
