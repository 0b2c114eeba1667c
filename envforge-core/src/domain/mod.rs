//! Core domain types
//!
//! The entities that flow through the provisioning pipeline: build
//! parameters and handles, the environment parsed from a build log, the
//! resolved database target and the record reconciled into it.

pub mod build;
pub mod environment;
pub mod record;

pub use build::{BuildHandle, BuildParameters, BuildStatus, ENV_NAME};
pub use environment::{
    DatabaseCredentials, EndpointKind, PostgresFacts, ProvisionedEnvironment, ResolvedTarget,
};
pub use record::{FieldValue, RecordError, UpsertRecord};
