//! Envforge Core
//!
//! Core types and pure logic for the envforge provisioning pipeline.
//!
//! This crate contains:
//! - Domain types: build parameters and handles, provisioned environments,
//!   resolved targets and upsert records
//! - Parameter sources: where build parameters come from
//! - Console extraction: turning a build log into a `ProvisionedEnvironment`
//!
//! Nothing in here performs network or process I/O.

pub mod console;
pub mod domain;
pub mod params;
