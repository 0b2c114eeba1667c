//! Console extraction
//!
//! Turns the raw console text of a provisioning build into a
//! `ProvisionedEnvironment`. The build log is the only contract between the
//! provisioning job and this pipeline, so everything that knows its format
//! lives behind the `ConsoleExtractor` trait.
//!
//! Extraction never fails: a fact the log does not mention is absent.

use regex::Regex;
use std::collections::BTreeSet;
use std::net::Ipv4Addr;
use std::sync::LazyLock;
use tracing::debug;

use crate::domain::environment::{
    DatabaseCredentials, EndpointKind, PostgresFacts, ProvisionedEnvironment,
};

/// Label preceding the block of database host addresses
pub const DATABASE_HOST_LABEL: &str = "MySQL private HOST:";

/// How many lines after the host label may carry addresses
const DATABASE_HOST_LOOKAHEAD: usize = 3;

const INSTANCE_IP_LABEL: &str = "Instance PrivateIP:";

static IPV4_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(?:[0-9]{1,3}\.){3}[0-9]{1,3}\b").expect("valid regex"));

/// Parses build console text into structured facts
pub trait ConsoleExtractor: Send + Sync {
    fn extract(&self, console: &str) -> ProvisionedEnvironment;
}

/// Extractor for the "Label: value" lines printed by the provisioning job
#[derive(Debug, Clone, Default)]
pub struct LabelExtractor;

impl LabelExtractor {
    pub fn new() -> Self {
        Self
    }

    fn endpoint_label(kind: EndpointKind) -> &'static str {
        match kind {
            EndpointKind::Elk => "ELK EndPoint:",
            EndpointKind::ScannerApi => "Scannerapi EndPoint:",
            EndpointKind::Alb => "ALB EndPoint:",
            EndpointKind::Cnc => "cnc EndPoint:",
            EndpointKind::Api => "api-endpoint:",
        }
    }
}

impl ConsoleExtractor for LabelExtractor {
    fn extract(&self, console: &str) -> ProvisionedEnvironment {
        let endpoints = EndpointKind::ALL
            .iter()
            .filter_map(|kind| {
                labeled_value(console, Self::endpoint_label(*kind)).map(|value| (*kind, value))
            })
            .collect();

        let database = credentials(console, "MySQL User:", "MySQL Pass:");

        let candidate_hosts =
            addresses_after_label(console, DATABASE_HOST_LABEL, DATABASE_HOST_LOOKAHEAD);

        let instance_private_ips = addresses_on_label_line(console, INSTANCE_IP_LABEL);

        let postgres = PostgresFacts {
            host: labeled_value(console, "pgSQL private HOST:"),
            credentials: credentials(console, "pgSQL User:", "pgSQL Pass:"),
        };

        ProvisionedEnvironment {
            endpoints,
            database,
            candidate_hosts,
            instance_private_ips,
            postgres,
        }
    }
}

/// First whitespace-delimited token after the first occurrence of `label`
///
/// When nothing follows the label on its line, a next line holding a single
/// token is taken as the wrapped value.
fn labeled_value(console: &str, label: &str) -> Option<String> {
    let lines: Vec<&str> = console.lines().collect();

    lines.iter().enumerate().find_map(|(i, line)| {
        let (_, rest) = line.split_once(label)?;
        if let Some(token) = rest.split_whitespace().next() {
            return Some(token.to_string());
        }

        let next = lines.get(i + 1)?.trim();
        if next.is_empty() || next.contains(char::is_whitespace) {
            return None;
        }
        Some(next.to_string())
    })
}

fn credentials(console: &str, user_label: &str, pass_label: &str) -> Option<DatabaseCredentials> {
    let user = labeled_value(console, user_label)?;
    let password = labeled_value(console, pass_label)?;
    Some(DatabaseCredentials { user, password })
}

/// Addresses on the `lookahead` lines following every occurrence of `label`
fn addresses_after_label(console: &str, label: &str, lookahead: usize) -> BTreeSet<Ipv4Addr> {
    let lines: Vec<&str> = console.lines().collect();

    lines
        .iter()
        .enumerate()
        .filter(|(_, line)| line.contains(label))
        .flat_map(|(i, _)| lines.iter().skip(i + 1).take(lookahead))
        .flat_map(|line| ipv4_tokens(line))
        .collect()
}

/// Addresses after `label` on its own line plus the line after it
fn addresses_on_label_line(console: &str, label: &str) -> BTreeSet<Ipv4Addr> {
    let lines: Vec<&str> = console.lines().collect();
    let mut found = BTreeSet::new();

    for (i, line) in lines.iter().enumerate() {
        let Some((_, rest)) = line.split_once(label) else {
            continue;
        };
        let on_line = ipv4_tokens(rest);
        if on_line.is_empty() {
            continue;
        }
        found.extend(on_line);
        if let Some(next) = lines.get(i + 1) {
            found.extend(ipv4_tokens(next));
        }
    }

    found
}

/// Dotted-quad tokens that are also valid addresses
fn ipv4_tokens(line: &str) -> Vec<Ipv4Addr> {
    IPV4_TOKEN
        .find_iter(line)
        .filter_map(|m| match m.as_str().parse() {
            Ok(addr) => Some(addr),
            Err(_) => {
                debug!("Dropping '{}': not a valid IPv4 address", m.as_str());
                None
            }
        })
        .collect()
}
