//! Capability summaries produced by discovery.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::id::Timestamp;

/// A named, launchable unit of automation.
///
/// Immutable for the lifetime of a run; identified by `id`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CapabilitySummary {
    pub id: String,
    pub summary: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Entrypoint as written in the manifest
    pub entrypoint: String,
    /// Entrypoint resolved against the manifest's directory
    pub absolute_entrypoint: PathBuf,
    pub supports_check: bool,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub docs_link: Option<String>,
    pub origin: String,
    #[serde(default)]
    pub surfaces: Vec<String>,
    pub manifest_path: PathBuf,
}

impl CapabilitySummary {
    /// Check whether the capability carries the given tag
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }
}

/// Result of one discovery pass.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    pub manifest_path: PathBuf,
    pub generated_at: Timestamp,
    pub capabilities: Vec<CapabilitySummary>,
}

impl DiscoveryPayload {
    /// Look up a capability by id
    pub fn find(&self, id: &str) -> Option<&CapabilitySummary> {
        self.capabilities.iter().find(|c| c.id == id)
    }
}
