//! Capability manifest schema and validation.

use std::collections::HashSet;

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::error::{CaprunError, Result};

/// Top-level manifest document
#[derive(Debug, Clone, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    pub version: Option<String>,
    pub capabilities: Vec<ManifestCapability>,
}

/// One capability as declared
#[derive(Debug, Clone, Deserialize)]
pub struct ManifestCapability {
    pub id: String,
    pub summary: String,
    #[serde(default)]
    pub description: Option<String>,
    pub entrypoint: String,
    #[serde(default)]
    pub inputs: Option<ManifestInputs>,
    #[serde(default)]
    pub metadata: Option<ManifestMetadata>,
    #[serde(default)]
    pub provenance: Option<ManifestProvenance>,
}

/// JSON-schema-like input declaration; only property names matter here
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ManifestInputs {
    #[serde(default)]
    pub properties: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ManifestMetadata {
    #[serde(default)]
    pub docs: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ManifestProvenance {
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub surfaces: Vec<String>,
}

impl ManifestCapability {
    pub fn supports_check(&self) -> bool {
        self.inputs
            .as_ref()
            .is_some_and(|inputs| inputs.properties.contains_key("check"))
    }

    /// Metadata tags then provenance tags, de-duplicated, first spelling wins
    pub fn tags(&self) -> Vec<String> {
        let metadata = self.metadata.iter().flat_map(|m| m.tags.iter());
        let provenance = self.provenance.iter().flat_map(|p| p.tags.iter());

        let mut tags: Vec<String> = Vec::new();
        for tag in metadata.chain(provenance) {
            let tag = tag.trim();
            if !tag.is_empty() && !tags.iter().any(|t| t == tag) {
                tags.push(tag.to_string());
            }
        }
        tags
    }
}

impl Manifest {
    /// Parse and validate manifest JSON
    pub fn parse(content: &str) -> Result<Self> {
        let manifest: Manifest =
            serde_json::from_str(content).map_err(|e| CaprunError::Manifest(format!("invalid manifest: {}", e)))?;
        manifest.validate()?;
        Ok(manifest)
    }

    fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for (index, cap) in self.capabilities.iter().enumerate() {
            if cap.id.trim().is_empty() {
                return Err(CaprunError::Manifest(format!("capabilities[{}].id must not be empty", index)));
            }
            if cap.entrypoint.trim().is_empty() {
                return Err(CaprunError::Manifest(format!(
                    "capabilities[{}].entrypoint must not be empty ({})",
                    index, cap.id
                )));
            }
            if !seen.insert(cap.id.as_str()) {
                return Err(CaprunError::Manifest(format!("duplicate capability id: {}", cap.id)));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_entry() {
        let manifest = Manifest::parse(
            r#"{
                "version": "1.0.0",
                "capabilities": [{
                    "id": "workspace.metaCheck",
                    "summary": "Run meta-check\n",
                    "entrypoint": "../../scripts/meta-check.sh",
                    "inputs": {"properties": {"check": {"type": "boolean"}}},
                    "metadata": {"docs": "docs/meta.md", "tags": ["ops", "lint"]},
                    "provenance": {"tags": ["lint", "ci"], "surfaces": ["cli"]},
                    "extra": true
                }]
            }"#,
        )
        .unwrap();

        assert_eq!(manifest.version.as_deref(), Some("1.0.0"));
        let cap = &manifest.capabilities[0];
        assert!(cap.supports_check());
        assert_eq!(cap.tags(), vec!["ops", "lint", "ci"]);
    }

    #[test]
    fn test_missing_field_is_named() {
        let err = Manifest::parse(r#"{"capabilities": [{"id": "a", "summary": "s"}]}"#).unwrap_err();
        assert!(err.to_string().contains("entrypoint"));
        assert!(err.is_configuration());
    }

    #[test]
    fn test_rejects_empty_id_and_entrypoint() {
        let err = Manifest::parse(r#"{"capabilities": [{"id": " ", "summary": "s", "entrypoint": "x"}]}"#).unwrap_err();
        assert!(err.to_string().contains("id must not be empty"));

        let err = Manifest::parse(r#"{"capabilities": [{"id": "a", "summary": "s", "entrypoint": ""}]}"#).unwrap_err();
        assert!(err.to_string().contains("entrypoint must not be empty"));
    }

    #[test]
    fn test_rejects_duplicate_ids() {
        let err = Manifest::parse(
            r#"{"capabilities": [
                {"id": "a", "summary": "s", "entrypoint": "x"},
                {"id": "a", "summary": "t", "entrypoint": "y"}
            ]}"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("duplicate capability id: a"));
    }

    #[test]
    fn test_no_check_property() {
        let manifest =
            Manifest::parse(r#"{"capabilities": [{"id": "a", "summary": "s", "entrypoint": "x"}]}"#).unwrap();
        assert!(!manifest.capabilities[0].supports_check());
        assert!(manifest.capabilities[0].tags().is_empty());
    }
}
