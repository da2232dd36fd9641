//! Secret file resolution for capability runs.
//!
//! Secrets are dotenv files under a secrets root. Which files a capability
//! gets is decided by the mapping file plus whatever the operator adds.
//! Resolution is best-effort: missing or unreadable files are reported,
//! never fatal.

mod mapping;

use std::collections::HashMap;
use std::path::{Path, PathBuf};

pub use mapping::{SecretMapping, SecretMappingEntry, pattern_matches};

use crate::domain::CapabilitySummary;

/// Outcome of resolving the secrets for one run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SecretResolution {
    /// File references asked for, in order
    pub requested: Vec<String>,
    /// Labels of files that were read
    pub loaded: Vec<String>,
    /// Labels of files that do not exist
    pub missing: Vec<String>,
    /// Merged variables; later files win
    pub env: HashMap<String, String>,
}

/// Resolves secret files against a fixed root and a mapping loaded once
#[derive(Debug, Clone)]
pub struct SecretResolver {
    root: PathBuf,
    mapping: SecretMapping,
}

impl SecretResolver {
    pub fn new(root: impl Into<PathBuf>, mapping: SecretMapping) -> Self {
        Self {
            root: root.into(),
            mapping,
        }
    }

    /// Load the mapping file and build a resolver
    pub fn load(root: impl Into<PathBuf>, mapping_file: &Path) -> Self {
        Self::new(root, SecretMapping::load(mapping_file))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn mapping(&self) -> &SecretMapping {
        &self.mapping
    }

    pub fn request_list(&self, capability: &CapabilitySummary, extra: &[String]) -> Vec<String> {
        self.mapping.request_list(capability, extra)
    }

    /// Read every requested file and merge its variables
    pub async fn resolve(&self, capability: &CapabilitySummary, extra: &[String]) -> SecretResolution {
        let requested = self.request_list(capability, extra);
        let mut resolution = SecretResolution {
            requested: requested.clone(),
            ..Default::default()
        };

        for reference in &requested {
            let target = self.target(reference);
            let label = self.label(reference, &target);

            let content = match tokio::fs::read_to_string(&target).await {
                Ok(content) => content,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    log::warn!("Secret file not found: {}", label);
                    resolution.missing.push(label);
                    continue;
                }
                Err(e) => {
                    log::warn!("Unable to read secret file {}: {}", label, e);
                    continue;
                }
            };

            match parse_dotenv(&content) {
                Ok(vars) => {
                    log::debug!("Loaded {} variables from {}", vars.len(), label);
                    resolution.env.extend(vars);
                    resolution.loaded.push(label);
                }
                Err(e) => log::warn!("Unable to parse secret file {}: {}", label, e),
            }
        }

        resolution
    }

    fn target(&self, reference: &str) -> PathBuf {
        let path = Path::new(reference);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }

    /// Relative references keep their spelling; absolute ones are shown
    /// relative to the root when they live inside it.
    fn label(&self, reference: &str, target: &Path) -> String {
        if !Path::new(reference).is_absolute() {
            return reference.to_string();
        }
        match target.strip_prefix(&self.root) {
            Ok(relative) => relative.display().to_string(),
            Err(_) => target.display().to_string(),
        }
    }
}

fn parse_dotenv(content: &str) -> Result<Vec<(String, String)>, dotenvy::Error> {
    dotenvy::from_read_iter(content.as_bytes()).collect()
}
