//! Capability discovery from a workspace manifest.
//!
//! The first manifest candidate that exists is parsed, validated and
//! normalized into [`CapabilitySummary`] values.

mod manifest;

use std::path::{Component, Path, PathBuf};

use chrono::FixedOffset;
use tokio::fs;

pub use manifest::{Manifest, ManifestCapability};

use crate::domain::{CapabilitySummary, DiscoveryPayload};
use crate::error::{CaprunError, Result};
use crate::id::timestamp_now;

/// Default manifest locations, relative to the workspace root
pub const DEFAULT_MANIFEST_CANDIDATES: &[&str] = &["capabilities/manifest.json", "n00t/capabilities/manifest.json"];

/// First candidate that exists, resolved against `workspace_root`
pub async fn locate_manifest(workspace_root: &Path, candidates: &[PathBuf]) -> Option<PathBuf> {
    for candidate in candidates {
        let path = workspace_root.join(candidate);
        if fs::metadata(&path).await.is_ok_and(|meta| meta.is_file()) {
            return Some(path);
        }
    }
    None
}

/// Discover capabilities under `workspace_root`
pub async fn discover(workspace_root: &Path, candidates: &[PathBuf], offset: FixedOffset) -> Result<DiscoveryPayload> {
    let manifest_path = locate_manifest(workspace_root, candidates).await.ok_or_else(|| {
        let tried: Vec<String> = candidates.iter().map(|c| c.display().to_string()).collect();
        CaprunError::Manifest(format!(
            "capability manifest not found under {} (tried {})",
            workspace_root.display(),
            tried.join(", ")
        ))
    })?;

    let content = fs::read_to_string(&manifest_path)
        .await
        .map_err(|e| CaprunError::Manifest(format!("unable to read {}: {}", manifest_path.display(), e)))?;
    let manifest = Manifest::parse(&content).map_err(|e| match e {
        CaprunError::Manifest(msg) => CaprunError::Manifest(format!("{}: {}", manifest_path.display(), msg)),
        other => other,
    })?;

    let manifest_dir = manifest_path.parent().unwrap_or(workspace_root);
    let capabilities = manifest
        .capabilities
        .iter()
        .map(|cap| normalize(cap, manifest_dir, &manifest_path))
        .collect();

    log::info!("Discovered capabilities from {}", manifest_path.display());
    Ok(DiscoveryPayload {
        version: manifest.version,
        manifest_path,
        generated_at: timestamp_now(offset),
        capabilities,
    })
}

fn normalize(cap: &ManifestCapability, manifest_dir: &Path, manifest_path: &Path) -> CapabilitySummary {
    let entrypoint = cap.entrypoint.trim().to_string();
    CapabilitySummary {
        id: cap.id.trim().to_string(),
        summary: cap.summary.trim().to_string(),
        description: cap
            .description
            .as_deref()
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .map(str::to_string),
        absolute_entrypoint: lexical_join(manifest_dir, &entrypoint),
        supports_check: cap.supports_check(),
        tags: cap.tags(),
        docs_link: cap.metadata.as_ref().and_then(|m| m.docs.clone()),
        origin: entrypoint.clone(),
        surfaces: cap.provenance.as_ref().map(|p| p.surfaces.clone()).unwrap_or_default(),
        manifest_path: manifest_path.to_path_buf(),
        entrypoint,
    }
}

/// Join and fold `.`/`..` without touching the filesystem
fn lexical_join(base: &Path, relative: &str) -> PathBuf {
    let mut out = PathBuf::new();
    for component in base.join(relative).components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::offset_from_minutes;
    use tempfile::TempDir;

    fn candidates() -> Vec<PathBuf> {
        DEFAULT_MANIFEST_CANDIDATES.iter().map(PathBuf::from).collect()
    }

    fn write_manifest(root: &Path, rel: &str, body: &str) -> PathBuf {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, body).unwrap();
        path
    }

    #[tokio::test]
    async fn test_loads_manifest_from_second_candidate() {
        let temp = TempDir::new().unwrap();
        let manifest_path = write_manifest(
            temp.path(),
            "n00t/capabilities/manifest.json",
            r#"{
                "version": "1.0.0",
                "capabilities": [{
                    "id": "workspace.metaCheck",
                    "summary": "Run meta-check\n",
                    "entrypoint": "../../.dev/automation/scripts/meta-check.sh",
                    "inputs": {"properties": {"check": {"type": "boolean"}}}
                }]
            }"#,
        );

        let payload = discover(temp.path(), &candidates(), offset_from_minutes(120)).await.unwrap();
        assert_eq!(payload.manifest_path, manifest_path);
        assert_eq!(payload.version.as_deref(), Some("1.0.0"));
        assert_eq!(payload.capabilities.len(), 1);

        let cap = &payload.capabilities[0];
        assert_eq!(cap.id, "workspace.metaCheck");
        assert_eq!(cap.summary, "Run meta-check");
        assert!(cap.supports_check);
        assert_eq!(cap.entrypoint, "../../.dev/automation/scripts/meta-check.sh");
        assert_eq!(cap.origin, cap.entrypoint);
        assert_eq!(
            cap.absolute_entrypoint,
            temp.path().join(".dev/automation/scripts/meta-check.sh")
        );
        assert!(payload.find("workspace.metaCheck").is_some());
    }

    #[tokio::test]
    async fn test_first_candidate_wins() {
        let temp = TempDir::new().unwrap();
        write_manifest(
            temp.path(),
            "capabilities/manifest.json",
            r#"{"capabilities": [{"id": "first", "summary": "s", "entrypoint": "a.sh"}]}"#,
        );
        write_manifest(
            temp.path(),
            "n00t/capabilities/manifest.json",
            r#"{"capabilities": [{"id": "second", "summary": "s", "entrypoint": "b.sh"}]}"#,
        );

        let payload = discover(temp.path(), &candidates(), offset_from_minutes(0)).await.unwrap();
        assert_eq!(payload.capabilities[0].id, "first");
        assert_eq!(
            payload.capabilities[0].absolute_entrypoint,
            temp.path().join("capabilities/a.sh")
        );
    }

    #[tokio::test]
    async fn test_missing_manifest() {
        let temp = TempDir::new().unwrap();
        let err = discover(temp.path(), &candidates(), offset_from_minutes(0)).await.unwrap_err();
        assert!(matches!(err, CaprunError::Manifest(_)));
        assert!(err.to_string().to_lowercase().contains("capability manifest not found"));
    }

    #[tokio::test]
    async fn test_invalid_manifest_names_the_file() {
        let temp = TempDir::new().unwrap();
        write_manifest(temp.path(), "capabilities/manifest.json", r#"{"capabilities": [{"id": "a"}]}"#);
        let err = discover(temp.path(), &candidates(), offset_from_minutes(0)).await.unwrap_err();
        assert!(err.to_string().contains("manifest.json"));
        assert!(err.to_string().contains("summary"));
    }

    #[test]
    fn test_lexical_join_folds_parent_dirs() {
        assert_eq!(
            lexical_join(Path::new("/ws/n00t/capabilities"), "../../scripts/./run.sh"),
            PathBuf::from("/ws/scripts/run.sh")
        );
        assert_eq!(lexical_join(Path::new("/ws"), "/abs/run.sh"), PathBuf::from("/abs/run.sh"));
    }
}
