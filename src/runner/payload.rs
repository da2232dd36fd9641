//! The structured payload handed to a capability through its environment.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::id::{Timestamp, timestamp_label};

/// Environment variable carrying the JSON payload
pub const PAYLOAD_ENV: &str = "CAPABILITY_PAYLOAD";

/// Environment variable carrying the workspace root
pub const WORKSPACE_ROOT_ENV: &str = "WORKSPACE_ROOT";

/// What a capability receives in `CAPABILITY_PAYLOAD`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub check: Option<bool>,
    /// Artifact the capability should write its result to
    pub output: PathBuf,
}

impl CapabilityPayload {
    /// `check` is only passed to capabilities that declare support for it;
    /// blank prompts are dropped.
    pub fn new(prompt: Option<&str>, check: bool, supports_check: bool, output: PathBuf) -> Self {
        Self {
            input: prompt.map(str::trim).filter(|p| !p.is_empty()).map(str::to_string),
            check: supports_check.then_some(check),
            output,
        }
    }

    pub fn to_env_value(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Deterministic artifact location for one run.
///
/// `<dir>/agent-run-<capability>-<timestamp label>-<run id prefix>.json`, with
/// dots in the capability id turned into dashes.
pub fn artifact_path(dir: &Path, capability_id: &str, started: &Timestamp, run_id: &str) -> PathBuf {
    let slug = capability_id.replace('.', "-");
    let short: String = run_id.chars().filter(|c| *c != '-').take(8).collect();
    dir.join(format!("agent-run-{}-{}-{}.json", slug, timestamp_label(started), short))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::{offset_from_minutes, timestamp_at};
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_payload_omits_check_when_unsupported() {
        let payload = CapabilityPayload::new(Some("do it"), true, false, PathBuf::from("/tmp/out.json"));
        let json: serde_json::Value = serde_json::from_str(&payload.to_env_value().unwrap()).unwrap();
        assert_eq!(json["input"], "do it");
        assert!(json.get("check").is_none());
        assert_eq!(json["output"], "/tmp/out.json");
    }

    #[test]
    fn test_payload_includes_check_when_supported() {
        let payload = CapabilityPayload::new(None, false, true, PathBuf::from("/tmp/out.json"));
        let json: serde_json::Value = serde_json::from_str(&payload.to_env_value().unwrap()).unwrap();
        assert!(json.get("input").is_none());
        assert_eq!(json["check"], false);
    }

    #[test]
    fn test_blank_prompt_dropped() {
        let payload = CapabilityPayload::new(Some("   "), false, false, PathBuf::from("o.json"));
        assert_eq!(payload.input, None);
    }

    #[test]
    fn test_artifact_path_shape() {
        let started = timestamp_at(Utc.with_ymd_and_hms(2024, 1, 1, 10, 30, 15).unwrap(), offset_from_minutes(120));
        let path = artifact_path(
            Path::new("/ws/artifacts"),
            "demo.echo",
            &started,
            "7f4c8b7e-2f0a-4f7e-9a55-1c2d3e4f5a6b",
        );
        assert_eq!(
            path,
            PathBuf::from("/ws/artifacts/agent-run-demo-echo-2024-01-01T12-30-15-02-00-7f4c8b7e.json")
        );
    }

    #[test]
    fn test_artifact_paths_differ_per_run() {
        let started = timestamp_at(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(), offset_from_minutes(0));
        let a = artifact_path(Path::new("/a"), "x", &started, "aaaaaaaa-1");
        let b = artifact_path(Path::new("/a"), "x", &started, "bbbbbbbb-1");
        assert_ne!(a, b);
    }
}
