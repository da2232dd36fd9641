//! Requests front ends send to the run core.

use serde::{Deserialize, Serialize};

/// Launch a capability
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRequest {
    pub capability_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    #[serde(default)]
    pub check: bool,
    /// Extra secret files supplied by the operator
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env_files: Vec<String>,
}

impl RunRequest {
    pub fn new(capability_id: impl Into<String>) -> Self {
        Self {
            capability_id: capability_id.into(),
            ..Default::default()
        }
    }

    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = Some(prompt.into());
        self
    }

    pub fn with_check(mut self, check: bool) -> Self {
        self.check = check;
        self
    }

    pub fn with_env_files(mut self, files: Vec<String>) -> Self {
        self.env_files = files;
        self
    }

    /// Prompt with surrounding whitespace removed; blank prompts count as absent
    pub fn trimmed_prompt(&self) -> Option<&str> {
        self.prompt.as_deref().map(str::trim).filter(|p| !p.is_empty())
    }
}

/// Cancel an active run, by run id or else by capability id
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capability_id: Option<String>,
}

impl CancelRequest {
    pub fn by_run(run_id: impl Into<String>) -> Self {
        Self {
            run_id: Some(run_id.into()),
            capability_id: None,
        }
    }

    pub fn by_capability(capability_id: impl Into<String>) -> Self {
        Self {
            run_id: None,
            capability_id: Some(capability_id.into()),
        }
    }

    /// Neither selector supplied
    pub fn is_empty(&self) -> bool {
        self.run_id.as_deref().is_none_or(str::is_empty) && self.capability_id.as_deref().is_none_or(str::is_empty)
    }
}

/// Which front end started a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Initiator {
    Cli,
    Console,
}

impl Initiator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Initiator::Cli => "cli",
            Initiator::Console => "console",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_request_wire_shape() {
        let req: RunRequest = serde_json::from_str(r#"{"capabilityId":"demo.echo","prompt":"hi"}"#).unwrap();
        assert_eq!(req.capability_id, "demo.echo");
        assert_eq!(req.prompt.as_deref(), Some("hi"));
        assert!(!req.check);
        assert!(req.env_files.is_empty());
    }

    #[test]
    fn test_trimmed_prompt() {
        assert_eq!(RunRequest::new("a").with_prompt("  go  ").trimmed_prompt(), Some("go"));
        assert_eq!(RunRequest::new("a").with_prompt("   ").trimmed_prompt(), None);
        assert_eq!(RunRequest::new("a").trimmed_prompt(), None);
    }

    #[test]
    fn test_cancel_request_is_empty() {
        assert!(CancelRequest::default().is_empty());
        assert!(CancelRequest { run_id: Some(String::new()), capability_id: None }.is_empty());
        assert!(!CancelRequest::by_run("r1").is_empty());
        assert!(!CancelRequest::by_capability("demo.echo").is_empty());
    }

    #[test]
    fn test_initiator_serde() {
        assert_eq!(serde_json::to_string(&Initiator::Console).unwrap(), "\"console\"");
        assert_eq!(Initiator::Cli.as_str(), "cli");
    }
}
