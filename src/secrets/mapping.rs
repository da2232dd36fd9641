//! Mapping from capabilities to the secret files they need.

use std::path::Path;

use glob::Pattern;
use serde::Deserialize;
use serde_json::Value;

use crate::domain::CapabilitySummary;

/// One `pattern -> envFiles` rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretMappingEntry {
    pub pattern: String,
    pub env_files: Vec<String>,
}

/// All rules from the mapping file, in file order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SecretMapping {
    pub entries: Vec<SecretMappingEntry>,
}

#[derive(Deserialize)]
struct RawMapping {
    #[serde(default)]
    patterns: Vec<Value>,
}

impl SecretMapping {
    /// Load the mapping file. A missing file is an empty mapping; other
    /// failures are logged and also yield an empty mapping.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(content) => Self::parse(&content).unwrap_or_else(|e| {
                log::warn!("Unable to parse secret mapping {}: {}", path.display(), e);
                Self::default()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Self::default(),
            Err(e) => {
                log::warn!("Unable to read secret mapping {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    /// Parse mapping JSON, skipping malformed entries
    pub fn parse(content: &str) -> serde_json::Result<Self> {
        let raw: RawMapping = serde_json::from_str(content)?;
        let entries = raw.patterns.iter().filter_map(parse_entry).collect();
        Ok(Self { entries })
    }

    /// Ordered, de-duplicated files for `capability` followed by `extra`
    pub fn request_list(&self, capability: &CapabilitySummary, extra: &[String]) -> Vec<String> {
        let mut requested: Vec<String> = Vec::new();
        let mapped = self
            .entries
            .iter()
            .filter(|entry| pattern_matches(&entry.pattern, capability))
            .flat_map(|entry| entry.env_files.iter());

        for file in mapped.chain(extra.iter()) {
            let file = file.trim();
            if !file.is_empty() && !requested.iter().any(|r| r == file) {
                requested.push(file.to_string());
            }
        }
        requested
    }
}

fn parse_entry(value: &Value) -> Option<SecretMappingEntry> {
    let pattern = value.get("pattern")?.as_str()?.trim().to_string();
    let env_files = value
        .get("envFiles")?
        .as_array()?
        .iter()
        .filter_map(Value::as_str)
        .map(str::trim)
        .filter(|f| !f.is_empty())
        .map(str::to_string)
        .collect();
    Some(SecretMappingEntry { pattern, env_files })
}

/// Does a mapping pattern select this capability?
///
/// `tag:<t>` matches by tag, `*`/`?` patterns match the id as wildcards,
/// anything else must equal the id.
pub fn pattern_matches(pattern: &str, capability: &CapabilitySummary) -> bool {
    if pattern.is_empty() {
        return false;
    }
    if let Some(tag) = pattern.strip_prefix("tag:") {
        return capability.has_tag(tag);
    }
    if pattern.contains(['*', '?']) {
        return wildcard(pattern).is_some_and(|p| p.matches(&capability.id));
    }
    capability.id == pattern
}

/// Compile a wildcard where only `*` and `?` are special
fn wildcard(pattern: &str) -> Option<Pattern> {
    let mut source = String::new();
    let mut literal = String::new();
    for ch in pattern.chars() {
        if ch == '*' || ch == '?' {
            source.push_str(&Pattern::escape(&literal));
            literal.clear();
            // runs of `*` mean the same as one
            if !(ch == '*' && source.ends_with('*')) {
                source.push(ch);
            }
        } else {
            literal.push(ch);
        }
    }
    source.push_str(&Pattern::escape(&literal));

    match Pattern::new(&source) {
        Ok(p) => Some(p),
        Err(e) => {
            log::warn!("Ignoring secret pattern {}: {}", pattern, e);
            None
        }
    }
}
