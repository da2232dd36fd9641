use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::discovery::DEFAULT_MANIFEST_CANDIDATES;

/// Workspace root override
pub const WORKSPACE_ROOT_ENV: &str = "WORKSPACE_ROOT";
/// Secrets root override
pub const SECRETS_ROOT_ENV: &str = "CAPRUN_SECRETS_ROOT";
/// Telemetry directory override
pub const TELEMETRY_ROOT_ENV: &str = "CAPRUN_TELEMETRY_ROOT";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub log_level: Option<String>,
    pub workspace: WorkspaceConfig,
    pub secrets: SecretsConfig,
    pub telemetry: TelemetryConfig,
    pub clock: ClockConfig,
    pub runner: RunnerConfig,
    pub console: ConsoleConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkspaceConfig {
    /// Defaults to `$WORKSPACE_ROOT`, then the current directory
    pub root: Option<PathBuf>,
    pub manifest_candidates: Vec<PathBuf>,
    pub artifacts_dir: PathBuf,
    /// Relative to the artifacts directory
    pub ledger_file: PathBuf,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            root: None,
            manifest_candidates: DEFAULT_MANIFEST_CANDIDATES.iter().map(PathBuf::from).collect(),
            artifacts_dir: PathBuf::from(".dev/automation/artifacts/automation"),
            ledger_file: PathBuf::from("agent-runs.json"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecretsConfig {
    /// Defaults to `$CAPRUN_SECRETS_ROOT`, then `<config dir>/caprun/secrets`
    pub root: Option<PathBuf>,
    pub mapping_file: PathBuf,
}

impl Default for SecretsConfig {
    fn default() -> Self {
        Self {
            root: None,
            mapping_file: PathBuf::from("secrets/capability-env.json"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub enabled: bool,
    /// Defaults to `$CAPRUN_TELEMETRY_ROOT`, then `<data dir>/caprun/telemetry`
    pub dir: Option<PathBuf>,
    pub file_name: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: None,
            file_name: "agent-runner-log.jsonl".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClockConfig {
    /// Exported to capabilities as `TZ`
    pub timezone: String,
    /// Offset applied to ledger timestamps
    pub utc_offset_minutes: i32,
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self {
            timezone: "Africa/Johannesburg".to_string(),
            utc_offset_minutes: 120,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    pub summary_max_chars: usize,
    /// Time between SIGTERM and a forced kill on cancel; 0 kills at once
    pub cancel_grace_ms: u64,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            summary_max_chars: 160,
            cancel_grace_ms: 2000,
        }
    }
}

impl RunnerConfig {
    pub fn cancel_grace(&self) -> Duration {
        Duration::from_millis(self.cancel_grace_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsoleConfig {
    pub socket_path: Option<PathBuf>,
    pub max_clients: usize,
    pub event_channel_capacity: usize,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            socket_path: None,
            max_clients: 16,
            event_channel_capacity: 256,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: Some("info".to_string()),
            workspace: WorkspaceConfig::default(),
            secrets: SecretsConfig::default(),
            telemetry: TelemetryConfig::default(),
            clock: ClockConfig::default(),
            runner: RunnerConfig::default(),
            console: ConsoleConfig::default(),
        }
    }
}

/// Default console socket: the user runtime dir, else the temp dir
pub fn default_socket_path() -> PathBuf {
    dirs::runtime_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(format!("{}.sock", env!("CARGO_PKG_NAME")))
}

/// Absolute locations derived from [`Config`], resolved once at start
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostPaths {
    pub workspace_root: PathBuf,
    pub manifest_candidates: Vec<PathBuf>,
    pub artifacts_dir: PathBuf,
    pub ledger_file: PathBuf,
    pub secrets_root: PathBuf,
    pub secrets_mapping: PathBuf,
    /// `None` when telemetry is disabled
    pub telemetry_file: Option<PathBuf>,
    pub socket_path: PathBuf,
}

impl HostPaths {
    /// Resolve against the process environment and current directory
    pub fn resolve(config: &Config) -> Result<Self> {
        let cwd = std::env::current_dir().context("Failed to determine current directory")?;
        Ok(Self::resolve_with(config, &cwd, |key| std::env::var(key).ok()))
    }

    /// Resolve with an explicit environment lookup
    pub fn resolve_with<F>(config: &Config, cwd: &Path, env: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let from_env = |key: &str| env(key).filter(|v| !v.trim().is_empty()).map(PathBuf::from);

        let workspace_root = config
            .workspace
            .root
            .clone()
            .or_else(|| from_env(WORKSPACE_ROOT_ENV))
            .map(|root| absolutize(cwd, &root))
            .unwrap_or_else(|| cwd.to_path_buf());

        let artifacts_dir = absolutize(&workspace_root, &config.workspace.artifacts_dir);
        let ledger_file = absolutize(&artifacts_dir, &config.workspace.ledger_file);

        let secrets_root = config
            .secrets
            .root
            .clone()
            .or_else(|| from_env(SECRETS_ROOT_ENV))
            .map(|root| absolutize(&workspace_root, &root))
            .unwrap_or_else(|| app_dir(dirs::config_dir(), &workspace_root).join("secrets"));
        let secrets_mapping = absolutize(&workspace_root, &config.secrets.mapping_file);

        let telemetry_file = config.telemetry.enabled.then(|| {
            let dir = config
                .telemetry
                .dir
                .clone()
                .or_else(|| from_env(TELEMETRY_ROOT_ENV))
                .map(|dir| absolutize(&workspace_root, &dir))
                .unwrap_or_else(|| app_dir(dirs::data_local_dir(), &workspace_root).join("telemetry"));
            dir.join(&config.telemetry.file_name)
        });

        let socket_path = config
            .console
            .socket_path
            .as_ref()
            .map(|p| absolutize(cwd, p))
            .unwrap_or_else(default_socket_path);

        Self {
            manifest_candidates: config.workspace.manifest_candidates.clone(),
            workspace_root,
            artifacts_dir,
            ledger_file,
            secrets_root,
            secrets_mapping,
            telemetry_file,
            socket_path,
        }
    }
}

fn absolutize(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

/// `<base>/caprun`, or `<workspace>/.caprun` when the platform has no such dir
fn app_dir(base: Option<PathBuf>, workspace_root: &Path) -> PathBuf {
    let name = env!("CARGO_PKG_NAME");
    match base {
        Some(base) => base.join(name),
        None => workspace_root.join(format!(".{}", name)),
    }
}

impl Config {
    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try primary location: ~/.config/<project>/<project>.yml
        if let Some(config_dir) = dirs::config_dir() {
            let project_name = env!("CARGO_PKG_NAME");
            let primary_config = config_dir.join(project_name).join(format!("{}.yml", project_name));
            if primary_config.exists() {
                match Self::load_from_file(&primary_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        log::warn!("Failed to load config from {}: {}", primary_config.display(), e);
                    }
                }
            }
        }

        // Try fallback location: ./<project>.yml
        let project_name = env!("CARGO_PKG_NAME");
        let fallback_config = PathBuf::from(format!("{}.yml", project_name));
        if fallback_config.exists() {
            match Self::load_from_file(&fallback_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    log::warn!("Failed to load config from {}: {}", fallback_config.display(), e);
                }
            }
        }

        // No config file found, use defaults
        log::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        log::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.log_level.as_deref(), Some("info"));
        assert_eq!(config.clock.timezone, "Africa/Johannesburg");
        assert_eq!(config.clock.utc_offset_minutes, 120);
        assert_eq!(config.runner.summary_max_chars, 160);
        assert_eq!(config.runner.cancel_grace(), Duration::from_secs(2));
        assert_eq!(config.console.max_clients, 16);
        assert_eq!(config.workspace.manifest_candidates.len(), 2);
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let config: Config = serde_yaml::from_str(
            "runner:\n  cancel_grace_ms: 0\ntelemetry:\n  enabled: false\n",
        )
        .unwrap();
        assert_eq!(config.runner.cancel_grace_ms, 0);
        assert_eq!(config.runner.summary_max_chars, 160);
        assert!(!config.telemetry.enabled);
        assert_eq!(config.telemetry.file_name, "agent-runner-log.jsonl");
    }

    #[test]
    fn test_load_explicit_path() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("caprun.yml");
        fs::write(&path, "log_level: debug\nclock:\n  utc_offset_minutes: 0\n").unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.log_level.as_deref(), Some("debug"));
        assert_eq!(config.clock.utc_offset_minutes, 0);
    }

    #[test]
    fn test_load_explicit_path_missing_is_error() {
        let missing = PathBuf::from("/nonexistent/caprun.yml");
        assert!(Config::load(Some(&missing)).is_err());
    }

    #[test]
    fn test_paths_default_to_cwd() {
        let cwd = PathBuf::from("/work/space");
        let paths = HostPaths::resolve_with(&Config::default(), &cwd, no_env);

        assert_eq!(paths.workspace_root, cwd);
        assert_eq!(
            paths.artifacts_dir,
            PathBuf::from("/work/space/.dev/automation/artifacts/automation")
        );
        assert_eq!(
            paths.ledger_file,
            PathBuf::from("/work/space/.dev/automation/artifacts/automation/agent-runs.json")
        );
        assert_eq!(
            paths.secrets_mapping,
            PathBuf::from("/work/space/secrets/capability-env.json")
        );
        assert!(paths.telemetry_file.unwrap().ends_with("agent-runner-log.jsonl"));
    }

    #[test]
    fn test_paths_honour_environment() {
        let env: HashMap<&str, &str> = HashMap::from([
            (WORKSPACE_ROOT_ENV, "/ws"),
            (SECRETS_ROOT_ENV, "/vault"),
            (TELEMETRY_ROOT_ENV, "/telemetry"),
        ]);
        let paths = HostPaths::resolve_with(&Config::default(), Path::new("/elsewhere"), |k| {
            env.get(k).map(|v| v.to_string())
        });

        assert_eq!(paths.workspace_root, PathBuf::from("/ws"));
        assert_eq!(paths.secrets_root, PathBuf::from("/vault"));
        assert_eq!(
            paths.telemetry_file,
            Some(PathBuf::from("/telemetry/agent-runner-log.jsonl"))
        );
    }

    #[test]
    fn test_config_beats_environment() {
        let mut config = Config::default();
        config.workspace.root = Some(PathBuf::from("/configured"));
        config.telemetry.enabled = false;
        config.console.socket_path = Some(PathBuf::from("run/caprun.sock"));

        let paths = HostPaths::resolve_with(&config, Path::new("/cwd"), |_| Some("/from-env".to_string()));
        assert_eq!(paths.workspace_root, PathBuf::from("/configured"));
        assert_eq!(paths.telemetry_file, None);
        assert_eq!(paths.socket_path, PathBuf::from("/cwd/run/caprun.sock"));
    }

    #[test]
    fn test_default_socket_path_name() {
        assert!(default_socket_path().ends_with("caprun.sock"));
    }
}
