//! todod configuration types and loading

use eyre::{Context, Result, eyre};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main todod configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Root directories bounding every file operation
    pub roots: Vec<PathBuf>,

    /// Shared bearer secret for the dispatch server
    pub token: String,

    /// Listen host
    #[serde(default = "default_host")]
    pub host: String,

    /// Listen port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Directory receiving timestamped backups and diff files
    #[serde(rename = "backup-root", default = "default_backup_root")]
    pub backup_root: PathBuf,

    /// Directory basenames excluded from listing and include resolution
    #[serde(rename = "exclude-dirs", default = "default_exclude_dirs")]
    pub exclude_dirs: Vec<String>,

    /// Per-task LLM timeout in seconds
    #[serde(rename = "task-timeout-s", default = "default_task_timeout")]
    pub task_timeout_s: u64,

    /// Maximum attempts for one task run
    #[serde(rename = "retry-attempts", default = "default_retry_attempts")]
    pub retry_attempts: u32,

    /// Delay between attempts in seconds
    #[serde(rename = "retry-delay-s", default = "default_retry_delay")]
    pub retry_delay_s: u64,

    /// Smart merge tuning
    #[serde(rename = "smart-merge", default)]
    pub smart_merge: SmartMergeConfig,

    /// Token budget for the include-resolver knowledge blob
    #[serde(rename = "token-budget", default = "default_token_budget")]
    pub token_budget: usize,

    /// Watcher poll interval in seconds
    #[serde(rename = "poll-interval-s", default = "default_poll_interval")]
    pub poll_interval_s: u64,

    /// Size cap for file reads in bytes
    #[serde(rename = "max-file-bytes", default = "default_max_file_bytes")]
    pub max_file_bytes: u64,

    /// Require the bearer token on the line protocol too
    #[serde(rename = "require-line-auth", default)]
    pub require_line_auth: bool,

    /// LLM provider configuration
    #[serde(default)]
    pub llm: LlmConfig,
}

impl Config {
    /// Load configuration with fallback chain
    ///
    /// Explicit path, then project-local `.todod.yml`, then
    /// `~/.config/todod/todod.yml`. Unlike purely-defaultable settings,
    /// `roots` and `token` must come from a file.
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        let local_config = PathBuf::from(".todod.yml");
        if local_config.exists() {
            return Self::load_from_file(&local_config)
                .context(format!("Failed to load config from {}", local_config.display()));
        }

        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("todod").join("todod.yml");
            if user_config.exists() {
                return Self::load_from_file(&user_config)
                    .context(format!("Failed to load config from {}", user_config.display()));
            }
        }

        Err(eyre!(
            "No config file found; todod needs at least `roots` and `token` (tried .todod.yml and ~/.config/todod/todod.yml)"
        ))
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;
        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;
        config.validate()?;
        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }

    /// Reject configurations that cannot possibly serve
    pub fn validate(&self) -> Result<()> {
        if self.roots.is_empty() {
            return Err(eyre!("config: `roots` must list at least one directory"));
        }
        if self.token.is_empty() {
            return Err(eyre!("config: `token` must be a non-empty shared secret"));
        }
        Ok(())
    }

    /// Listen address for the dispatch server
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_s)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_s)
    }

    pub fn task_timeout(&self) -> Duration {
        Duration::from_secs(self.task_timeout_s)
    }
}

/// Smart merge tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SmartMergeConfig {
    /// Minimum similarity for an anchored hunk match
    pub threshold: f64,

    /// Blank-line padding that separates hunks
    #[serde(rename = "context-lines")]
    pub context_lines: usize,
}

impl Default for SmartMergeConfig {
    fn default() -> Self {
        Self {
            threshold: 0.75,
            context_lines: 5,
        }
    }
}

/// LLM provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Provider name (currently only "anthropic" supported)
    pub provider: String,

    /// Model identifier
    pub model: String,

    /// Environment variable containing the API key
    #[serde(rename = "api-key-env")]
    pub api_key_env: String,

    /// API base URL
    #[serde(rename = "base-url")]
    pub base_url: String,

    /// Maximum tokens per response
    #[serde(rename = "max-tokens")]
    pub max_tokens: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "anthropic".to_string(),
            model: "claude-sonnet-4-20250514".to_string(),
            api_key_env: "ANTHROPIC_API_KEY".to_string(),
            base_url: "https://api.anthropic.com".to_string(),
            max_tokens: 16384,
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    2500
}

fn default_backup_root() -> PathBuf {
    PathBuf::from(".todod/backups")
}

fn default_exclude_dirs() -> Vec<String> {
    knowstore::DEFAULT_EXCLUDES.iter().map(|s| s.to_string()).collect()
}

fn default_task_timeout() -> u64 {
    120
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_delay() -> u64 {
    2
}

fn default_token_budget() -> usize {
    200_000
}

fn default_poll_interval() -> u64 {
    1
}

fn default_max_file_bytes() -> u64 {
    knowstore::DEFAULT_MAX_FILE_BYTES
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_yaml() -> &'static str {
        "roots:\n  - /tmp\ntoken: secret\n"
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config: Config = serde_yaml::from_str(minimal_yaml()).unwrap();

        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 2500);
        assert_eq!(config.task_timeout_s, 120);
        assert_eq!(config.retry_attempts, 3);
        assert_eq!(config.retry_delay_s, 2);
        assert_eq!(config.token_budget, 200_000);
        assert_eq!(config.poll_interval_s, 1);
        assert!((config.smart_merge.threshold - 0.75).abs() < f64::EPSILON);
        assert_eq!(config.smart_merge.context_lines, 5);
        assert!(config.exclude_dirs.contains(&"node_modules".to_string()));
        assert_eq!(config.llm.provider, "anthropic");
    }

    #[test]
    fn test_full_config_overrides() {
        let yaml = r#"
roots:
  - /work/src
  - /work/docs
token: hunter2
host: 0.0.0.0
port: 9999
backup-root: /work/.backups
task-timeout-s: 30
retry-attempts: 1
smart-merge:
  threshold: 0.9
  context-lines: 3
token-budget: 5000
llm:
  model: claude-opus-4
  api-key-env: MY_KEY
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(config.roots.len(), 2);
        assert_eq!(config.port, 9999);
        assert_eq!(config.backup_root, PathBuf::from("/work/.backups"));
        assert_eq!(config.retry_attempts, 1);
        assert!((config.smart_merge.threshold - 0.9).abs() < f64::EPSILON);
        assert_eq!(config.smart_merge.context_lines, 3);
        assert_eq!(config.llm.model, "claude-opus-4");
        assert_eq!(config.llm.api_key_env, "MY_KEY");
        // Unspecified values still default
        assert_eq!(config.llm.provider, "anthropic");
        assert_eq!(config.retry_delay_s, 2);
    }

    #[test]
    fn test_validate_rejects_empty_roots() {
        let config: Config = serde_yaml::from_str("roots: []\ntoken: t\n").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_empty_token() {
        let config: Config = serde_yaml::from_str("roots:\n  - /tmp\ntoken: \"\"\n").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_listen_addr() {
        let config: Config = serde_yaml::from_str(minimal_yaml()).unwrap();
        assert_eq!(config.listen_addr(), "127.0.0.1:2500");
    }
}
