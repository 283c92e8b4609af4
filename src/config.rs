use anyhow::Result;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::resilience::CircuitBreakerConfig;

/// Main configuration structure for tackle
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct TackleConfig {
    /// GitHub configuration
    pub github: GitHubConfig,
    /// AI review service
    pub ai: AiConfig,
    /// Task workspaces (git worktrees)
    pub workspace: WorkspaceConfig,
    /// Review pipeline step budgets
    pub review: ReviewConfig,
    /// Circuit breaker tuning
    pub resilience: ResilienceConfig,
    /// Issue synchronization
    pub sync: SyncConfig,
    /// Local task storage
    pub storage: StorageConfig,
    /// Observability settings
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct GitHubConfig {
    /// GitHub API token (can be set via env var)
    pub token: Option<String>,
    /// Repository owner
    pub owner: String,
    /// Repository name
    pub repo: String,
    /// Per-call timeout
    pub timeout_secs: u64,
    /// Rate limiting settings
    pub rate_limit: RateLimitConfig,
}

impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            token: None,
            owner: String::new(),
            repo: String::new(),
            timeout_secs: 15,
            rate_limit: RateLimitConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Requests per hour limit
    pub requests_per_hour: u32,
    /// Burst capacity
    pub burst_capacity: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_hour: 5000,
            burst_capacity: 100,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct AiConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    pub max_tokens: u32,
    /// Diffs longer than this are truncated before review
    pub max_diff_chars: usize,
    pub timeout_secs: u64,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://api.anthropic.com".to_string(),
            model: "claude-sonnet-4-20250514".to_string(),
            max_tokens: 4096,
            max_diff_chars: 100_000,
            timeout_secs: 120,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct WorkspaceConfig {
    /// Repository the worktrees are created from
    pub repo_root: PathBuf,
    /// Directory (relative to the repository) holding task worktrees
    pub root_dir: String,
    /// Workspace registry file (relative to the repository)
    pub registry_file: String,
    pub retention_days: u32,
    pub command_timeout_secs: u64,
    pub worktree_timeout_secs: u64,
    pub default_branch_cache_secs: u64,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            repo_root: PathBuf::from("."),
            root_dir: ".tasks".to_string(),
            registry_file: ".tackle/workspaces.json".to_string(),
            retention_days: 7,
            command_timeout_secs: 30,
            worktree_timeout_secs: 120,
            default_branch_cache_secs: 3600,
        }
    }
}

impl WorkspaceConfig {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn worktree_timeout(&self) -> Duration {
        Duration::from_secs(self.worktree_timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ReviewConfig {
    pub commit_timeout_secs: u64,
    pub push_timeout_secs: u64,
    pub diff_timeout_secs: u64,
    /// Branch diffs are computed against
    pub target_branch: String,
}

impl Default for ReviewConfig {
    fn default() -> Self {
        Self {
            commit_timeout_secs: 30,
            push_timeout_secs: 60,
            diff_timeout_secs: 30,
            target_branch: "main".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct BreakerSettings {
    pub failure_threshold: u32,
    pub reset_timeout_secs: u64,
}

impl BreakerSettings {
    pub fn to_breaker_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: self.failure_threshold.max(1),
            reset_timeout: Duration::from_secs(self.reset_timeout_secs),
        }
    }
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ResilienceConfig {
    pub ai: BreakerSettings,
    pub github: BreakerSettings,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            ai: BreakerSettings {
                failure_threshold: 3,
                reset_timeout_secs: 120,
            },
            github: BreakerSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct SyncConfig {
    /// Label carried by every synchronized issue
    pub marker_label: String,
    pub interval_secs: u64,
    /// Floor applied to `interval_secs`
    pub min_interval_secs: u64,
    /// Focus regained triggers a pass only after this much idle time
    pub focus_threshold_secs: u64,
    pub max_backoff_secs: u64,
    /// Auto-sync pauses after this many consecutive failures
    pub max_consecutive_failures: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            marker_label: "tackle:sync".to_string(),
            interval_secs: 300,
            min_interval_secs: 60,
            focus_threshold_secs: 120,
            max_backoff_secs: 1800,
            max_consecutive_failures: 5,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct StorageConfig {
    pub tasks_file: PathBuf,
    pub executions_file: PathBuf,
    /// Unresolved sync conflicts
    pub conflicts_file: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            tasks_file: PathBuf::from(".tackle/tasks.json"),
            executions_file: PathBuf::from(".tackle/executions.json"),
            conflicts_file: PathBuf::from(".tackle/conflicts.json"),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level
    pub log_level: String,
    /// Emit JSON log lines
    pub json: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json: false,
        }
    }
}

impl TackleConfig {
    /// Load configuration from multiple sources with precedence:
    /// 1. Default values
    /// 2. Configuration files (tackle.toml, .tackle-rc)
    /// 3. Environment variables (prefixed with TACKLE_, nested with __)
    pub fn load() -> Result<Self> {
        Self::load_from(Path::new("."))
    }

    pub fn load_from(dir: &Path) -> Result<Self> {
        let mut builder = Config::builder().add_source(Config::try_from(&TackleConfig::default())?);

        let toml_path = dir.join("tackle.toml");
        if toml_path.exists() {
            builder = builder.add_source(File::from(toml_path));
        }

        let rc_path = dir.join(".tackle-rc");
        if rc_path.exists() {
            builder = builder.add_source(File::from(rc_path).format(config::FileFormat::Toml));
        }

        builder = builder.add_source(
            Environment::with_prefix("TACKLE")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let mut tackle_config: TackleConfig = builder.build()?.try_deserialize()?;

        // Special handling for credentials - check well-known variables
        if tackle_config.github.token.is_none() {
            if let Ok(token) = std::env::var("GITHUB_TOKEN") {
                tackle_config.github.token = Some(token);
            }
        }
        if tackle_config.ai.api_key.is_none() {
            if let Ok(key) = std::env::var("ANTHROPIC_API_KEY") {
                tackle_config.ai.api_key = Some(key);
            }
        }

        Ok(tackle_config)
    }

    /// Save configuration to file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let toml_content = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_content)?;
        Ok(())
    }

    /// Load .env file if it exists
    pub fn load_env_file() -> Result<()> {
        if Path::new(".env").exists() {
            dotenvy::dotenv()?;
            tracing::info!("Loaded environment variables from .env file");
        }
        Ok(())
    }
}

/// Global configuration instance
static CONFIG: std::sync::LazyLock<Result<TackleConfig, anyhow::Error>> =
    std::sync::LazyLock::new(|| {
        // Load .env file first
        let _ = TackleConfig::load_env_file();
        TackleConfig::load()
    });

/// Get the global configuration
pub fn config() -> Result<&'static TackleConfig> {
    CONFIG
        .as_ref()
        .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_without_files() {
        let dir = tempfile::tempdir().unwrap();
        let config = TackleConfig::load_from(dir.path()).unwrap();
        assert_eq!(config.sync.marker_label, "tackle:sync");
        assert_eq!(config.workspace.root_dir, ".tasks");
        assert_eq!(config.resilience.ai.failure_threshold, 3);
    }

    #[test]
    fn test_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("tackle.toml"),
            "[github]\nowner = \"acme\"\nrepo = \"widgets\"\n\n[sync]\ninterval_secs = 90\n",
        )
        .unwrap();

        let config = TackleConfig::load_from(dir.path()).unwrap();
        assert_eq!(config.github.owner, "acme");
        assert_eq!(config.github.repo, "widgets");
        assert_eq!(config.sync.interval_secs, 90);
        assert_eq!(config.sync.min_interval_secs, 60);
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = TackleConfig::default();
        config.workspace.retention_days = 14;
        config.save_to_file(dir.path().join("tackle.toml")).unwrap();

        let loaded = TackleConfig::load_from(dir.path()).unwrap();
        assert_eq!(loaded.workspace.retention_days, 14);
    }

    #[test]
    fn test_breaker_settings_conversion() {
        let settings = BreakerSettings {
            failure_threshold: 0,
            reset_timeout_secs: 30,
        };
        let breaker = settings.to_breaker_config();
        assert_eq!(breaker.failure_threshold, 1);
        assert_eq!(breaker.reset_timeout, Duration::from_secs(30));
    }
}
