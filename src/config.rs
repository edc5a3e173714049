use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::retry::RetryPolicy;

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub remote: RemoteConfig,
    pub fetch: FetchConfig,
    pub scan: ScanConfig,
    pub github: GithubConfig,
    pub retry: RetryConfig,
    pub workspace: WorkspaceConfig,
    pub store: StoreConfig,
}

/// The page-render endpoint that serves images by code.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RemoteConfig {
    pub render_url: String,
    pub invalid_marker: String,
    pub timeout_secs: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            render_url: "https://fgo.vn/tai-anh-ve/".to_string(),
            invalid_marker: "Mã hình ảnh không đúng!".to_string(),
            timeout_secs: 10,
        }
    }
}

impl RemoteConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct FetchConfig {
    pub concurrency: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self { concurrency: 5 }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ScanConfig {
    pub concurrency: usize,
    pub batch_size: u64,
    pub delay_ms: u64,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            concurrency: 5,
            batch_size: 100,
            delay_ms: 100,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct GithubConfig {
    pub api_url: String,
    pub raw_url: String,
    pub concurrency: usize,
    pub retry_concurrency: usize,
    pub probe_timeout_secs: u64,
    pub user_agent: String,
    /// Name of the environment variable holding an optional API token.
    pub token_env: String,
}

impl Default for GithubConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.github.com".to_string(),
            raw_url: "https://raw.githubusercontent.com".to_string(),
            concurrency: 3,
            retry_concurrency: 2,
            probe_timeout_secs: 5,
            user_agent: format!("image-harvest/{}", env!("CARGO_PKG_VERSION")),
            token_env: "GITHUB_TOKEN".to_string(),
        }
    }
}

impl GithubConfig {
    pub fn token_from_env(&self) -> Option<String> {
        std::env::var(&self.token_env)
            .ok()
            .filter(|t| !t.trim().is_empty())
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub min_delay_secs: u64,
    pub max_delay_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            min_delay_secs: 300,
            max_delay_secs: 600,
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_attempts,
            Duration::from_secs(self.min_delay_secs),
            Duration::from_secs(self.max_delay_secs),
        )
    }
}

/// Local layout: the git checkout, intake folders, and flat logs.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct WorkspaceConfig {
    pub root: PathBuf,
    pub remote: String,
    pub logs_dir: PathBuf,
    pub ledger: PathBuf,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            remote: "origin".to_string(),
            logs_dir: PathBuf::from("logs"),
            ledger: PathBuf::from("moved_files.txt"),
        }
    }
}

impl WorkspaceConfig {
    /// Relative paths resolve against `root`.
    pub fn logs_path(&self) -> PathBuf {
        self.root.join(&self.logs_dir)
    }

    pub fn ledger_path(&self) -> PathBuf {
        self.root.join(&self.ledger)
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StoreConfig {
    /// Environment variable holding the store connection string.
    pub url_env: String,
    pub batch_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url_env: "MONGODB_URL".to_string(),
            batch_size: 1000,
        }
    }
}

impl StoreConfig {
    /// Read the connection string. The value never comes from the file.
    pub fn url_from_env(&self) -> Result<String> {
        match std::env::var(&self.url_env) {
            Ok(url) if !url.trim().is_empty() => Ok(url),
            _ => bail!("{} environment variable not set", self.url_env),
        }
    }
}

/// Load configuration from `path`.
///
/// When `required` is false and the file does not exist, built-in defaults
/// are used.
pub fn load_config(path: &Path, required: bool) -> Result<Config> {
    if !required && !path.exists() {
        let config = Config::default();
        validate(&config)?;
        return Ok(config);
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.fetch.concurrency == 0 {
        bail!("fetch.concurrency must be > 0");
    }
    if config.scan.concurrency == 0 {
        bail!("scan.concurrency must be > 0");
    }
    if config.scan.batch_size == 0 {
        bail!("scan.batch_size must be > 0");
    }
    if config.github.concurrency == 0 || config.github.retry_concurrency == 0 {
        bail!("github.concurrency and github.retry_concurrency must be > 0");
    }
    if config.retry.max_attempts == 0 {
        bail!("retry.max_attempts must be >= 1");
    }
    if config.retry.min_delay_secs > config.retry.max_delay_secs {
        bail!(
            "retry.min_delay_secs ({}) must not exceed retry.max_delay_secs ({})",
            config.retry.min_delay_secs,
            config.retry.max_delay_secs
        );
    }
    if config.store.batch_size == 0 {
        bail!("store.batch_size must be > 0");
    }
    if config.remote.invalid_marker.is_empty() {
        bail!("remote.invalid_marker must not be empty");
    }
    Ok(())
}
