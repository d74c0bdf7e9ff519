use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Cache location configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Override for the cache root. Defaults to the platform data directory.
    pub cache_dir: Option<PathBuf>,
}

/// Download engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadConfig {
    /// Copy buffer size in bytes.
    pub buffer_size: usize,
    /// Maximum concurrent Hugging Face directory listings.
    pub max_directory_fetches: usize,
    /// Per-request timeout in seconds (large models take a while).
    pub request_timeout_secs: u64,
    /// User-Agent sent with every request (GitHub rejects requests without one).
    pub user_agent: String,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            buffer_size: 81_920,
            max_directory_fetches: 4,
            request_timeout_secs: 3600,
            user_agent: format!("ModelCache/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// Network access configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// When true, all network requests are blocked.
    pub local_only: bool,
    /// Allowed domains; subdomains of an entry are allowed too.
    pub allowed_domains: Vec<String>,
    /// Base URL for Hugging Face downloads and the tree API.
    pub huggingface_base: String,
    /// Base URL for the GitHub contents API.
    pub github_api_base: String,
    /// Base URL for GitHub raw content.
    pub github_raw_base: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            local_only: false,
            allowed_domains: Self::default_allowed_domains(),
            huggingface_base: "https://huggingface.co".to_string(),
            github_api_base: "https://api.github.com".to_string(),
            github_raw_base: "https://raw.githubusercontent.com".to_string(),
        }
    }
}

impl NetworkConfig {
    /// Default allowed domains for model enumeration and downloads.
    pub fn default_allowed_domains() -> Vec<String> {
        vec![
            "huggingface.co".to_string(),
            "hf.co".to_string(),
            "github.com".to_string(),
            "githubusercontent.com".to_string(),
        ]
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    pub level: String,
    /// Enable file logging with rotation.
    pub file_logging: bool,
    /// Maximum number of log files to keep.
    pub max_files: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file_logging: true,
            max_files: 7,
        }
    }
}

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub cache: CacheConfig,
    pub download: DownloadConfig,
    pub network: NetworkConfig,
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Create a new AppConfig with default values.
    pub fn new() -> Self {
        Self::default()
    }
}
