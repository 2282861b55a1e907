use anyhow::Result;
use extension_registry_core::config::{RegistryConfig, ScheduleConfig, TrimPolicy};
use extension_registry_core::github::{GitHubConfig, DEFAULT_API_BASE_URL};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{error, info, warn};

pub const GITHUB_TOKEN_ENV: &str = "GITHUB_API_TOKEN";
pub const DOC_STORE_AUTH_KEY_ENV: &str = "DOC_STORE_AUTH_KEY";

/// Conservative share of GitHub's 5000 authenticated requests per hour.
pub const DEFAULT_HOURLY_RATE_LIMIT: u64 = 2000;

#[derive(Deserialize)]
struct StaticConfig {
    stage: String,
    #[serde(default)]
    document_store: DocumentStoreSection,
    snapshot_store: SnapshotStoreSection,
    #[serde(default)]
    github: GitHubSection,
    #[serde(default)]
    registry: RegistrySection,
    #[serde(default)]
    schedule: ScheduleConfig,
}

#[derive(Deserialize, Default)]
struct DocumentStoreSection {
    /// Absent: a process-local store, for development only.
    endpoint: Option<String>,
}

#[derive(Deserialize)]
struct SnapshotStoreSection {
    root_dir: PathBuf,
}

#[derive(Deserialize, Default)]
struct GitHubSection {
    api_base_url: Option<String>,
    hourly_rate_limit: Option<u64>,
    ops_repo: Option<String>,
}

#[derive(Deserialize, Default)]
struct RegistrySection {
    bucket: Option<String>,
    download_dir: Option<PathBuf>,
    extension_size_limit_mb: Option<u64>,
    processing_timeout_secs: Option<u64>,
    trim: Option<TrimPolicy>,
}

/// Where extension documents live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentStoreConfig {
    Http { endpoint: String, auth_key: String },
    InMemory,
}

/// Fully merged configuration: static YAML plus secrets from the environment.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub registry: RegistryConfig,
    pub document_store: DocumentStoreConfig,
    pub snapshot_root: PathBuf,
    pub github: GitHubConfig,
    pub schedule: ScheduleConfig,
}

fn required_env(key: &str) -> Result<String> {
    match std::env::var(key) {
        Ok(value) if !value.trim().is_empty() => {
            info!(key, "Secret found in env");
            Ok(value)
        }
        Ok(_) => {
            error!(key, "Environment variable is empty");
            Err(anyhow::anyhow!("{key} environment variable is empty"))
        }
        Err(e) => {
            error!(error = ?e, key, "Environment variable not set");
            Err(anyhow::anyhow!("{key} environment variable not set: {e}"))
        }
    }
}

/// Loads a static YAML config file (no secrets) and injects the secrets from the environment.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<AppConfig> {
    let path_ref = path.as_ref();
    info!(config_path = ?path_ref, "Loading configuration from file");

    let config_content = match fs::read_to_string(path_ref) {
        Ok(content) => content,
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "Failed to read config file");
            return Err(anyhow::anyhow!("Failed to read config file {:?}: {}", path_ref, e));
        }
    };

    let static_conf: StaticConfig = match serde_yaml::from_str(&config_content) {
        Ok(conf) => {
            info!(config_path = ?path_ref, "Parsed config YAML successfully");
            conf
        }
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "Failed to parse config YAML");
            return Err(anyhow::anyhow!("Failed to parse config YAML: {e}"));
        }
    };

    if static_conf.stage.trim().is_empty() {
        anyhow::bail!("stage must not be empty");
    }

    let token = required_env(GITHUB_TOKEN_ENV)?;
    let document_store = match static_conf.document_store.endpoint {
        Some(endpoint) => DocumentStoreConfig::Http {
            endpoint,
            auth_key: required_env(DOC_STORE_AUTH_KEY_ENV)?,
        },
        None => {
            warn!("No document_store.endpoint configured, using a process-local store");
            DocumentStoreConfig::InMemory
        }
    };

    let mut registry = RegistryConfig::for_stage(&static_conf.stage);
    let overrides = static_conf.registry;
    if let Some(bucket) = overrides.bucket {
        registry.bucket = bucket;
    }
    if let Some(dir) = overrides.download_dir {
        registry.download_dir = dir;
    }
    if let Some(mb) = overrides.extension_size_limit_mb {
        registry.extension_size_limit_bytes = mb * 1024 * 1024;
    }
    if let Some(secs) = overrides.processing_timeout_secs {
        registry.processing_timeout = Duration::from_secs(secs);
    }
    if let Some(trim) = overrides.trim {
        registry.trim = trim;
    }
    registry.trace_loaded();

    let github = GitHubConfig {
        api_base_url: static_conf
            .github
            .api_base_url
            .unwrap_or_else(|| DEFAULT_API_BASE_URL.to_string()),
        token,
        hourly_rate_limit: static_conf
            .github
            .hourly_rate_limit
            .unwrap_or(DEFAULT_HOURLY_RATE_LIMIT),
        ops_repo: static_conf.github.ops_repo,
    };

    info!(
        stage = %registry.stage,
        snapshot_root = %static_conf.snapshot_store.root_dir.display(),
        in_memory_store = matches!(document_store, DocumentStoreConfig::InMemory),
        "Config loaded and merged successfully"
    );

    Ok(AppConfig {
        registry,
        document_store,
        snapshot_root: static_conf.snapshot_store.root_dir,
        github,
        schedule: static_conf.schedule,
    })
}
