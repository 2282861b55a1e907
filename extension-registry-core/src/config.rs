use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info};

pub const REGISTRY_FILE: &str = "registry.json";
pub const REGISTRY_VERSION_FILE: &str = "registry_version.json";
pub const POPULARITY_FILE: &str = "popularity.json";
pub const ARCHIVE_FOLDER: &str = "archive";
pub const EXTENSION_ASSET_NAME: &str = "extension.zip";

/// Index field of the extension table.
pub const EXTENSION_ID_FIELD: &str = "extensionId";
/// Index field of the release table.
pub const RELEASE_REF_FIELD: &str = "releaseRef";
/// Column type the store uses for both index fields.
pub const INDEX_FIELD_TYPE: &str = "VARCHAR(128)";

/// Everything the core needs to know about where things live and which limits apply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    pub stage: String,
    pub database: String,
    pub extensions_table: String,
    pub releases_table: String,
    pub bucket: String,
    pub download_dir: PathBuf,
    pub extension_size_limit_bytes: u64,
    #[serde(with = "duration_secs")]
    pub processing_timeout: Duration,
    pub trim: TrimPolicy,
}

impl RegistryConfig {
    /// Defaults for a deployment stage: table and bucket names are derived from the stage.
    pub fn for_stage(stage: &str) -> Self {
        let database = format!("phcode_extensions_{stage}");
        let bucket = if stage == "prod" {
            "phcode-extensions".to_string()
        } else {
            format!("phcode-extensions-{stage}")
        };
        RegistryConfig {
            stage: stage.to_string(),
            database: database.clone(),
            extensions_table: format!("{database}.extensionDetails"),
            releases_table: format!("{database}.releaseDetails"),
            bucket,
            download_dir: std::env::temp_dir().join("extension-registry-downloads"),
            extension_size_limit_bytes: 50 * 1024 * 1024,
            processing_timeout: Duration::from_secs(60),
            trim: TrimPolicy::default(),
        }
    }

    pub fn trace_loaded(&self) {
        info!(
            stage = %self.stage,
            extensions_table = %self.extensions_table,
            releases_table = %self.releases_table,
            bucket = %self.bucket,
            "Loaded RegistryConfig"
        );
        debug!(?self, "RegistryConfig loaded (full debug)");
    }
}

/// Length limits applied to documents before they enter the public snapshot.
///
/// Lengths count characters, not bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrimPolicy {
    pub title: usize,
    pub description: usize,
    /// `author` and `contributors`, including nested name/email/url fields.
    pub person: usize,
    /// Entries of `keywords` and `categories`, and locale keys of the i18n block.
    pub tag: usize,
    pub other: usize,
    /// Serialized size above which the `package-i18n` block is dropped.
    pub i18n_bytes: usize,
}

impl Default for TrimPolicy {
    fn default() -> Self {
        TrimPolicy {
            title: 64,
            description: 256,
            person: 128,
            tag: 48,
            other: 1024,
            i18n_bytes: 8 * 1024,
        }
    }
}

/// Intervals of the timer-driven jobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    #[serde(with = "duration_secs")]
    pub sync_interval: Duration,
    #[serde(with = "duration_secs")]
    pub popularity_interval: Duration,
    #[serde(with = "duration_secs")]
    pub stars_interval: Duration,
    #[serde(with = "duration_secs")]
    pub backup_interval: Duration,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        ScheduleConfig {
            sync_interval: Duration::from_secs(60),
            popularity_interval: Duration::from_secs(15 * 60),
            stars_interval: Duration::from_secs(60 * 60),
            backup_interval: Duration::from_secs(24 * 60 * 60),
        }
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}
