//! Configuration for the reelgate upload gateway.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Address to listen on
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,

    /// Object store backend configuration
    #[serde(default)]
    pub storage: StorageConfig,

    /// SQLite database holding sessions, drafts, metrics, and the job queue
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,

    /// Upper bound on the declared file size at session-create
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: u64,

    /// MIME type allow-list (matched case-insensitively)
    #[serde(default = "default_allowed_mime_types")]
    pub allowed_mime_types: Vec<String>,

    /// Session TTL; the reaper aborts sessions past `created_at + TTL`
    #[serde(default = "default_session_ttl_hours")]
    pub session_ttl_hours: u64,

    /// The reaper also aborts sessions with no chunk PUT for this long
    #[serde(default = "default_stale_chunk_threshold_minutes")]
    pub stale_chunk_threshold_minutes: u64,

    /// Per-principal session-create budget
    #[serde(default = "default_rate_create_per_hour")]
    pub rate_create_per_hour: u32,

    /// Per-principal chunk PUT budget
    #[serde(default = "default_rate_chunk_per_minute")]
    pub rate_chunk_per_minute: u32,

    /// Deadline for one streamed UploadPart call
    #[serde(default = "default_chunk_deadline_seconds")]
    pub chunk_deadline_seconds: u64,

    /// Smallest chunk size handed to clients. Production keeps the 8 MiB
    /// default; tests shrink it to drive multi-chunk flows with small files.
    #[serde(default = "default_min_chunk_bytes")]
    pub min_chunk_bytes: u64,

    /// Chunk sizes are chosen so uploads stay within this many parts
    #[serde(default = "default_target_part_ceiling")]
    pub target_part_ceiling: u64,

    /// Seconds between reaper sweeps
    #[serde(default = "default_reaper_interval_seconds")]
    pub reaper_interval_seconds: u64,

    /// Default tracing filter when RUST_LOG is unset
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Object store backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    /// In-memory backend for development and tests; contents are lost on
    /// restart
    Memory,

    /// S3-compatible backend for production use
    S3 {
        /// Endpoint URL (for MinIO, LocalStack, or custom S3-compatible
        /// services); AWS default when unset
        #[serde(default)]
        endpoint: Option<String>,

        /// Bucket receiving the uploads
        bucket: String,

        /// AWS region
        #[serde(default = "default_region")]
        region: String,

        /// Use path-style URLs (required for MinIO, LocalStack)
        #[serde(default = "default_force_path_style")]
        force_path_style: bool,

        /// Access key ID (optional, can use env/instance credentials)
        #[serde(default)]
        access_key_id: Option<String>,

        /// Secret access key (optional, can use env/instance credentials)
        #[serde(default)]
        secret_access_key: Option<String>,
    },
}

// Default value functions for serde
fn default_listen_addr() -> SocketAddr {
    "127.0.0.1:8080".parse().unwrap()
}

fn default_database_path() -> PathBuf {
    PathBuf::from("./reelgate.db")
}

fn default_max_upload_bytes() -> u64 {
    128 * 1024 * 1024 * 1024 // 128 GiB
}

fn default_allowed_mime_types() -> Vec<String> {
    [
        "video/mp4",
        "video/quicktime",
        "video/webm",
        "video/x-matroska",
        "audio/mpeg",
        "audio/mp4",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_session_ttl_hours() -> u64 {
    24
}

fn default_stale_chunk_threshold_minutes() -> u64 {
    60
}

fn default_rate_create_per_hour() -> u32 {
    10
}

fn default_rate_chunk_per_minute() -> u32 {
    100
}

fn default_chunk_deadline_seconds() -> u64 {
    300
}

fn default_min_chunk_bytes() -> u64 {
    8 * 1024 * 1024
}

fn default_target_part_ceiling() -> u64 {
    9000
}

fn default_reaper_interval_seconds() -> u64 {
    300
}

fn default_log_level() -> String {
    "reelgate=debug,tower_http=debug".to_string()
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_force_path_style() -> bool {
    true
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig::Memory
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            storage: StorageConfig::default(),
            database_path: default_database_path(),
            max_upload_bytes: default_max_upload_bytes(),
            allowed_mime_types: default_allowed_mime_types(),
            session_ttl_hours: default_session_ttl_hours(),
            stale_chunk_threshold_minutes: default_stale_chunk_threshold_minutes(),
            rate_create_per_hour: default_rate_create_per_hour(),
            rate_chunk_per_minute: default_rate_chunk_per_minute(),
            chunk_deadline_seconds: default_chunk_deadline_seconds(),
            min_chunk_bytes: default_min_chunk_bytes(),
            target_part_ceiling: default_target_part_ceiling(),
            reaper_interval_seconds: default_reaper_interval_seconds(),
            log_level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io(e.to_string()))?;
        let config: Config =
            toml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        Ok(config)
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("REELGATE_LISTEN_ADDR") {
            if let Ok(parsed) = addr.parse() {
                config.listen_addr = parsed;
            }
        }

        if let Ok(bucket) = std::env::var("REELGATE_S3_BUCKET") {
            config.storage = StorageConfig::S3 {
                endpoint: std::env::var("REELGATE_S3_ENDPOINT").ok(),
                bucket,
                region: std::env::var("REELGATE_S3_REGION")
                    .unwrap_or_else(|_| default_region()),
                force_path_style: std::env::var("REELGATE_S3_FORCE_PATH_STYLE")
                    .map(|v| v == "true" || v == "1")
                    .unwrap_or(true),
                access_key_id: std::env::var("AWS_ACCESS_KEY_ID").ok(),
                secret_access_key: std::env::var("AWS_SECRET_ACCESS_KEY").ok(),
            };
        }

        if let Ok(path) = std::env::var("REELGATE_DATABASE_PATH") {
            config.database_path = PathBuf::from(path);
        }

        macro_rules! env_parse {
            ($field:ident, $var:literal) => {
                if let Ok(raw) = std::env::var($var) {
                    if let Ok(parsed) = raw.parse() {
                        config.$field = parsed;
                    }
                }
            };
        }
        env_parse!(max_upload_bytes, "REELGATE_MAX_UPLOAD_BYTES");
        env_parse!(session_ttl_hours, "REELGATE_SESSION_TTL_HOURS");
        env_parse!(
            stale_chunk_threshold_minutes,
            "REELGATE_STALE_CHUNK_THRESHOLD_MINUTES"
        );
        env_parse!(rate_create_per_hour, "REELGATE_RATE_CREATE_PER_HOUR");
        env_parse!(rate_chunk_per_minute, "REELGATE_RATE_CHUNK_PER_MINUTE");
        env_parse!(chunk_deadline_seconds, "REELGATE_CHUNK_DEADLINE_SECONDS");
        env_parse!(min_chunk_bytes, "REELGATE_MIN_CHUNK_BYTES");
        env_parse!(target_part_ceiling, "REELGATE_TARGET_PART_CEILING");
        env_parse!(reaper_interval_seconds, "REELGATE_REAPER_INTERVAL_SECONDS");

        if let Ok(types) = std::env::var("REELGATE_ALLOWED_MIME_TYPES") {
            config.allowed_mime_types = types
                .split(',')
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
                .collect();
        }

        if let Ok(level) = std::env::var("REELGATE_LOG_LEVEL") {
            config.log_level = level;
        }

        config
    }

    /// Load configuration from file if it exists, otherwise from environment
    pub fn load() -> Self {
        if let Ok(path) = std::env::var("REELGATE_CONFIG") {
            if let Ok(config) = Self::from_file(&path) {
                return config;
            }
        }

        for path in &["reelgate.toml", "/etc/reelgate/config.toml"] {
            if std::path::Path::new(path).exists() {
                if let Ok(config) = Self::from_file(path) {
                    return config;
                }
            }
        }

        Self::from_env()
    }

    /// Serialize for the init wizard summary.
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Write the config to a TOML file.
    pub fn persist_to_file(&self, path: &str) -> Result<(), ConfigError> {
        let toml_str = self.to_toml_string()?;
        std::fs::write(path, toml_str).map_err(|e| ConfigError::Io(e.to_string()))
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("Parse error: {0}")]
    Parse(String),
}
