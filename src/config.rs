//! Configuration management for Ephemera Server

use std::env;
use std::path::PathBuf;
use std::str::FromStr;

const MIB: u64 = 1024 * 1024;

#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub database: DatabaseConfig,
    pub upload: UploadConfig,
    pub retention: RetentionConfig,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Public prefix used when building `file_url` values
    pub base_url: String,
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Finalized artifacts live here; the sweeper owns this tree
    pub root: PathBuf,
    /// Per-session chunk directories; must not live under `root`
    pub chunk_dir: PathBuf,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
}

#[derive(Debug, Clone)]
pub struct UploadConfig {
    pub max_upload_size: u64,
    pub default_chunk_size: u64,
    pub max_chunk_size: u64,
    pub session_ttl_hours: i64,
    pub id_length: usize,
    pub token_length: usize,
    pub id_max_attempts: u32,
}

#[derive(Debug, Clone)]
pub struct RetentionConfig {
    pub enabled: bool,
    pub min_age_days: f64,
    pub max_age_days: f64,
    pub max_size_mib: f64,
    pub sweep_interval_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 3000,
                base_url: "http://localhost:3000".to_string(),
            },
            storage: StorageConfig {
                root: PathBuf::from("./data/files"),
                chunk_dir: PathBuf::from("./data/chunks"),
            },
            database: DatabaseConfig {
                url: "sqlite:./data/ephemera.db".to_string(),
            },
            upload: UploadConfig::default(),
            retention: RetentionConfig::default(),
        }
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_upload_size: 1024 * MIB,
            default_chunk_size: 2 * MIB,
            max_chunk_size: 64 * MIB,
            session_ttl_hours: 24,
            id_length: 10,
            token_length: 32,
            id_max_attempts: 8,
        }
    }
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_age_days: 1.0,
            max_age_days: 30.0,
            max_size_mib: 250.0,
            sweep_interval_secs: 3600,
        }
    }
}

impl Config {
    /// Load configuration from the environment, keeping defaults for
    /// anything unset or unparsable.
    pub fn from_env() -> Self {
        let defaults = Config::default();
        let upload = defaults.upload;
        let retention = defaults.retention;

        Config {
            server: ServerConfig {
                host: env::var("SERVER_HOST").unwrap_or(defaults.server.host),
                port: parse_var("SERVER_PORT", defaults.server.port),
                base_url: env::var("BASE_URL")
                    .map(|url| url.trim_end_matches('/').to_string())
                    .unwrap_or(defaults.server.base_url),
            },
            storage: StorageConfig {
                root: env::var("STORAGE_ROOT")
                    .map(PathBuf::from)
                    .unwrap_or(defaults.storage.root),
                chunk_dir: env::var("CHUNK_DIR")
                    .map(PathBuf::from)
                    .unwrap_or(defaults.storage.chunk_dir),
            },
            database: DatabaseConfig {
                url: env::var("DATABASE_URL").unwrap_or(defaults.database.url),
            },
            upload: UploadConfig {
                max_upload_size: parse_var("MAX_UPLOAD_SIZE", upload.max_upload_size),
                default_chunk_size: parse_var("DEFAULT_CHUNK_SIZE", upload.default_chunk_size),
                max_chunk_size: parse_var("MAX_CHUNK_SIZE", upload.max_chunk_size),
                session_ttl_hours: parse_var("SESSION_TTL_HOURS", upload.session_ttl_hours),
                id_length: parse_var("ID_LENGTH", upload.id_length),
                token_length: parse_var("TOKEN_LENGTH", upload.token_length),
                id_max_attempts: parse_var("ID_MAX_ATTEMPTS", upload.id_max_attempts),
            },
            retention: RetentionConfig {
                enabled: parse_var("RETENTION_ENABLED", retention.enabled),
                min_age_days: parse_var("RETENTION_MIN_AGE_DAYS", retention.min_age_days),
                max_age_days: parse_var("RETENTION_MAX_AGE_DAYS", retention.max_age_days),
                max_size_mib: parse_var("RETENTION_MAX_SIZE_MIB", retention.max_size_mib),
                sweep_interval_secs: parse_var("SWEEP_INTERVAL_SECS", retention.sweep_interval_secs),
            },
        }
    }

    /// Largest request body any route accepts
    pub fn request_body_limit(&self) -> usize {
        let largest = self.upload.max_upload_size.max(self.upload.max_chunk_size);
        usize::try_from(largest.saturating_add(MIB)).unwrap_or(usize::MAX)
    }
}

fn parse_var<T: FromStr>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => match raw.trim().parse() {
            Ok(value) => value,
            Err(_) => {
                tracing::warn!(key = key, value = %raw, "Ignoring unparsable config value");
                default
            }
        },
        Err(_) => default,
    }
}
