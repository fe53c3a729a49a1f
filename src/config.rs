//! Configuration management
//!
//! Layered the way the teacher's `Config::from_env`/`Default` pair does
//! it: every field overridable via an environment variable, falling
//! back to a hardcoded default when unset. `dotenvy::dotenv()` is
//! loaded once at the top of `main`.

use std::env;

#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub database: DatabaseConfig,
    pub upload: UploadConfig,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub provider: StorageProvider,
    /// Base directory for the filesystem backend. Unused for `S3`.
    pub fs_base_path: String,
    pub endpoint: String,
    pub bucket: String,
    pub access_key: String,
    pub secret_key: String,
    pub region: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageProvider {
    /// Local filesystem — development fallback, selected by config,
    /// never by runtime probing.
    Fs,
    S3,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
}

/// Upload-domain tunables (chunk_size, max_file_size, expiry, ...).
#[derive(Debug, Clone)]
pub struct UploadConfig {
    pub chunk_size: usize,
    pub max_file_size: u64,
    pub session_expiry_hours: i64,
    pub allowed_types: Vec<String>,
    pub allowed_extensions: Vec<String>,
    pub temp_prefix: String,
    pub final_prefix: String,
    pub digest_algorithm: String,
    /// Webhook URL the AI Hook posts finalized uploads to. When unset,
    /// `submit` is a logging no-op.
    pub ai_hook_url: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8080,
            },
            storage: StorageConfig {
                provider: StorageProvider::Fs,
                fs_base_path: "./data/objects".to_string(),
                endpoint: "http://localhost:9000".to_string(),
                bucket: "uploads".to_string(),
                access_key: "admin".to_string(),
                secret_key: "password123".to_string(),
                region: Some("us-east-1".to_string()),
            },
            database: DatabaseConfig {
                url: "sqlite:./uploads.db".to_string(),
            },
            upload: UploadConfig::default(),
        }
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        UploadConfig {
            chunk_size: 1024 * 1024, // 1 MiB
            max_file_size: 10 * 1024 * 1024 * 1024, // 10 GiB
            session_expiry_hours: 24,
            allowed_types: vec![
                "application/json".to_string(),
                "application/jsonl".to_string(),
                "text/csv".to_string(),
                "application/octet-stream".to_string(),
                "application/zip".to_string(),
            ],
            allowed_extensions: vec![
                "json".to_string(),
                "jsonl".to_string(),
                "csv".to_string(),
                "bin".to_string(),
                "zip".to_string(),
            ],
            temp_prefix: "temp-chunks".to_string(),
            final_prefix: "final".to_string(),
            digest_algorithm: "sha256".to_string(),
            ai_hook_url: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let defaults = Config::default();

        let server = ServerConfig {
            host: env::var("SERVER_HOST").unwrap_or(defaults.server.host),
            port: env::var("SERVER_PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.server.port),
        };

        let provider = match env::var("STORAGE_PROVIDER")
            .unwrap_or_else(|_| "fs".to_string())
            .as_str()
        {
            "s3" => StorageProvider::S3,
            _ => StorageProvider::Fs,
        };

        let storage = StorageConfig {
            provider,
            fs_base_path: env::var("FS_BASE_PATH").unwrap_or(defaults.storage.fs_base_path),
            endpoint: env::var("S3_ENDPOINT").unwrap_or(defaults.storage.endpoint),
            bucket: env::var("S3_BUCKET").unwrap_or(defaults.storage.bucket),
            access_key: env::var("S3_ACCESS_KEY").unwrap_or(defaults.storage.access_key),
            secret_key: env::var("S3_SECRET_KEY").unwrap_or(defaults.storage.secret_key),
            region: env::var("S3_REGION").ok().or(defaults.storage.region),
        };

        let database = DatabaseConfig {
            url: env::var("DATABASE_URL").unwrap_or(defaults.database.url),
        };

        let upload = UploadConfig {
            chunk_size: env::var("CHUNK_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.upload.chunk_size),
            max_file_size: env::var("MAX_FILE_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.upload.max_file_size),
            session_expiry_hours: env::var("SESSION_EXPIRY_HOURS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.upload.session_expiry_hours),
            allowed_types: env::var("ALLOWED_TYPES")
                .ok()
                .map(|v| v.split(',').map(|s| s.trim().to_string()).collect())
                .unwrap_or(defaults.upload.allowed_types),
            allowed_extensions: env::var("ALLOWED_EXTENSIONS")
                .ok()
                .map(|v| v.split(',').map(|s| s.trim().to_lowercase()).collect())
                .unwrap_or(defaults.upload.allowed_extensions),
            temp_prefix: defaults.upload.temp_prefix,
            final_prefix: defaults.upload.final_prefix,
            digest_algorithm: defaults.upload.digest_algorithm,
            ai_hook_url: env::var("AI_HOOK_URL").ok(),
        };

        Config {
            server,
            storage,
            database,
            upload,
        }
    }
}
