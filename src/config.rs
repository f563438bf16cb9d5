/// Configuration management for the Vidshare backend
use crate::error::{AppError, AppResult};
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

/// Upper bound on either token lifetime (10 years)
const MAX_TOKEN_TTL_SECS: i64 = 10 * 365 * 86400;

/// Main server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub service: ServiceConfig,
    pub storage: StorageConfig,
    pub authentication: AuthConfig,
    pub upload: UploadConfig,
    pub logging: LoggingConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub hostname: String,
    pub port: u16,
    pub environment: String,
}

impl ServiceConfig {
    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub database_path: PathBuf,
}

/// Token signing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    pub access_token_secret: String,
    /// Access token lifetime in seconds
    pub access_token_ttl: i64,
    pub refresh_token_secret: String,
    /// Refresh token lifetime in seconds
    pub refresh_token_ttl: i64,
}

impl AuthConfig {
    pub fn access_ttl(&self) -> Duration {
        Duration::seconds(self.access_token_ttl)
    }

    pub fn refresh_ttl(&self) -> Duration {
        Duration::seconds(self.refresh_token_ttl)
    }
}

/// Image host and upload staging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    pub cloud_name: String,
    pub api_key: String,
    pub api_secret: String,
    pub folder: String,
    pub api_base: String,
    pub temp_dir: PathBuf,
    pub max_request_bytes: usize,
    /// Staged files older than this many seconds are swept
    pub stale_after: i64,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

impl ServerConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> AppResult<Self> {
        dotenv::dotenv().ok();

        let hostname = env::var("VIDSHARE_HOSTNAME").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env::var("VIDSHARE_PORT")
            .unwrap_or_else(|_| "8000".to_string())
            .parse()
            .map_err(|_| AppError::Validation("Invalid port number".to_string()))?;
        let environment =
            env::var("VIDSHARE_ENV").unwrap_or_else(|_| "development".to_string());

        let database_path = env::var("VIDSHARE_DATABASE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./data/vidshare.sqlite"));

        let access_token_secret = env::var("VIDSHARE_ACCESS_TOKEN_SECRET")
            .map_err(|_| AppError::Validation("Access token secret required".to_string()))?;
        let refresh_token_secret = env::var("VIDSHARE_REFRESH_TOKEN_SECRET")
            .map_err(|_| AppError::Validation("Refresh token secret required".to_string()))?;
        let access_token_ttl = duration_var("VIDSHARE_ACCESS_TOKEN_EXPIRY", "1h")?;
        let refresh_token_ttl = duration_var("VIDSHARE_REFRESH_TOKEN_EXPIRY", "7d")?;

        let cloud_name = env::var("VIDSHARE_CLOUDINARY_CLOUD_NAME")
            .map_err(|_| AppError::Validation("Cloudinary cloud name required".to_string()))?;
        let api_key = env::var("VIDSHARE_CLOUDINARY_API_KEY")
            .map_err(|_| AppError::Validation("Cloudinary API key required".to_string()))?;
        let api_secret = env::var("VIDSHARE_CLOUDINARY_API_SECRET")
            .map_err(|_| AppError::Validation("Cloudinary API secret required".to_string()))?;
        let folder =
            env::var("VIDSHARE_CLOUDINARY_FOLDER").unwrap_or_else(|_| "user-uploads".to_string());
        let api_base = env::var("VIDSHARE_CLOUDINARY_API_BASE")
            .unwrap_or_else(|_| "https://api.cloudinary.com".to_string());
        let temp_dir = env::var("VIDSHARE_UPLOAD_TEMP_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./public/temp"));
        let max_request_bytes = size_var("VIDSHARE_UPLOAD_MAX_BYTES", "10485760")?;
        let stale_after = duration_var("VIDSHARE_UPLOAD_STALE_AFTER", "1h")?;

        let level = env::var("VIDSHARE_LOG_LEVEL").unwrap_or_else(|_| "debug".to_string());
        let json = env::var("VIDSHARE_LOG_FORMAT")
            .map(|f| f.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        Ok(ServerConfig {
            service: ServiceConfig {
                hostname,
                port,
                environment,
            },
            storage: StorageConfig { database_path },
            authentication: AuthConfig {
                access_token_secret,
                access_token_ttl,
                refresh_token_secret,
                refresh_token_ttl,
            },
            upload: UploadConfig {
                cloud_name,
                api_key,
                api_secret,
                folder,
                api_base,
                temp_dir,
                max_request_bytes,
                stale_after,
            },
            logging: LoggingConfig { level, json },
        })
    }

    /// Validate configuration
    pub fn validate(&self) -> AppResult<()> {
        if self.service.hostname.is_empty() {
            return Err(AppError::Validation("Hostname cannot be empty".to_string()));
        }

        let auth = &self.authentication;
        if auth.access_token_secret.len() < 32 || auth.refresh_token_secret.len() < 32 {
            return Err(AppError::Validation(
                "Token secrets must be at least 32 characters".to_string(),
            ));
        }

        // An access token must never verify as a refresh token
        if auth.access_token_secret == auth.refresh_token_secret {
            return Err(AppError::Validation(
                "Access and refresh token secrets must differ".to_string(),
            ));
        }

        if auth.access_token_ttl <= 0 || auth.refresh_token_ttl <= 0 {
            return Err(AppError::Validation(
                "Token lifetimes must be positive".to_string(),
            ));
        }

        if auth.access_token_ttl > MAX_TOKEN_TTL_SECS
            || auth.refresh_token_ttl > MAX_TOKEN_TTL_SECS
        {
            return Err(AppError::Validation(
                "Token lifetimes must not exceed 10 years".to_string(),
            ));
        }

        if auth.refresh_token_ttl < auth.access_token_ttl {
            return Err(AppError::Validation(
                "Refresh token lifetime must not be shorter than access token lifetime"
                    .to_string(),
            ));
        }

        if self.upload.cloud_name.is_empty() || self.upload.api_secret.is_empty() {
            return Err(AppError::Validation(
                "Cloudinary credentials cannot be empty".to_string(),
            ));
        }

        Ok(())
    }
}

fn duration_var(name: &str, default: &str) -> AppResult<i64> {
    let raw = env::var(name).unwrap_or_else(|_| default.to_string());
    parse_duration_secs(&raw)
        .ok_or_else(|| AppError::Validation(format!("Invalid duration for {}: {}", name, raw)))
}

fn size_var(name: &str, default: &str) -> AppResult<usize> {
    let raw = env::var(name).unwrap_or_else(|_| default.to_string());
    parse_size(name, &raw)
}

fn parse_size(name: &str, raw: &str) -> AppResult<usize> {
    match raw.trim().parse::<usize>() {
        Ok(bytes) if bytes > 0 => Ok(bytes),
        _ => Err(AppError::Validation(format!("Invalid byte size for {}: {}", name, raw))),
    }
}

/// Parse "900", "15m", "1h" or "7d" into seconds
pub fn parse_duration_secs(raw: &str) -> Option<i64> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    let (digits, unit) = match raw.char_indices().last() {
        Some((idx, c)) if c.is_ascii_alphabetic() => (&raw[..idx], c.to_ascii_lowercase()),
        _ => (raw, 's'),
    };

    let value: i64 = digits.trim().parse().ok()?;
    let multiplier = match unit {
        's' => 1,
        'm' => 60,
        'h' => 3600,
        'd' => 86400,
        _ => return None,
    };

    value.checked_mul(multiplier)
}

#[cfg(test)]
pub(crate) fn test_config() -> ServerConfig {
    ServerConfig {
        service: ServiceConfig {
            hostname: "localhost".to_string(),
            port: 8000,
            environment: "test".to_string(),
        },
        storage: StorageConfig {
            database_path: PathBuf::from(":memory:"),
        },
        authentication: AuthConfig {
            access_token_secret: "test-access-secret-key-for-testing-only".to_string(),
            access_token_ttl: 900,
            refresh_token_secret: "test-refresh-secret-key-for-testing-only".to_string(),
            refresh_token_ttl: 7 * 86400,
        },
        upload: UploadConfig {
            cloud_name: "demo".to_string(),
            api_key: "1234".to_string(),
            api_secret: "shh".to_string(),
            folder: "user-uploads".to_string(),
            api_base: "http://localhost".to_string(),
            temp_dir: std::env::temp_dir(),
            max_request_bytes: 1024 * 1024,
            stale_after: 3600,
        },
        logging: LoggingConfig {
            level: "info".to_string(),
            json: false,
        },
    }
}
