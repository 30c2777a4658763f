//! Runtime configuration: `agentboard.toml`, then `AGENTBOARD_*` environment overrides.

use crate::core::error::BoardError;
use crate::core::schemas;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const CONFIG_FILE_NAME: &str = "agentboard.toml";
pub const MIN_SECRET_LEN: usize = 32;

const DEV_SECRET: &str = "agentboard-dev-secret-not-for-production-use";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BoardConfig {
    pub data_dir: PathBuf,
    pub db_file: String,
    pub jwt_secret: String,
    pub access_ttl_secs: u64,
    pub refresh_ttl_secs: u64,
    pub default_daily_limit: i64,
    pub busy_timeout_secs: u32,
    pub throttle_window_secs: u64,
    pub throttle_max_requests: u32,
    pub log_level: String,
    pub log_json: bool,
}

impl Default for BoardConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(".agentboard"),
            db_file: schemas::BOARD_DB_NAME.to_string(),
            jwt_secret: String::new(),
            access_ttl_secs: 60 * 60,
            refresh_ttl_secs: 7 * 24 * 60 * 60,
            default_daily_limit: 50,
            busy_timeout_secs: 5,
            throttle_window_secs: 60,
            throttle_max_requests: 120,
            log_level: "info".to_string(),
            log_json: false,
        }
    }
}

impl BoardConfig {
    /// Load from an explicit file, or `<data_dir>/agentboard.toml` when present,
    /// then apply environment overrides and validate.
    pub fn load(explicit: Option<&Path>) -> Result<Self, BoardError> {
        let config = Self::load_unvalidated(explicit)?;
        config.validate()?;
        Ok(config)
    }

    /// File and environment layers without validation; `init` starts from this.
    pub fn load_unvalidated(explicit: Option<&Path>) -> Result<Self, BoardError> {
        let mut config = match explicit {
            Some(path) => Self::from_file(path)?,
            None => {
                let data_dir = std::env::var("AGENTBOARD_DATA_DIR")
                    .map(PathBuf::from)
                    .unwrap_or_else(|_| BoardConfig::default().data_dir);
                let candidate = data_dir.join(CONFIG_FILE_NAME);
                if candidate.exists() {
                    Self::from_file(&candidate)?
                } else {
                    BoardConfig::default()
                }
            }
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, BoardError> {
        let content = fs::read_to_string(path).map_err(BoardError::IoError)?;
        toml::from_str(&content).map_err(|e| {
            BoardError::ConfigError(format!("{}: {}", path.display(), e))
        })
    }

    /// Overlay `AGENTBOARD_*` variables resolved through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), BoardError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("AGENTBOARD_DATA_DIR") {
            self.data_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("AGENTBOARD_DB_FILE") {
            self.db_file = v;
        }
        if let Some(v) = lookup("AGENTBOARD_JWT_SECRET") {
            self.jwt_secret = v;
        }
        if let Some(v) = lookup("AGENTBOARD_ACCESS_TTL_SECS") {
            self.access_ttl_secs = parse_env("AGENTBOARD_ACCESS_TTL_SECS", &v)?;
        }
        if let Some(v) = lookup("AGENTBOARD_REFRESH_TTL_SECS") {
            self.refresh_ttl_secs = parse_env("AGENTBOARD_REFRESH_TTL_SECS", &v)?;
        }
        if let Some(v) = lookup("AGENTBOARD_DEFAULT_DAILY_LIMIT") {
            self.default_daily_limit = parse_env("AGENTBOARD_DEFAULT_DAILY_LIMIT", &v)?;
        }
        if let Some(v) = lookup("AGENTBOARD_BUSY_TIMEOUT_SECS") {
            self.busy_timeout_secs = parse_env("AGENTBOARD_BUSY_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = lookup("AGENTBOARD_THROTTLE_WINDOW_SECS") {
            self.throttle_window_secs = parse_env("AGENTBOARD_THROTTLE_WINDOW_SECS", &v)?;
        }
        if let Some(v) = lookup("AGENTBOARD_THROTTLE_MAX_REQUESTS") {
            self.throttle_max_requests = parse_env("AGENTBOARD_THROTTLE_MAX_REQUESTS", &v)?;
        }
        if let Some(v) = lookup("AGENTBOARD_LOG_LEVEL") {
            self.log_level = v;
        }
        if let Some(v) = lookup("AGENTBOARD_LOG_JSON") {
            self.log_json = matches!(v.as_str(), "1" | "true" | "yes");
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), BoardError> {
        if self.jwt_secret.len() < MIN_SECRET_LEN {
            return Err(BoardError::ConfigError(format!(
                "jwt_secret must be at least {} characters (set AGENTBOARD_JWT_SECRET)",
                MIN_SECRET_LEN
            )));
        }
        if self.access_ttl_secs == 0 || self.refresh_ttl_secs == 0 {
            return Err(BoardError::ConfigError(
                "token TTLs must be greater than zero".to_string(),
            ));
        }
        if self.refresh_ttl_secs <= self.access_ttl_secs {
            return Err(BoardError::ConfigError(
                "refresh_ttl_secs must exceed access_ttl_secs".to_string(),
            ));
        }
        if self.default_daily_limit < 0 {
            return Err(BoardError::ConfigError(
                "default_daily_limit must not be negative".to_string(),
            ));
        }
        if self.throttle_window_secs == 0 {
            return Err(BoardError::ConfigError(
                "throttle_window_secs must be greater than zero".to_string(),
            ));
        }
        if self.db_file.trim().is_empty() {
            return Err(BoardError::ConfigError("db_file is empty".to_string()));
        }
        Ok(())
    }

    pub fn write_file(&self, path: &Path) -> Result<(), BoardError> {
        let rendered = toml::to_string_pretty(self)
            .map_err(|e| BoardError::ConfigError(format!("cannot render config: {}", e)))?;
        fs::write(path, rendered)?;
        Ok(())
    }

    pub fn config_path(&self) -> PathBuf {
        self.data_dir.join(CONFIG_FILE_NAME)
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join(&self.db_file)
    }

    /// A valid configuration rooted at `dir`, for tests and local experiments.
    pub fn for_tests(dir: &Path) -> Self {
        Self {
            data_dir: dir.to_path_buf(),
            jwt_secret: DEV_SECRET.to_string(),
            ..BoardConfig::default()
        }
    }
}

/// 32 random bytes, hex encoded.
pub fn generate_secret() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

fn parse_env<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T, BoardError> {
    raw.trim()
        .parse::<T>()
        .map_err(|_| BoardError::ConfigError(format!("{} has invalid value '{}'", key, raw)))
}
