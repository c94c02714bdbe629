use std::env;
use std::path::PathBuf;

use zeroize::Zeroizing;

use crate::error::KeeperError;

const DEFAULT_SERVER_BASE_ADDR: &str = "http://localhost:8080";
const DEFAULT_API_TIMEOUT_SECS: u64 = 30;
const DEFAULT_RUN_ADDRESS: &str = "0.0.0.0:8080";

/// Client-side settings, read from the environment (`.env.client` is loaded
/// by the binary before parsing).
pub struct ClientConfig {
    pub server_base_addr: String,
    pub api_timeout_secs: u64,
    pub data_secret_key: Zeroizing<Vec<u8>>,
    pub data_dir: PathBuf,
}

impl ClientConfig {
    pub fn from_env() -> Result<Self, KeeperError> {
        let server_base_addr =
            env::var("SERVER_BASE_ADDR").unwrap_or_else(|_| DEFAULT_SERVER_BASE_ADDR.to_string());

        let api_timeout_secs = match env::var("API_SERVER_TIMEOUT") {
            Ok(raw) => raw
                .parse()
                .map_err(|_| KeeperError::Config(format!("API_SERVER_TIMEOUT is not a number: {raw}")))?,
            Err(_) => DEFAULT_API_TIMEOUT_SECS,
        };

        let data_secret_key = env::var("DATA_SECRET_KEY")
            .map(|key| Zeroizing::new(key.into_bytes()))
            .map_err(|_| KeeperError::Config("DATA_SECRET_KEY is not set".to_string()))?;

        let data_dir = match env::var("KEEPER_DATA_DIR") {
            Ok(dir) => PathBuf::from(dir),
            Err(_) => default_data_dir()?,
        };

        Ok(Self {
            server_base_addr,
            api_timeout_secs,
            data_secret_key,
            data_dir,
        })
    }
}

/// Server-side settings.
pub struct ServerConfig {
    pub run_address: String,
    pub jwt_secret: String,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, KeeperError> {
        let run_address =
            env::var("RUN_ADDRESS").unwrap_or_else(|_| DEFAULT_RUN_ADDRESS.to_string());

        let jwt_secret = env::var("JWT_SECRET")
            .map_err(|_| KeeperError::Config("JWT_SECRET is not set".to_string()))?;

        Ok(Self {
            run_address,
            jwt_secret,
        })
    }
}

/// `$XDG_CACHE_HOME/goph-keeper`, falling back to `~/.cache/goph-keeper`.
fn default_data_dir() -> Result<PathBuf, KeeperError> {
    if let Ok(cache) = env::var("XDG_CACHE_HOME") {
        if !cache.is_empty() {
            return Ok(PathBuf::from(cache).join("goph-keeper"));
        }
    }

    env::var("HOME")
        .map(|home| PathBuf::from(home).join(".cache").join("goph-keeper"))
        .map_err(|_| KeeperError::Config("cannot resolve a cache directory".to_string()))
}

// ── Tests ─────────────────────────────────────────────────────────
