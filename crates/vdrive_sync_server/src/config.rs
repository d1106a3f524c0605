use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Server configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Server host (default: 0.0.0.0)
    pub host: String,
    /// Server port (default: 3040)
    pub port: u16,
    /// Database file path (default: ./vdrive.db)
    pub database_path: PathBuf,
    /// CORS allowed origins (comma-separated)
    pub cors_origins: Vec<String>,
    /// Trailing debounce window for channel scene updates in ms (default: 1500)
    pub scene_debounce_ms: u64,
    /// Seconds between server heartbeat pings on the channel (default: 30)
    pub heartbeat_interval_secs: u64,
    /// Maximum operations accepted in one batch (default: 500)
    pub max_batch_operations: usize,
    /// Seconds between expired-session sweeps (default: 3600)
    pub session_cleanup_interval_secs: u64,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let host = env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = env::var("PORT")
            .unwrap_or_else(|_| "3040".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidPort)?;

        let database_path =
            PathBuf::from(env::var("DATABASE_PATH").unwrap_or_else(|_| "./vdrive.db".to_string()));

        let cors_origins = env::var("CORS_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:5173".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        Ok(Config {
            host,
            port,
            database_path,
            cors_origins,
            scene_debounce_ms: env_or("SCENE_DEBOUNCE_MS", 1500),
            heartbeat_interval_secs: env_or("HEARTBEAT_INTERVAL_SECS", 30).max(1),
            max_batch_operations: env_or("MAX_BATCH_OPERATIONS", 500),
            session_cleanup_interval_secs: env_or("SESSION_CLEANUP_INTERVAL_SECS", 3600).max(1),
        })
    }

    /// Get the server address
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn scene_debounce(&self) -> Duration {
        Duration::from_millis(self.scene_debounce_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn session_cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.session_cleanup_interval_secs)
    }
}

/// Parse a numeric variable, falling back to `default` when unset or invalid.
fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid PORT environment variable")]
    InvalidPort,
}
