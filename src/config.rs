use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::info;

use crate::remote::rest::RestBackend;
use crate::remote::sqlite::SqliteBackend;
use crate::remote::{RemoteBackend, RemoteError};
use crate::AppError;

pub const ENV_DATA_DIR: &str = "CANTORAL_DATA_DIR";
pub const ENV_BACKEND: &str = "CANTORAL_BACKEND";
pub const ENV_REMOTE_URL: &str = "CANTORAL_REMOTE_URL";
pub const ENV_REMOTE_KEY: &str = "CANTORAL_REMOTE_KEY";
pub const ENV_REMOTE_TIMEOUT: &str = "CANTORAL_REMOTE_TIMEOUT_SECS";
pub const ENV_SQLITE_PATH: &str = "CANTORAL_SQLITE_PATH";
pub const ENV_STORE_PATH: &str = "CANTORAL_STORE_PATH";

const APP_DIR: &str = "cantoral";
const DEFAULT_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum BackendKind {
    Rest,
    Sqlite,
}

impl FromStr for BackendKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "rest" | "supabase" => Ok(BackendKind::Rest),
            "sqlite" => Ok(BackendKind::Sqlite),
            other => Err(ConfigError::InvalidBackend(other.to_string())),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unknown backend `{0}` (expected `rest` or `sqlite`)")]
    InvalidBackend(String),
    #[error("CANTORAL_REMOTE_TIMEOUT_SECS must be a positive number of seconds, got `{0}`")]
    InvalidTimeout(String),
    #[error("the rest backend needs {0}")]
    Missing(&'static str),
    #[error("failed to resolve the application data directory")]
    NoDataDir,
    #[error(transparent)]
    Remote(#[from] RemoteError),
}

impl From<ConfigError> for AppError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Remote(inner) => inner.into(),
            other => AppError::from_chain("CONFIG/INVALID", &other),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    pub backend: BackendKind,
    pub remote_url: Option<String>,
    pub remote_key: Option<String>,
    pub timeout: Duration,
    pub sqlite_path: PathBuf,
    pub store_path: PathBuf,
}

impl SyncConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from any variable source. Empty values count
    /// as unset. Without an explicit backend, a configured remote URL selects
    /// `rest` and everything else falls back to the local SQLite file.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let data_dir = match get(ENV_DATA_DIR) {
            Some(dir) => PathBuf::from(dir),
            None => default_data_dir()?,
        };
        let remote_url = get(ENV_REMOTE_URL);
        let backend = match get(ENV_BACKEND) {
            Some(raw) => raw.parse()?,
            None if remote_url.is_some() => BackendKind::Rest,
            None => BackendKind::Sqlite,
        };
        let timeout = match get(ENV_REMOTE_TIMEOUT) {
            Some(raw) => match raw.trim().parse::<u64>() {
                Ok(secs) if secs > 0 => Duration::from_secs(secs),
                _ => return Err(ConfigError::InvalidTimeout(raw)),
            },
            None => Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        };

        Ok(Self {
            backend,
            remote_url,
            remote_key: get(ENV_REMOTE_KEY),
            timeout,
            sqlite_path: get(ENV_SQLITE_PATH)
                .map(PathBuf::from)
                .unwrap_or_else(|| data_dir.join("remote.sqlite3")),
            store_path: get(ENV_STORE_PATH)
                .map(PathBuf::from)
                .unwrap_or_else(|| data_dir.join("store.json")),
        })
    }

    pub async fn connect_backend(&self) -> Result<Arc<dyn RemoteBackend>, ConfigError> {
        let backend: Arc<dyn RemoteBackend> = match self.backend {
            BackendKind::Rest => {
                let url = self
                    .remote_url
                    .as_deref()
                    .ok_or(ConfigError::Missing(ENV_REMOTE_URL))?;
                let key = self
                    .remote_key
                    .as_deref()
                    .ok_or(ConfigError::Missing(ENV_REMOTE_KEY))?;
                Arc::new(RestBackend::new(url, key, self.timeout)?)
            }
            BackendKind::Sqlite => Arc::new(SqliteBackend::open(&self.sqlite_path).await?),
        };
        info!(
            target: "cantoral",
            event = "remote_backend_ready",
            backend = backend.name()
        );
        Ok(backend)
    }
}

fn default_data_dir() -> Result<PathBuf, ConfigError> {
    dirs::data_dir()
        .or_else(|| std::env::current_dir().ok())
        .map(|base| base.join(APP_DIR))
        .ok_or(ConfigError::NoDataDir)
}
