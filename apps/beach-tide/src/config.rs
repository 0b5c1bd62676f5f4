use std::env;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::collapse::DEFAULT_PROGRESS_MARKER;
use crate::supervisor::DEFAULT_RECONNECT_DELAY;

pub const DEFAULT_SERVER: &str = "http://127.0.0.1:9080";
pub const STREAM_PATH: &str = "/ws/logs";
pub const SNAPSHOT_PATH: &str = "/stream/logs";
pub const CLEAR_PATH: &str = "/gallery-dl/logs/clear";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid server url '{value}': {source}")]
    InvalidServer {
        value: String,
        source: url::ParseError,
    },
    #[error("unsupported server scheme '{0}'; expected http, https, ws or wss")]
    UnsupportedScheme(String),
    #[error("progress marker must not be empty")]
    EmptyMarker,
}

/// beach-tide configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the gallery-dl server.
    pub server: String,
    pub reconnect_delay: Duration,
    pub progress_marker: String,
    /// Session key for resume state; the launching shell's pid when unset.
    pub session: Option<String>,
    pub state_dir: Option<PathBuf>,
}

/// Resolved endpoint URLs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub stream: Url,
    pub snapshot: Url,
    pub clear: Url,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let reconnect_delay = env::var("BEACH_TIDE_RECONNECT_MS")
            .ok()
            .and_then(|val| val.parse().ok())
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_RECONNECT_DELAY);
        Self {
            server: env::var("BEACH_TIDE_SERVER").unwrap_or_else(|_| DEFAULT_SERVER.to_string()),
            reconnect_delay,
            progress_marker: env::var("BEACH_TIDE_PROGRESS_MARKER")
                .unwrap_or_else(|_| DEFAULT_PROGRESS_MARKER.to_string()),
            session: env::var("BEACH_TIDE_SESSION").ok(),
            state_dir: env::var_os("BEACH_TIDE_STATE_DIR").map(PathBuf::from),
        }
    }

    pub fn endpoints(&self) -> Result<Endpoints, ConfigError> {
        let mut raw = self.server.trim().to_string();
        if !raw.contains("://") {
            raw = format!("http://{raw}");
        }
        // Normalize localhost to IPv4 to avoid IPv6 (::1) preference on macOS
        let raw = raw.replacen("://localhost", "://127.0.0.1", 1);
        let base = Url::parse(&raw).map_err(|source| ConfigError::InvalidServer {
            value: self.server.clone(),
            source,
        })?;

        let (http_scheme, ws_scheme) = match base.scheme() {
            "http" | "ws" => ("http", "ws"),
            "https" | "wss" => ("https", "wss"),
            other => return Err(ConfigError::UnsupportedScheme(other.to_string())),
        };

        let join = |scheme: &str, path: &str| -> Result<Url, ConfigError> {
            let mut url = base.clone();
            url.set_scheme(scheme)
                .map_err(|_| ConfigError::UnsupportedScheme(scheme.to_string()))?;
            let prefix = base.path().trim_end_matches('/');
            url.set_path(&format!("{prefix}{path}"));
            url.set_query(None);
            url.set_fragment(None);
            Ok(url)
        };

        Ok(Endpoints {
            stream: join(ws_scheme, STREAM_PATH)?,
            snapshot: join(http_scheme, SNAPSHOT_PATH)?,
            clear: join(http_scheme, CLEAR_PATH)?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.progress_marker.is_empty() {
            return Err(ConfigError::EmptyMarker);
        }
        self.endpoints().map(|_| ())
    }

    pub fn session_key(&self) -> String {
        self.session.clone().unwrap_or_else(default_session_key)
    }

    pub fn state_dir(&self) -> PathBuf {
        self.state_dir
            .clone()
            .unwrap_or_else(|| env::temp_dir().join("beach-tide"))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: DEFAULT_SERVER.to_string(),
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            progress_marker: DEFAULT_PROGRESS_MARKER.to_string(),
            session: None,
            state_dir: None,
        }
    }
}

#[cfg(unix)]
fn default_session_key() -> String {
    format!("ppid-{}", std::os::unix::process::parent_id())
}

#[cfg(not(unix))]
fn default_session_key() -> String {
    "default".to_string()
}
