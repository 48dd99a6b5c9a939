//! Settings data structures

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Local control surface
    pub server: ServerSettings,

    /// Remote station client options
    pub station: StationSettings,

    /// Polling intervals
    pub refresh: RefreshSettings,

    /// Default tracing filter when `RUST_LOG` is unset
    pub log_level: String,

    /// Cache database location, defaults to the config directory
    pub cache_path: Option<PathBuf>,

    /// Session and credential file, defaults to the config directory
    pub secrets_path: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerSettings::default(),
            station: StationSettings::default(),
            refresh: RefreshSettings::default(),
            log_level: "info".to_string(),
            cache_path: None,
            secrets_path: None,
        }
    }
}

impl Settings {
    pub fn cache_path(&self) -> PathBuf {
        self.cache_path
            .clone()
            .unwrap_or_else(|| crate::config::config_dir().join("cache.db"))
    }

    pub fn secrets_path(&self) -> PathBuf {
        self.secrets_path
            .clone()
            .unwrap_or_else(|| crate::config::config_dir().join("secrets.json"))
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8788,
        }
    }
}

/// Options for requests sent to the download station
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StationSettings {
    /// Per-request timeout, the only deadline a sync cycle has
    pub request_timeout_secs: u64,

    pub user_agent: String,
}

impl Default for StationSettings {
    fn default() -> Self {
        Self {
            request_timeout_secs: 30,
            user_agent: format!("StationSync/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl StationSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Poll intervals in seconds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RefreshSettings {
    /// Task poll interval while any task is still moving
    pub tasks_active: f64,

    /// Task poll interval once every task is paused, finished, seeding or failed
    pub tasks_inactive: f64,

    pub statistics_active: f64,
    pub statistics_inactive: f64,

    /// VPN profiles ignore task activity
    pub vpn: f64,

    /// Interval between search result polls while a search runs
    pub search: f64,
}

impl Default for RefreshSettings {
    fn default() -> Self {
        Self {
            tasks_active: 2.0,
            tasks_inactive: 300.0,
            statistics_active: 2.0,
            statistics_inactive: 300.0,
            vpn: 240.0,
            search: 2.0,
        }
    }
}

impl RefreshSettings {
    pub fn tasks(&self, active: bool) -> Duration {
        secs(if active { self.tasks_active } else { self.tasks_inactive })
    }

    pub fn statistics(&self, active: bool) -> Duration {
        secs(if active {
            self.statistics_active
        } else {
            self.statistics_inactive
        })
    }

    pub fn vpn(&self) -> Duration {
        secs(self.vpn)
    }

    pub fn search(&self) -> Duration {
        secs(self.search)
    }
}

fn secs(value: f64) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or(Duration::ZERO)
}
