//! Portal configuration

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use portal_http::{AuthEndpoints, ClientOptions};
use portal_navigation::RouteMap;
use portal_session::TokenLifetimes;

use crate::error::CoreError;
use crate::Result;

/// Environment variable overriding [`Config::api_base_url`]
const API_BASE_URL_ENV: &str = "PORTAL_API_BASE_URL";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Path to the database file holding tokens and the session snapshot
    pub database_path: PathBuf,
    /// Backend API root
    pub api_base_url: String,
    /// Login entry point teardown redirects to
    pub login_path: String,
    /// Route prefixes that require a session
    pub protected_prefixes: Vec<String>,
    /// Consecutive transport failures tolerated on a protected route
    pub connectivity_threshold: u32,
    pub request_timeout_secs: u64,
    pub access_token_ttl_secs: i64,
    pub refresh_token_ttl_secs: i64,
    pub endpoints: AuthEndpoints,
}

impl Config {
    pub fn new(data_dir: PathBuf) -> Self {
        Self {
            database_path: data_dir.join("portal.db"),
            api_base_url: "http://localhost:3000/api/".to_string(),
            login_path: "/login".to_string(),
            protected_prefixes: vec!["/dashboard".to_string()],
            connectivity_threshold: 2,
            request_timeout_secs: 30,
            access_token_ttl_secs: 24 * 60 * 60,
            refresh_token_ttl_secs: 7 * 24 * 60 * 60,
            endpoints: AuthEndpoints::default(),
        }
    }

    pub fn data_dir() -> PathBuf {
        platform_data_root()
            .map(|root| root.join("portal-admin"))
            .unwrap_or_else(|| PathBuf::from(".portal"))
    }

    /// Read a JSON config file; missing fields fall back to defaults
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults, with the API base URL taken from the environment when set
    pub fn from_env_or_default() -> Self {
        let mut config = Self::default();
        if let Ok(url) = std::env::var(API_BASE_URL_ENV) {
            if !url.trim().is_empty() {
                config.api_base_url = url;
            }
        }
        config
    }

    pub fn validate(&self) -> Result<()> {
        url::Url::parse(&self.api_base_url)
            .map_err(|e| CoreError::Config(format!("api_base_url {}: {e}", self.api_base_url)))?;

        if self.connectivity_threshold == 0 {
            return Err(CoreError::Config(
                "connectivity_threshold must be at least 1".to_string(),
            ));
        }
        if self.request_timeout_secs == 0 {
            return Err(CoreError::Config(
                "request_timeout_secs must be at least 1".to_string(),
            ));
        }
        if self.access_token_ttl_secs <= 0 || self.refresh_token_ttl_secs <= 0 {
            return Err(CoreError::Config("token TTLs must be positive".to_string()));
        }

        self.routes()?;
        Ok(())
    }

    pub fn routes(&self) -> Result<RouteMap> {
        Ok(RouteMap::new(
            self.login_path.clone(),
            self.protected_prefixes.clone(),
        )?)
    }

    pub fn token_lifetimes(&self) -> TokenLifetimes {
        TokenLifetimes {
            access: chrono::Duration::seconds(self.access_token_ttl_secs),
            refresh: chrono::Duration::seconds(self.refresh_token_ttl_secs),
        }
    }

    pub fn client_options(&self) -> ClientOptions {
        ClientOptions {
            base_url: self.api_base_url.clone(),
            timeout: Duration::from_secs(self.request_timeout_secs),
            connectivity_threshold: self.connectivity_threshold,
            endpoints: self.endpoints.clone(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new(Self::data_dir())
    }
}

/// Per-user application data root, following each platform's convention
fn platform_data_root() -> Option<PathBuf> {
    let env_path = |key: &str| std::env::var_os(key).map(PathBuf::from);

    if cfg!(target_os = "windows") {
        env_path("LOCALAPPDATA")
    } else if cfg!(target_os = "macos") {
        env_path("HOME").map(|home| home.join("Library/Application Support"))
    } else if cfg!(unix) {
        env_path("XDG_DATA_HOME").or_else(|| env_path("HOME").map(|home| home.join(".local/share")))
    } else {
        None
    }
}
