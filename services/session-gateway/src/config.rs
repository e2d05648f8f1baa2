//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! `UPSTREAM_URL` and `SESSION_CREDENTIAL_FILE` override the file so the same
//! config can be shipped to every environment.

use auth_link::LinkConfig;
use serde::Deserialize;
use session_auth::{DEFAULT_EXPIRY_SENTINEL, DEFAULT_LOGIN_ROUTE};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub session: SessionConfig,
}

/// HTTP listener and upstream API settings
#[derive(Debug, Deserialize)]
pub struct GatewayConfig {
    pub listen_addr: SocketAddr,
    /// GraphQL endpoint of the Tribe API
    pub upstream_url: String,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

/// Credential persistence and session-expiry contract
#[derive(Debug, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_credential_file")]
    pub credential_file: PathBuf,
    #[serde(default = "default_login_route")]
    pub login_route: String,
    #[serde(default = "default_expiry_sentinel")]
    pub expiry_sentinel: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            credential_file: default_credential_file(),
            login_route: default_login_route(),
            expiry_sentinel: default_expiry_sentinel(),
        }
    }
}

fn default_timeout() -> u64 {
    30
}

fn default_max_connections() -> usize {
    256
}

fn default_credential_file() -> PathBuf {
    PathBuf::from("session.json")
}

fn default_login_route() -> String {
    DEFAULT_LOGIN_ROUTE.to_string()
}

fn default_expiry_sentinel() -> String {
    DEFAULT_EXPIRY_SENTINEL.to_string()
}

impl Config {
    /// Load configuration from a TOML file, then overlay environment variables.
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;

        if let Ok(url) = std::env::var("UPSTREAM_URL") {
            config.gateway.upstream_url = url;
        }
        if let Ok(file) = std::env::var("SESSION_CREDENTIAL_FILE") {
            config.session.credential_file = PathBuf::from(file);
        }

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> common::Result<()> {
        if !self.gateway.upstream_url.starts_with("http://")
            && !self.gateway.upstream_url.starts_with("https://")
        {
            return Err(common::Error::Config(format!(
                "upstream_url must start with http:// or https://, got: {}",
                self.gateway.upstream_url
            )));
        }

        if self.gateway.timeout_secs == 0 {
            return Err(common::Error::Config(
                "timeout_secs must be greater than 0".into(),
            ));
        }

        if self.gateway.max_connections == 0 {
            return Err(common::Error::Config(
                "max_connections must be greater than 0".into(),
            ));
        }

        if !self.session.login_route.starts_with('/') {
            return Err(common::Error::Config(format!(
                "login_route must be an absolute path, got: {}",
                self.session.login_route
            )));
        }

        // An empty sentinel would match servers that send empty messages
        if self.session.expiry_sentinel.is_empty() {
            return Err(common::Error::Config(
                "expiry_sentinel must not be empty".into(),
            ));
        }

        Ok(())
    }

    /// Settings for the authenticated request pipeline.
    pub fn link_config(&self) -> LinkConfig {
        LinkConfig {
            expiry_sentinel: self.session.expiry_sentinel.clone(),
            login_route: self.session.login_route.clone(),
        }
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("tribe-session-gateway.toml")
    }
}
