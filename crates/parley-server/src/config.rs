//! Server configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! - `PARLEY_BIND_ADDR`: HTTP listen address. Default: `0.0.0.0:8080`
//! - `PARLEY_DB_PATH`: Database file path. Default: in-memory
//! - `PARLEY_AUTO_REGISTER`: Register unknown users on connect. Default: `true`
//! - `PARLEY_DUPLICATE_LOGIN`: `evict` or `replace`. Default: `evict`
//! - `PARLEY_OUTBOUND_BUFFER`: Per-session outbound queue size. Default: `256`
//!
//! # Examples
//!
//! ```bash
//! PARLEY_DB_PATH=./data/parley.db PARLEY_BIND_ADDR=127.0.0.1:9000 parley-server
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;

use parley_core::router::DEFAULT_OUTBOUND_BUFFER;
use parley_core::{DuplicateLoginPolicy, RouterConfig};
use thiserror::Error;
use tracing::info;

/// Default HTTP listen address.
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";

/// Configuration errors.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {var}: {message}")]
    InvalidValue { var: &'static str, message: String },
}

impl ConfigError {
    fn invalid(var: &'static str, message: impl Into<String>) -> Self {
        Self::InvalidValue {
            var,
            message: message.into(),
        }
    }
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// HTTP listen address
    pub bind_addr: SocketAddr,
    /// Database file (None for in-memory)
    pub db_path: Option<PathBuf>,
    /// Session routing behaviour
    pub router: RouterConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            db_path: None,
            router: RouterConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Load server configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let bind_addr = lookup("PARLEY_BIND_ADDR")
            .unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string())
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::invalid("PARLEY_BIND_ADDR", e.to_string()))?;

        let db_path = lookup("PARLEY_DB_PATH")
            .filter(|p| !p.trim().is_empty())
            .map(PathBuf::from);

        let auto_register = match lookup("PARLEY_AUTO_REGISTER") {
            Some(value) => parse_bool(&value)
                .ok_or_else(|| ConfigError::invalid("PARLEY_AUTO_REGISTER", value))?,
            None => true,
        };

        let duplicate_login = match lookup("PARLEY_DUPLICATE_LOGIN") {
            Some(value) => value
                .parse::<DuplicateLoginPolicy>()
                .map_err(|e| ConfigError::invalid("PARLEY_DUPLICATE_LOGIN", e))?,
            None => DuplicateLoginPolicy::default(),
        };

        let outbound_buffer = match lookup("PARLEY_OUTBOUND_BUFFER") {
            Some(value) => match value.trim().parse::<usize>() {
                Ok(n) if n > 0 => n,
                _ => {
                    return Err(ConfigError::invalid(
                        "PARLEY_OUTBOUND_BUFFER",
                        format!("expected a positive integer, got '{}'", value),
                    ))
                }
            },
            None => DEFAULT_OUTBOUND_BUFFER,
        };

        Ok(Self {
            bind_addr,
            db_path,
            router: RouterConfig {
                outbound_buffer,
                auto_register,
                duplicate_login,
            },
        })
    }

    /// Log the current server configuration.
    pub fn log_config(&self) {
        info!("Bind address: {}", self.bind_addr);
        match &self.db_path {
            Some(path) => info!("Database: {}", path.display()),
            None => info!("Database: in-memory (development mode)"),
        }
        info!(
            "Auto-registration on connect: {}",
            if self.router.auto_register {
                "enabled"
            } else {
                "disabled"
            }
        );
        info!("Duplicate login policy: {}", self.router.duplicate_login);
        info!("Outbound buffer per session: {}", self.router.outbound_buffer);
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}
