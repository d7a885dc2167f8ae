//! Server configuration loaded from environment variables.
//!
//! All settings have defaults so the server can start with zero
//! configuration for local development.

use std::net::SocketAddr;

use geoguard_shared::constants::{DEFAULT_HTTP_PORT, RECENT_WINDOW_SECS};
use geoguard_shared::AdminPolicy;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address for the HTTP API.
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:8080`
    pub http_addr: SocketAddr,

    /// Emails allowed to read every record.
    /// Env: `ADMIN_EMAILS` (comma separated)
    /// Default: empty (no administrator).
    pub admins: AdminPolicy,

    /// A location captured within this many seconds counts as recent.
    /// Env: `RECENT_WINDOW_SECS`
    pub recent_window_secs: i64,

    /// Largest accepted request body.
    /// Env: `MAX_BODY_BYTES`
    /// Default: 64 KiB
    pub max_body_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], DEFAULT_HTTP_PORT).into(),
            admins: AdminPolicy::default(),
            recent_window_secs: RECENT_WINDOW_SECS,
            max_body_bytes: 64 * 1024,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(addr) = var("HTTP_ADDR") {
            if let Ok(parsed) = addr.parse::<SocketAddr>() {
                config.http_addr = parsed;
            } else {
                tracing::warn!(value = %addr, "Invalid HTTP_ADDR, using default");
            }
        }

        if let Some(list) = var("ADMIN_EMAILS") {
            config.admins = AdminPolicy::from_csv(&list);
        }

        if let Some(val) = var("RECENT_WINDOW_SECS") {
            match val.parse::<i64>() {
                Ok(n) if n > 0 => config.recent_window_secs = n,
                _ => tracing::warn!(value = %val, "Invalid RECENT_WINDOW_SECS, using default"),
            }
        }

        if let Some(val) = var("MAX_BODY_BYTES") {
            match val.parse::<usize>() {
                Ok(n) if n > 0 => config.max_body_bytes = n,
                _ => tracing::warn!(value = %val, "Invalid MAX_BODY_BYTES, using default"),
            }
        }

        config
    }
}
