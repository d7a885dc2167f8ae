//! Tracker configuration loaded from environment variables.
//!
//! All settings have defaults so the tracker starts with zero configuration
//! against a local server and a local gpsd.

use std::path::PathBuf;
use std::time::Duration;

use geoguard_shared::constants::{
    DEFAULT_GPSD_ADDR, DEFAULT_HTTP_PORT, FIX_TIMEOUT_SECS, PENDING_QUEUE_CAPACITY,
    PERIODIC_SYNC_MIN_INTERVAL_SECS, RESAMPLE_TIMEOUT_SECS,
};

const CONNECTIVITY_CHECK_SECS: u64 = 30;
use geoguard_shared::AdminPolicy;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the shared document store.
    /// Env: `GEOGUARD_SERVER_URL`
    pub server_url: String,

    /// SQLite file holding the pending queue and last known location.
    /// Env: `GEOGUARD_DB_PATH`
    /// Default: platform data directory.
    pub db_path: Option<PathBuf>,

    /// gpsd endpoint.
    /// Env: `GEOGUARD_GPSD_ADDR`
    pub gpsd_addr: String,

    /// Env: `GEOGUARD_QUEUE_CAPACITY`
    pub queue_capacity: usize,

    /// Env: `GEOGUARD_FIX_TIMEOUT_SECS`
    pub fix_timeout: Duration,

    /// Env: `GEOGUARD_RESAMPLE_TIMEOUT_SECS`
    pub resample_timeout: Duration,

    /// Periodic background sync interval, never below 15 minutes.
    /// Env: `GEOGUARD_SYNC_INTERVAL_SECS`
    pub sync_interval: Duration,

    /// How often the tracker checks whether the store is reachable.
    /// Env: `GEOGUARD_CONNECTIVITY_CHECK_SECS`
    pub connectivity_interval: Duration,

    /// Identity handed over by the identity provider.
    /// Env: `GEOGUARD_USER_ID`, `GEOGUARD_EMAIL`, `GEOGUARD_DISPLAY_NAME`
    pub user_id: Option<String>,
    pub email: Option<String>,
    pub display_name: Option<String>,

    /// Env: `GEOGUARD_ADMIN_EMAILS` (comma separated)
    pub admins: AdminPolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: format!("http://127.0.0.1:{DEFAULT_HTTP_PORT}"),
            db_path: None,
            gpsd_addr: DEFAULT_GPSD_ADDR.to_string(),
            queue_capacity: PENDING_QUEUE_CAPACITY,
            fix_timeout: Duration::from_secs(FIX_TIMEOUT_SECS),
            resample_timeout: Duration::from_secs(RESAMPLE_TIMEOUT_SECS),
            sync_interval: Duration::from_secs(PERIODIC_SYNC_MIN_INTERVAL_SECS),
            connectivity_interval: Duration::from_secs(CONNECTIVITY_CHECK_SECS),
            user_id: None,
            email: None,
            display_name: None,
            admins: AdminPolicy::default(),
        }
    }
}

impl ClientConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(url) = var("GEOGUARD_SERVER_URL") {
            config.server_url = url.trim_end_matches('/').to_string();
        }

        if let Some(path) = var("GEOGUARD_DB_PATH") {
            config.db_path = Some(PathBuf::from(path));
        }

        if let Some(addr) = var("GEOGUARD_GPSD_ADDR") {
            config.gpsd_addr = addr;
        }

        if let Some(val) = var("GEOGUARD_QUEUE_CAPACITY") {
            match val.parse::<usize>() {
                Ok(n) if n > 0 => config.queue_capacity = n,
                _ => tracing::warn!(value = %val, "Invalid GEOGUARD_QUEUE_CAPACITY, using default"),
            }
        }

        if let Some(secs) = parse_secs(&var, "GEOGUARD_FIX_TIMEOUT_SECS") {
            config.fix_timeout = secs;
        }

        if let Some(secs) = parse_secs(&var, "GEOGUARD_RESAMPLE_TIMEOUT_SECS") {
            config.resample_timeout = secs;
        }

        if let Some(secs) = parse_secs(&var, "GEOGUARD_SYNC_INTERVAL_SECS") {
            let floor = Duration::from_secs(PERIODIC_SYNC_MIN_INTERVAL_SECS);
            if secs < floor {
                tracing::warn!(
                    requested_secs = secs.as_secs(),
                    "Periodic sync interval below the 15 minute minimum, clamping"
                );
            }
            config.sync_interval = secs.max(floor);
        }

        if let Some(secs) = parse_secs(&var, "GEOGUARD_CONNECTIVITY_CHECK_SECS") {
            config.connectivity_interval = secs;
        }

        config.user_id = var("GEOGUARD_USER_ID").filter(|v| !v.is_empty());
        config.email = var("GEOGUARD_EMAIL").filter(|v| !v.is_empty());
        config.display_name = var("GEOGUARD_DISPLAY_NAME").filter(|v| !v.is_empty());

        if let Some(list) = var("GEOGUARD_ADMIN_EMAILS") {
            config.admins = AdminPolicy::from_csv(&list);
        }

        config
    }
}

fn parse_secs(var: &impl Fn(&str) -> Option<String>, key: &str) -> Option<Duration> {
    let val = var(key)?;
    match val.parse::<u64>() {
        Ok(n) if n > 0 => Some(Duration::from_secs(n)),
        _ => {
            tracing::warn!(key, value = %val, "Invalid duration, using default");
            None
        }
    }
}
