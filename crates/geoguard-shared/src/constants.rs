/// Application name
pub const APP_NAME: &str = "GeoGuard";

/// Collection holding one location record per user
pub const LOCATIONS_COLLECTION: &str = "locations";

/// Collection holding user profiles (first/last name, phone, ...)
pub const USERS_COLLECTION: &str = "users";

/// Number of pending samples kept on-device while offline
pub const PENDING_QUEUE_CAPACITY: usize = 10;

/// Per-fix timeout for the continuous position watch
pub const FIX_TIMEOUT_SECS: u64 = 30;

/// Timeout for a one-shot resample requested by the background worker
pub const RESAMPLE_TIMEOUT_SECS: u64 = 10;

/// Minimum interval of the periodic background sync (15 minutes)
pub const PERIODIC_SYNC_MIN_INTERVAL_SECS: u64 = 15 * 60;

/// One-off background sync tag
pub const SYNC_TAG: &str = "sync-location";

/// Periodic background sync tag
pub const PERIODIC_SYNC_TAG: &str = "location-update";

/// A record captured within this window counts as "recent" on the admin view
pub const RECENT_WINDOW_SECS: i64 = 3600;

/// Default HTTP API port (server)
pub const DEFAULT_HTTP_PORT: u16 = 8080;

/// Default gpsd endpoint
pub const DEFAULT_GPSD_ADDR: &str = "127.0.0.1:2947";

/// Identity headers set by the fronting identity gateway
pub const USER_ID_HEADER: &str = "x-geoguard-user-id";
pub const EMAIL_HEADER: &str = "x-geoguard-email";
