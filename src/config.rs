//! Runtime configuration from environment variables.
//!
//! Every knob has a default so the server starts with an empty environment.
//! Unparseable values fall back to the default rather than aborting startup.

pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_DB_MAX_CONNECTIONS: u32 = 5;
pub const DEFAULT_WS_CHANNEL_CAPACITY: usize = 256;
pub const DEFAULT_INVITE_TTL_DAYS: i64 = 7;
pub const DEFAULT_INVITE_SWEEP_INTERVAL_SECS: u64 = 3600;
pub const DEFAULT_ACTIVITY_SYNC_LIMIT: i64 = 500;

pub(crate) fn env_parse<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + Copy,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    /// `None` selects the in-memory store.
    pub database_url: Option<String>,
    pub db_max_connections: u32,
    /// Per-connection outbound queue depth.
    pub ws_channel_capacity: usize,
    pub invite_ttl_days: i64,
    pub invite_sweep_interval_secs: u64,
    /// Upper bound on rows returned by one `sync_since`.
    pub activity_sync_limit: i64,
}

impl AppConfig {
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            port: env_parse("PORT", DEFAULT_PORT),
            database_url: std::env::var("DATABASE_URL").ok().filter(|s| !s.trim().is_empty()),
            db_max_connections: env_parse("DB_MAX_CONNECTIONS", DEFAULT_DB_MAX_CONNECTIONS),
            ws_channel_capacity: env_parse("WS_CHANNEL_CAPACITY", DEFAULT_WS_CHANNEL_CAPACITY).max(1),
            invite_ttl_days: env_parse("INVITE_TTL_DAYS", DEFAULT_INVITE_TTL_DAYS).max(1),
            invite_sweep_interval_secs: env_parse("INVITE_SWEEP_INTERVAL_SECS", DEFAULT_INVITE_SWEEP_INTERVAL_SECS)
                .max(1),
            activity_sync_limit: env_parse("ACTIVITY_SYNC_LIMIT", DEFAULT_ACTIVITY_SYNC_LIMIT).max(1),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            database_url: None,
            db_max_connections: DEFAULT_DB_MAX_CONNECTIONS,
            ws_channel_capacity: DEFAULT_WS_CHANNEL_CAPACITY,
            invite_ttl_days: DEFAULT_INVITE_TTL_DAYS,
            invite_sweep_interval_secs: DEFAULT_INVITE_SWEEP_INTERVAL_SECS,
            activity_sync_limit: DEFAULT_ACTIVITY_SYNC_LIMIT,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_parse_falls_back_on_missing_key() {
        assert_eq!(env_parse("TASKBOARD_TEST_SURELY_UNSET_KEY", 17_u32), 17);
    }

    #[test]
    fn default_config_uses_documented_values() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.port, 3000);
        assert!(cfg.database_url.is_none());
        assert_eq!(cfg.invite_ttl_days, 7);
        assert_eq!(cfg.ws_channel_capacity, 256);
    }
}
