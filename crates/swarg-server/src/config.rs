//! Server configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the server can start with zero
//! configuration for local development.

use std::net::SocketAddr;
use std::path::PathBuf;

use chrono::Duration;

use swarg_shared::constants::{
    APP_NAME, DEFAULT_HTTP_PORT, DEFAULT_INVITE_TTL_HOURS, DEFAULT_NOTIFICATION_MAX_PER_USER,
    DEFAULT_NOTIFICATION_RETENTION_DAYS, DEFAULT_STORY_TTL_HOURS, PUBKEY_SIZE,
};

use crate::error::ServerError;

/// Upper bounds for numeric settings. Larger values fall back to the default.
const MAX_TTL_HOURS: i64 = 24 * 365 * 10;
const MAX_RETENTION_DAYS: i64 = 365 * 10;
const MAX_NOTIFICATIONS_PER_USER: u32 = 100_000;
const MAX_OUTBOX_CAPACITY: usize = 65_536;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address for the HTTP and WebSocket server.
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:5000`
    pub http_addr: SocketAddr,

    /// SQLite database file.
    /// Env: `DATABASE_PATH`
    /// Default: `None` (platform data directory).
    pub database_path: Option<PathBuf>,

    /// Ed25519 verifying key of the session issuer (hex-encoded, 64 chars).
    /// Env: `SESSION_PUBKEY`
    /// Default: all-zeros, which rejects every token.
    pub session_pubkey: [u8; PUBKEY_SIZE],

    /// Bearer token for `/admin/*`.
    /// Env: `ADMIN_TOKEN`
    /// Default: empty (operator broadcast disabled).
    pub admin_token: Option<String>,

    /// Sender name on operator announcements.
    /// Env: `INSTANCE_NAME`
    pub instance_name: String,

    /// Read notifications older than this many days are pruned.
    /// Env: `NOTIFICATION_RETENTION_DAYS`
    pub notification_retention_days: i64,

    /// Newest notifications kept per user.
    /// Env: `NOTIFICATION_MAX_PER_USER`
    pub notification_max_per_user: u32,

    /// Env: `STORY_TTL_HOURS`
    pub story_ttl_hours: i64,

    /// Env: `INVITE_TTL_HOURS`
    pub invite_ttl_hours: i64,

    /// Per-connection outbound queue depth. Events past it are dropped.
    /// Env: `OUTBOX_CAPACITY`
    pub outbox_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], DEFAULT_HTTP_PORT).into(),
            database_path: None,
            session_pubkey: [0u8; PUBKEY_SIZE],
            admin_token: None,
            instance_name: APP_NAME.to_string(),
            notification_retention_days: DEFAULT_NOTIFICATION_RETENTION_DAYS,
            notification_max_per_user: DEFAULT_NOTIFICATION_MAX_PER_USER,
            story_ttl_hours: DEFAULT_STORY_TTL_HOURS,
            invite_ttl_hours: DEFAULT_INVITE_TTL_HOURS,
            outbox_capacity: 256,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`ServerConfig::from_env`] over an arbitrary source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(addr) = lookup("HTTP_ADDR") {
            if let Ok(parsed) = addr.parse::<SocketAddr>() {
                config.http_addr = parsed;
            } else {
                tracing::warn!(value = %addr, "Invalid HTTP_ADDR, using default");
            }
        }

        if let Some(path) = lookup("DATABASE_PATH") {
            if !path.trim().is_empty() {
                config.database_path = Some(PathBuf::from(path));
            }
        }

        if let Some(hex_key) = lookup("SESSION_PUBKEY") {
            match parse_hex_pubkey(&hex_key) {
                Ok(key) => config.session_pubkey = key,
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        "Invalid SESSION_PUBKEY, every session will be rejected"
                    );
                }
            }
        }

        if let Some(token) = lookup("ADMIN_TOKEN") {
            if !token.is_empty() {
                config.admin_token = Some(token);
            }
        }

        if let Some(name) = lookup("INSTANCE_NAME") {
            config.instance_name = name;
        }

        parse_number(
            &lookup,
            "NOTIFICATION_RETENTION_DAYS",
            MAX_RETENTION_DAYS,
            &mut config.notification_retention_days,
        );
        parse_number(
            &lookup,
            "NOTIFICATION_MAX_PER_USER",
            MAX_NOTIFICATIONS_PER_USER,
            &mut config.notification_max_per_user,
        );
        parse_number(&lookup, "STORY_TTL_HOURS", MAX_TTL_HOURS, &mut config.story_ttl_hours);
        parse_number(&lookup, "INVITE_TTL_HOURS", MAX_TTL_HOURS, &mut config.invite_ttl_hours);
        parse_number(
            &lookup,
            "OUTBOX_CAPACITY",
            MAX_OUTBOX_CAPACITY,
            &mut config.outbox_capacity,
        );

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter,
        // so we do not store it here.

        config
    }

    pub fn story_ttl(&self) -> Result<Duration, ServerError> {
        hours(self.story_ttl_hours)
    }

    pub fn invite_ttl(&self) -> Result<Duration, ServerError> {
        hours(self.invite_ttl_hours)
    }

    pub fn notification_retention(&self) -> Result<Duration, ServerError> {
        Duration::try_days(self.notification_retention_days).ok_or_else(|| {
            ServerError::Internal(format!(
                "notification retention of {} days is out of range",
                self.notification_retention_days
            ))
        })
    }
}

fn hours(h: i64) -> Result<Duration, ServerError> {
    Duration::try_hours(h)
        .ok_or_else(|| ServerError::Internal(format!("lifetime of {h} hours is out of range")))
}

/// Overwrite `slot` with a number from `key` in `1..=max`; warn and keep the
/// default otherwise.
fn parse_number<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, max: T, slot: &mut T)
where
    T: std::str::FromStr + PartialOrd + Default + Copy,
{
    let Some(raw) = lookup(key) else {
        return;
    };
    match raw.trim().parse::<T>() {
        Ok(n) if n > T::default() && n <= max => *slot = n,
        _ => tracing::warn!(key, value = %raw, "Invalid value, using default"),
    }
}

/// Parse a 64-character hex string into a 32-byte array.
fn parse_hex_pubkey(hex_key: &str) -> Result<[u8; PUBKEY_SIZE], String> {
    let hex_key = hex_key.trim();
    if hex_key.len() != PUBKEY_SIZE * 2 {
        return Err(format!("expected {} hex chars, got {}", PUBKEY_SIZE * 2, hex_key.len()));
    }

    let mut bytes = [0u8; PUBKEY_SIZE];
    hex::decode_to_slice(hex_key, &mut bytes).map_err(|e| e.to_string())?;
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from_map(pairs: &[(&str, &str)]) -> ServerConfig {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ServerConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.http_addr, ([0, 0, 0, 0], 5000).into());
        assert_eq!(config.session_pubkey, [0u8; 32]);
        assert_eq!(config.notification_retention_days, 90);
        assert!(config.admin_token.is_none());
    }

    #[test]
    fn test_parse_hex_pubkey() {
        let hex = "ab".repeat(32);
        let key = parse_hex_pubkey(&hex).unwrap();
        assert_eq!(key, [0xab; 32]);
    }

    #[test]
    fn test_parse_hex_pubkey_wrong_length() {
        assert!(parse_hex_pubkey("abcd").is_err());
        assert!(parse_hex_pubkey(&"zz".repeat(32)).is_err());
    }

    #[test]
    fn test_env_overrides_and_fallbacks() {
        let config = from_map(&[
            ("HTTP_ADDR", "127.0.0.1:9000"),
            ("SESSION_PUBKEY", &"01".repeat(32)),
            ("ADMIN_TOKEN", "s3cret"),
            ("OUTBOX_CAPACITY", "0"),
            ("STORY_TTL_HOURS", "12"),
            ("INVITE_TTL_HOURS", "soon"),
        ]);
        assert_eq!(config.http_addr, ([127, 0, 0, 1], 9000).into());
        assert_eq!(config.session_pubkey, [1u8; 32]);
        assert_eq!(config.admin_token.as_deref(), Some("s3cret"));
        assert_eq!(config.outbox_capacity, 256);
        assert_eq!(config.story_ttl_hours, 12);
        assert_eq!(config.invite_ttl_hours, 168);
    }

    #[test]
    fn test_oversized_values_keep_defaults() {
        let config = from_map(&[
            ("STORY_TTL_HOURS", "10000000000"),
            ("INVITE_TTL_HOURS", "87601"),
            ("NOTIFICATION_RETENTION_DAYS", "9223372036854775807"),
            ("NOTIFICATION_MAX_PER_USER", "4000000000"),
            ("OUTBOX_CAPACITY", "100000000"),
        ]);
        assert_eq!(config.story_ttl_hours, 24);
        assert_eq!(config.invite_ttl_hours, 168);
        assert_eq!(config.notification_retention_days, 90);
        assert_eq!(config.notification_max_per_user, 500);
        assert_eq!(config.outbox_capacity, 256);

        let config = from_map(&[("INVITE_TTL_HOURS", "87600")]);
        assert_eq!(config.invite_ttl_hours, 87_600);
        assert_eq!(config.invite_ttl().unwrap(), Duration::hours(87_600));
    }

    #[test]
    fn test_duration_accessors_never_panic() {
        let config = ServerConfig {
            story_ttl_hours: i64::MAX,
            notification_retention_days: i64::MAX,
            ..ServerConfig::default()
        };
        assert!(matches!(config.story_ttl(), Err(ServerError::Internal(_))));
        assert!(matches!(
            config.notification_retention(),
            Err(ServerError::Internal(_))
        ));
        assert_eq!(
            ServerConfig::default().story_ttl().unwrap(),
            Duration::hours(24)
        );
    }
}
