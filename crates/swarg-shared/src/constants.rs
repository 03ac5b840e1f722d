/// Application name, used as the sender of operator announcements.
pub const APP_NAME: &str = "Swarg Social";

/// Default HTTP API port.
pub const DEFAULT_HTTP_PORT: u16 = 5000;

/// A user becomes verified when a follow brings them to this many followers.
pub const VERIFIED_FOLLOWER_THRESHOLD: u64 = 100;

/// Maximum message length in characters, after trimming.
pub const MAX_CONTENT_CHARS: usize = 4000;

/// Maximum number of media references attached to one message or post.
pub const MAX_MEDIA_PER_MESSAGE: usize = 10;

/// Posts per page on the global feed.
pub const FEED_PAGE_SIZE: u32 = 10;

/// Default story lifetime in hours.
pub const DEFAULT_STORY_TTL_HOURS: i64 = 24;

/// Default group invite lifetime in hours (one week).
pub const DEFAULT_INVITE_TTL_HOURS: i64 = 168;

/// Read notifications older than this are pruned.
pub const DEFAULT_NOTIFICATION_RETENTION_DAYS: i64 = 90;

/// Newest notifications kept per user.
pub const DEFAULT_NOTIFICATION_MAX_PER_USER: u32 = 500;

/// Number of random bytes in a group invite code (hex-encoded on the wire).
pub const INVITE_CODE_BYTES: usize = 12;

/// Ed25519 public key size in bytes
pub const PUBKEY_SIZE: usize = 32;
