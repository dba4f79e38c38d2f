//! The stored record (a "pasta") and its expiry semantics.

use std::time::{SystemTime, UNIX_EPOCH};

/// Current wall-clock time in unix seconds.
pub fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}

/// One stored blob plus its metadata header.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Record {
    /// Alphanumeric identifier, also the on-disk filename.
    pub id: String,
    /// Secret required to delete the record.
    pub token: String,
    /// Unix seconds after which the record is gone. `None` never expires.
    pub expire_at: Option<i64>,
    /// Filename of the uploaded content, if the client supplied one.
    pub filename: Option<String>,
    /// MIME type served with the payload.
    pub mime: Option<String>,
    /// Payload length in bytes, header excluded.
    pub size: u64,
    /// Whether the record is listed on the public page.
    pub public: bool,
}

impl Record {
    /// Create an empty record; id and token are assigned on insert.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the expiry from a TTL in seconds relative to `now`.
    /// A TTL of zero clears the expiry.
    pub fn with_ttl(mut self, ttl_secs: u64, now: i64) -> Self {
        self.expire_at = if ttl_secs == 0 {
            None
        } else {
            let ttl = i64::try_from(ttl_secs).unwrap_or(i64::MAX);
            Some(now.saturating_add(ttl))
        };
        self
    }

    /// Check expiry against an explicit clock.
    pub fn is_expired_at(&self, now: i64) -> bool {
        match self.expire_at {
            Some(expire_at) if expire_at > 0 => now > expire_at,
            _ => false,
        }
    }

    /// Check expiry against the wall clock.
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(unix_now())
    }
}
