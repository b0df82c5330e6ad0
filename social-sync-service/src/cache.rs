//! In-memory cache for connection state.
//!
//! Uses moka::sync::Cache so `is_connected` can answer from memory for
//! UI responsiveness while a background re-verification reconciles
//! against the platform. Server truth wins on reconciliation.

use std::time::Duration;

use moka::sync::Cache;

use social_sync_types::Platform;

/// Connection state goes stale quickly relative to how often it changes
const CONNECTION_TTL: Duration = Duration::from_secs(300); // 5 min

/// Cached connection booleans: key = "user_id:platform"
pub struct ConnectionCache {
    connected: Cache<String, bool>,
}

impl ConnectionCache {
    pub fn new() -> Self {
        Self {
            connected: Cache::builder()
                .time_to_live(CONNECTION_TTL)
                .max_capacity(1024)
                .build(),
        }
    }

    fn key(user_id: i64, platform: Platform) -> String {
        format!("{}:{}", user_id, platform.as_str())
    }

    pub fn get(&self, user_id: i64, platform: Platform) -> Option<bool> {
        self.connected.get(&Self::key(user_id, platform))
    }

    pub fn set(&self, user_id: i64, platform: Platform, connected: bool) {
        self.connected.insert(Self::key(user_id, platform), connected);
    }

    pub fn invalidate(&self, user_id: i64, platform: Platform) {
        self.connected.invalidate(&Self::key(user_id, platform));
    }
}

impl Default for ConnectionCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_round_trip() {
        let cache = ConnectionCache::new();
        assert_eq!(cache.get(1, Platform::Twitter), None);

        cache.set(1, Platform::Twitter, true);
        assert_eq!(cache.get(1, Platform::Twitter), Some(true));
        // Per-platform keys are independent
        assert_eq!(cache.get(1, Platform::Instagram), None);

        cache.invalidate(1, Platform::Twitter);
        assert_eq!(cache.get(1, Platform::Twitter), None);
    }
}
