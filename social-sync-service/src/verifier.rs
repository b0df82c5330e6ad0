//! Connection verification with defined source precedence.
//!
//! Three sources can disagree about whether a (user, platform) link is
//! live: the in-memory cache, the platform's verify endpoint, and the
//! database row. Precedence: answer from cache immediately when present
//! (kicking off a background re-verification), let the server win on a
//! definitive result, and fall back to the cache on transient errors so
//! a flaky network never hard-fails the caller.

use std::sync::Arc;

use social_sync_types::Platform;

use crate::cache::ConnectionCache;
use crate::db::Db;
use crate::instagram::InstagramClient;
use crate::twitter::TwitterClient;

pub struct ConnectionVerifier {
    db: Arc<Db>,
    cache: Arc<ConnectionCache>,
    twitter: Option<Arc<TwitterClient>>,
    instagram: Option<Arc<InstagramClient>>,
}

impl ConnectionVerifier {
    pub fn new(
        db: Arc<Db>,
        cache: Arc<ConnectionCache>,
        twitter: Option<Arc<TwitterClient>>,
        instagram: Option<Arc<InstagramClient>>,
    ) -> Self {
        Self {
            db,
            cache,
            twitter,
            instagram,
        }
    }

    /// Fast-path connection check. A cached value is returned
    /// immediately; a background re-verification always runs so the
    /// cache converges on server truth.
    pub async fn is_connected(self: &Arc<Self>, user_id: i64, platform: Platform) -> bool {
        let answer = match self.cache.get(user_id, platform) {
            Some(cached) => cached,
            None => {
                let from_db = self
                    .db
                    .get_connection(user_id, platform)
                    .ok()
                    .flatten()
                    .map(|c| c.connected)
                    .unwrap_or(false);
                self.cache.set(user_id, platform, from_db);
                from_db
            }
        };

        let verifier = Arc::clone(self);
        tokio::spawn(async move {
            verifier.verify_now(user_id, platform).await;
        });

        answer
    }

    /// Call the platform's verify endpoint and reconcile all sources.
    /// Returns the post-reconciliation truth.
    pub async fn verify_now(&self, user_id: i64, platform: Platform) -> bool {
        let result = self.check_platform(user_id, platform).await;
        self.apply_server_result(user_id, platform, result)
    }

    /// Ask the platform whether the stored credentials are valid.
    /// Ok(true)/Ok(false) are definitive verdicts; Err is transient
    /// (network, 5xx, integration not configured).
    async fn check_platform(&self, user_id: i64, platform: Platform) -> Result<bool, String> {
        let conn = self
            .db
            .get_connection(user_id, platform)
            .map_err(|e| format!("Connection lookup failed: {}", e))?;

        let Some(conn) = conn else {
            // No row at all: definitively not connected
            return Ok(false);
        };

        match platform {
            Platform::Twitter => {
                let client = self
                    .twitter
                    .as_ref()
                    .ok_or_else(|| "Twitter integration not configured".to_string())?;
                let (Some(token), Some(secret)) =
                    (conn.access_token.as_deref(), conn.access_token_secret.as_deref())
                else {
                    return Ok(false);
                };
                match client.verify_credentials(token, secret).await {
                    Ok(_) => Ok(true),
                    Err(e) if is_auth_error(&e) => Ok(false),
                    Err(e) => Err(e),
                }
            }
            Platform::Instagram => {
                let client = self
                    .instagram
                    .as_ref()
                    .ok_or_else(|| "Instagram integration not configured".to_string())?;
                if conn.access_token.is_none() {
                    return Ok(false);
                }
                match client.profile().await {
                    Ok(_) => Ok(true),
                    Err(e) if is_auth_error(&e) => Ok(false),
                    Err(e) => Err(e),
                }
            }
        }
    }

    /// Reconcile a server verdict against cache and database.
    /// On a transient error nothing is written; the cache (then the DB
    /// row) decides the answer.
    pub fn apply_server_result(
        &self,
        user_id: i64,
        platform: Platform,
        result: Result<bool, String>,
    ) -> bool {
        match result {
            Ok(true) => {
                self.cache.set(user_id, platform, true);
                if let Err(e) = self.db.set_connection_verified(user_id, platform, true) {
                    log::warn!("Verifier: failed to record verification: {}", e);
                }
                true
            }
            Ok(false) => {
                // Server is authoritative on a negative; drop the cache
                // and confirm against the database row before declaring
                // disconnected.
                self.cache.invalidate(user_id, platform);
                let row_connected = self
                    .db
                    .get_connection(user_id, platform)
                    .ok()
                    .flatten()
                    .map(|c| c.connected)
                    .unwrap_or(false);
                if row_connected {
                    log::info!(
                        "Verifier: {} connection for user {} revoked server-side, updating record",
                        platform,
                        user_id
                    );
                    if let Err(e) = self.db.set_connection_verified(user_id, platform, false) {
                        log::warn!("Verifier: failed to record revocation: {}", e);
                    }
                }
                self.cache.set(user_id, platform, false);
                false
            }
            Err(e) => {
                log::warn!(
                    "Verifier: {} verification for user {} failed transiently: {}",
                    platform,
                    user_id,
                    e
                );
                match self.cache.get(user_id, platform) {
                    Some(cached) => cached,
                    None => self
                        .db
                        .get_connection(user_id, platform)
                        .ok()
                        .flatten()
                        .map(|c| c.connected)
                        .unwrap_or(false),
                }
            }
        }
    }
}

fn is_auth_error(msg: &str) -> bool {
    msg.contains("401")
        || msg.contains("Unauthorized")
        || msg.contains("403")
        || msg.contains("Forbidden")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn verifier() -> (Arc<ConnectionVerifier>, Arc<Db>, Arc<ConnectionCache>) {
        let db = Arc::new(Db::open(":memory:").unwrap());
        let cache = Arc::new(ConnectionCache::new());
        let v = Arc::new(ConnectionVerifier::new(
            db.clone(),
            cache.clone(),
            None,
            None,
        ));
        (v, db, cache)
    }

    fn connect(db: &Db) -> i64 {
        let user = db.ensure_user("u1").unwrap();
        db.upsert_connection(user, Platform::Twitter, "alice", "tok", Some("sec"), None)
            .unwrap();
        user
    }

    #[test]
    fn test_positive_verdict_updates_cache_and_db() {
        let (v, db, cache) = verifier();
        let user = connect(&db);

        assert!(v.apply_server_result(user, Platform::Twitter, Ok(true)));
        assert_eq!(cache.get(user, Platform::Twitter), Some(true));
        let row = db.get_connection(user, Platform::Twitter).unwrap().unwrap();
        assert!(row.connected);
        assert!(row.last_verified.is_some());
    }

    #[test]
    fn test_negative_verdict_overrides_stale_cache() {
        let (v, db, cache) = verifier();
        let user = connect(&db);
        cache.set(user, Platform::Twitter, true);

        assert!(!v.apply_server_result(user, Platform::Twitter, Ok(false)));
        assert_eq!(cache.get(user, Platform::Twitter), Some(false));
        let row = db.get_connection(user, Platform::Twitter).unwrap().unwrap();
        assert!(!row.connected);
    }

    #[test]
    fn test_transient_error_falls_back_to_cache_without_writes() {
        let (v, db, cache) = verifier();
        let user = connect(&db);
        cache.set(user, Platform::Twitter, true);
        let before = db.get_connection(user, Platform::Twitter).unwrap().unwrap();

        let answer =
            v.apply_server_result(user, Platform::Twitter, Err("connection reset".to_string()));
        assert!(answer);

        // No database write happened
        let after = db.get_connection(user, Platform::Twitter).unwrap().unwrap();
        assert!(after.connected);
        assert_eq!(after.last_verified, before.last_verified);
        assert_eq!(after.updated_at, before.updated_at);
    }

    #[test]
    fn test_transient_error_without_cache_reads_db() {
        let (v, db, _cache) = verifier();
        let user = connect(&db);
        assert!(v.apply_server_result(user, Platform::Twitter, Err("timeout".to_string())));
    }

    #[test]
    fn test_converges_to_last_server_truth() {
        let (v, db, cache) = verifier();
        let user = connect(&db);

        for verdict in [true, false, false, true, false] {
            v.apply_server_result(user, Platform::Twitter, Ok(verdict));
        }
        assert_eq!(cache.get(user, Platform::Twitter), Some(false));
        let row = db.get_connection(user, Platform::Twitter).unwrap().unwrap();
        assert!(!row.connected);
    }

    #[tokio::test]
    async fn test_is_connected_seeds_cache_from_db() {
        let (v, db, cache) = verifier();
        let user = connect(&db);

        assert!(v.is_connected(user, Platform::Twitter).await);
        assert_eq!(cache.get(user, Platform::Twitter), Some(true));
    }

    #[tokio::test]
    async fn test_is_connected_false_for_unknown_user() {
        let (v, _db, _cache) = verifier();
        assert!(!v.is_connected(999, Platform::Twitter).await);
    }

    #[test]
    fn test_auth_error_detection() {
        assert!(is_auth_error("Twitter API error (401 Unauthorized): ..."));
        assert!(is_auth_error("Twitter API error (403 Forbidden): ..."));
        assert!(!is_auth_error("connection reset by peer"));
        assert!(!is_auth_error("Twitter API error (500): oops"));
    }
}
