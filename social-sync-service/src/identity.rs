//! Session-to-internal identity resolution.
//!
//! The identity a caller authenticates with (an opaque auth id) is not
//! always the internal user row id: older rows were keyed directly by
//! row id, newer ones through the users table. Both identity spaces are
//! real, so resolution tries the direct id first and falls back to the
//! auth-id lookup, memoized per session.

use std::sync::Arc;
use std::time::Duration;

use moka::sync::Cache;

use crate::db::Db;

const MEMO_TTL: Duration = Duration::from_secs(3600);

pub struct IdentityResolver {
    db: Arc<Db>,
    memo: Cache<String, i64>,
}

impl IdentityResolver {
    pub fn new(db: Arc<Db>) -> Self {
        Self {
            db,
            memo: Cache::builder()
                .time_to_live(MEMO_TTL)
                .max_capacity(4096)
                .build(),
        }
    }

    /// Resolve a session identity to an internal user id.
    /// Returns Ok(None) when neither path matches.
    pub fn resolve(&self, session_user_id: &str) -> Result<Option<i64>, String> {
        if let Some(id) = self.memo.get(session_user_id) {
            return Ok(Some(id));
        }

        // Direct path: the session id is already an internal row id
        if let Ok(direct) = session_user_id.parse::<i64>() {
            if self
                .db
                .user_exists(direct)
                .map_err(|e| format!("User lookup failed: {}", e))?
            {
                self.memo.insert(session_user_id.to_string(), direct);
                return Ok(Some(direct));
            }
        }

        // Fallback: resolve through the users-by-auth-id table
        match self
            .db
            .find_user_by_auth_id(session_user_id)
            .map_err(|e| format!("User lookup failed: {}", e))?
        {
            Some(id) => {
                self.memo.insert(session_user_id.to_string(), id);
                Ok(Some(id))
            }
            None => Ok(None),
        }
    }

    /// Resolve, creating the user row on first contact. Used by the
    /// connect flow so a fresh session can link its first account.
    pub fn resolve_or_create(&self, session_user_id: &str) -> Result<i64, String> {
        if let Some(id) = self.resolve(session_user_id)? {
            return Ok(id);
        }
        let id = self
            .db
            .ensure_user(session_user_id)
            .map_err(|e| format!("User create failed: {}", e))?;
        self.memo.insert(session_user_id.to_string(), id);
        Ok(id)
    }

    /// Drop a memoized session (sign-out)
    pub fn forget(&self, session_user_id: &str) {
        self.memo.invalidate(session_user_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver() -> IdentityResolver {
        IdentityResolver::new(Arc::new(Db::open(":memory:").unwrap()))
    }

    #[test]
    fn test_resolves_by_auth_id() {
        let r = resolver();
        let id = r.db.ensure_user("auth-abc").unwrap();
        assert_eq!(r.resolve("auth-abc").unwrap(), Some(id));
        // Memoized second hit
        assert_eq!(r.resolve("auth-abc").unwrap(), Some(id));
    }

    #[test]
    fn test_resolves_direct_row_id() {
        let r = resolver();
        let id = r.db.ensure_user("auth-abc").unwrap();
        assert_eq!(r.resolve(&id.to_string()).unwrap(), Some(id));
    }

    #[test]
    fn test_unknown_identity_is_none() {
        let r = resolver();
        assert_eq!(r.resolve("nobody").unwrap(), None);
        assert_eq!(r.resolve("42").unwrap(), None);
    }

    #[test]
    fn test_resolve_or_create() {
        let r = resolver();
        let id = r.resolve_or_create("fresh-session").unwrap();
        assert_eq!(r.resolve("fresh-session").unwrap(), Some(id));
        assert_eq!(r.resolve_or_create("fresh-session").unwrap(), id);
    }
}
