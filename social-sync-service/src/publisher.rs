//! Publish orchestration.
//!
//! Validates content, double-checks the connection (cached answer first,
//! then a live verification immediately before the platform call),
//! publishes, and records the result. Bookkeeping writes after a
//! successful external publish are best-effort: the post exists on the
//! platform, so local insert failures are logged, never surfaced as a
//! publish failure.

use std::sync::Arc;

use social_sync_types::{
    ContentStatus, ContentType, Platform, PublishErrorKind, PublishOutcome,
};

use crate::db::Db;
use crate::instagram::{InstagramClient, INSTAGRAM_MAX_CAPTION_CHARS};
use crate::twitter::{TwitterClient, TWITTER_MAX_CHARS};
use crate::verifier::ConnectionVerifier;

pub struct Publisher {
    db: Arc<Db>,
    verifier: Arc<ConnectionVerifier>,
    twitter: Option<Arc<TwitterClient>>,
    instagram: Option<Arc<InstagramClient>>,
}

impl Publisher {
    pub fn new(
        db: Arc<Db>,
        verifier: Arc<ConnectionVerifier>,
        twitter: Option<Arc<TwitterClient>>,
        instagram: Option<Arc<InstagramClient>>,
    ) -> Self {
        Self {
            db,
            verifier,
            twitter,
            instagram,
        }
    }

    pub async fn publish(
        &self,
        user_id: i64,
        platform: Platform,
        content: &str,
        content_type: ContentType,
        intent: Option<&str>,
        media_url: Option<&str>,
    ) -> PublishOutcome {
        if let Some(detail) = validate(platform, content, media_url) {
            return PublishOutcome::failed(PublishErrorKind::Validation, detail);
        }

        // Fast check, possibly answered from cache
        if !self.verifier.is_connected(user_id, platform).await {
            return PublishOutcome::failed(
                PublishErrorKind::NotConnected,
                format!("No {} connection for this account", platform),
            );
        }

        // The cached answer may be stale; verify against the platform
        // immediately before publishing.
        if !self.verifier.verify_now(user_id, platform).await {
            return PublishOutcome::failed(
                PublishErrorKind::NotConnected,
                format!("{} connection is no longer valid", platform),
            );
        }

        let post_id = match self.platform_publish(user_id, platform, content, media_url).await {
            Ok(id) => id,
            Err(e) => {
                let kind = classify_publish_error(&e);
                log::error!(
                    "Publish: {} publish failed for user {} ({:?}): {}",
                    platform,
                    user_id,
                    kind,
                    e
                );
                return PublishOutcome::failed(kind, e);
            }
        };

        log::info!(
            "Publish: user {} published to {} as post {}",
            user_id,
            platform,
            post_id
        );

        let content_id =
            self.record_publish(user_id, platform, content, content_type, intent, media_url, &post_id);

        PublishOutcome::published(post_id, content_id)
    }

    async fn platform_publish(
        &self,
        user_id: i64,
        platform: Platform,
        content: &str,
        media_url: Option<&str>,
    ) -> Result<String, String> {
        match platform {
            Platform::Twitter => {
                let client = self
                    .twitter
                    .as_ref()
                    .ok_or_else(|| "Twitter integration not configured".to_string())?;
                let conn = self
                    .db
                    .get_connection(user_id, platform)
                    .map_err(|e| format!("Connection lookup failed: {}", e))?
                    .ok_or_else(|| "No stored Twitter connection".to_string())?;
                let token = conn
                    .access_token
                    .ok_or_else(|| "Stored Twitter connection has no token".to_string())?;
                let secret = conn
                    .access_token_secret
                    .ok_or_else(|| "Stored Twitter connection has no token secret".to_string())?;

                match client.post_tweet(&token, &secret, content).await {
                    Ok(id) => Ok(id),
                    Err(e) if is_duplicate_error(&e) => {
                        // Twitter rejects exact duplicate posts; retry once
                        // with a short random suffix (provider quirk, not
                        // a dedup scheme).
                        let retry_text = with_duplicate_suffix(content);
                        log::warn!("Publish: duplicate tweet rejected, retrying with suffix");
                        client.post_tweet(&token, &secret, &retry_text).await
                    }
                    Err(e) => Err(e),
                }
            }
            Platform::Instagram => {
                let client = self
                    .instagram
                    .as_ref()
                    .ok_or_else(|| "Instagram integration not configured".to_string())?;
                let image_url = media_url
                    .ok_or_else(|| "Instagram posts require an image URL".to_string())?;
                client.publish(content, image_url).await
            }
        }
    }

    /// Persist the Content, ContentMetrics, and ActivityHistory rows for
    /// a post that already exists platform-side. Each insert is tolerated
    /// individually.
    fn record_publish(
        &self,
        user_id: i64,
        platform: Platform,
        content: &str,
        content_type: ContentType,
        intent: Option<&str>,
        media_url: Option<&str>,
        post_id: &str,
    ) -> Option<i64> {
        let content_id = match self.db.insert_content(
            user_id,
            platform,
            content_type,
            intent,
            content,
            media_url,
            ContentStatus::Published,
            Some(post_id),
        ) {
            Ok(item) => Some(item.id),
            Err(e) => {
                log::error!("Publish: failed to record content row: {}", e);
                None
            }
        };

        if let Some(id) = content_id {
            if let Err(e) = self.db.insert_content_metrics(id) {
                log::error!("Publish: failed to record metrics row: {}", e);
            }
        }

        if let Err(e) = self.db.insert_activity(
            user_id,
            content_id,
            platform,
            "publish",
            Some(&format!("post {}", post_id)),
        ) {
            log::error!("Publish: failed to record activity row: {}", e);
        }

        content_id
    }
}

/// Client-side validation; rejected content never reaches the network
fn validate(platform: Platform, content: &str, media_url: Option<&str>) -> Option<String> {
    if content.trim().is_empty() {
        return Some("Content is empty".to_string());
    }
    match platform {
        Platform::Twitter => {
            let chars = content.chars().count();
            if chars > TWITTER_MAX_CHARS {
                return Some(format!(
                    "Tweet is {} characters; the limit is {}",
                    chars, TWITTER_MAX_CHARS
                ));
            }
        }
        Platform::Instagram => {
            if media_url.is_none() {
                return Some("Instagram posts require a media URL".to_string());
            }
            let chars = content.chars().count();
            if chars > INSTAGRAM_MAX_CAPTION_CHARS {
                return Some(format!(
                    "Caption is {} characters; the limit is {}",
                    chars, INSTAGRAM_MAX_CAPTION_CHARS
                ));
            }
        }
    }
    None
}

/// Map a platform error message to an actionable kind
pub fn classify_publish_error(msg: &str) -> PublishErrorKind {
    let lower = msg.to_lowercase();
    if lower.contains("429") || lower.contains("rate limit") || lower.contains("too many requests")
    {
        PublishErrorKind::RateLimited
    } else if lower.contains("401") || lower.contains("unauthorized") {
        PublishErrorKind::NotConnected
    } else if lower.contains("403")
        || lower.contains("forbidden")
        || lower.contains("not permitted")
        || lower.contains("app permissions")
    {
        PublishErrorKind::PermissionDenied
    } else {
        PublishErrorKind::Transient
    }
}

fn is_duplicate_error(msg: &str) -> bool {
    msg.to_lowercase().contains("duplicate")
}

/// Append a short random marker so a duplicate-rejected tweet differs
/// from the original.
fn with_duplicate_suffix(text: &str) -> String {
    let suffix: String = (0..4).map(|_| format!("{:x}", rand::random::<u8>() & 0xf)).collect();
    format!("{} [{}]", text, suffix)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ConnectionCache;

    fn publisher() -> (Publisher, Arc<Db>) {
        let db = Arc::new(Db::open(":memory:").unwrap());
        let cache = Arc::new(ConnectionCache::new());
        let verifier = Arc::new(ConnectionVerifier::new(db.clone(), cache, None, None));
        (Publisher::new(db.clone(), verifier, None, None), db)
    }

    #[test]
    fn test_validate_rejects_empty_and_oversized() {
        assert!(validate(Platform::Twitter, "", None).is_some());
        assert!(validate(Platform::Twitter, "   ", None).is_some());
        assert!(validate(Platform::Twitter, &"x".repeat(281), None).is_some());
        assert!(validate(Platform::Twitter, &"x".repeat(280), None).is_none());
        assert!(validate(Platform::Instagram, "caption", None).is_some());
        assert!(validate(Platform::Instagram, "caption", Some("https://img")).is_none());
    }

    #[test]
    fn test_classify_publish_error() {
        assert_eq!(
            classify_publish_error("Twitter API error (429 Too Many Requests): slow down"),
            PublishErrorKind::RateLimited
        );
        assert_eq!(
            classify_publish_error("You hit the rate limit"),
            PublishErrorKind::RateLimited
        );
        assert_eq!(
            classify_publish_error("Twitter API error (401 Unauthorized): bad token"),
            PublishErrorKind::NotConnected
        );
        assert_eq!(
            classify_publish_error("Twitter API error (403 Forbidden): read-only app permissions"),
            PublishErrorKind::PermissionDenied
        );
        assert_eq!(
            classify_publish_error("connection reset by peer"),
            PublishErrorKind::Transient
        );
    }

    #[test]
    fn test_duplicate_suffix_changes_text() {
        let a = with_duplicate_suffix("hello");
        assert!(a.starts_with("hello ["));
        assert!(a.len() > "hello".len());
        assert!(is_duplicate_error("Status is a duplicate"));
        assert!(!is_duplicate_error("some other failure"));
    }

    #[tokio::test]
    async fn test_publish_without_connection_writes_nothing() {
        let (publisher, db) = publisher();
        let user = db.ensure_user("u1").unwrap();

        let outcome = publisher
            .publish(user, Platform::Twitter, "hello world", ContentType::Text, None, None)
            .await;

        assert!(!outcome.success);
        assert_eq!(outcome.error_kind, Some(PublishErrorKind::NotConnected));
        assert_eq!(db.count_content(user).unwrap(), 0);
        assert_eq!(db.count_rows("content_metrics").unwrap(), 0);
        assert_eq!(db.count_rows("activity_history").unwrap(), 0);
    }

    #[tokio::test]
    async fn test_validation_failure_precedes_connection_check() {
        let (publisher, db) = publisher();
        let user = db.ensure_user("u1").unwrap();

        let outcome = publisher
            .publish(user, Platform::Twitter, "", ContentType::Text, None, None)
            .await;

        assert_eq!(outcome.error_kind, Some(PublishErrorKind::Validation));
    }

    #[test]
    fn test_record_publish_writes_all_three_rows() {
        let (publisher, db) = publisher();
        let user = db.ensure_user("u1").unwrap();

        let content_id = publisher.record_publish(
            user,
            Platform::Twitter,
            "hello",
            ContentType::Text,
            Some("announcement"),
            None,
            "tw-42",
        );

        let id = content_id.unwrap();
        let item = db.get_content(id).unwrap().unwrap();
        assert_eq!(item.status, ContentStatus::Published);
        assert_eq!(item.platform_post_id.as_deref(), Some("tw-42"));
        assert!(item.published_at.is_some());

        let metrics = db.get_content_metrics(id).unwrap().unwrap();
        assert_eq!(metrics.likes, 0);

        let activity = db.list_activity(user, 10).unwrap();
        assert_eq!(activity.len(), 1);
        assert_eq!(activity[0].activity_type, "publish");
        assert_eq!(activity[0].content_id, Some(id));
    }
}
