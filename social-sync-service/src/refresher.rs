//! Background statistics refresher.
//!
//! On a fixed interval (and immediately when an account connects),
//! re-pulls profile and post engagement data for every connected
//! account and upserts the aggregate rows. All period tables are keyed
//! by (user, platform, period), so a manual refresh racing the timer
//! cannot create duplicate rows.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{oneshot, Mutex};
use tokio::time::interval;

use social_sync_types::{ContentMetrics, Platform, PlatformConnection};

use crate::db::Db;
use crate::instagram::InstagramClient;
use crate::twitter::TwitterClient;

pub const DEFAULT_REFRESH_INTERVAL_SECS: u64 = 3600;

pub struct Refresher {
    db: Arc<Db>,
    twitter: Option<Arc<TwitterClient>>,
    instagram: Option<Arc<InstagramClient>>,
    last_tick_at: Arc<Mutex<Option<String>>>,
}

impl Refresher {
    pub fn new(
        db: Arc<Db>,
        twitter: Option<Arc<TwitterClient>>,
        instagram: Option<Arc<InstagramClient>>,
        last_tick_at: Arc<Mutex<Option<String>>>,
    ) -> Self {
        Self {
            db,
            twitter,
            instagram,
            last_tick_at,
        }
    }

    /// Run the refresh loop until the shutdown signal fires. Owned by
    /// the caller through the shutdown channel rather than living as
    /// ambient interval state.
    pub async fn run(
        self: Arc<Self>,
        interval_secs: u64,
        mut shutdown_rx: oneshot::Receiver<()>,
    ) {
        log::info!("Refresher: started (interval: {}s)", interval_secs);
        let mut tick_interval = interval(Duration::from_secs(interval_secs));
        // The first tick fires immediately; consume it so the loop waits
        // a full interval before the first scheduled refresh.
        tick_interval.tick().await;

        loop {
            tokio::select! {
                _ = &mut shutdown_rx => {
                    log::info!("Refresher: received shutdown signal");
                    break;
                }
                _ = tick_interval.tick() => {
                    self.tick().await;
                }
            }
        }
    }

    /// One refresh pass over every connected account
    pub async fn tick(&self) {
        let connections = match self.db.list_connected() {
            Ok(c) => c,
            Err(e) => {
                log::error!("Refresher: failed to list connections: {}", e);
                return;
            }
        };

        for conn in &connections {
            if let Err(e) = self.refresh_connection(conn).await {
                log::warn!(
                    "Refresher: {} refresh for user {} failed: {}",
                    conn.platform,
                    conn.user_id,
                    e
                );
            }
        }

        *self.last_tick_at.lock().await = Some(Utc::now().to_rfc3339());

        if !connections.is_empty() {
            log::debug!("Refresher: tick complete ({} accounts)", connections.len());
        }
    }

    /// Refresh every connected platform for one user. Invoked right
    /// after a successful connect and by the manual refresh endpoint.
    pub async fn refresh_user(&self, user_id: i64) {
        for platform in [Platform::Twitter, Platform::Instagram] {
            let conn = match self.db.get_connection(user_id, platform) {
                Ok(Some(c)) if c.connected => c,
                Ok(_) => continue,
                Err(e) => {
                    log::error!("Refresher: connection lookup failed: {}", e);
                    continue;
                }
            };
            if let Err(e) = self.refresh_connection(&conn).await {
                log::warn!(
                    "Refresher: {} refresh for user {} failed: {}",
                    platform,
                    user_id,
                    e
                );
            }
        }
    }

    async fn refresh_connection(&self, conn: &PlatformConnection) -> Result<(), String> {
        match conn.platform {
            Platform::Twitter => self.refresh_twitter(conn).await,
            Platform::Instagram => self.refresh_instagram(conn).await,
        }
    }

    async fn refresh_twitter(&self, conn: &PlatformConnection) -> Result<(), String> {
        let client = self
            .twitter
            .as_ref()
            .ok_or_else(|| "Twitter integration not configured".to_string())?;
        let token = conn
            .access_token
            .as_deref()
            .ok_or_else(|| "Stored connection has no token".to_string())?;
        let secret = conn
            .access_token_secret
            .as_deref()
            .ok_or_else(|| "Stored connection has no token secret".to_string())?;

        // A refresh is purely opportunistic: when the API window is
        // exhausted, defer to the next tick instead of burning the
        // reset on guaranteed 429s.
        let limit = client.rate_limit();
        if limit.is_rate_limited() {
            if let Some(secs) = limit.seconds_until_reset() {
                if secs > 0 {
                    return Err(format!("Twitter rate limit exhausted, resets in {}s", secs));
                }
            }
        }

        let profile = client.verify_credentials(token, secret).await?;
        let tweets = client.user_tweet_metrics(token, secret, &profile.id).await?;

        let user_id = conn.user_id;
        let platform = conn.platform;

        self.db
            .upsert_follower_metrics(
                user_id,
                platform,
                &day_key(),
                profile.followers_count,
                profile.following_count,
            )
            .map_err(|e| format!("Follower upsert failed: {}", e))?;

        let total_likes: i64 = tweets.iter().map(|t| t.likes).sum();
        let total_replies: i64 = tweets.iter().map(|t| t.replies).sum();
        let total_retweets: i64 = tweets.iter().map(|t| t.retweets).sum();
        let total_impressions: i64 = tweets.iter().map(|t| t.impressions).sum();

        let rate = engagement_rate(
            total_likes + total_replies + total_retweets,
            tweets.len() as i64,
            profile.followers_count,
        );

        self.db
            .upsert_engagement_metrics(
                user_id,
                platform,
                &period_key(),
                rate,
                total_likes,
                total_replies,
                total_retweets,
            )
            .map_err(|e| format!("Engagement upsert failed: {}", e))?;

        self.db
            .upsert_daily_engagement(user_id, platform, &weekday_key(), rate, tweets.len() as i64)
            .map_err(|e| format!("Daily engagement upsert failed: {}", e))?;

        self.db
            .upsert_platform_statistics(
                user_id,
                platform,
                &period_key(),
                tweets.len() as i64,
                total_impressions,
                total_impressions,
            )
            .map_err(|e| format!("Statistics upsert failed: {}", e))?;

        // Push per-post counters onto the content rows we published
        for tweet in &tweets {
            if let Ok(Some(item)) = self.db.find_content_by_post_id(user_id, platform, &tweet.id)
            {
                let metrics = ContentMetrics {
                    content_id: item.id,
                    likes: tweet.likes,
                    comments: tweet.replies,
                    shares: tweet.retweets,
                    views: tweet.impressions,
                    impressions: tweet.impressions,
                    reach: tweet.impressions,
                };
                if let Err(e) = self.db.update_content_metrics(&metrics) {
                    log::warn!("Refresher: metrics update for content {} failed: {}", item.id, e);
                }
            }
        }

        Ok(())
    }

    async fn refresh_instagram(&self, conn: &PlatformConnection) -> Result<(), String> {
        let client = self
            .instagram
            .as_ref()
            .ok_or_else(|| "Instagram integration not configured".to_string())?;

        let profile = client.profile().await?;
        let media = client.media_metrics().await?;

        let user_id = conn.user_id;
        let platform = conn.platform;

        self.db
            .upsert_follower_metrics(
                user_id,
                platform,
                &day_key(),
                profile.followers_count,
                profile.follows_count,
            )
            .map_err(|e| format!("Follower upsert failed: {}", e))?;

        let total_likes: i64 = media.iter().map(|m| m.likes).sum();
        let total_comments: i64 = media.iter().map(|m| m.comments).sum();

        let rate = engagement_rate(
            total_likes + total_comments,
            media.len() as i64,
            profile.followers_count,
        );

        self.db
            .upsert_engagement_metrics(
                user_id,
                platform,
                &period_key(),
                rate,
                total_likes,
                total_comments,
                0,
            )
            .map_err(|e| format!("Engagement upsert failed: {}", e))?;

        self.db
            .upsert_daily_engagement(user_id, platform, &weekday_key(), rate, media.len() as i64)
            .map_err(|e| format!("Daily engagement upsert failed: {}", e))?;

        self.db
            .upsert_platform_statistics(user_id, platform, &period_key(), media.len() as i64, 0, 0)
            .map_err(|e| format!("Statistics upsert failed: {}", e))?;

        for item in &media {
            if let Ok(Some(row)) = self.db.find_content_by_post_id(user_id, platform, &item.id) {
                let metrics = ContentMetrics {
                    content_id: row.id,
                    likes: item.likes,
                    comments: item.comments,
                    shares: 0,
                    views: 0,
                    impressions: 0,
                    reach: 0,
                };
                if let Err(e) = self.db.update_content_metrics(&metrics) {
                    log::warn!("Refresher: metrics update for content {} failed: {}", row.id, e);
                }
            }
        }

        Ok(())
    }
}

/// Day period key, e.g. "2026-08-30"
pub fn day_key() -> String {
    Utc::now().format("%Y-%m-%d").to_string()
}

/// ISO-week period key, e.g. "2026-W35"
pub fn period_key() -> String {
    Utc::now().format("%G-W%V").to_string()
}

/// Lowercase weekday name, e.g. "saturday"
pub fn weekday_key() -> String {
    Utc::now().format("%A").to_string().to_lowercase()
}

/// Average engagements per post as a percentage of followers
fn engagement_rate(total_engagements: i64, post_count: i64, followers: i64) -> f64 {
    if post_count == 0 || followers == 0 {
        return 0.0;
    }
    (total_engagements as f64 / post_count as f64) / followers as f64 * 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_period_keys_have_expected_shape() {
        let day = day_key();
        assert_eq!(day.len(), 10);
        assert_eq!(&day[4..5], "-");

        let week = period_key();
        assert!(week.contains("-W"));

        let weekday = weekday_key();
        assert!(matches!(
            weekday.as_str(),
            "monday" | "tuesday" | "wednesday" | "thursday" | "friday" | "saturday" | "sunday"
        ));
    }

    #[test]
    fn test_engagement_rate() {
        // 10 engagements over 5 posts with 100 followers = 2 per post = 2%
        assert_eq!(engagement_rate(10, 5, 100), 2.0);
        assert_eq!(engagement_rate(0, 5, 100), 0.0);
        // No posts or no followers cannot divide
        assert_eq!(engagement_rate(10, 0, 100), 0.0);
        assert_eq!(engagement_rate(10, 5, 0), 0.0);
    }

    #[tokio::test]
    async fn test_exhausted_rate_limit_defers_twitter_refresh() {
        use crate::twitter::{RateLimitInfo, TwitterAppKeys, TwitterClient};

        let db = Arc::new(Db::open(":memory:").unwrap());
        let user = db.ensure_user("limited").unwrap();
        let conn = db
            .upsert_connection(user, Platform::Twitter, "limited", "tok", Some("sec"), None)
            .unwrap();

        let client = Arc::new(TwitterClient::new(
            reqwest::Client::new(),
            TwitterAppKeys {
                consumer_key: "ck".to_string(),
                consumer_secret: "cs".to_string(),
            },
        ));
        client.set_rate_limit(RateLimitInfo {
            remaining: Some(0),
            reset_at: Some(u64::MAX),
        });

        let last_tick = Arc::new(Mutex::new(None));
        let refresher = Refresher::new(db.clone(), Some(client), None, last_tick);

        let err = refresher.refresh_twitter(&conn).await.unwrap_err();
        assert!(err.contains("rate limit"));
        // Deferred before any metrics write
        assert!(db
            .get_follower_metrics(user, Platform::Twitter, &day_key())
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_tick_with_no_connections_records_timestamp() {
        let db = Arc::new(Db::open(":memory:").unwrap());
        let last_tick = Arc::new(Mutex::new(None));
        let refresher = Refresher::new(db, None, None, last_tick.clone());

        refresher.tick().await;
        assert!(last_tick.lock().await.is_some());
    }
}
