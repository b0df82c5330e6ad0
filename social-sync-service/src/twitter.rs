//! Twitter/X API client with OAuth 1.0a authentication.
//!
//! Covers the three-legged handshake (request token, authorize URL,
//! access-token exchange), credential verification, publishing, and
//! timeline metrics for the statistics refresher.

use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Deserialize;

use crate::oauth::{form_value, oauth_header, parse_form_body, percent_encode, truncate_error};

/// OAuth endpoints (request token / authorize / access token)
const OAUTH_BASE: &str = "https://api.twitter.com/oauth";
/// Twitter API v2 base URL
const API_BASE: &str = "https://api.twitter.com/2";

/// Maximum characters per tweet (standard / free accounts)
pub const TWITTER_MAX_CHARS: usize = 280;

/// Application (consumer) credentials
#[derive(Debug, Clone)]
pub struct TwitterAppKeys {
    pub consumer_key: String,
    pub consumer_secret: String,
}

/// Temporary credentials from the request-token leg
#[derive(Debug, Clone)]
pub struct RequestToken {
    pub token: String,
    pub secret: String,
}

/// Permanent per-user credentials from the access-token exchange
#[derive(Debug, Clone)]
pub struct AccessToken {
    pub token: String,
    pub secret: String,
    pub user_id: String,
    pub screen_name: String,
}

/// Profile data for the authenticated user
#[derive(Debug, Clone)]
pub struct TwitterProfile {
    pub id: String,
    pub username: String,
    pub name: String,
    pub profile_image_url: Option<String>,
    pub followers_count: i64,
    pub following_count: i64,
}

/// A tweet with its public engagement counters
#[derive(Debug, Clone)]
pub struct TweetMetrics {
    pub id: String,
    pub likes: i64,
    pub replies: i64,
    pub retweets: i64,
    pub impressions: i64,
}

#[derive(Debug, Deserialize)]
struct SingleUserResponse {
    data: Option<UserData>,
}

#[derive(Debug, Deserialize)]
struct UserData {
    id: String,
    username: String,
    name: String,
    profile_image_url: Option<String>,
    public_metrics: Option<UserPublicMetrics>,
}

#[derive(Debug, Deserialize)]
struct UserPublicMetrics {
    followers_count: Option<i64>,
    following_count: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct TweetsResponse {
    data: Option<Vec<TweetData>>,
    errors: Option<Vec<ApiError>>,
}

#[derive(Debug, Deserialize)]
struct TweetData {
    id: String,
    public_metrics: Option<TweetPublicMetrics>,
}

#[derive(Debug, Deserialize)]
struct TweetPublicMetrics {
    like_count: Option<i64>,
    reply_count: Option<i64>,
    retweet_count: Option<i64>,
    impression_count: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct PostTweetResponse {
    data: Option<PostedTweet>,
    errors: Option<Vec<ApiError>>,
}

#[derive(Debug, Deserialize)]
struct PostedTweet {
    id: String,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: String,
}

/// Rate limit state from Twitter API response headers
#[derive(Debug, Clone, Copy, Default)]
pub struct RateLimitInfo {
    /// Remaining requests in the current window
    pub remaining: Option<u32>,
    /// Unix timestamp when the window resets
    pub reset_at: Option<u64>,
}

impl RateLimitInfo {
    fn from_response(response: &reqwest::Response) -> Self {
        let remaining = response
            .headers()
            .get("x-rate-limit-remaining")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok());

        let reset_at = response
            .headers()
            .get("x-rate-limit-reset")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok());

        Self { remaining, reset_at }
    }

    pub fn is_rate_limited(&self) -> bool {
        self.remaining == Some(0)
    }

    /// Seconds until the window resets, zero when already past
    pub fn seconds_until_reset(&self) -> Option<u64> {
        self.reset_at.map(|reset| {
            let now = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0);
            reset.saturating_sub(now)
        })
    }
}

/// Twitter client. Per-user tokens are passed per call since the service
/// signs requests for many connected accounts with one app key pair.
pub struct TwitterClient {
    http: reqwest::Client,
    keys: TwitterAppKeys,
    rate_limit: Mutex<RateLimitInfo>,
}

impl TwitterClient {
    pub fn new(http: reqwest::Client, keys: TwitterAppKeys) -> Self {
        Self {
            http,
            keys,
            rate_limit: Mutex::new(RateLimitInfo::default()),
        }
    }

    /// Rate limit state observed on the most recent API response
    pub fn rate_limit(&self) -> RateLimitInfo {
        *self.rate_limit.lock().unwrap()
    }

    fn note_rate_limit(&self, response: &reqwest::Response) {
        let info = RateLimitInfo::from_response(response);
        if info.remaining.is_some() || info.reset_at.is_some() {
            *self.rate_limit.lock().unwrap() = info;
        }
    }

    #[cfg(test)]
    pub(crate) fn set_rate_limit(&self, info: RateLimitInfo) {
        *self.rate_limit.lock().unwrap() = info;
    }

    /// The authorize URL the user is sent to after the request-token leg
    pub fn authorize_url(request_token: &str) -> String {
        format!(
            "{}/authorize?oauth_token={}",
            OAUTH_BASE,
            percent_encode(request_token)
        )
    }

    /// Obtain a request token, passing the callback URL the platform will
    /// redirect to after the user authorizes.
    pub async fn request_token(&self, callback_url: &str) -> Result<RequestToken, String> {
        let url = format!("{}/request_token", OAUTH_BASE);
        let auth = oauth_header(
            "POST",
            &url,
            &self.keys.consumer_key,
            &self.keys.consumer_secret,
            None,
            &[("oauth_callback", callback_url)],
            None,
        );

        let response = self
            .http
            .post(&url)
            .header("Authorization", auth)
            .send()
            .await
            .map_err(|e| format!("Twitter request_token failed: {}", e))?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        if !status.is_success() {
            return Err(format!(
                "Twitter API error ({}): {}",
                status,
                truncate_error(&body)
            ));
        }

        let pairs = parse_form_body(&body);
        let token = form_value(&pairs, "oauth_token")
            .ok_or_else(|| "Request token response missing oauth_token".to_string())?;
        let secret = form_value(&pairs, "oauth_token_secret")
            .ok_or_else(|| "Request token response missing oauth_token_secret".to_string())?;

        if form_value(&pairs, "oauth_callback_confirmed") != Some("true") {
            log::warn!("Twitter: request token did not confirm the callback URL");
        }

        Ok(RequestToken {
            token: token.to_string(),
            secret: secret.to_string(),
        })
    }

    /// Exchange a verifier for permanent per-user credentials
    pub async fn access_token(
        &self,
        request_token: &RequestToken,
        verifier: &str,
    ) -> Result<AccessToken, String> {
        let url = format!("{}/access_token", OAUTH_BASE);
        let auth = oauth_header(
            "POST",
            &url,
            &self.keys.consumer_key,
            &self.keys.consumer_secret,
            Some((&request_token.token, &request_token.secret)),
            &[("oauth_verifier", verifier)],
            None,
        );

        let response = self
            .http
            .post(&url)
            .header("Authorization", auth)
            .send()
            .await
            .map_err(|e| format!("Twitter access_token failed: {}", e))?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        if !status.is_success() {
            return Err(format!(
                "Twitter API error ({}): {}",
                status,
                truncate_error(&body)
            ));
        }

        let pairs = parse_form_body(&body);
        let token = form_value(&pairs, "oauth_token")
            .ok_or_else(|| "Access token response missing oauth_token".to_string())?;
        let secret = form_value(&pairs, "oauth_token_secret")
            .ok_or_else(|| "Access token response missing oauth_token_secret".to_string())?;

        Ok(AccessToken {
            token: token.to_string(),
            secret: secret.to_string(),
            user_id: form_value(&pairs, "user_id").unwrap_or_default().to_string(),
            screen_name: form_value(&pairs, "screen_name")
                .unwrap_or_default()
                .to_string(),
        })
    }

    /// Verify stored credentials by fetching the authenticated user.
    /// Doubles as the profile fetch (username, avatar, follower counts).
    pub async fn verify_credentials(
        &self,
        token: &str,
        token_secret: &str,
    ) -> Result<TwitterProfile, String> {
        let url = format!("{}/users/me", API_BASE);
        let query_params = [("user.fields", "profile_image_url,public_metrics")];
        let auth = self.user_header("GET", &url, token, token_secret, Some(&query_params));

        let response = self
            .http
            .get(format!(
                "{}?user.fields=profile_image_url,public_metrics",
                url
            ))
            .header("Authorization", auth)
            .send()
            .await
            .map_err(|e| format!("Twitter verify request failed: {}", e))?;

        self.note_rate_limit(&response);
        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        if !status.is_success() {
            return Err(format!(
                "Twitter API error ({}): {}",
                status,
                truncate_error(&body)
            ));
        }

        let parsed: SingleUserResponse = serde_json::from_str(&body)
            .map_err(|e| format!("Failed to parse users/me response: {}", e))?;

        let user = parsed
            .data
            .ok_or_else(|| "No user data returned".to_string())?;
        let metrics = user.public_metrics.unwrap_or(UserPublicMetrics {
            followers_count: None,
            following_count: None,
        });

        Ok(TwitterProfile {
            id: user.id,
            username: user.username,
            name: user.name,
            profile_image_url: user.profile_image_url,
            followers_count: metrics.followers_count.unwrap_or(0),
            following_count: metrics.following_count.unwrap_or(0),
        })
    }

    /// Post a tweet, returning the new tweet id
    pub async fn post_tweet(
        &self,
        token: &str,
        token_secret: &str,
        text: &str,
    ) -> Result<String, String> {
        let url = format!("{}/tweets", API_BASE);
        let auth = self.user_header("POST", &url, token, token_secret, None);

        let body = serde_json::json!({ "text": text });

        let response = self
            .http
            .post(&url)
            .header("Authorization", auth)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| format!("Twitter post request failed: {}", e))?;

        self.note_rate_limit(&response);
        let status = response.status();
        let response_body = response.text().await.unwrap_or_default();

        if !status.is_success() {
            return Err(format!(
                "Twitter API error ({}): {}",
                status,
                truncate_error(&response_body)
            ));
        }

        let parsed: PostTweetResponse = serde_json::from_str(&response_body)
            .map_err(|e| format!("Failed to parse tweet response: {}", e))?;

        if let Some(errors) = parsed.errors {
            let msg = errors
                .iter()
                .map(|e| e.message.clone())
                .collect::<Vec<_>>()
                .join("; ");
            return Err(format!("Twitter API errors: {}", msg));
        }

        parsed
            .data
            .map(|t| t.id)
            .ok_or_else(|| "No tweet data returned".to_string())
    }

    /// Recent tweets with public metrics for a user (refresher input)
    pub async fn user_tweet_metrics(
        &self,
        token: &str,
        token_secret: &str,
        platform_user_id: &str,
    ) -> Result<Vec<TweetMetrics>, String> {
        let url = format!("{}/users/{}/tweets", API_BASE, platform_user_id);
        let query_params = [
            ("max_results", "20"),
            ("tweet.fields", "public_metrics"),
            ("exclude", "retweets"),
        ];
        let auth = self.user_header("GET", &url, token, token_secret, Some(&query_params));

        let query_string: String = query_params
            .iter()
            .map(|(k, v)| format!("{}={}", percent_encode(k), percent_encode(v)))
            .collect::<Vec<_>>()
            .join("&");

        let response = self
            .http
            .get(format!("{}?{}", url, query_string))
            .header("Authorization", auth)
            .send()
            .await
            .map_err(|e| format!("Twitter timeline request failed: {}", e))?;

        self.note_rate_limit(&response);
        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        if !status.is_success() {
            return Err(format!(
                "Twitter API error ({}): {}",
                status,
                truncate_error(&body)
            ));
        }

        let parsed: TweetsResponse = serde_json::from_str(&body)
            .map_err(|e| format!("Failed to parse timeline response: {}", e))?;

        if let Some(errors) = parsed.errors {
            let msg = errors
                .iter()
                .map(|e| e.message.clone())
                .collect::<Vec<_>>()
                .join("; ");
            return Err(format!("Twitter API errors: {}", msg));
        }

        Ok(parsed
            .data
            .unwrap_or_default()
            .into_iter()
            .map(|t| {
                let m = t.public_metrics.unwrap_or(TweetPublicMetrics {
                    like_count: None,
                    reply_count: None,
                    retweet_count: None,
                    impression_count: None,
                });
                TweetMetrics {
                    id: t.id,
                    likes: m.like_count.unwrap_or(0),
                    replies: m.reply_count.unwrap_or(0),
                    retweets: m.retweet_count.unwrap_or(0),
                    impressions: m.impression_count.unwrap_or(0),
                }
            })
            .collect())
    }

    fn user_header(
        &self,
        method: &str,
        url: &str,
        token: &str,
        token_secret: &str,
        request_params: Option<&[(&str, &str)]>,
    ) -> String {
        oauth_header(
            method,
            url,
            &self.keys.consumer_key,
            &self.keys.consumer_secret,
            Some((token, token_secret)),
            &[],
            request_params,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_authorize_url() {
        assert_eq!(
            TwitterClient::authorize_url("abc 123"),
            "https://api.twitter.com/oauth/authorize?oauth_token=abc%20123"
        );
    }

    #[test]
    fn test_rate_limit_exhaustion() {
        let info = RateLimitInfo {
            remaining: Some(0),
            reset_at: Some(u64::MAX),
        };
        assert!(info.is_rate_limited());
        assert!(info.seconds_until_reset().unwrap() > 0);

        let open = RateLimitInfo {
            remaining: Some(42),
            reset_at: Some(u64::MAX),
        };
        assert!(!open.is_rate_limited());

        // No headers seen yet: never treated as limited
        assert!(!RateLimitInfo::default().is_rate_limited());
        assert_eq!(RateLimitInfo::default().seconds_until_reset(), None);
    }

    #[test]
    fn test_rate_limit_reset_in_the_past_counts_down_to_zero() {
        let info = RateLimitInfo {
            remaining: Some(0),
            reset_at: Some(0),
        };
        assert_eq!(info.seconds_until_reset(), Some(0));
    }
}
