//! Instagram Graph API client.
//!
//! Authenticated with a statically configured long-lived access token
//! (service-account style): the authorization-code redirect is still
//! walked so the user consents, but the code is not exchanged live;
//! the configured token is what gets persisted.

use serde::Deserialize;

use crate::oauth::{percent_encode, truncate_error};

const GRAPH_BASE: &str = "https://graph.facebook.com/v19.0";
const AUTHORIZE_URL: &str = "https://api.instagram.com/oauth/authorize";

/// Instagram caption limit
pub const INSTAGRAM_MAX_CAPTION_CHARS: usize = 2_200;

/// Static application credentials for the Instagram integration
#[derive(Debug, Clone)]
pub struct InstagramKeys {
    pub app_id: String,
    pub access_token: String,
    pub ig_user_id: String,
}

/// Profile data for the connected Instagram account
#[derive(Debug, Clone)]
pub struct InstagramProfile {
    pub id: String,
    pub username: String,
    pub profile_picture_url: Option<String>,
    pub followers_count: i64,
    pub follows_count: i64,
}

/// Engagement counters for one media object
#[derive(Debug, Clone)]
pub struct MediaMetrics {
    pub id: String,
    pub likes: i64,
    pub comments: i64,
}

#[derive(Debug, Deserialize)]
struct ProfileResponse {
    id: String,
    username: Option<String>,
    profile_picture_url: Option<String>,
    followers_count: Option<i64>,
    follows_count: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct MediaListResponse {
    data: Option<Vec<MediaItem>>,
}

#[derive(Debug, Deserialize)]
struct MediaItem {
    id: String,
    like_count: Option<i64>,
    comments_count: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct IdResponse {
    id: Option<String>,
}

pub struct InstagramClient {
    http: reqwest::Client,
    keys: InstagramKeys,
}

impl InstagramClient {
    pub fn new(http: reqwest::Client, keys: InstagramKeys) -> Self {
        Self { http, keys }
    }

    /// Authorization-code consent URL. `state` ties the redirect back to
    /// a registered flow; the callback rejects unknown states.
    pub fn authorize_url(&self, redirect_uri: &str, state: &str) -> String {
        format!(
            "{}?client_id={}&redirect_uri={}&scope=user_profile,user_media&response_type=code&state={}",
            AUTHORIZE_URL,
            percent_encode(&self.keys.app_id),
            percent_encode(redirect_uri),
            percent_encode(state)
        )
    }

    /// Fetch profile data for the configured account. Doubles as the
    /// credential verification call.
    pub async fn profile(&self) -> Result<InstagramProfile, String> {
        let url = format!(
            "{}/{}?fields=username,profile_picture_url,followers_count,follows_count&access_token={}",
            GRAPH_BASE,
            self.keys.ig_user_id,
            percent_encode(&self.keys.access_token)
        );

        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| format!("Instagram profile request failed: {}", e))?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        if !status.is_success() {
            return Err(format!(
                "Instagram API error ({}): {}",
                status,
                truncate_error(&body)
            ));
        }

        let parsed: ProfileResponse = serde_json::from_str(&body)
            .map_err(|e| format!("Failed to parse profile response: {}", e))?;

        Ok(InstagramProfile {
            id: parsed.id,
            username: parsed.username.unwrap_or_default(),
            profile_picture_url: parsed.profile_picture_url,
            followers_count: parsed.followers_count.unwrap_or(0),
            follows_count: parsed.follows_count.unwrap_or(0),
        })
    }

    /// Publish an image post. Two-step container flow: create a media
    /// container, then publish it. Instagram has no text-only posts, so
    /// `image_url` is required (validated upstream).
    pub async fn publish(&self, caption: &str, image_url: &str) -> Result<String, String> {
        // Step 1: create the media container
        let create_url = format!("{}/{}/media", GRAPH_BASE, self.keys.ig_user_id);
        let create_params = [
            ("image_url", image_url),
            ("caption", caption),
            ("access_token", self.keys.access_token.as_str()),
        ];

        let response = self
            .http
            .post(&create_url)
            .form(&create_params)
            .send()
            .await
            .map_err(|e| format!("Instagram media request failed: {}", e))?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        if !status.is_success() {
            return Err(format!(
                "Instagram API error ({}): {}",
                status,
                truncate_error(&body)
            ));
        }

        let creation: IdResponse = serde_json::from_str(&body)
            .map_err(|e| format!("Failed to parse media response: {}", e))?;
        let creation_id = creation
            .id
            .ok_or_else(|| "No creation id returned".to_string())?;

        // Step 2: publish the container
        let publish_url = format!("{}/{}/media_publish", GRAPH_BASE, self.keys.ig_user_id);
        let publish_params = [
            ("creation_id", creation_id.as_str()),
            ("access_token", self.keys.access_token.as_str()),
        ];

        let response = self
            .http
            .post(&publish_url)
            .form(&publish_params)
            .send()
            .await
            .map_err(|e| format!("Instagram publish request failed: {}", e))?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        if !status.is_success() {
            return Err(format!(
                "Instagram API error ({}): {}",
                status,
                truncate_error(&body)
            ));
        }

        let published: IdResponse = serde_json::from_str(&body)
            .map_err(|e| format!("Failed to parse publish response: {}", e))?;
        published
            .id
            .ok_or_else(|| "No media id returned".to_string())
    }

    /// Recent media with engagement counters (refresher input)
    pub async fn media_metrics(&self) -> Result<Vec<MediaMetrics>, String> {
        let url = format!(
            "{}/{}/media?fields=id,like_count,comments_count&limit=20&access_token={}",
            GRAPH_BASE,
            self.keys.ig_user_id,
            percent_encode(&self.keys.access_token)
        );

        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| format!("Instagram media request failed: {}", e))?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        if !status.is_success() {
            return Err(format!(
                "Instagram API error ({}): {}",
                status,
                truncate_error(&body)
            ));
        }

        let parsed: MediaListResponse = serde_json::from_str(&body)
            .map_err(|e| format!("Failed to parse media list: {}", e))?;

        Ok(parsed
            .data
            .unwrap_or_default()
            .into_iter()
            .map(|m| MediaMetrics {
                id: m.id,
                likes: m.like_count.unwrap_or(0),
                comments: m.comments_count.unwrap_or(0),
            })
            .collect())
    }

    pub fn configured_token(&self) -> &str {
        &self.keys.access_token
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_authorize_url_encodes_redirect_and_state() {
        let client = InstagramClient::new(
            reqwest::Client::new(),
            InstagramKeys {
                app_id: "app123".to_string(),
                access_token: "tok".to_string(),
                ig_user_id: "178414".to_string(),
            },
        );
        let url = client.authorize_url("https://example.com/oauth/callback/instagram", "flow-1");
        assert!(url.contains("client_id=app123"));
        assert!(url.contains("redirect_uri=https%3A%2F%2Fexample.com%2Foauth%2Fcallback%2Finstagram"));
        assert!(url.contains("state=flow-1"));
        assert!(url.contains("response_type=code"));
    }
}
