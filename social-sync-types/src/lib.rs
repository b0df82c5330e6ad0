//! Shared types for the social sync service and its RPC clients.

use serde::{Deserialize, Serialize};

// =====================================================
// Platforms
// =====================================================

/// A supported external platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Instagram,
    Twitter,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Instagram => "instagram",
            Platform::Twitter => "twitter",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "instagram" => Some(Platform::Instagram),
            "twitter" => Some(Platform::Twitter),
            _ => None,
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =====================================================
// Domain Types
// =====================================================

/// A stored record asserting a user has authorized this application
/// against an external platform. One row per (user, platform).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformConnection {
    pub id: i64,
    pub user_id: i64,
    pub platform: Platform,
    pub connected: bool,
    pub username: Option<String>,
    pub access_token: Option<String>,
    pub access_token_secret: Option<String>,
    pub profile_image: Option<String>,
    pub last_verified: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Content lifecycle state. Status only ever advances
/// (draft -> scheduled -> published, or draft -> published directly).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentStatus {
    Draft,
    Scheduled,
    Published,
}

impl ContentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentStatus::Draft => "draft",
            ContentStatus::Scheduled => "scheduled",
            ContentStatus::Published => "published",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(ContentStatus::Draft),
            "scheduled" => Some(ContentStatus::Scheduled),
            "published" => Some(ContentStatus::Published),
            _ => None,
        }
    }

    /// Rank used to enforce forward-only transitions
    pub fn rank(&self) -> i64 {
        match self {
            ContentStatus::Draft => 0,
            ContentStatus::Scheduled => 1,
            ContentStatus::Published => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Text,
    Image,
    Video,
}

impl ContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::Text => "text",
            ContentType::Image => "image",
            ContentType::Video => "video",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "text" => Some(ContentType::Text),
            "image" => Some(ContentType::Image),
            "video" => Some(ContentType::Video),
            _ => None,
        }
    }
}

/// A piece of content owned by a user
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentItem {
    pub id: i64,
    pub user_id: i64,
    pub content_type: ContentType,
    pub intent: Option<String>,
    pub platform: Platform,
    pub body: String,
    pub media_url: Option<String>,
    pub status: ContentStatus,
    pub platform_post_id: Option<String>,
    pub created_at: String,
    pub scheduled_for: Option<String>,
    pub published_at: Option<String>,
}

/// Engagement counters for a single content item
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContentMetrics {
    pub content_id: i64,
    pub likes: i64,
    pub comments: i64,
    pub shares: i64,
    pub views: i64,
    pub impressions: i64,
    pub reach: i64,
}

/// Append-only log entry for publish/engagement events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityEntry {
    pub id: i64,
    pub user_id: i64,
    pub content_id: Option<i64>,
    pub platform: Platform,
    pub activity_type: String,
    pub activity_detail: Option<String>,
    pub occurred_at: String,
}

/// Follower count snapshot keyed by (user, platform, day)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FollowerMetrics {
    pub id: i64,
    pub user_id: i64,
    pub platform: Platform,
    pub day: String,
    pub follower_count: i64,
    pub following_count: i64,
    pub updated_at: String,
}

/// Rolling engagement rate keyed by (user, platform, period)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngagementMetrics {
    pub id: i64,
    pub user_id: i64,
    pub platform: Platform,
    pub period_key: String,
    pub engagement_rate: f64,
    pub total_likes: i64,
    pub total_comments: i64,
    pub total_shares: i64,
    pub updated_at: String,
}

/// Per-day-of-week engagement aggregate
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DailyEngagement {
    pub id: i64,
    pub user_id: i64,
    pub platform: Platform,
    pub weekday: String,
    pub avg_engagement: f64,
    pub sample_count: i64,
    pub updated_at: String,
}

/// Rolling-period rollup (posts, impressions, reach) per platform
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformStatistics {
    pub id: i64,
    pub user_id: i64,
    pub platform: Platform,
    pub period_key: String,
    pub posts_published: i64,
    pub total_impressions: i64,
    pub total_reach: i64,
    pub updated_at: String,
}

// =====================================================
// OAuth Flow Types
// =====================================================

/// Observable state of an in-flight authorization flow.
/// Clients poll `/rpc/connect/status` instead of listening for
/// a cross-window message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowPhase {
    Idle,
    RequestingToken,
    AwaitingUserAuth,
    AwaitingCallback,
    Exchanging,
    Connected,
    Failed,
}

/// Snapshot of a flow returned by the status endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowStatus {
    pub flow_id: String,
    pub platform: Platform,
    pub phase: FlowPhase,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// =====================================================
// Publish Types
// =====================================================

/// Why a publish attempt failed, mapped to a user-actionable remedy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PublishErrorKind {
    /// No valid platform link; (re)connect the account
    NotConnected,
    /// Platform rate limit hit; try again later
    RateLimited,
    /// Token lacks write access; regenerate tokens
    PermissionDenied,
    /// Rejected before any network call (empty/oversized content)
    Validation,
    /// Transient network or platform failure
    Transient,
}

impl PublishErrorKind {
    /// User-facing remediation message
    pub fn user_message(&self) -> &'static str {
        match self {
            PublishErrorKind::NotConnected => {
                "Account is not connected. Reconnect the platform and try again."
            }
            PublishErrorKind::RateLimited => {
                "The platform is rate limiting requests. Try again in a few minutes."
            }
            PublishErrorKind::PermissionDenied => {
                "The stored tokens lack write access. Regenerate your tokens with read+write permissions and reconnect."
            }
            PublishErrorKind::Validation => "The content is invalid for this platform.",
            PublishErrorKind::Transient => {
                "A temporary error occurred talking to the platform. Try again, or contact support if it persists."
            }
        }
    }
}

/// Result of a publish attempt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub post_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<PublishErrorKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PublishOutcome {
    pub fn published(post_id: String, content_id: Option<i64>) -> Self {
        Self {
            success: true,
            post_id: Some(post_id),
            content_id,
            message: Some("Published successfully".to_string()),
            error_kind: None,
            error: None,
        }
    }

    pub fn failed(kind: PublishErrorKind, detail: impl Into<String>) -> Self {
        Self {
            success: false,
            post_id: None,
            content_id: None,
            message: Some(kind.user_message().to_string()),
            error_kind: Some(kind),
            error: Some(detail.into()),
        }
    }
}

// =====================================================
// RPC Request Types
// =====================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartConnectRequest {
    /// Opaque session/auth identity (resolved to an internal user row)
    pub user: String,
    pub platform: Platform,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartConnectResponse {
    pub flow_id: String,
    pub authorize_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowStatusQuery {
    pub flow_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisconnectRequest {
    pub user: String,
    pub platform: Platform,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyQuery {
    pub user: String,
    pub platform: Platform,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyResponse {
    pub platform: Platform,
    pub connected: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishRequest {
    pub user: String,
    pub platform: Platform,
    pub content: String,
    #[serde(default)]
    pub content_type: Option<ContentType>,
    #[serde(default)]
    pub intent: Option<String>,
    #[serde(default)]
    pub media_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshRequest {
    pub user: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentListQuery {
    pub user: String,
    #[serde(default)]
    pub limit: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityListQuery {
    pub user: String,
    #[serde(default)]
    pub limit: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsQuery {
    pub user: String,
    pub platform: Platform,
}

/// Aggregated statistics for one (user, platform)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub platform: Platform,
    pub followers: Option<FollowerMetrics>,
    pub engagement: Option<EngagementMetrics>,
    pub daily_engagement: Vec<DailyEngagement>,
    pub statistics: Option<PlatformStatistics>,
}

/// Service health for the status endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceStatus {
    pub uptime_secs: u64,
    pub refresh_interval_secs: u64,
    pub last_refresh_tick_at: Option<String>,
    pub connections: i64,
}

// =====================================================
// RPC Response Envelope
// =====================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResponse<T: Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T: Serialize> RpcResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn err(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(msg.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_platform_round_trip() {
        assert_eq!(Platform::parse("twitter"), Some(Platform::Twitter));
        assert_eq!(Platform::parse("instagram"), Some(Platform::Instagram));
        assert_eq!(Platform::parse("myspace"), None);
        assert_eq!(Platform::Twitter.as_str(), "twitter");
    }

    #[test]
    fn test_status_ranks_advance() {
        assert!(ContentStatus::Draft.rank() < ContentStatus::Scheduled.rank());
        assert!(ContentStatus::Scheduled.rank() < ContentStatus::Published.rank());
    }

    #[test]
    fn test_rpc_response_serialization() {
        let ok: RpcResponse<i64> = RpcResponse::ok(42);
        let json = serde_json::to_string(&ok).unwrap();
        assert!(json.contains("\"success\":true"));
        assert!(!json.contains("error"));

        let err: RpcResponse<i64> = RpcResponse::err("nope");
        let json = serde_json::to_string(&err).unwrap();
        assert!(json.contains("\"success\":false"));
        assert!(json.contains("nope"));
    }
}
