//! Authorization flow orchestration.
//!
//! Each connect attempt is a flow instance moving through
//! RequestingToken -> AwaitingUserAuth -> AwaitingCallback -> Exchanging
//! -> Connected, with any state able to fail. The browser redirect that
//! used to arrive as a cross-window message lands on an HTTP callback
//! endpoint instead; the payload reaches the waiting flow through a
//! single-consumer oneshot channel, and only a callback matching a
//! registered pending token/state is trusted. The wait is bounded: an
//! abandoned authorization settles to Failed inside the timeout window
//! rather than hanging.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use moka::sync::Cache;
use tokio::sync::oneshot;
use uuid::Uuid;

use social_sync_types::{FlowPhase, FlowStatus, Platform, StartConnectResponse};

use crate::cache::ConnectionCache;
use crate::db::Db;
use crate::instagram::InstagramClient;
use crate::refresher::Refresher;
use crate::twitter::{RequestToken, TwitterClient};

/// How long a flow waits for the authorization callback
const AUTH_CALLBACK_TIMEOUT_SECS: u64 = 120;

/// How long a settled flow status stays pollable. Statuses are written
/// per connect attempt, so the registry must expire entries or it grows
/// for the life of the process.
const FLOW_STATUS_TTL: Duration = Duration::from_secs(900);

/// A flow waiting for its callback, keyed by request token (Twitter) or
/// state nonce (Instagram)
struct PendingFlow {
    flow_id: String,
    tx: oneshot::Sender<String>,
}

pub struct AuthFlowController {
    db: Arc<Db>,
    cache: Arc<ConnectionCache>,
    twitter: Option<Arc<TwitterClient>>,
    instagram: Option<Arc<InstagramClient>>,
    refresher: Option<Arc<Refresher>>,
    callback_base: String,
    pending: DashMap<String, PendingFlow>,
    statuses: Cache<String, FlowStatus>,
    callback_timeout: Duration,
}

impl AuthFlowController {
    pub fn new(
        db: Arc<Db>,
        cache: Arc<ConnectionCache>,
        twitter: Option<Arc<TwitterClient>>,
        instagram: Option<Arc<InstagramClient>>,
        refresher: Option<Arc<Refresher>>,
        callback_base: String,
    ) -> Self {
        Self {
            db,
            cache,
            twitter,
            instagram,
            refresher,
            callback_base,
            pending: DashMap::new(),
            statuses: Cache::builder()
                .time_to_live(FLOW_STATUS_TTL)
                .max_capacity(4096)
                .build(),
            callback_timeout: Duration::from_secs(AUTH_CALLBACK_TIMEOUT_SECS),
        }
    }

    /// Shorter callback wait, used by tests
    #[allow(dead_code)]
    pub fn with_callback_timeout(mut self, timeout: Duration) -> Self {
        self.callback_timeout = timeout;
        self
    }

    /// Shorter status retention, used by tests
    #[allow(dead_code)]
    pub fn with_status_ttl(mut self, ttl: Duration) -> Self {
        self.statuses = Cache::builder()
            .time_to_live(ttl)
            .max_capacity(4096)
            .build();
        self
    }

    /// Begin a connect flow, returning the URL the user must authorize at
    /// and the flow id to poll for status.
    pub async fn start(
        self: &Arc<Self>,
        user_id: i64,
        platform: Platform,
    ) -> Result<StartConnectResponse, String> {
        match platform {
            Platform::Twitter => self.start_twitter(user_id).await,
            Platform::Instagram => self.start_instagram(user_id).await,
        }
    }

    async fn start_twitter(self: &Arc<Self>, user_id: i64) -> Result<StartConnectResponse, String> {
        let client = self
            .twitter
            .as_ref()
            .ok_or_else(|| "Twitter integration not configured".to_string())?
            .clone();

        let flow_id = Uuid::new_v4().to_string();
        self.set_phase(&flow_id, Platform::Twitter, FlowPhase::RequestingToken);

        let callback_url = format!("{}/oauth/callback/twitter", self.callback_base);
        let request_token = match client.request_token(&callback_url).await {
            Ok(t) => t,
            Err(e) => {
                self.fail(&flow_id, &e);
                return Err(e);
            }
        };

        let authorize_url = TwitterClient::authorize_url(&request_token.token);

        let (tx, rx) = oneshot::channel();
        self.pending.insert(
            request_token.token.clone(),
            PendingFlow {
                flow_id: flow_id.clone(),
                tx,
            },
        );
        self.set_phase(&flow_id, Platform::Twitter, FlowPhase::AwaitingUserAuth);

        let controller = Arc::clone(self);
        let waiter_flow_id = flow_id.clone();
        tokio::spawn(async move {
            controller
                .await_twitter_callback(waiter_flow_id, user_id, request_token, rx)
                .await;
        });

        log::info!(
            "Auth: started Twitter flow {} for user {}",
            flow_id,
            user_id
        );

        Ok(StartConnectResponse {
            flow_id,
            authorize_url,
        })
    }

    async fn await_twitter_callback(
        self: Arc<Self>,
        flow_id: String,
        user_id: i64,
        request_token: RequestToken,
        rx: oneshot::Receiver<String>,
    ) {
        let verifier = match tokio::time::timeout(self.callback_timeout, rx).await {
            Ok(Ok(v)) => v,
            Ok(Err(_)) => {
                self.pending.remove(&request_token.token);
                self.fail(&flow_id, "Authorization flow was cancelled");
                return;
            }
            Err(_) => {
                // Covers the abandoned popup as well: the timeout is the
                // only cancellation signal we can observe.
                self.pending.remove(&request_token.token);
                self.fail(
                    &flow_id,
                    &format!(
                        "Timed out waiting for authorization after {}s",
                        self.callback_timeout.as_secs()
                    ),
                );
                return;
            }
        };

        self.set_phase(&flow_id, Platform::Twitter, FlowPhase::Exchanging);

        let client = match self.twitter.as_ref() {
            Some(c) => c.clone(),
            None => {
                self.fail(&flow_id, "Twitter integration not configured");
                return;
            }
        };

        let access = match client.access_token(&request_token, &verifier).await {
            Ok(a) => a,
            Err(e) => {
                self.fail(&flow_id, &format!("Token exchange failed: {}", e));
                return;
            }
        };

        // Fetch the profile before declaring success so the connection
        // record carries username and avatar.
        let profile = match client.verify_credentials(&access.token, &access.secret).await {
            Ok(p) => p,
            Err(e) => {
                self.fail(&flow_id, &format!("Profile fetch failed: {}", e));
                return;
            }
        };

        if let Err(e) = self.db.upsert_connection(
            user_id,
            Platform::Twitter,
            &profile.username,
            &access.token,
            Some(&access.secret),
            profile.profile_image_url.as_deref(),
        ) {
            self.fail(&flow_id, &format!("Failed to persist connection: {}", e));
            return;
        }

        self.cache.set(user_id, Platform::Twitter, true);
        self.connected(&flow_id, Platform::Twitter, &profile.username);
        log::info!(
            "Auth: Twitter flow {} connected user {} as @{}",
            flow_id,
            user_id,
            profile.username
        );

        if let Some(refresher) = &self.refresher {
            let refresher = Arc::clone(refresher);
            tokio::spawn(async move {
                refresher.refresh_user(user_id).await;
            });
        }
    }

    async fn start_instagram(
        self: &Arc<Self>,
        user_id: i64,
    ) -> Result<StartConnectResponse, String> {
        let client = self
            .instagram
            .as_ref()
            .ok_or_else(|| "Instagram integration not configured".to_string())?
            .clone();

        let flow_id = Uuid::new_v4().to_string();
        let state = flow_id.clone();
        let redirect_uri = format!("{}/oauth/callback/instagram", self.callback_base);
        let authorize_url = client.authorize_url(&redirect_uri, &state);

        let (tx, rx) = oneshot::channel();
        self.pending.insert(
            instagram_key(&state),
            PendingFlow {
                flow_id: flow_id.clone(),
                tx,
            },
        );
        self.set_phase(&flow_id, Platform::Instagram, FlowPhase::AwaitingUserAuth);

        let controller = Arc::clone(self);
        let waiter_flow_id = flow_id.clone();
        tokio::spawn(async move {
            controller
                .await_instagram_callback(waiter_flow_id, user_id, state, rx)
                .await;
        });

        log::info!(
            "Auth: started Instagram flow {} for user {}",
            flow_id,
            user_id
        );

        Ok(StartConnectResponse {
            flow_id,
            authorize_url,
        })
    }

    async fn await_instagram_callback(
        self: Arc<Self>,
        flow_id: String,
        user_id: i64,
        state: String,
        rx: oneshot::Receiver<String>,
    ) {
        let _code = match tokio::time::timeout(self.callback_timeout, rx).await {
            Ok(Ok(c)) => c,
            Ok(Err(_)) => {
                self.pending.remove(&instagram_key(&state));
                self.fail(&flow_id, "Authorization flow was cancelled");
                return;
            }
            Err(_) => {
                self.pending.remove(&instagram_key(&state));
                self.fail(
                    &flow_id,
                    &format!(
                        "Timed out waiting for authorization after {}s",
                        self.callback_timeout.as_secs()
                    ),
                );
                return;
            }
        };

        self.set_phase(&flow_id, Platform::Instagram, FlowPhase::Exchanging);

        let client = match self.instagram.as_ref() {
            Some(c) => c.clone(),
            None => {
                self.fail(&flow_id, "Instagram integration not configured");
                return;
            }
        };

        // The authorization code is consent proof only: the integration
        // runs on a statically configured long-lived token rather than
        // exchanging the code live (service-account style).
        let profile = match client.profile().await {
            Ok(p) => p,
            Err(e) => {
                self.fail(&flow_id, &format!("Profile fetch failed: {}", e));
                return;
            }
        };

        if let Err(e) = self.db.upsert_connection(
            user_id,
            Platform::Instagram,
            &profile.username,
            client.configured_token(),
            None,
            profile.profile_picture_url.as_deref(),
        ) {
            self.fail(&flow_id, &format!("Failed to persist connection: {}", e));
            return;
        }

        self.cache.set(user_id, Platform::Instagram, true);
        self.connected(&flow_id, Platform::Instagram, &profile.username);
        log::info!(
            "Auth: Instagram flow {} connected user {} as @{}",
            flow_id,
            user_id,
            profile.username
        );

        if let Some(refresher) = &self.refresher {
            let refresher = Arc::clone(refresher);
            tokio::spawn(async move {
                refresher.refresh_user(user_id).await;
            });
        }
    }

    /// Deliver a Twitter redirect to its waiting flow. Unknown or
    /// expired tokens are rejected before any payload is trusted.
    pub fn handle_twitter_callback(
        &self,
        oauth_token: &str,
        oauth_verifier: &str,
    ) -> Result<(), String> {
        let (_, pending) = self
            .pending
            .remove(oauth_token)
            .ok_or_else(|| "Unknown or expired oauth_token".to_string())?;

        self.set_phase(&pending.flow_id, Platform::Twitter, FlowPhase::AwaitingCallback);
        // The waiter may already have timed out; that case is its own
        // terminal state.
        let _ = pending.tx.send(oauth_verifier.to_string());
        Ok(())
    }

    /// Deliver an Instagram redirect to its waiting flow, matched by the
    /// state nonce issued at start.
    pub fn handle_instagram_callback(&self, code: &str, state: &str) -> Result<(), String> {
        let (_, pending) = self
            .pending
            .remove(&instagram_key(state))
            .ok_or_else(|| "Unknown or expired state".to_string())?;

        self.set_phase(&pending.flow_id, Platform::Instagram, FlowPhase::AwaitingCallback);
        let _ = pending.tx.send(code.to_string());
        Ok(())
    }

    /// The user declined on the provider's authorization page. Dropping
    /// the sender wakes the waiter, which settles the flow as cancelled.
    pub fn handle_twitter_denied(&self, oauth_token: &str) -> Result<(), String> {
        self.pending
            .remove(oauth_token)
            .map(|_| ())
            .ok_or_else(|| "Unknown or expired oauth_token".to_string())
    }

    pub fn handle_instagram_denied(&self, state: &str) -> Result<(), String> {
        self.pending
            .remove(&instagram_key(state))
            .map(|_| ())
            .ok_or_else(|| "Unknown or expired state".to_string())
    }

    pub fn status(&self, flow_id: &str) -> Option<FlowStatus> {
        self.statuses.get(flow_id)
    }

    fn set_phase(&self, flow_id: &str, platform: Platform, phase: FlowPhase) {
        self.statuses.insert(
            flow_id.to_string(),
            FlowStatus {
                flow_id: flow_id.to_string(),
                platform,
                phase,
                username: None,
                error: None,
            },
        );
    }

    fn connected(&self, flow_id: &str, platform: Platform, username: &str) {
        self.statuses.insert(
            flow_id.to_string(),
            FlowStatus {
                flow_id: flow_id.to_string(),
                platform,
                phase: FlowPhase::Connected,
                username: Some(username.to_string()),
                error: None,
            },
        );
    }

    fn fail(&self, flow_id: &str, reason: &str) {
        log::warn!("Auth: flow {} failed: {}", flow_id, reason);
        let platform = self
            .statuses
            .get(flow_id)
            .map(|s| s.platform)
            .unwrap_or(Platform::Twitter);
        self.statuses.insert(
            flow_id.to_string(),
            FlowStatus {
                flow_id: flow_id.to_string(),
                platform,
                phase: FlowPhase::Failed,
                username: None,
                error: Some(reason.to_string()),
            },
        );
    }
}

fn instagram_key(state: &str) -> String {
    format!("ig:{}", state)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller(timeout: Duration) -> Arc<AuthFlowController> {
        let db = Arc::new(Db::open(":memory:").unwrap());
        let cache = Arc::new(ConnectionCache::new());
        Arc::new(
            AuthFlowController::new(
                db,
                cache,
                None,
                None,
                None,
                "https://example.com".to_string(),
            )
            .with_callback_timeout(timeout),
        )
    }

    /// Register a pending flow the way start_twitter does, without the
    /// network leg.
    fn register(controller: &Arc<AuthFlowController>, flow_id: &str, token: &str) {
        let (tx, rx) = oneshot::channel();
        controller.pending.insert(
            token.to_string(),
            PendingFlow {
                flow_id: flow_id.to_string(),
                tx,
            },
        );
        controller.set_phase(flow_id, Platform::Twitter, FlowPhase::AwaitingUserAuth);

        let c = Arc::clone(controller);
        let fid = flow_id.to_string();
        let request_token = RequestToken {
            token: token.to_string(),
            secret: "secret".to_string(),
        };
        tokio::spawn(async move {
            c.await_twitter_callback(fid, 1, request_token, rx).await;
        });
    }

    #[tokio::test]
    async fn test_unknown_callback_is_rejected() {
        let c = controller(Duration::from_secs(120));
        let result = c.handle_twitter_callback("nonexistent-token", "verifier");
        assert!(result.is_err());
        assert!(c.handle_instagram_callback("code", "nonexistent-state").is_err());
    }

    #[tokio::test]
    async fn test_abandoned_flow_settles_to_failed_within_timeout() {
        let c = controller(Duration::from_millis(50));
        register(&c, "flow-1", "tok-1");
        assert_eq!(c.status("flow-1").unwrap().phase, FlowPhase::AwaitingUserAuth);

        // Never deliver the callback; the flow must fail, not hang
        tokio::time::sleep(Duration::from_millis(200)).await;

        let status = c.status("flow-1").unwrap();
        assert_eq!(status.phase, FlowPhase::Failed);
        assert!(status.error.as_deref().unwrap().contains("Timed out"));
        // The pending registry is cleaned up: a late callback is rejected
        assert!(c.handle_twitter_callback("tok-1", "late").is_err());
    }

    #[tokio::test]
    async fn test_callback_without_integration_fails_cleanly() {
        // No Twitter client configured: the exchange cannot run, but the
        // flow must still settle to Failed rather than hang.
        let c = controller(Duration::from_secs(5));
        register(&c, "flow-2", "tok-2");

        c.handle_twitter_callback("tok-2", "the-verifier").unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let status = c.status("flow-2").unwrap();
        assert_eq!(status.phase, FlowPhase::Failed);
    }

    #[tokio::test]
    async fn test_callback_consumes_pending_entry() {
        let c = controller(Duration::from_secs(5));
        register(&c, "flow-3", "tok-3");

        assert!(c.handle_twitter_callback("tok-3", "v").is_ok());
        // Second delivery of the same token is rejected
        assert!(c.handle_twitter_callback("tok-3", "v").is_err());
    }

    #[tokio::test]
    async fn test_denied_flow_settles_to_cancelled() {
        let c = controller(Duration::from_secs(5));
        register(&c, "flow-4", "tok-4");

        c.handle_twitter_denied("tok-4").unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let status = c.status("flow-4").unwrap();
        assert_eq!(status.phase, FlowPhase::Failed);
        assert!(status.error.as_deref().unwrap().contains("cancelled"));
    }

    #[tokio::test]
    async fn test_unknown_flow_status_is_none() {
        let c = controller(Duration::from_secs(5));
        assert!(c.status("missing").is_none());
    }

    #[tokio::test]
    async fn test_settled_statuses_expire() {
        let db = Arc::new(Db::open(":memory:").unwrap());
        let cache = Arc::new(ConnectionCache::new());
        let c = Arc::new(
            AuthFlowController::new(
                db,
                cache,
                None,
                None,
                None,
                "https://example.com".to_string(),
            )
            .with_status_ttl(Duration::from_millis(50)),
        );

        c.set_phase("flow-ttl", Platform::Twitter, FlowPhase::Failed);
        assert!(c.status("flow-ttl").is_some());

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(c.status("flow-ttl").is_none());
    }
}
