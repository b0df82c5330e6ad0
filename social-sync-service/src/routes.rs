//! Axum route handlers for the social sync RPC API.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{Html, Json};
use serde::Deserialize;
use tokio::sync::Mutex;

use social_sync_types::*;

use crate::cache::ConnectionCache;
use crate::db::Db;
use crate::flows::AuthFlowController;
use crate::identity::IdentityResolver;
use crate::publisher::Publisher;
use crate::refresher::{self, Refresher};
use crate::verifier::ConnectionVerifier;

const DEFAULT_LIST_LIMIT: i64 = 50;

pub struct AppState {
    pub db: Arc<Db>,
    pub cache: Arc<ConnectionCache>,
    pub identity: Arc<IdentityResolver>,
    pub verifier: Arc<ConnectionVerifier>,
    pub publisher: Arc<Publisher>,
    pub flows: Arc<AuthFlowController>,
    pub refresher: Arc<Refresher>,
    pub start_time: Instant,
    pub last_tick_at: Arc<Mutex<Option<String>>>,
    pub refresh_interval_secs: u64,
}

// =====================================================
// Connection Endpoints
// =====================================================

// POST /rpc/connect/start
pub async fn connect_start(
    State(state): State<Arc<AppState>>,
    Json(req): Json<StartConnectRequest>,
) -> (StatusCode, Json<RpcResponse<StartConnectResponse>>) {
    let user_id = match state.identity.resolve_or_create(&req.user) {
        Ok(id) => id,
        Err(e) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(RpcResponse::err(format!("Failed to resolve user: {}", e))),
            )
        }
    };

    match state.flows.start(user_id, req.platform).await {
        Ok(resp) => (StatusCode::OK, Json(RpcResponse::ok(resp))),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(RpcResponse::err(format!(
                "Could not start {} authorization: {}",
                req.platform, e
            ))),
        ),
    }
}

// GET /rpc/connect/status
pub async fn connect_status(
    State(state): State<Arc<AppState>>,
    Query(query): Query<FlowStatusQuery>,
) -> (StatusCode, Json<RpcResponse<FlowStatus>>) {
    match state.flows.status(&query.flow_id) {
        Some(status) => (StatusCode::OK, Json(RpcResponse::ok(status))),
        None => (
            StatusCode::NOT_FOUND,
            Json(RpcResponse::err(format!(
                "No flow with id {}",
                query.flow_id
            ))),
        ),
    }
}

// POST /rpc/connect/disconnect
pub async fn connect_disconnect(
    State(state): State<Arc<AppState>>,
    Json(req): Json<DisconnectRequest>,
) -> (StatusCode, Json<RpcResponse<bool>>) {
    let user_id = match resolve_existing(&state, &req.user) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match state.db.disconnect_connection(user_id, req.platform) {
        Ok(true) => {
            state.cache.invalidate(user_id, req.platform);
            if let Err(e) =
                state
                    .db
                    .insert_activity(user_id, None, req.platform, "disconnected", None)
            {
                log::warn!("Failed to record disconnect activity: {}", e);
            }
            log::info!("User {} disconnected {}", user_id, req.platform);
            (StatusCode::OK, Json(RpcResponse::ok(true)))
        }
        Ok(false) => (
            StatusCode::NOT_FOUND,
            Json(RpcResponse::err(format!(
                "No {} connection to disconnect",
                req.platform
            ))),
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(RpcResponse::err(format!("Failed to disconnect: {}", e))),
        ),
    }
}

// GET /rpc/connections/verify
pub async fn connections_verify(
    State(state): State<Arc<AppState>>,
    Query(query): Query<VerifyQuery>,
) -> (StatusCode, Json<RpcResponse<VerifyResponse>>) {
    let user_id = match state.identity.resolve(&query.user) {
        Ok(Some(id)) => id,
        Ok(None) => {
            // Unknown users are simply not connected
            return (
                StatusCode::OK,
                Json(RpcResponse::ok(VerifyResponse {
                    platform: query.platform,
                    connected: false,
                })),
            );
        }
        Err(e) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(RpcResponse::err(format!("Failed to resolve user: {}", e))),
            )
        }
    };

    let connected = state.verifier.is_connected(user_id, query.platform).await;
    (
        StatusCode::OK,
        Json(RpcResponse::ok(VerifyResponse {
            platform: query.platform,
            connected,
        })),
    )
}

// =====================================================
// Publish Endpoint
// =====================================================

// POST /rpc/publish
pub async fn publish(
    State(state): State<Arc<AppState>>,
    Json(req): Json<PublishRequest>,
) -> (StatusCode, Json<RpcResponse<PublishOutcome>>) {
    let user_id = match state.identity.resolve_or_create(&req.user) {
        Ok(id) => id,
        Err(e) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(RpcResponse::err(format!("Failed to resolve user: {}", e))),
            )
        }
    };

    let outcome = state
        .publisher
        .publish(
            user_id,
            req.platform,
            &req.content,
            req.content_type.unwrap_or(ContentType::Text),
            req.intent.as_deref(),
            req.media_url.as_deref(),
        )
        .await;

    let status = if outcome.success {
        StatusCode::OK
    } else {
        match outcome.error_kind {
            Some(PublishErrorKind::Validation) => StatusCode::BAD_REQUEST,
            Some(PublishErrorKind::NotConnected) => StatusCode::UNAUTHORIZED,
            Some(PublishErrorKind::PermissionDenied) => StatusCode::FORBIDDEN,
            Some(PublishErrorKind::RateLimited) => StatusCode::TOO_MANY_REQUESTS,
            _ => StatusCode::BAD_GATEWAY,
        }
    };
    (status, Json(RpcResponse::ok(outcome)))
}

// =====================================================
// Statistics Endpoints
// =====================================================

// POST /rpc/refresh
pub async fn refresh(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RefreshRequest>,
) -> (StatusCode, Json<RpcResponse<bool>>) {
    let user_id = match resolve_existing(&state, &req.user) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    state.refresher.refresh_user(user_id).await;
    (StatusCode::OK, Json(RpcResponse::ok(true)))
}

// GET /rpc/stats/query
pub async fn stats_query(
    State(state): State<Arc<AppState>>,
    Query(query): Query<StatsQuery>,
) -> (StatusCode, Json<RpcResponse<StatsSnapshot>>) {
    let user_id = match resolve_existing(&state, &query.user) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    let day = refresher::day_key();
    let week = refresher::period_key();

    let followers = match state.db.get_follower_metrics(user_id, query.platform, &day) {
        Ok(v) => v,
        Err(e) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(RpcResponse::err(format!("Query failed: {}", e))),
            )
        }
    };
    let engagement = match state
        .db
        .get_engagement_metrics(user_id, query.platform, &week)
    {
        Ok(v) => v,
        Err(e) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(RpcResponse::err(format!("Query failed: {}", e))),
            )
        }
    };
    let daily_engagement = match state.db.list_daily_engagement(user_id, query.platform) {
        Ok(v) => v,
        Err(e) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(RpcResponse::err(format!("Query failed: {}", e))),
            )
        }
    };
    let statistics = match state
        .db
        .get_platform_statistics(user_id, query.platform, &week)
    {
        Ok(v) => v,
        Err(e) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(RpcResponse::err(format!("Query failed: {}", e))),
            )
        }
    };

    (
        StatusCode::OK,
        Json(RpcResponse::ok(StatsSnapshot {
            platform: query.platform,
            followers,
            engagement,
            daily_engagement,
            statistics,
        })),
    )
}

// =====================================================
// Content & Activity Endpoints
// =====================================================

// GET /rpc/content/list
pub async fn content_list(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ContentListQuery>,
) -> (StatusCode, Json<RpcResponse<Vec<ContentItem>>>) {
    let user_id = match resolve_existing(&state, &query.user) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    let limit = query.limit.unwrap_or(DEFAULT_LIST_LIMIT).clamp(1, 200);
    match state.db.list_content(user_id, limit) {
        Ok(items) => (StatusCode::OK, Json(RpcResponse::ok(items))),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(RpcResponse::err(format!("Query failed: {}", e))),
        ),
    }
}

// GET /rpc/activity/list
pub async fn activity_list(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ActivityListQuery>,
) -> (StatusCode, Json<RpcResponse<Vec<ActivityEntry>>>) {
    let user_id = match resolve_existing(&state, &query.user) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    let limit = query.limit.unwrap_or(DEFAULT_LIST_LIMIT).clamp(1, 200);
    match state.db.list_activity(user_id, limit) {
        Ok(entries) => (StatusCode::OK, Json(RpcResponse::ok(entries))),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(RpcResponse::err(format!("Query failed: {}", e))),
        ),
    }
}

// =====================================================
// Service Endpoint
// =====================================================

// GET /rpc/status
pub async fn status(
    State(state): State<Arc<AppState>>,
) -> (StatusCode, Json<RpcResponse<ServiceStatus>>) {
    let connections = match state.db.count_connections() {
        Ok(n) => n,
        Err(e) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(RpcResponse::err(format!("Query failed: {}", e))),
            )
        }
    };
    let last_refresh_tick_at = state.last_tick_at.lock().await.clone();

    (
        StatusCode::OK,
        Json(RpcResponse::ok(ServiceStatus {
            uptime_secs: state.start_time.elapsed().as_secs(),
            refresh_interval_secs: state.refresh_interval_secs,
            last_refresh_tick_at,
            connections,
        })),
    )
}

// =====================================================
// OAuth Callback Endpoints
// =====================================================

#[derive(Debug, Deserialize)]
pub struct TwitterCallbackQuery {
    pub oauth_token: Option<String>,
    pub oauth_verifier: Option<String>,
    /// Set instead of oauth_verifier when the user declines
    pub denied: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct InstagramCallbackQuery {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
}

// GET /oauth/callback/twitter
//
// Tokens and verifiers arrive here as query parameters; they are
// matched against the pending registry and never logged.
pub async fn twitter_callback(
    State(state): State<Arc<AppState>>,
    Query(query): Query<TwitterCallbackQuery>,
) -> (StatusCode, Html<&'static str>) {
    if let Some(denied_token) = &query.denied {
        let _ = state.flows.handle_twitter_denied(denied_token);
        return (StatusCode::OK, Html(CALLBACK_DENIED_PAGE));
    }

    let (token, verifier) = match (&query.oauth_token, &query.oauth_verifier) {
        (Some(t), Some(v)) => (t, v),
        _ => return (StatusCode::BAD_REQUEST, Html(CALLBACK_ERROR_PAGE)),
    };

    match state.flows.handle_twitter_callback(token, verifier) {
        Ok(()) => (StatusCode::OK, Html(CALLBACK_OK_PAGE)),
        Err(_) => (StatusCode::BAD_REQUEST, Html(CALLBACK_ERROR_PAGE)),
    }
}

// GET /oauth/callback/instagram
pub async fn instagram_callback(
    State(state): State<Arc<AppState>>,
    Query(query): Query<InstagramCallbackQuery>,
) -> (StatusCode, Html<&'static str>) {
    if query.error.is_some() {
        if let Some(flow_state) = &query.state {
            let _ = state.flows.handle_instagram_denied(flow_state);
        }
        return (StatusCode::OK, Html(CALLBACK_DENIED_PAGE));
    }

    let (code, flow_state) = match (&query.code, &query.state) {
        (Some(c), Some(s)) => (c, s),
        _ => return (StatusCode::BAD_REQUEST, Html(CALLBACK_ERROR_PAGE)),
    };

    match state.flows.handle_instagram_callback(code, flow_state) {
        Ok(()) => (StatusCode::OK, Html(CALLBACK_OK_PAGE)),
        Err(_) => (StatusCode::BAD_REQUEST, Html(CALLBACK_ERROR_PAGE)),
    }
}

const CALLBACK_OK_PAGE: &str = "<!DOCTYPE html><html><body>\
<p>Account authorized. You can close this window.</p>\
<script>window.close();</script></body></html>";

const CALLBACK_DENIED_PAGE: &str = "<!DOCTYPE html><html><body>\
<p>Authorization was declined. You can close this window.</p>\
<script>window.close();</script></body></html>";

const CALLBACK_ERROR_PAGE: &str = "<!DOCTYPE html><html><body>\
<p>Authorization failed. You can close this window.</p>\
</body></html>";

/// Resolve a session user that must already exist. Returns the caller's
/// error response when it doesn't.
fn resolve_existing<T: serde::Serialize>(
    state: &Arc<AppState>,
    user: &str,
) -> Result<i64, (StatusCode, Json<RpcResponse<T>>)> {
    match state.identity.resolve(user) {
        Ok(Some(id)) => Ok(id),
        Ok(None) => Err((
            StatusCode::NOT_FOUND,
            Json(RpcResponse::err("Unknown user")),
        )),
        Err(e) => Err((
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(RpcResponse::err(format!("Failed to resolve user: {}", e))),
        )),
    }
}
