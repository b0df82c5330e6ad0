//! Social Sync Service, a standalone binary for connecting social
//! accounts, publishing content, and keeping statistics fresh.
//!
//! Hosts the RPC API and the OAuth callback endpoints on the same port.
//! Default: http://127.0.0.1:8083/

mod cache;
mod config;
mod db;
mod flows;
mod identity;
mod instagram;
mod oauth;
mod publisher;
mod refresher;
mod routes;
mod twitter;
mod verifier;

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{oneshot, Mutex};

use routes::AppState;

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();
    env_logger::init();

    let config = match config::Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    log::info!("Opening database at: {}", config.db_path);
    let database = Arc::new(db::Db::open(&config.db_path).expect("Failed to open database"));

    let http = reqwest::Client::new();
    let twitter = config
        .twitter
        .clone()
        .map(|keys| Arc::new(twitter::TwitterClient::new(http.clone(), keys)));
    let instagram = config
        .instagram
        .clone()
        .map(|keys| Arc::new(instagram::InstagramClient::new(http.clone(), keys)));

    if twitter.is_none() {
        log::warn!("Twitter credentials not set, Twitter integration disabled");
    }
    if instagram.is_none() {
        log::warn!("Instagram credentials not set, Instagram integration disabled");
    }

    let connection_cache = Arc::new(cache::ConnectionCache::new());
    let identity = Arc::new(identity::IdentityResolver::new(database.clone()));
    let connection_verifier = Arc::new(verifier::ConnectionVerifier::new(
        database.clone(),
        connection_cache.clone(),
        twitter.clone(),
        instagram.clone(),
    ));
    let content_publisher = Arc::new(publisher::Publisher::new(
        database.clone(),
        connection_verifier.clone(),
        twitter.clone(),
        instagram.clone(),
    ));

    let last_tick_at: Arc<Mutex<Option<String>>> = Arc::new(Mutex::new(None));
    let stats_refresher = Arc::new(refresher::Refresher::new(
        database.clone(),
        twitter.clone(),
        instagram.clone(),
        last_tick_at.clone(),
    ));

    let flow_controller = Arc::new(flows::AuthFlowController::new(
        database.clone(),
        connection_cache.clone(),
        twitter.clone(),
        instagram.clone(),
        Some(stats_refresher.clone()),
        config.callback_base.clone(),
    ));

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    {
        let refresher = stats_refresher.clone();
        let interval = config.refresh_interval_secs;
        tokio::spawn(async move {
            refresher.run(interval, shutdown_rx).await;
        });
    }

    let state = Arc::new(AppState {
        db: database,
        cache: connection_cache,
        identity,
        verifier: connection_verifier,
        publisher: content_publisher,
        flows: flow_controller,
        refresher: stats_refresher,
        start_time: Instant::now(),
        last_tick_at,
        refresh_interval_secs: config.refresh_interval_secs,
    });

    let cors = tower_http::cors::CorsLayer::permissive();

    let app = axum::Router::new()
        // Connections
        .route(
            "/rpc/connect/start",
            axum::routing::post(routes::connect_start),
        )
        .route(
            "/rpc/connect/status",
            axum::routing::get(routes::connect_status),
        )
        .route(
            "/rpc/connect/disconnect",
            axum::routing::post(routes::connect_disconnect),
        )
        .route(
            "/rpc/connections/verify",
            axum::routing::get(routes::connections_verify),
        )
        // Publishing
        .route("/rpc/publish", axum::routing::post(routes::publish))
        // Statistics
        .route("/rpc/refresh", axum::routing::post(routes::refresh))
        .route("/rpc/stats/query", axum::routing::get(routes::stats_query))
        // Content & activity
        .route(
            "/rpc/content/list",
            axum::routing::get(routes::content_list),
        )
        .route(
            "/rpc/activity/list",
            axum::routing::get(routes::activity_list),
        )
        // Service
        .route("/rpc/status", axum::routing::get(routes::status))
        // OAuth callbacks
        .route(
            "/oauth/callback/twitter",
            axum::routing::get(routes::twitter_callback),
        )
        .route(
            "/oauth/callback/instagram",
            axum::routing::get(routes::instagram_callback),
        )
        .with_state(state)
        .layer(cors);

    let addr = format!("127.0.0.1:{}", config.port);
    log::info!("Social Sync Service listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            log::info!("Shutting down");
            let _ = shutdown_tx.send(());
        })
        .await
        .expect("Server error");
}
