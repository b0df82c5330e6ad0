//! Environment-driven configuration.
//!
//! A platform integration is enabled when any of its variables is set,
//! and every variable it needs must then be present. Startup fails with
//! a message naming each missing variable so a half-configured deploy
//! is caught immediately instead of failing at the first API call.

use std::env;

use crate::instagram::InstagramKeys;
use crate::twitter::TwitterAppKeys;

const DEFAULT_PORT: u16 = 8083;
const DEFAULT_DB_PATH: &str = "social_sync.db";

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub db_path: String,
    pub refresh_interval_secs: u64,
    pub callback_base: String,
    pub twitter: Option<TwitterAppKeys>,
    pub instagram: Option<InstagramKeys>,
}

impl Config {
    pub fn from_env() -> Result<Config, String> {
        let mut missing: Vec<&str> = Vec::new();

        let port = match env::var("SOCIAL_SYNC_PORT") {
            Ok(v) => v
                .parse::<u16>()
                .map_err(|_| format!("SOCIAL_SYNC_PORT is not a valid port: {}", v))?,
            Err(_) => DEFAULT_PORT,
        };

        let db_path =
            env::var("SOCIAL_SYNC_DB_PATH").unwrap_or_else(|_| DEFAULT_DB_PATH.to_string());

        let refresh_interval_secs = match env::var("SOCIAL_SYNC_REFRESH_INTERVAL") {
            Ok(v) => v.parse::<u64>().map_err(|_| {
                format!("SOCIAL_SYNC_REFRESH_INTERVAL is not a valid number of seconds: {}", v)
            })?,
            Err(_) => crate::refresher::DEFAULT_REFRESH_INTERVAL_SECS,
        };

        let callback_base = env::var("OAUTH_CALLBACK_BASE")
            .unwrap_or_else(|_| format!("http://localhost:{}", port))
            .trim_end_matches('/')
            .to_string();

        let twitter = Self::twitter_from_env(&mut missing);
        let instagram = Self::instagram_from_env(&mut missing);

        if !missing.is_empty() {
            return Err(format!(
                "Missing required environment variables: {}",
                missing.join(", ")
            ));
        }

        Ok(Config {
            port,
            db_path,
            refresh_interval_secs,
            callback_base,
            twitter,
            instagram,
        })
    }

    fn twitter_from_env(missing: &mut Vec<&'static str>) -> Option<TwitterAppKeys> {
        let consumer_key = env::var("TWITTER_CONSUMER_KEY").ok();
        let consumer_secret = env::var("TWITTER_CONSUMER_SECRET").ok();

        if consumer_key.is_none() && consumer_secret.is_none() {
            return None;
        }
        if consumer_key.is_none() {
            missing.push("TWITTER_CONSUMER_KEY");
        }
        if consumer_secret.is_none() {
            missing.push("TWITTER_CONSUMER_SECRET");
        }
        match (consumer_key, consumer_secret) {
            (Some(consumer_key), Some(consumer_secret)) => Some(TwitterAppKeys {
                consumer_key,
                consumer_secret,
            }),
            _ => None,
        }
    }

    fn instagram_from_env(missing: &mut Vec<&'static str>) -> Option<InstagramKeys> {
        let app_id = env::var("INSTAGRAM_APP_ID").ok();
        let access_token = env::var("INSTAGRAM_ACCESS_TOKEN").ok();
        let ig_user_id = env::var("INSTAGRAM_USER_ID").ok();

        if app_id.is_none() && access_token.is_none() && ig_user_id.is_none() {
            return None;
        }
        if app_id.is_none() {
            missing.push("INSTAGRAM_APP_ID");
        }
        if access_token.is_none() {
            missing.push("INSTAGRAM_ACCESS_TOKEN");
        }
        if ig_user_id.is_none() {
            missing.push("INSTAGRAM_USER_ID");
        }
        match (app_id, access_token, ig_user_id) {
            (Some(app_id), Some(access_token), Some(ig_user_id)) => Some(InstagramKeys {
                app_id,
                access_token,
                ig_user_id,
            }),
            _ => None,
        }
    }
}
