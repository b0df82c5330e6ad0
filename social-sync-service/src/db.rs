//! SQLite database operations for the social sync service.
//!
//! One connection row per (user, platform), enforced with a UNIQUE
//! constraint and upsert. Period-statistics tables are keyed the same
//! way so concurrent refresh triggers cannot create duplicate rows.

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, Result as SqliteResult};
use std::sync::Mutex;

use social_sync_types::{
    ActivityEntry, ContentItem, ContentMetrics, ContentStatus, ContentType, DailyEngagement,
    EngagementMetrics, FollowerMetrics, Platform, PlatformConnection, PlatformStatistics,
};

pub struct Db {
    conn: Mutex<Connection>,
}

impl Db {
    pub fn open(path: &str) -> SqliteResult<Self> {
        let conn = if path == ":memory:" {
            Connection::open_in_memory()?
        } else {
            Connection::open(path)?
        };
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.create_tables()?;
        Ok(db)
    }

    fn create_tables(&self) -> SqliteResult<()> {
        let conn = self.conn.lock().unwrap();

        conn.execute(
            "CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                auth_id TEXT NOT NULL UNIQUE,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS platform_connections (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                platform TEXT NOT NULL,
                connected INTEGER NOT NULL DEFAULT 0,
                username TEXT,
                access_token TEXT,
                access_token_secret TEXT,
                profile_image TEXT,
                last_verified TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                UNIQUE(user_id, platform),
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS content (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                content_type TEXT NOT NULL,
                intent TEXT,
                platform TEXT NOT NULL,
                body TEXT NOT NULL,
                media_url TEXT,
                status TEXT NOT NULL DEFAULT 'draft',
                platform_post_id TEXT,
                created_at TEXT NOT NULL,
                scheduled_for TEXT,
                published_at TEXT,
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_content_user ON content(user_id, created_at DESC)",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS content_metrics (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                content_id INTEGER NOT NULL UNIQUE,
                likes INTEGER NOT NULL DEFAULT 0,
                comments INTEGER NOT NULL DEFAULT 0,
                shares INTEGER NOT NULL DEFAULT 0,
                views INTEGER NOT NULL DEFAULT 0,
                impressions INTEGER NOT NULL DEFAULT 0,
                reach INTEGER NOT NULL DEFAULT 0,
                FOREIGN KEY (content_id) REFERENCES content(id) ON DELETE CASCADE
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS activity_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                content_id INTEGER,
                platform TEXT NOT NULL,
                activity_type TEXT NOT NULL,
                activity_detail TEXT,
                occurred_at TEXT NOT NULL,
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_activity_user ON activity_history(user_id, occurred_at DESC)",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS follower_metrics (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                platform TEXT NOT NULL,
                day TEXT NOT NULL,
                follower_count INTEGER NOT NULL DEFAULT 0,
                following_count INTEGER NOT NULL DEFAULT 0,
                updated_at TEXT NOT NULL,
                UNIQUE(user_id, platform, day)
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS engagement_metrics (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                platform TEXT NOT NULL,
                period_key TEXT NOT NULL,
                engagement_rate REAL NOT NULL DEFAULT 0.0,
                total_likes INTEGER NOT NULL DEFAULT 0,
                total_comments INTEGER NOT NULL DEFAULT 0,
                total_shares INTEGER NOT NULL DEFAULT 0,
                updated_at TEXT NOT NULL,
                UNIQUE(user_id, platform, period_key)
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS daily_engagement (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                platform TEXT NOT NULL,
                weekday TEXT NOT NULL,
                avg_engagement REAL NOT NULL DEFAULT 0.0,
                sample_count INTEGER NOT NULL DEFAULT 0,
                updated_at TEXT NOT NULL,
                UNIQUE(user_id, platform, weekday)
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS platform_statistics (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                platform TEXT NOT NULL,
                period_key TEXT NOT NULL,
                posts_published INTEGER NOT NULL DEFAULT 0,
                total_impressions INTEGER NOT NULL DEFAULT 0,
                total_reach INTEGER NOT NULL DEFAULT 0,
                updated_at TEXT NOT NULL,
                UNIQUE(user_id, platform, period_key)
            )",
            [],
        )?;

        Ok(())
    }

    // =====================================================
    // Users
    // =====================================================

    /// Find the internal user row for an opaque auth identity
    pub fn find_user_by_auth_id(&self, auth_id: &str) -> SqliteResult<Option<i64>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row("SELECT id FROM users WHERE auth_id = ?1", [auth_id], |row| {
            row.get(0)
        })
        .optional()
    }

    pub fn user_exists(&self, id: i64) -> SqliteResult<bool> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM users WHERE id = ?1", [id], |row| {
            row.get(0)
        })?;
        Ok(count > 0)
    }

    /// Find or create the user row for an auth identity
    pub fn ensure_user(&self, auth_id: &str) -> SqliteResult<i64> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR IGNORE INTO users (auth_id) VALUES (?1)",
            [auth_id],
        )?;
        conn.query_row("SELECT id FROM users WHERE auth_id = ?1", [auth_id], |row| {
            row.get(0)
        })
    }

    // =====================================================
    // Platform connections
    // =====================================================

    /// Persist a successful authorization. Last write wins on the
    /// (user_id, platform) key; re-connects are idempotent to re-apply.
    pub fn upsert_connection(
        &self,
        user_id: i64,
        platform: Platform,
        username: &str,
        access_token: &str,
        access_token_secret: Option<&str>,
        profile_image: Option<&str>,
    ) -> SqliteResult<PlatformConnection> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO platform_connections
                (user_id, platform, connected, username, access_token, access_token_secret,
                 profile_image, last_verified, created_at, updated_at)
             VALUES (?1, ?2, 1, ?3, ?4, ?5, ?6, ?7, ?7, ?7)
             ON CONFLICT(user_id, platform) DO UPDATE SET
                connected = 1,
                username = excluded.username,
                access_token = excluded.access_token,
                access_token_secret = excluded.access_token_secret,
                profile_image = excluded.profile_image,
                last_verified = excluded.last_verified,
                updated_at = excluded.updated_at",
            rusqlite::params![
                user_id,
                platform.as_str(),
                username,
                access_token,
                access_token_secret,
                profile_image,
                now
            ],
        )?;
        self.get_connection_internal(&conn, user_id, platform)
            .map(|c| c.expect("row just upserted"))
    }

    pub fn get_connection(
        &self,
        user_id: i64,
        platform: Platform,
    ) -> SqliteResult<Option<PlatformConnection>> {
        let conn = self.conn.lock().unwrap();
        self.get_connection_internal(&conn, user_id, platform)
    }

    fn get_connection_internal(
        &self,
        conn: &Connection,
        user_id: i64,
        platform: Platform,
    ) -> SqliteResult<Option<PlatformConnection>> {
        conn.query_row(
            "SELECT id, user_id, platform, connected, username, access_token,
                    access_token_secret, profile_image, last_verified, created_at, updated_at
             FROM platform_connections WHERE user_id = ?1 AND platform = ?2",
            rusqlite::params![user_id, platform.as_str()],
            |row| map_connection_row(row),
        )
        .optional()
    }

    /// Record a verification result against the stored row
    pub fn set_connection_verified(
        &self,
        user_id: i64,
        platform: Platform,
        connected: bool,
    ) -> SqliteResult<()> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "UPDATE platform_connections
             SET connected = ?3, last_verified = ?4, updated_at = ?4
             WHERE user_id = ?1 AND platform = ?2",
            rusqlite::params![user_id, platform.as_str(), connected as i32, now],
        )?;
        Ok(())
    }

    /// Disconnection clears the connected flag and tokens but never
    /// deletes the row.
    pub fn disconnect_connection(&self, user_id: i64, platform: Platform) -> SqliteResult<bool> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now().to_rfc3339();
        let updated = conn.execute(
            "UPDATE platform_connections
             SET connected = 0, access_token = NULL, access_token_secret = NULL, updated_at = ?3
             WHERE user_id = ?1 AND platform = ?2",
            rusqlite::params![user_id, platform.as_str(), now],
        )?;
        Ok(updated > 0)
    }

    /// All currently connected accounts (refresher input)
    pub fn list_connected(&self) -> SqliteResult<Vec<PlatformConnection>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, user_id, platform, connected, username, access_token,
                    access_token_secret, profile_image, last_verified, created_at, updated_at
             FROM platform_connections WHERE connected = 1",
        )?;
        let rows = stmt.query_map([], |row| map_connection_row(row))?;
        rows.collect()
    }

    pub fn count_connections(&self) -> SqliteResult<i64> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT COUNT(*) FROM platform_connections WHERE connected = 1",
            [],
            |row| row.get(0),
        )
    }

    // =====================================================
    // Content
    // =====================================================

    pub fn insert_content(
        &self,
        user_id: i64,
        platform: Platform,
        content_type: ContentType,
        intent: Option<&str>,
        body: &str,
        media_url: Option<&str>,
        status: ContentStatus,
        platform_post_id: Option<&str>,
    ) -> SqliteResult<ContentItem> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now().to_rfc3339();
        let published_at = if status == ContentStatus::Published {
            Some(now.clone())
        } else {
            None
        };
        conn.execute(
            "INSERT INTO content
                (user_id, content_type, intent, platform, body, media_url, status,
                 platform_post_id, created_at, published_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            rusqlite::params![
                user_id,
                content_type.as_str(),
                intent,
                platform.as_str(),
                body,
                media_url,
                status.as_str(),
                platform_post_id,
                now,
                published_at
            ],
        )?;
        let id = conn.last_insert_rowid();
        conn.query_row(
            "SELECT id, user_id, content_type, intent, platform, body, media_url, status,
                    platform_post_id, created_at, scheduled_for, published_at
             FROM content WHERE id = ?1",
            [id],
            |row| map_content_row(row),
        )
    }

    pub fn get_content(&self, id: i64) -> SqliteResult<Option<ContentItem>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT id, user_id, content_type, intent, platform, body, media_url, status,
                    platform_post_id, created_at, scheduled_for, published_at
             FROM content WHERE id = ?1",
            [id],
            |row| map_content_row(row),
        )
        .optional()
    }

    /// Advance a content row's status. Reverse transitions are refused
    /// (status only moves draft -> scheduled -> published); returns
    /// whether a row actually changed.
    pub fn advance_content_status(
        &self,
        content_id: i64,
        new_status: ContentStatus,
    ) -> SqliteResult<bool> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now().to_rfc3339();
        let published_at = if new_status == ContentStatus::Published {
            Some(now.clone())
        } else {
            None
        };
        // The CASE ranks statuses so the WHERE clause only matches
        // forward transitions.
        let updated = conn.execute(
            "UPDATE content SET status = ?2,
                    published_at = COALESCE(?3, published_at)
             WHERE id = ?1
               AND (CASE status
                        WHEN 'draft' THEN 0
                        WHEN 'scheduled' THEN 1
                        WHEN 'published' THEN 2
                    END) < ?4",
            rusqlite::params![content_id, new_status.as_str(), published_at, new_status.rank()],
        )?;
        Ok(updated > 0)
    }

    pub fn list_content(&self, user_id: i64, limit: i64) -> SqliteResult<Vec<ContentItem>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, user_id, content_type, intent, platform, body, media_url, status,
                    platform_post_id, created_at, scheduled_for, published_at
             FROM content WHERE user_id = ?1
             ORDER BY created_at DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(rusqlite::params![user_id, limit], |row| map_content_row(row))?;
        rows.collect()
    }

    pub fn count_content(&self, user_id: i64) -> SqliteResult<i64> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT COUNT(*) FROM content WHERE user_id = ?1",
            [user_id],
            |row| row.get(0),
        )
    }

    pub fn find_content_by_post_id(
        &self,
        user_id: i64,
        platform: Platform,
        platform_post_id: &str,
    ) -> SqliteResult<Option<ContentItem>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT id, user_id, content_type, intent, platform, body, media_url, status,
                    platform_post_id, created_at, scheduled_for, published_at
             FROM content WHERE user_id = ?1 AND platform = ?2 AND platform_post_id = ?3",
            rusqlite::params![user_id, platform.as_str(), platform_post_id],
            |row| map_content_row(row),
        )
        .optional()
    }

    // =====================================================
    // Content metrics
    // =====================================================

    /// Zeroed metrics row written at publish time
    pub fn insert_content_metrics(&self, content_id: i64) -> SqliteResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR IGNORE INTO content_metrics (content_id) VALUES (?1)",
            [content_id],
        )?;
        Ok(())
    }

    pub fn update_content_metrics(&self, metrics: &ContentMetrics) -> SqliteResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO content_metrics
                (content_id, likes, comments, shares, views, impressions, reach)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(content_id) DO UPDATE SET
                likes = excluded.likes,
                comments = excluded.comments,
                shares = excluded.shares,
                views = excluded.views,
                impressions = excluded.impressions,
                reach = excluded.reach",
            rusqlite::params![
                metrics.content_id,
                metrics.likes,
                metrics.comments,
                metrics.shares,
                metrics.views,
                metrics.impressions,
                metrics.reach
            ],
        )?;
        Ok(())
    }

    pub fn get_content_metrics(&self, content_id: i64) -> SqliteResult<Option<ContentMetrics>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT content_id, likes, comments, shares, views, impressions, reach
             FROM content_metrics WHERE content_id = ?1",
            [content_id],
            |row| {
                Ok(ContentMetrics {
                    content_id: row.get(0)?,
                    likes: row.get(1)?,
                    comments: row.get(2)?,
                    shares: row.get(3)?,
                    views: row.get(4)?,
                    impressions: row.get(5)?,
                    reach: row.get(6)?,
                })
            },
        )
        .optional()
    }

    // =====================================================
    // Activity history (append-only)
    // =====================================================

    pub fn insert_activity(
        &self,
        user_id: i64,
        content_id: Option<i64>,
        platform: Platform,
        activity_type: &str,
        activity_detail: Option<&str>,
    ) -> SqliteResult<()> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO activity_history
                (user_id, content_id, platform, activity_type, activity_detail, occurred_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            rusqlite::params![
                user_id,
                content_id,
                platform.as_str(),
                activity_type,
                activity_detail,
                now
            ],
        )?;
        Ok(())
    }

    pub fn list_activity(&self, user_id: i64, limit: i64) -> SqliteResult<Vec<ActivityEntry>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, user_id, content_id, platform, activity_type, activity_detail, occurred_at
             FROM activity_history WHERE user_id = ?1
             ORDER BY occurred_at DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(rusqlite::params![user_id, limit], |row| {
            Ok(ActivityEntry {
                id: row.get(0)?,
                user_id: row.get(1)?,
                content_id: row.get(2)?,
                platform: parse_platform(row, 3)?,
                activity_type: row.get(4)?,
                activity_detail: row.get(5)?,
                occurred_at: row.get(6)?,
            })
        })?;
        rows.collect()
    }

    // =====================================================
    // Period statistics (find-or-upsert, atomic per key)
    // =====================================================

    pub fn upsert_follower_metrics(
        &self,
        user_id: i64,
        platform: Platform,
        day: &str,
        follower_count: i64,
        following_count: i64,
    ) -> SqliteResult<()> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO follower_metrics
                (user_id, platform, day, follower_count, following_count, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(user_id, platform, day) DO UPDATE SET
                follower_count = excluded.follower_count,
                following_count = excluded.following_count,
                updated_at = excluded.updated_at",
            rusqlite::params![
                user_id,
                platform.as_str(),
                day,
                follower_count,
                following_count,
                now
            ],
        )?;
        Ok(())
    }

    pub fn upsert_engagement_metrics(
        &self,
        user_id: i64,
        platform: Platform,
        period_key: &str,
        engagement_rate: f64,
        total_likes: i64,
        total_comments: i64,
        total_shares: i64,
    ) -> SqliteResult<()> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO engagement_metrics
                (user_id, platform, period_key, engagement_rate, total_likes,
                 total_comments, total_shares, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(user_id, platform, period_key) DO UPDATE SET
                engagement_rate = excluded.engagement_rate,
                total_likes = excluded.total_likes,
                total_comments = excluded.total_comments,
                total_shares = excluded.total_shares,
                updated_at = excluded.updated_at",
            rusqlite::params![
                user_id,
                platform.as_str(),
                period_key,
                engagement_rate,
                total_likes,
                total_comments,
                total_shares,
                now
            ],
        )?;
        Ok(())
    }

    pub fn upsert_daily_engagement(
        &self,
        user_id: i64,
        platform: Platform,
        weekday: &str,
        avg_engagement: f64,
        sample_count: i64,
    ) -> SqliteResult<()> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO daily_engagement
                (user_id, platform, weekday, avg_engagement, sample_count, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(user_id, platform, weekday) DO UPDATE SET
                avg_engagement = excluded.avg_engagement,
                sample_count = excluded.sample_count,
                updated_at = excluded.updated_at",
            rusqlite::params![
                user_id,
                platform.as_str(),
                weekday,
                avg_engagement,
                sample_count,
                now
            ],
        )?;
        Ok(())
    }

    pub fn upsert_platform_statistics(
        &self,
        user_id: i64,
        platform: Platform,
        period_key: &str,
        posts_published: i64,
        total_impressions: i64,
        total_reach: i64,
    ) -> SqliteResult<()> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO platform_statistics
                (user_id, platform, period_key, posts_published, total_impressions,
                 total_reach, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(user_id, platform, period_key) DO UPDATE SET
                posts_published = excluded.posts_published,
                total_impressions = excluded.total_impressions,
                total_reach = excluded.total_reach,
                updated_at = excluded.updated_at",
            rusqlite::params![
                user_id,
                platform.as_str(),
                period_key,
                posts_published,
                total_impressions,
                total_reach,
                now
            ],
        )?;
        Ok(())
    }

    pub fn get_follower_metrics(
        &self,
        user_id: i64,
        platform: Platform,
        day: &str,
    ) -> SqliteResult<Option<FollowerMetrics>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT id, user_id, platform, day, follower_count, following_count, updated_at
             FROM follower_metrics WHERE user_id = ?1 AND platform = ?2 AND day = ?3",
            rusqlite::params![user_id, platform.as_str(), day],
            |row| {
                Ok(FollowerMetrics {
                    id: row.get(0)?,
                    user_id: row.get(1)?,
                    platform: parse_platform(row, 2)?,
                    day: row.get(3)?,
                    follower_count: row.get(4)?,
                    following_count: row.get(5)?,
                    updated_at: row.get(6)?,
                })
            },
        )
        .optional()
    }

    pub fn get_engagement_metrics(
        &self,
        user_id: i64,
        platform: Platform,
        period_key: &str,
    ) -> SqliteResult<Option<EngagementMetrics>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT id, user_id, platform, period_key, engagement_rate, total_likes,
                    total_comments, total_shares, updated_at
             FROM engagement_metrics WHERE user_id = ?1 AND platform = ?2 AND period_key = ?3",
            rusqlite::params![user_id, platform.as_str(), period_key],
            |row| {
                Ok(EngagementMetrics {
                    id: row.get(0)?,
                    user_id: row.get(1)?,
                    platform: parse_platform(row, 2)?,
                    period_key: row.get(3)?,
                    engagement_rate: row.get(4)?,
                    total_likes: row.get(5)?,
                    total_comments: row.get(6)?,
                    total_shares: row.get(7)?,
                    updated_at: row.get(8)?,
                })
            },
        )
        .optional()
    }

    pub fn list_daily_engagement(
        &self,
        user_id: i64,
        platform: Platform,
    ) -> SqliteResult<Vec<DailyEngagement>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, user_id, platform, weekday, avg_engagement, sample_count, updated_at
             FROM daily_engagement WHERE user_id = ?1 AND platform = ?2",
        )?;
        let rows = stmt.query_map(rusqlite::params![user_id, platform.as_str()], |row| {
            Ok(DailyEngagement {
                id: row.get(0)?,
                user_id: row.get(1)?,
                platform: parse_platform(row, 2)?,
                weekday: row.get(3)?,
                avg_engagement: row.get(4)?,
                sample_count: row.get(5)?,
                updated_at: row.get(6)?,
            })
        })?;
        rows.collect()
    }

    pub fn get_platform_statistics(
        &self,
        user_id: i64,
        platform: Platform,
        period_key: &str,
    ) -> SqliteResult<Option<PlatformStatistics>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT id, user_id, platform, period_key, posts_published, total_impressions,
                    total_reach, updated_at
             FROM platform_statistics WHERE user_id = ?1 AND platform = ?2 AND period_key = ?3",
            rusqlite::params![user_id, platform.as_str(), period_key],
            |row| {
                Ok(PlatformStatistics {
                    id: row.get(0)?,
                    user_id: row.get(1)?,
                    platform: parse_platform(row, 2)?,
                    period_key: row.get(3)?,
                    posts_published: row.get(4)?,
                    total_impressions: row.get(5)?,
                    total_reach: row.get(6)?,
                    updated_at: row.get(7)?,
                })
            },
        )
        .optional()
    }

    /// Test helper; the table name is interpolated into the SQL
    #[cfg(test)]
    pub fn count_rows(&self, table: &str) -> SqliteResult<i64> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| {
            row.get(0)
        })
    }
}

fn parse_platform(row: &rusqlite::Row, idx: usize) -> SqliteResult<Platform> {
    let s: String = row.get(idx)?;
    Platform::parse(&s).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            rusqlite::types::Type::Text,
            format!("unknown platform: {}", s).into(),
        )
    })
}

fn parse_status(row: &rusqlite::Row, idx: usize) -> SqliteResult<ContentStatus> {
    let s: String = row.get(idx)?;
    ContentStatus::parse(&s).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            rusqlite::types::Type::Text,
            format!("unknown status: {}", s).into(),
        )
    })
}

fn parse_content_type(row: &rusqlite::Row, idx: usize) -> SqliteResult<ContentType> {
    let s: String = row.get(idx)?;
    ContentType::parse(&s).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            rusqlite::types::Type::Text,
            format!("unknown content type: {}", s).into(),
        )
    })
}

fn map_connection_row(row: &rusqlite::Row) -> SqliteResult<PlatformConnection> {
    Ok(PlatformConnection {
        id: row.get(0)?,
        user_id: row.get(1)?,
        platform: parse_platform(row, 2)?,
        connected: row.get::<_, i32>(3)? != 0,
        username: row.get(4)?,
        access_token: row.get(5)?,
        access_token_secret: row.get(6)?,
        profile_image: row.get(7)?,
        last_verified: row.get(8)?,
        created_at: row.get(9)?,
        updated_at: row.get(10)?,
    })
}

fn map_content_row(row: &rusqlite::Row) -> SqliteResult<ContentItem> {
    Ok(ContentItem {
        id: row.get(0)?,
        user_id: row.get(1)?,
        content_type: parse_content_type(row, 2)?,
        intent: row.get(3)?,
        platform: parse_platform(row, 4)?,
        body: row.get(5)?,
        media_url: row.get(6)?,
        status: parse_status(row, 7)?,
        platform_post_id: row.get(8)?,
        created_at: row.get(9)?,
        scheduled_for: row.get(10)?,
        published_at: row.get(11)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> Db {
        Db::open(":memory:").unwrap()
    }

    #[test]
    fn test_file_backed_db_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sync.db");
        let path = path.to_str().unwrap();

        let user = {
            let db = Db::open(path).unwrap();
            db.ensure_user("persisted").unwrap()
        };

        let db = Db::open(path).unwrap();
        assert_eq!(db.find_user_by_auth_id("persisted").unwrap(), Some(user));
    }

    #[test]
    fn test_ensure_user_is_idempotent() {
        let db = test_db();
        let a = db.ensure_user("auth-123").unwrap();
        let b = db.ensure_user("auth-123").unwrap();
        assert_eq!(a, b);
        assert_eq!(db.find_user_by_auth_id("auth-123").unwrap(), Some(a));
        assert_eq!(db.find_user_by_auth_id("other").unwrap(), None);
    }

    #[test]
    fn test_connection_upsert_single_row() {
        let db = test_db();
        let user = db.ensure_user("u1").unwrap();

        db.upsert_connection(user, Platform::Twitter, "alice", "tok1", Some("sec1"), None)
            .unwrap();
        let updated = db
            .upsert_connection(user, Platform::Twitter, "alice2", "tok2", Some("sec2"), None)
            .unwrap();

        assert_eq!(db.count_rows("platform_connections").unwrap(), 1);
        assert_eq!(updated.username.as_deref(), Some("alice2"));
        assert_eq!(updated.access_token.as_deref(), Some("tok2"));
        assert!(updated.connected);
    }

    #[test]
    fn test_disconnect_clears_tokens_keeps_row() {
        let db = test_db();
        let user = db.ensure_user("u1").unwrap();
        db.upsert_connection(user, Platform::Twitter, "alice", "tok", Some("sec"), None)
            .unwrap();

        assert!(db.disconnect_connection(user, Platform::Twitter).unwrap());

        let conn = db.get_connection(user, Platform::Twitter).unwrap().unwrap();
        assert!(!conn.connected);
        assert!(conn.access_token.is_none());
        assert!(conn.access_token_secret.is_none());
        assert_eq!(db.count_rows("platform_connections").unwrap(), 1);
    }

    #[test]
    fn test_connections_are_per_platform() {
        let db = test_db();
        let user = db.ensure_user("u1").unwrap();
        db.upsert_connection(user, Platform::Twitter, "a", "t1", Some("s1"), None)
            .unwrap();
        db.upsert_connection(user, Platform::Instagram, "a", "t2", None, None)
            .unwrap();
        assert_eq!(db.count_rows("platform_connections").unwrap(), 2);
        assert_eq!(db.list_connected().unwrap().len(), 2);
    }

    #[test]
    fn test_content_status_only_advances() {
        let db = test_db();
        let user = db.ensure_user("u1").unwrap();
        let item = db
            .insert_content(
                user,
                Platform::Twitter,
                ContentType::Text,
                None,
                "hello",
                None,
                ContentStatus::Draft,
                None,
            )
            .unwrap();

        assert!(db
            .advance_content_status(item.id, ContentStatus::Published)
            .unwrap());
        let published = db.get_content(item.id).unwrap().unwrap();
        assert_eq!(published.status, ContentStatus::Published);
        assert!(published.published_at.is_some());

        // Reverse transition is refused
        assert!(!db
            .advance_content_status(item.id, ContentStatus::Draft)
            .unwrap());
        assert!(!db
            .advance_content_status(item.id, ContentStatus::Scheduled)
            .unwrap());
        let still = db.get_content(item.id).unwrap().unwrap();
        assert_eq!(still.status, ContentStatus::Published);
    }

    #[test]
    fn test_content_metrics_zeroed_then_updated() {
        let db = test_db();
        let user = db.ensure_user("u1").unwrap();
        let item = db
            .insert_content(
                user,
                Platform::Twitter,
                ContentType::Text,
                None,
                "hi",
                None,
                ContentStatus::Published,
                Some("tw-1"),
            )
            .unwrap();

        db.insert_content_metrics(item.id).unwrap();
        let zeroed = db.get_content_metrics(item.id).unwrap().unwrap();
        assert_eq!(zeroed.likes, 0);

        db.update_content_metrics(&ContentMetrics {
            content_id: item.id,
            likes: 10,
            comments: 2,
            shares: 1,
            views: 100,
            impressions: 150,
            reach: 90,
        })
        .unwrap();
        let updated = db.get_content_metrics(item.id).unwrap().unwrap();
        assert_eq!(updated.likes, 10);
        assert_eq!(db.count_rows("content_metrics").unwrap(), 1);
    }

    #[test]
    fn test_period_upserts_are_idempotent() {
        let db = test_db();
        let user = db.ensure_user("u1").unwrap();

        for _ in 0..3 {
            db.upsert_follower_metrics(user, Platform::Twitter, "2026-08-30", 100, 50)
                .unwrap();
            db.upsert_engagement_metrics(
                user,
                Platform::Twitter,
                "2026-W35",
                4.2,
                100,
                20,
                5,
            )
            .unwrap();
            db.upsert_daily_engagement(user, Platform::Twitter, "saturday", 3.1, 12)
                .unwrap();
            db.upsert_platform_statistics(user, Platform::Twitter, "2026-W35", 7, 1000, 800)
                .unwrap();
        }

        assert_eq!(db.count_rows("follower_metrics").unwrap(), 1);
        assert_eq!(db.count_rows("engagement_metrics").unwrap(), 1);
        assert_eq!(db.count_rows("daily_engagement").unwrap(), 1);
        assert_eq!(db.count_rows("platform_statistics").unwrap(), 1);

        // A different period key creates a second row
        db.upsert_follower_metrics(user, Platform::Twitter, "2026-08-31", 101, 50)
            .unwrap();
        assert_eq!(db.count_rows("follower_metrics").unwrap(), 2);
    }

    #[test]
    fn test_activity_is_append_only() {
        let db = test_db();
        let user = db.ensure_user("u1").unwrap();
        db.insert_activity(user, None, Platform::Twitter, "publish", Some("tweet tw-1"))
            .unwrap();
        db.insert_activity(user, None, Platform::Twitter, "publish", Some("tweet tw-2"))
            .unwrap();
        let entries = db.list_activity(user, 10).unwrap();
        assert_eq!(entries.len(), 2);
    }
}
