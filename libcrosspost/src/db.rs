//! Database operations for Crosspost

use sqlx::sqlite::{SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use std::path::Path;

use crate::error::{DbError, Result};
use crate::types::{PlatformKind, PlatformResponses, Post, PostStatus};

const POST_COLUMNS: &str = "id, tenant_id, created_by, content, image_url, image_urls, link, \
     platforms, status, scheduled_at, platform_responses, error_log, is_deleted, deleted_at, \
     created_at, updated_at, edited_at, published_at, version";

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Create a new database connection
    pub async fn new(db_path: &str) -> Result<Self> {
        // Expand path and create parent directories
        let expanded_path = shellexpand::tilde(db_path).to_string();
        let path = Path::new(&expanded_path);

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(DbError::IoError)?;
        }

        // mode=rwc creates the database file if it doesn't exist
        let db_url = format!("sqlite://{}?mode=rwc", expanded_path.replace('\\', "/"));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&db_url)
            .await
            .map_err(DbError::SqlxError)?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(DbError::MigrationError)?;

        Ok(Self { pool })
    }

    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Insert a freshly authored post
    pub async fn create_post(&self, post: &Post) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO posts (
                id, tenant_id, created_by, content, image_url, image_urls, link,
                platforms, status, scheduled_at, platform_responses, error_log,
                is_deleted, deleted_at, created_at, updated_at, edited_at, published_at, version
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&post.id)
        .bind(&post.tenant_id)
        .bind(&post.created_by)
        .bind(&post.content)
        .bind(&post.image_url)
        .bind(to_json(&post.image_urls)?)
        .bind(&post.link)
        .bind(to_json(&post.platforms)?)
        .bind(post.status.as_str())
        .bind(post.scheduled_at)
        .bind(to_json(&post.platform_responses)?)
        .bind(&post.error_log)
        .bind(post.is_deleted)
        .bind(post.deleted_at)
        .bind(post.created_at)
        .bind(post.updated_at)
        .bind(post.edited_at)
        .bind(post.published_at)
        .bind(post.version)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(())
    }

    /// Persist every mutable field of a post, guarded by its version.
    ///
    /// Returns `false` without writing when another writer saved the post
    /// since it was loaded. On success the in-memory version is bumped.
    pub async fn save_post(&self, post: &mut Post) -> Result<bool> {
        post.updated_at = chrono::Utc::now().timestamp();

        let result = sqlx::query(
            r#"
            UPDATE posts SET
                content = ?, image_url = ?, image_urls = ?, link = ?, platforms = ?,
                status = ?, scheduled_at = ?, platform_responses = ?, error_log = ?,
                is_deleted = ?, deleted_at = ?, updated_at = ?, edited_at = ?,
                published_at = ?, version = version + 1
            WHERE id = ? AND version = ?
            "#,
        )
        .bind(&post.content)
        .bind(&post.image_url)
        .bind(to_json(&post.image_urls)?)
        .bind(&post.link)
        .bind(to_json(&post.platforms)?)
        .bind(post.status.as_str())
        .bind(post.scheduled_at)
        .bind(to_json(&post.platform_responses)?)
        .bind(&post.error_log)
        .bind(post.is_deleted)
        .bind(post.deleted_at)
        .bind(post.updated_at)
        .bind(post.edited_at)
        .bind(post.published_at)
        .bind(&post.id)
        .bind(post.version)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        if result.rows_affected() == 1 {
            post.version += 1;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Get a post by ID, scoped to a tenant
    pub async fn get_post(&self, tenant_id: &str, post_id: &str) -> Result<Option<Post>> {
        let row = sqlx::query(&format!(
            "SELECT {POST_COLUMNS} FROM posts WHERE id = ? AND tenant_id = ?"
        ))
        .bind(post_id)
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        row.as_ref().map(post_from_row).transpose()
    }

    /// Get a post by ID regardless of tenant (background workers)
    pub async fn get_post_by_id(&self, post_id: &str) -> Result<Option<Post>> {
        let row = sqlx::query(&format!("SELECT {POST_COLUMNS} FROM posts WHERE id = ?"))
            .bind(post_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        row.as_ref().map(post_from_row).transpose()
    }

    /// Non-deleted posts for a tenant, newest first
    pub async fn list_posts(&self, tenant_id: &str) -> Result<Vec<Post>> {
        let rows = sqlx::query(&format!(
            "SELECT {POST_COLUMNS} FROM posts \
             WHERE tenant_id = ? AND is_deleted = 0 \
             ORDER BY created_at DESC"
        ))
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        rows.iter().map(post_from_row).collect()
    }

    /// Scheduled, non-deleted posts whose time is at or before `now`
    pub async fn get_scheduled_posts_due(&self, now: i64) -> Result<Vec<Post>> {
        let rows = sqlx::query(&format!(
            "SELECT {POST_COLUMNS} FROM posts \
             WHERE status = 'scheduled' AND is_deleted = 0 \
               AND scheduled_at IS NOT NULL AND scheduled_at <= ? \
             ORDER BY scheduled_at ASC"
        ))
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        rows.iter().map(post_from_row).collect()
    }

    /// Non-deleted posts currently in `status`
    pub async fn get_posts_by_status(&self, status: PostStatus) -> Result<Vec<Post>> {
        let rows = sqlx::query(&format!(
            "SELECT {POST_COLUMNS} FROM posts WHERE status = ? AND is_deleted = 0"
        ))
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        rows.iter().map(post_from_row).collect()
    }

    /// Atomically move a due post from `scheduled` to `publishing`.
    ///
    /// Returns `false` if another sweeper (or an edit) got there first.
    pub async fn claim_scheduled_post(&self, post_id: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE posts SET status = 'publishing', updated_at = ?, version = version + 1
            WHERE id = ? AND status = 'scheduled' AND is_deleted = 0
            "#,
        )
        .bind(chrono::Utc::now().timestamp())
        .bind(post_id)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(result.rows_affected() == 1)
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(|e| DbError::Serialization(e.to_string()).into())
}

fn from_json<T: serde::de::DeserializeOwned>(raw: &str, column: &str) -> Result<T> {
    serde_json::from_str(raw)
        .map_err(|e| DbError::Serialization(format!("{}: {}", column, e)).into())
}

fn post_from_row(row: &SqliteRow) -> Result<Post> {
    let status: String = row.get("status");
    let status = PostStatus::parse(&status)
        .ok_or_else(|| DbError::Serialization(format!("unknown post status '{}'", status)))?;

    let image_urls: Vec<String> = from_json(&row.get::<String, _>("image_urls"), "image_urls")?;
    let platforms: Vec<PlatformKind> = from_json(&row.get::<String, _>("platforms"), "platforms")?;
    let platform_responses: PlatformResponses = from_json(
        &row.get::<String, _>("platform_responses"),
        "platform_responses",
    )?;

    Ok(Post {
        id: row.get("id"),
        tenant_id: row.get("tenant_id"),
        created_by: row.get("created_by"),
        content: row.get("content"),
        image_url: row.get("image_url"),
        image_urls,
        link: row.get("link"),
        platforms,
        status,
        scheduled_at: row.get("scheduled_at"),
        platform_responses,
        error_log: row.get("error_log"),
        is_deleted: row.get("is_deleted"),
        deleted_at: row.get("deleted_at"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        edited_at: row.get("edited_at"),
        published_at: row.get("published_at"),
        version: row.get("version"),
    })
}
