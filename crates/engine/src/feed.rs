//! Feed service: a recipient's view of their own notifications.
//!
//! Read state is the only mutation allowed on a notification after creation,
//! and only by its recipient.

use sqlx::PgPool;

use casedesk_common::error::AppError;
use casedesk_common::types::Notification;

/// Default page size of the feed.
pub const DEFAULT_FEED_LIMIT: i64 = 50;

/// Upper bound on a single feed page.
pub const MAX_FEED_LIMIT: i64 = 200;

/// Query parameters for listing the feed.
#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct FeedQuery {
    #[serde(default)]
    pub unread_only: bool,
    pub limit: Option<i64>,
}

impl FeedQuery {
    fn effective_limit(&self) -> i64 {
        self.limit
            .unwrap_or(DEFAULT_FEED_LIMIT)
            .clamp(1, MAX_FEED_LIMIT)
    }
}

/// Service layer for notification feed operations.
pub struct FeedService;

impl FeedService {
    /// List a user's notifications, newest first.
    pub async fn list(
        pool: &PgPool,
        recipient_id: i64,
        query: &FeedQuery,
    ) -> Result<Vec<Notification>, AppError> {
        let notifications: Vec<Notification> = sqlx::query_as(
            r#"
            SELECT *
            FROM notifications
            WHERE recipient_id = $1
              AND ($2 = false OR is_read = false)
            ORDER BY created_at DESC, id DESC
            LIMIT $3
            "#,
        )
        .bind(recipient_id)
        .bind(query.unread_only)
        .bind(query.effective_limit())
        .fetch_all(pool)
        .await?;

        Ok(notifications)
    }

    pub async fn unread_count(pool: &PgPool, recipient_id: i64) -> Result<i64, AppError> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM notifications WHERE recipient_id = $1 AND is_read = false",
        )
        .bind(recipient_id)
        .fetch_one(pool)
        .await?;

        Ok(count)
    }

    /// Mark one of the recipient's notifications read.
    pub async fn mark_read(
        pool: &PgPool,
        notification_id: i64,
        recipient_id: i64,
    ) -> Result<Notification, AppError> {
        let notification: Notification = sqlx::query_as(
            r#"
            UPDATE notifications
            SET is_read = true
            WHERE id = $1 AND recipient_id = $2
            RETURNING *
            "#,
        )
        .bind(notification_id)
        .bind(recipient_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| {
            AppError::NotFound(format!("Notification {} not found", notification_id))
        })?;

        tracing::debug!(notification_id, recipient_id, "Notification marked read");

        Ok(notification)
    }

    /// Mark every unread notification of the recipient read. Returns how many changed.
    pub async fn mark_all_read(pool: &PgPool, recipient_id: i64) -> Result<u64, AppError> {
        let result = sqlx::query(
            "UPDATE notifications SET is_read = true WHERE recipient_id = $1 AND is_read = false",
        )
        .bind(recipient_id)
        .execute(pool)
        .await?;

        let updated = result.rows_affected();
        tracing::info!(recipient_id, updated, "Notifications marked read");

        Ok(updated)
    }
}
