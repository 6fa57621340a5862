//! Notification store: durable record of every admitted notification.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tokio::sync::Mutex;

use casedesk_common::types::{NewNotification, Notification};

use crate::error::StoreError;

/// Persistence boundary of the engine. Records are only ever created here;
/// read state and removal belong to the feed.
#[async_trait]
pub trait NotificationStore: Send + Sync {
    /// Persist a notification. Fails with `InvalidData` on an empty message.
    async fn create(&self, new: &NewNotification) -> Result<Notification, StoreError>;

    /// Most recent notification for the pair created within `window`.
    async fn find_recent(
        &self,
        recipient_id: i64,
        dedup_key: &str,
        window: Duration,
    ) -> Result<Option<Notification>, StoreError>;

    /// Persist `new` unless its (recipient, dedup key) pair already has a
    /// notification within `window`, in which case `Duplicate` is returned.
    ///
    /// The default is a plain check-then-insert and relies on the caller
    /// holding the dedup guard; stores that can make it atomic override it.
    async fn create_unless_recent(
        &self,
        new: &NewNotification,
        window: Duration,
    ) -> Result<Notification, StoreError> {
        if let Some(key) = new.effective_dedup_key()
            && self.find_recent(new.recipient_id, key, window).await?.is_some()
        {
            return Err(StoreError::Duplicate {
                recipient_id: new.recipient_id,
                dedup_key: key.to_string(),
            });
        }
        self.create(new).await
    }
}

fn validate(new: &NewNotification) -> Result<(), StoreError> {
    if new.message.trim().is_empty() {
        return Err(StoreError::InvalidData(
            "Notification message must not be empty".to_string(),
        ));
    }
    Ok(())
}

/// PostgreSQL-backed store.
#[derive(Debug, Clone)]
pub struct PgNotificationStore {
    pool: PgPool,
}

impl PgNotificationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const INSERT_NOTIFICATION: &str = r#"
    INSERT INTO notifications (recipient_id, message, kind, link, entity_type, entity_id, dedup_key)
    VALUES ($1, $2, $3, $4, $5, $6, $7)
    RETURNING *
"#;

const FIND_RECENT: &str = r#"
    SELECT *
    FROM notifications
    WHERE recipient_id = $1
      AND dedup_key = $2
      AND created_at > NOW() - ($3::bigint * INTERVAL '1 millisecond')
    ORDER BY created_at DESC
    LIMIT 1
"#;

/// Longest window bound into SQL (100 years), well inside Postgres' interval range.
const MAX_WINDOW_MILLIS: i64 = 100 * 365 * 24 * 60 * 60 * 1000;

fn window_millis(window: Duration) -> i64 {
    i64::try_from(window.as_millis())
        .unwrap_or(i64::MAX)
        .min(MAX_WINDOW_MILLIS)
}

#[async_trait]
impl NotificationStore for PgNotificationStore {
    async fn create(&self, new: &NewNotification) -> Result<Notification, StoreError> {
        validate(new)?;

        let notification: Notification = sqlx::query_as(INSERT_NOTIFICATION)
            .bind(new.recipient_id)
            .bind(&new.message)
            .bind(new.kind.to_string())
            .bind(&new.link)
            .bind(new.entity_type.map(|t| t.to_string()))
            .bind(new.entity_id)
            .bind(new.effective_dedup_key())
            .fetch_one(&self.pool)
            .await?;

        Ok(notification)
    }

    async fn find_recent(
        &self,
        recipient_id: i64,
        dedup_key: &str,
        window: Duration,
    ) -> Result<Option<Notification>, StoreError> {
        let found: Option<Notification> = sqlx::query_as(FIND_RECENT)
            .bind(recipient_id)
            .bind(dedup_key)
            .bind(window_millis(window))
            .fetch_optional(&self.pool)
            .await?;

        Ok(found)
    }

    /// Check and insert inside one transaction holding a transaction-scoped
    /// advisory lock on the (recipient, key) pair, so concurrent writers on
    /// any instance serialize on the database.
    async fn create_unless_recent(
        &self,
        new: &NewNotification,
        window: Duration,
    ) -> Result<Notification, StoreError> {
        validate(new)?;

        let Some(key) = new.effective_dedup_key() else {
            return self.create(new).await;
        };

        let mut tx = self.pool.begin().await?;

        sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))")
            .bind(format!("notification:{}:{}", new.recipient_id, key))
            .execute(&mut *tx)
            .await?;

        let existing: Option<Notification> = sqlx::query_as(FIND_RECENT)
            .bind(new.recipient_id)
            .bind(key)
            .bind(window_millis(window))
            .fetch_optional(&mut *tx)
            .await?;

        if existing.is_some() {
            tx.rollback().await?;
            return Err(StoreError::Duplicate {
                recipient_id: new.recipient_id,
                dedup_key: key.to_string(),
            });
        }

        let notification: Notification = sqlx::query_as(INSERT_NOTIFICATION)
            .bind(new.recipient_id)
            .bind(&new.message)
            .bind(new.kind.to_string())
            .bind(&new.link)
            .bind(new.entity_type.map(|t| t.to_string()))
            .bind(new.entity_id)
            .bind(key)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(notification)
    }
}

#[derive(Debug, Default)]
struct MemoryRows {
    rows: Vec<Notification>,
    next_id: i64,
}

/// In-memory store, for tests and embedded use.
///
/// An optional write latency widens the gap between check and insert so
/// races surface in tests.
#[derive(Debug, Default)]
pub struct InMemoryNotificationStore {
    state: Mutex<MemoryRows>,
    latency: Option<Duration>,
}

impl InMemoryNotificationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Insert a record with an explicit creation time.
    pub async fn insert_at(
        &self,
        new: &NewNotification,
        created_at: DateTime<Utc>,
    ) -> Result<Notification, StoreError> {
        validate(new)?;

        let mut state = self.state.lock().await;
        state.next_id += 1;
        let notification = Notification {
            id: state.next_id,
            recipient_id: new.recipient_id,
            message: new.message.clone(),
            kind: new.kind,
            link: new.link.clone(),
            is_read: false,
            entity_type: new.entity_type,
            entity_id: new.entity_id,
            dedup_key: new.effective_dedup_key().map(str::to_string),
            created_at,
        };
        state.rows.push(notification.clone());
        Ok(notification)
    }

    /// Snapshot of every stored record, oldest first.
    pub async fn all(&self) -> Vec<Notification> {
        self.state.lock().await.rows.clone()
    }

    pub async fn count_for(&self, recipient_id: i64, dedup_key: &str) -> usize {
        self.state
            .lock()
            .await
            .rows
            .iter()
            .filter(|n| n.recipient_id == recipient_id && n.dedup_key.as_deref() == Some(dedup_key))
            .count()
    }
}

#[async_trait]
impl NotificationStore for InMemoryNotificationStore {
    async fn create(&self, new: &NewNotification) -> Result<Notification, StoreError> {
        validate(new)?;
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        self.insert_at(new, Utc::now()).await
    }

    async fn find_recent(
        &self,
        recipient_id: i64,
        dedup_key: &str,
        window: Duration,
    ) -> Result<Option<Notification>, StoreError> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        let cutoff = chrono::Duration::from_std(window)
            .ok()
            .and_then(|w| Utc::now().checked_sub_signed(w))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        let state = self.state.lock().await;
        Ok(state
            .rows
            .iter()
            .filter(|n| {
                n.recipient_id == recipient_id
                    && n.dedup_key.as_deref() == Some(dedup_key)
                    && n.created_at > cutoff
            })
            .max_by_key(|n| n.created_at)
            .cloned())
    }
}
