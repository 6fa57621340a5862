//! Notification routes: event emission, the caller's feed and the live stream.

use std::convert::Infallible;

use axum::extract::{Path, Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::json;

use casedesk_common::error::AppError;
use casedesk_common::types::{EntityType, EventKind, Notification, NotificationKind};
use casedesk_engine::FanoutReport;
use casedesk_engine::event::NotificationEvent;
use casedesk_engine::feed::{FeedQuery, FeedService};

use crate::middleware::auth::AuthUser;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/notifications", get(list_notifications))
        .route("/api/notifications/events", post(emit_event))
        .route("/api/notifications/unread-count", get(unread_count))
        .route("/api/notifications/read-all", post(mark_all_read))
        .route("/api/notifications/stream", get(stream))
        .route("/api/notifications/{id}/read", patch(mark_read))
}

/// Body of `POST /api/notifications/events`.
#[derive(Debug, Deserialize)]
pub struct EmitEventRequest {
    pub kind: EventKind,
    pub message: String,
    pub case_id: Option<i64>,
    pub office_id: Option<i64>,
    #[serde(default)]
    pub assigned_staff_ids: Vec<i64>,
    pub link: Option<String>,
    #[serde(default)]
    pub notification_kind: NotificationKind,
    pub entity_type: Option<EntityType>,
    pub entity_id: Option<i64>,
    pub dedup_key: Option<String>,
}

impl EmitEventRequest {
    fn into_event(self, auth: &AuthUser) -> Result<NotificationEvent, AppError> {
        if self.entity_id.is_some() && self.entity_type.is_none() {
            return Err(AppError::Validation(
                "entity_id requires entity_type".to_string(),
            ));
        }

        let mut event = NotificationEvent::new(self.kind, auth.actor(), self.message)
            .with_assigned_staff(self.assigned_staff_ids)
            .with_notification_kind(self.notification_kind);

        event.case_id = self.case_id;
        event.office_id = self.office_id;
        event.link = self.link;
        event.dedup_key = self.dedup_key;
        if let Some(entity_type) = self.entity_type {
            event = event.with_entity(entity_type, self.entity_id);
        }
        Ok(event)
    }
}

/// Fanout summary returned to the emitting caller.
#[derive(Debug, Serialize)]
pub struct EmitEventResponse {
    pub recipients: usize,
    pub created: usize,
    pub suppressed: usize,
    pub failed: usize,
    pub notification_ids: Vec<i64>,
}

impl From<&FanoutReport> for EmitEventResponse {
    fn from(report: &FanoutReport) -> Self {
        Self {
            recipients: report.recipients(),
            created: report.created_count(),
            suppressed: report.suppressed_count(),
            failed: report.failed_count(),
            notification_ids: report.created().map(|n| n.id).collect(),
        }
    }
}

/// POST /api/notifications/events: Fan a domain event out as the caller.
async fn emit_event(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(body): Json<EmitEventRequest>,
) -> Result<Json<EmitEventResponse>, AppError> {
    if !auth.role.is_staff() {
        return Err(AppError::Forbidden(
            "Only staff accounts may emit notification events".to_string(),
        ));
    }

    let event = body.into_event(&auth)?;
    let report = state.engine.notify(&event).await?;

    Ok(Json(EmitEventResponse::from(&report)))
}

/// GET /api/notifications: The caller's feed, newest first.
async fn list_notifications(
    State(state): State<AppState>,
    auth: AuthUser,
    Query(query): Query<FeedQuery>,
) -> Result<Json<Vec<Notification>>, AppError> {
    let notifications = FeedService::list(&state.pool, auth.user_id, &query).await?;
    Ok(Json(notifications))
}

/// GET /api/notifications/unread-count
async fn unread_count(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Json<serde_json::Value>, AppError> {
    let count = FeedService::unread_count(&state.pool, auth.user_id).await?;
    Ok(Json(json!({ "unread": count })))
}

/// PATCH /api/notifications/{id}/read
async fn mark_read(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<i64>,
) -> Result<Json<Notification>, AppError> {
    let notification = FeedService::mark_read(&state.pool, id, auth.user_id).await?;
    Ok(Json(notification))
}

/// POST /api/notifications/read-all
async fn mark_all_read(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Json<serde_json::Value>, AppError> {
    let updated = FeedService::mark_all_read(&state.pool, auth.user_id).await?;
    Ok(Json(json!({ "updated": updated })))
}

/// GET /api/notifications/stream: Server-sent live payloads for the caller.
async fn stream(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let subscription = state.hub.subscribe(auth.user_id);

    let events = subscription.filter_map(|payload| async move {
        match Event::default().event("notification").json_data(&payload) {
            Ok(event) => Some(Ok(event)),
            Err(e) => {
                tracing::error!(notification_id = payload.id, error = %e, "Failed to encode live payload");
                None
            }
        }
    });

    Sse::new(events).keep_alive(KeepAlive::default())
}
