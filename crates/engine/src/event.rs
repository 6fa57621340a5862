//! Domain event input to the fanout engine.

use tokio::time::Instant;

use casedesk_common::types::{EntityType, EventKind, NewNotification, NotificationKind, Role};

use crate::error::EngineError;

/// The user whose action triggered the event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actor {
    pub id: i64,
    pub role: Role,
}

/// Reference to the domain object a notification is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntityRef {
    pub entity_type: EntityType,
    pub entity_id: Option<i64>,
}

/// A domain event to notify staff about.
///
/// The message arrives already formatted (and localized) by the caller.
#[derive(Debug, Clone)]
pub struct NotificationEvent {
    pub kind: EventKind,
    pub actor: Actor,
    pub case_id: Option<i64>,
    pub office_id: Option<i64>,
    /// Staff explicitly assigned by the triggering action, notified in
    /// addition to the directory-derived recipients.
    pub assigned_staff_ids: Vec<i64>,
    pub message: String,
    pub link: Option<String>,
    pub notification_kind: NotificationKind,
    pub entity: Option<EntityRef>,
    /// Caller-supplied suppression key, conventionally `"<domain>:<id>:<action>"`.
    pub dedup_key: Option<String>,
    /// Bound on each recipient's persist-and-deliver sequence.
    pub deadline: Option<Instant>,
}

impl NotificationEvent {
    pub fn new(kind: EventKind, actor: Actor, message: impl Into<String>) -> Self {
        Self {
            kind,
            actor,
            case_id: None,
            office_id: None,
            assigned_staff_ids: Vec::new(),
            message: message.into(),
            link: None,
            notification_kind: NotificationKind::Info,
            entity: None,
            dedup_key: None,
            deadline: None,
        }
    }

    pub fn with_case(mut self, case_id: i64) -> Self {
        self.case_id = Some(case_id);
        self
    }

    pub fn with_office(mut self, office_id: i64) -> Self {
        self.office_id = Some(office_id);
        self
    }

    pub fn with_assigned_staff(mut self, ids: impl IntoIterator<Item = i64>) -> Self {
        self.assigned_staff_ids.extend(ids);
        self
    }

    pub fn with_link(mut self, link: impl Into<String>) -> Self {
        self.link = Some(link.into());
        self
    }

    pub fn with_notification_kind(mut self, kind: NotificationKind) -> Self {
        self.notification_kind = kind;
        self
    }

    pub fn with_entity(mut self, entity_type: EntityType, entity_id: Option<i64>) -> Self {
        self.entity = Some(EntityRef {
            entity_type,
            entity_id,
        });
        self
    }

    pub fn with_dedup_key(mut self, key: impl Into<String>) -> Self {
        self.dedup_key = Some(key.into());
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Reject events that cannot produce a valid notification.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.message.trim().is_empty() {
            return Err(EngineError::Validation(
                "Notification message must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// The entity reference carried by notifications of this event.
    ///
    /// Falls back to the event's case when no explicit reference was given.
    pub fn entity(&self) -> Option<EntityRef> {
        self.entity.or_else(|| {
            self.case_id.map(|id| EntityRef {
                entity_type: EntityType::Case,
                entity_id: Some(id),
            })
        })
    }

    /// Build the record to persist for one recipient.
    pub fn notification_for(&self, recipient_id: i64) -> NewNotification {
        let entity = self.entity();
        NewNotification {
            recipient_id,
            message: self.message.clone(),
            kind: self.notification_kind,
            link: self.link.clone(),
            entity_type: entity.map(|e| e.entity_type),
            entity_id: entity.and_then(|e| e.entity_id),
            dedup_key: self.dedup_key.clone(),
        }
    }
}

/// Build a dedup key following the `"<domain>:<id>:<action>"` convention.
pub fn dedup_key(domain: &str, id: impl std::fmt::Display, action: &str) -> String {
    format!("{}:{}:{}", domain, id, action)
}
