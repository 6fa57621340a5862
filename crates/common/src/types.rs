use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Account role of a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    OfficeManager,
    Staff,
    Client,
}

impl Role {
    /// Staff-side roles may trigger and receive broadcast notifications.
    pub fn is_staff(&self) -> bool {
        !matches!(self, Role::Client)
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Admin => write!(f, "admin"),
            Role::OfficeManager => write!(f, "office_manager"),
            Role::Staff => write!(f, "staff"),
            Role::Client => write!(f, "client"),
        }
    }
}

/// Display category of a notification.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    #[default]
    Info,
    Success,
    Warning,
    Error,
}

impl std::fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NotificationKind::Info => write!(f, "info"),
            NotificationKind::Success => write!(f, "success"),
            NotificationKind::Warning => write!(f, "warning"),
            NotificationKind::Error => write!(f, "error"),
        }
    }
}

/// Domain object a notification points at, used for client-side routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Case,
    Appointment,
    ContactSubmission,
}

impl std::fmt::Display for EntityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntityType::Case => write!(f, "case"),
            EntityType::Appointment => write!(f, "appointment"),
            EntityType::ContactSubmission => write!(f, "contact_submission"),
        }
    }
}

/// Domain events that fan out notifications to staff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    // Case events
    CaseCreated,
    CaseUpdated,
    CaseStatusChanged,
    CaseAssigned,
    CaseCommented,

    // Appointment events
    AppointmentScheduled,
    AppointmentRescheduled,
    AppointmentCancelled,

    // Public contact form
    ContactSubmitted,
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventKind::CaseCreated => write!(f, "case_created"),
            EventKind::CaseUpdated => write!(f, "case_updated"),
            EventKind::CaseStatusChanged => write!(f, "case_status_changed"),
            EventKind::CaseAssigned => write!(f, "case_assigned"),
            EventKind::CaseCommented => write!(f, "case_commented"),
            EventKind::AppointmentScheduled => write!(f, "appointment_scheduled"),
            EventKind::AppointmentRescheduled => write!(f, "appointment_rescheduled"),
            EventKind::AppointmentCancelled => write!(f, "appointment_cancelled"),
            EventKind::ContactSubmitted => write!(f, "contact_submitted"),
        }
    }
}

/// A user account as seen by the notification engine.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    pub id: i64,
    pub email: String,
    pub full_name: String,
    pub role: Role,
    pub office_id: Option<i64>,
    pub is_active: bool,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl User {
    /// Whether this account may receive broadcast notifications at all.
    pub fn is_notifiable(&self) -> bool {
        self.is_active && self.deleted_at.is_none() && self.role.is_staff()
    }
}

/// A persisted notification.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Notification {
    pub id: i64,
    pub recipient_id: i64,
    pub message: String,
    pub kind: NotificationKind,
    pub link: Option<String>,
    pub is_read: bool,
    pub entity_type: Option<EntityType>,
    pub entity_id: Option<i64>,
    pub dedup_key: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A notification about to be persisted for one recipient.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewNotification {
    pub recipient_id: i64,
    pub message: String,
    pub kind: NotificationKind,
    pub link: Option<String>,
    pub entity_type: Option<EntityType>,
    pub entity_id: Option<i64>,
    pub dedup_key: Option<String>,
}

impl NewNotification {
    /// The dedup key, if one is present and non-blank.
    pub fn effective_dedup_key(&self) -> Option<&str> {
        self.dedup_key.as_deref().filter(|k| !k.trim().is_empty())
    }
}

/// Payload pushed to a recipient's live connections.
///
/// The camelCase keys (`message`, `type`, `link`, `entityType`, `entityId`)
/// are the contract with connected clients. `entityType` is an empty string
/// when the notification has no entity reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LivePayload {
    pub id: i64,
    pub message: String,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub link: Option<String>,
    pub entity_type: String,
    pub entity_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

impl From<&Notification> for LivePayload {
    fn from(n: &Notification) -> Self {
        Self {
            id: n.id,
            message: n.message.clone(),
            kind: n.kind,
            link: n.link.clone(),
            entity_type: n.entity_type.map(|t| t.to_string()).unwrap_or_default(),
            entity_id: n.entity_id,
            created_at: n.created_at,
        }
    }
}
