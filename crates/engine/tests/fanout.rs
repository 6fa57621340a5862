//! Fanout pipeline tests against the in-memory directory and store.
//!
//! ```bash
//! cargo test -p casedesk-engine --test fanout
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use casedesk_common::types::{
    EntityType, EventKind, LivePayload, NewNotification, Notification, Role, User,
};
use casedesk_engine::delivery::{DeliveryOutcome, LiveDelivery};
use casedesk_engine::directory::{CaseInfo, RecipientDirectory, StaticDirectory};
use casedesk_engine::error::{EngineError, StoreError};
use casedesk_engine::event::{Actor, NotificationEvent, dedup_key};
use casedesk_engine::guard::DedupGuard;
use casedesk_engine::store::{InMemoryNotificationStore, NotificationStore};
use casedesk_engine::{EngineConfig, FanoutOrchestrator, RecipientOutcome};

// ============================================================
// Shared helpers
// ============================================================

const ADMIN_A: i64 = 1;
const ADMIN_B: i64 = 2;
const ADMIN_C: i64 = 3;
const STAFF_S: i64 = 10;
const STAFF_UNASSIGNED: i64 = 11;
const CLIENT: i64 = 20;
const CASE_ID: i64 = 7;

fn user(id: i64, role: Role) -> User {
    User {
        id,
        email: format!("user{}@example.com", id),
        full_name: format!("User {}", id),
        role,
        office_id: None,
        is_active: true,
        deleted_at: None,
    }
}

/// Admins A, B, C; staff S assigned to case #7; an unassigned staff member;
/// a client also attached to the case.
fn case_directory() -> StaticDirectory {
    StaticDirectory::new()
        .with_user(user(ADMIN_A, Role::Admin))
        .with_user(user(ADMIN_B, Role::Admin))
        .with_user(user(ADMIN_C, Role::Admin))
        .with_user(user(STAFF_S, Role::Staff))
        .with_user(user(STAFF_UNASSIGNED, Role::Staff))
        .with_user(user(CLIENT, Role::Client))
        .with_case(CaseInfo {
            id: CASE_ID,
            office_id: None,
            primary_staff_id: None,
        })
        .with_assignment(CASE_ID, STAFF_S)
        .with_assignment(CASE_ID, CLIENT)
}

/// Records every push; recipients in `connected` accept it.
#[derive(Default)]
struct RecordingDelivery {
    connected: HashSet<i64>,
    sent: Mutex<Vec<(i64, LivePayload)>>,
}

impl RecordingDelivery {
    fn connected(ids: impl IntoIterator<Item = i64>) -> Self {
        Self {
            connected: ids.into_iter().collect(),
            sent: Mutex::new(Vec::new()),
        }
    }

    async fn attempts(&self) -> usize {
        self.sent.lock().await.len()
    }
}

#[async_trait]
impl LiveDelivery for RecordingDelivery {
    async fn send(&self, recipient_id: i64, payload: LivePayload) -> DeliveryOutcome {
        self.sent.lock().await.push((recipient_id, payload));
        if self.connected.contains(&recipient_id) {
            DeliveryOutcome::Delivered(1)
        } else {
            DeliveryOutcome::NoConnection
        }
    }
}

fn orchestrator(
    directory: impl RecipientDirectory + 'static,
    store: Arc<dyn NotificationStore>,
    delivery: Arc<dyn LiveDelivery>,
) -> FanoutOrchestrator {
    let config = EngineConfig::default();
    FanoutOrchestrator::new(
        Arc::new(directory),
        store,
        delivery,
        Arc::new(DedupGuard::new(config.dedup_window)),
        config,
    )
}

fn comment_event(actor_id: i64) -> NotificationEvent {
    NotificationEvent::new(
        EventKind::CaseCommented,
        Actor {
            id: actor_id,
            role: Role::Admin,
        },
        "New comment on case #7",
    )
    .with_case(CASE_ID)
    .with_link("/cases/7")
    .with_dedup_key(dedup_key("case", CASE_ID, "comment"))
}

fn recipients_of(rows: &[Notification]) -> HashSet<i64> {
    rows.iter().map(|n| n.recipient_id).collect()
}

// ============================================================
// Scenarios
// ============================================================

#[tokio::test]
async fn test_admin_comment_notifies_other_admins_and_assignee() {
    let store = Arc::new(InMemoryNotificationStore::new());
    let delivery = Arc::new(RecordingDelivery::default());
    let engine = orchestrator(case_directory(), store.clone(), delivery.clone());

    let report = engine.notify(&comment_event(ADMIN_A)).await.unwrap();

    assert_eq!(report.recipients(), 3);
    assert_eq!(report.created_count(), 3);
    assert_eq!(report.failed_count(), 0);

    let rows = store.all().await;
    assert_eq!(
        recipients_of(&rows),
        HashSet::from([ADMIN_B, ADMIN_C, STAFF_S])
    );
    for row in &rows {
        assert_eq!(row.entity_type, Some(EntityType::Case));
        assert_eq!(row.entity_id, Some(CASE_ID));
        assert!(!row.is_read);
    }
}

#[tokio::test]
async fn test_actor_and_clients_never_notified() {
    let store = Arc::new(InMemoryNotificationStore::new());
    let delivery = Arc::new(RecordingDelivery::default());
    let engine = orchestrator(case_directory(), store.clone(), delivery.clone());

    let event = comment_event(STAFF_S).with_assigned_staff([CLIENT, STAFF_S]);
    engine.notify(&event).await.unwrap();

    let notified = recipients_of(&store.all().await);
    assert!(!notified.contains(&STAFF_S));
    assert!(!notified.contains(&CLIENT));
    assert!(!notified.contains(&STAFF_UNASSIGNED));

    let delivered: HashSet<i64> = delivery.sent.lock().await.iter().map(|(id, _)| *id).collect();
    assert!(!delivered.contains(&STAFF_S));
    assert!(!delivered.contains(&CLIENT));
}

#[tokio::test]
async fn test_concurrent_events_same_key_store_one_row_per_recipient() {
    let store = Arc::new(InMemoryNotificationStore::new().with_latency(Duration::from_millis(5)));
    let delivery = Arc::new(RecordingDelivery::default());
    let engine = Arc::new(orchestrator(case_directory(), store.clone(), delivery.clone()));

    let mut handles = Vec::new();
    for _ in 0..8 {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            engine.notify(&comment_event(ADMIN_A)).await.unwrap()
        }));
    }

    let mut created = 0;
    let mut suppressed = 0;
    for handle in handles {
        let report = handle.await.unwrap();
        created += report.created_count();
        suppressed += report.suppressed_count();
    }

    assert_eq!(created, 3);
    assert_eq!(suppressed, 3 * 7);
    for recipient in [ADMIN_B, ADMIN_C, STAFF_S] {
        assert_eq!(store.count_for(recipient, "case:7:comment").await, 1);
    }
    assert_eq!(delivery.attempts().await, 3);
}

#[tokio::test]
async fn test_repeat_within_window_is_suppressed() {
    let store = Arc::new(InMemoryNotificationStore::new());
    let delivery = Arc::new(RecordingDelivery::default());
    let engine = orchestrator(case_directory(), store.clone(), delivery.clone());

    engine.notify(&comment_event(ADMIN_A)).await.unwrap();
    let second = engine.notify(&comment_event(ADMIN_A)).await.unwrap();

    assert_eq!(second.created_count(), 0);
    assert_eq!(second.suppressed_count(), 3);
    assert_eq!(store.all().await.len(), 3);
}

#[tokio::test]
async fn test_distinct_keys_not_cross_suppressed() {
    let store = Arc::new(InMemoryNotificationStore::new());
    let delivery = Arc::new(RecordingDelivery::default());
    let engine = orchestrator(case_directory(), store.clone(), delivery.clone());

    engine.notify(&comment_event(ADMIN_A)).await.unwrap();
    let status_change = comment_event(ADMIN_A).with_dedup_key(dedup_key("case", CASE_ID, "status"));
    let report = engine.notify(&status_change).await.unwrap();

    assert_eq!(report.created_count(), 3);
    assert_eq!(store.count_for(STAFF_S, "case:7:comment").await, 1);
    assert_eq!(store.count_for(STAFF_S, "case:7:status").await, 1);
}

#[tokio::test]
async fn test_unkeyed_events_always_create() {
    let store = Arc::new(InMemoryNotificationStore::new());
    let delivery = Arc::new(RecordingDelivery::default());
    let engine = orchestrator(case_directory(), store.clone(), delivery.clone());

    let mut event = comment_event(ADMIN_A);
    event.dedup_key = None;

    engine.notify(&event).await.unwrap();
    engine.notify(&event).await.unwrap();

    assert_eq!(store.all().await.len(), 6);
}

#[tokio::test]
async fn test_zero_recipients_is_a_quiet_success() {
    let store = Arc::new(InMemoryNotificationStore::new());
    let delivery = Arc::new(RecordingDelivery::default());
    let directory = StaticDirectory::new().with_user(user(ADMIN_A, Role::Admin));
    let engine = orchestrator(directory, store.clone(), delivery.clone());

    let report = engine.notify(&comment_event(ADMIN_A)).await.unwrap();

    assert_eq!(report.recipients(), 0);
    assert!(store.all().await.is_empty());
    assert_eq!(delivery.attempts().await, 0);
}

#[tokio::test]
async fn test_empty_message_aborts_without_side_effects() {
    let store = Arc::new(InMemoryNotificationStore::new());
    let delivery = Arc::new(RecordingDelivery::default());
    let engine = orchestrator(case_directory(), store.clone(), delivery.clone());

    let mut event = comment_event(ADMIN_A);
    event.message = "  ".to_string();

    let result = engine.notify(&event).await;
    assert!(matches!(result, Err(EngineError::Validation(_))));
    assert!(store.all().await.is_empty());
    assert_eq!(delivery.attempts().await, 0);
}

#[tokio::test]
async fn test_connected_recipient_receives_payload() {
    let store = Arc::new(InMemoryNotificationStore::new());
    let delivery = Arc::new(RecordingDelivery::connected([STAFF_S]));
    let engine = orchestrator(case_directory(), store.clone(), delivery.clone());

    let report = engine.notify(&comment_event(ADMIN_A)).await.unwrap();
    assert_eq!(report.delivered_count(), 1);

    for r in &report.outcomes {
        match (&r.outcome, r.recipient_id) {
            (RecipientOutcome::Delivered { connections, .. }, STAFF_S) => {
                assert_eq!(*connections, 1)
            }
            (RecipientOutcome::Stored { .. }, ADMIN_B | ADMIN_C) => {}
            (other, id) => panic!("unexpected outcome for {}: {:?}", id, other),
        }
    }

    let sent = delivery.sent.lock().await;
    let (_, payload) = sent.iter().find(|(id, _)| *id == STAFF_S).unwrap();
    let json = serde_json::to_value(payload).unwrap();
    assert_eq!(json["message"], "New comment on case #7");
    assert_eq!(json["type"], "info");
    assert_eq!(json["link"], "/cases/7");
    assert_eq!(json["entityType"], "case");
    assert_eq!(json["entityId"], CASE_ID);
}

// ============================================================
// Failure isolation
// ============================================================

/// Fails every insert for one recipient.
struct FlakyStore {
    inner: InMemoryNotificationStore,
    broken_recipient: i64,
}

#[async_trait]
impl NotificationStore for FlakyStore {
    async fn create(&self, new: &NewNotification) -> Result<Notification, StoreError> {
        if new.recipient_id == self.broken_recipient {
            return Err(StoreError::Database(sqlx::Error::PoolTimedOut));
        }
        self.inner.create(new).await
    }

    async fn find_recent(
        &self,
        recipient_id: i64,
        dedup_key: &str,
        window: Duration,
    ) -> Result<Option<Notification>, StoreError> {
        self.inner.find_recent(recipient_id, dedup_key, window).await
    }
}

#[tokio::test]
async fn test_storage_failure_isolated_to_one_recipient() {
    let store = Arc::new(FlakyStore {
        inner: InMemoryNotificationStore::new(),
        broken_recipient: ADMIN_B,
    });
    let delivery = Arc::new(RecordingDelivery::default());
    let engine = orchestrator(case_directory(), store.clone(), delivery.clone());

    let report = engine.notify(&comment_event(ADMIN_A)).await.unwrap();

    assert_eq!(report.created_count(), 2);
    let failures: Vec<_> = report.failures().collect();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].0, ADMIN_B);
    assert!(matches!(failures[0].1, EngineError::Storage(_)));
    assert_eq!(
        recipients_of(&store.inner.all().await),
        HashSet::from([ADMIN_C, STAFF_S])
    );
}

/// Store whose dedup lookup fails for one recipient.
struct BlindStore {
    inner: InMemoryNotificationStore,
    broken_recipient: i64,
}

#[async_trait]
impl NotificationStore for BlindStore {
    async fn create(&self, new: &NewNotification) -> Result<Notification, StoreError> {
        self.inner.create(new).await
    }

    async fn find_recent(
        &self,
        recipient_id: i64,
        dedup_key: &str,
        window: Duration,
    ) -> Result<Option<Notification>, StoreError> {
        if recipient_id == self.broken_recipient {
            return Err(StoreError::Database(sqlx::Error::PoolTimedOut));
        }
        self.inner.find_recent(recipient_id, dedup_key, window).await
    }
}

#[tokio::test]
async fn test_lookup_failure_isolated_to_one_recipient() {
    let store = Arc::new(BlindStore {
        inner: InMemoryNotificationStore::new(),
        broken_recipient: STAFF_S,
    });
    let delivery = Arc::new(RecordingDelivery::default());
    let engine = orchestrator(case_directory(), store.clone(), delivery.clone());

    let report = engine.notify(&comment_event(ADMIN_A)).await.unwrap();

    assert_eq!(report.recipients(), 3);
    assert_eq!(report.created_count(), 2);
    let failures: Vec<_> = report.failures().collect();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].0, STAFF_S);
    assert!(matches!(failures[0].1, EngineError::Lookup(_)));
    // Fail closed: nothing stored or pushed for the recipient
    assert_eq!(
        recipients_of(&store.inner.all().await),
        HashSet::from([ADMIN_B, ADMIN_C])
    );
    assert_eq!(delivery.attempts().await, 2);
}

#[tokio::test]
async fn test_deadline_bounds_each_recipient() {
    let store = Arc::new(InMemoryNotificationStore::new().with_latency(Duration::from_millis(300)));
    let delivery = Arc::new(RecordingDelivery::default());
    let engine = orchestrator(case_directory(), store.clone(), delivery.clone());

    let event = comment_event(ADMIN_A)
        .with_deadline(tokio::time::Instant::now() + Duration::from_millis(20));
    let report = engine.notify(&event).await.unwrap();

    assert_eq!(report.failed_count(), 3);
    assert!(
        report
            .failures()
            .all(|(_, e)| matches!(e, EngineError::Timeout(_)))
    );
    assert_eq!(delivery.attempts().await, 0);
}

/// Directory whose every query fails.
struct UnreachableDirectory;

#[async_trait]
impl RecipientDirectory for UnreachableDirectory {
    async fn active_ids_by_role(&self, _role: Role) -> Result<HashSet<i64>, sqlx::Error> {
        Err(sqlx::Error::PoolTimedOut)
    }

    async fn office_manager_ids(&self, _office_id: i64) -> Result<HashSet<i64>, sqlx::Error> {
        Err(sqlx::Error::PoolTimedOut)
    }

    async fn case_info(&self, _case_id: i64) -> Result<Option<CaseInfo>, sqlx::Error> {
        Err(sqlx::Error::PoolTimedOut)
    }

    async fn case_assignee_ids(&self, _case_id: i64) -> Result<HashSet<i64>, sqlx::Error> {
        Err(sqlx::Error::PoolTimedOut)
    }

    async fn notifiable_ids(
        &self,
        _candidates: &HashSet<i64>,
    ) -> Result<HashSet<i64>, sqlx::Error> {
        Err(sqlx::Error::PoolTimedOut)
    }
}

#[tokio::test]
async fn test_directory_failure_fails_closed() {
    let store = Arc::new(InMemoryNotificationStore::new());
    let delivery = Arc::new(RecordingDelivery::default());
    let engine = orchestrator(UnreachableDirectory, store.clone(), delivery.clone());

    let result = engine.notify(&comment_event(ADMIN_A)).await;

    assert!(matches!(result, Err(EngineError::Lookup(_))));
    assert!(store.all().await.is_empty());
}

#[tokio::test]
async fn test_report_ids_match_store() {
    let store = Arc::new(InMemoryNotificationStore::new());
    let delivery = Arc::new(RecordingDelivery::default());
    let engine = orchestrator(case_directory(), store.clone(), delivery.clone());

    let report = engine.notify(&comment_event(ADMIN_A)).await.unwrap();

    let reported: HashMap<i64, i64> = report
        .created()
        .map(|n| (n.recipient_id, n.id))
        .collect();
    let stored: HashMap<i64, i64> = store
        .all()
        .await
        .iter()
        .map(|n| (n.recipient_id, n.id))
        .collect();
    assert_eq!(reported, stored);
}
