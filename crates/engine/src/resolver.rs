//! Recipient resolver: decides who hears about a domain event.
//!
//! Each rule is an independent function over the [`RecipientDirectory`]
//! returning a set of user IDs. The resolver unions them, drops the actor
//! and finally keeps only accounts that may be notified (active, not
//! deleted, not a client).

use std::collections::HashSet;
use std::sync::Arc;

use casedesk_common::types::Role;

use crate::directory::{CaseInfo, RecipientDirectory};
use crate::error::EngineError;
use crate::event::NotificationEvent;

/// Deduplicated user IDs to notify for one event.
pub type RecipientSet = HashSet<i64>;

/// All active admins.
pub async fn admins(directory: &dyn RecipientDirectory) -> Result<RecipientSet, sqlx::Error> {
    directory.active_ids_by_role(Role::Admin).await
}

/// Active office managers of the event's office, if it has one.
pub async fn office_managers(
    directory: &dyn RecipientDirectory,
    office_id: Option<i64>,
) -> Result<RecipientSet, sqlx::Error> {
    match office_id {
        Some(office_id) => directory.office_manager_ids(office_id).await,
        None => Ok(RecipientSet::new()),
    }
}

/// The case's designated primary staff member.
pub fn primary_staff(case: Option<&CaseInfo>) -> RecipientSet {
    case.and_then(|c| c.primary_staff_id).into_iter().collect()
}

/// Everyone currently assigned to the case.
pub async fn assignees(
    directory: &dyn RecipientDirectory,
    case_id: Option<i64>,
) -> Result<RecipientSet, sqlx::Error> {
    match case_id {
        Some(case_id) => directory.case_assignee_ids(case_id).await,
        None => Ok(RecipientSet::new()),
    }
}

/// Staff explicitly named by the triggering action.
pub fn explicit_staff(event: &NotificationEvent) -> RecipientSet {
    event.assigned_staff_ids.iter().copied().collect()
}

/// No self-notification.
pub fn exclude_actor(mut recipients: RecipientSet, actor_id: i64) -> RecipientSet {
    recipients.remove(&actor_id);
    recipients
}

/// Resolves the recipient set of an event against a directory.
#[derive(Clone)]
pub struct RecipientResolver {
    directory: Arc<dyn RecipientDirectory>,
}

impl RecipientResolver {
    pub fn new(directory: Arc<dyn RecipientDirectory>) -> Self {
        Self { directory }
    }

    /// Compute the final recipient set. An empty set is a valid outcome.
    ///
    /// Any directory failure fails the whole resolution.
    pub async fn resolve(&self, event: &NotificationEvent) -> Result<RecipientSet, EngineError> {
        let directory = self.directory.as_ref();

        let case = match event.case_id {
            Some(case_id) => directory.case_info(case_id).await.map_err(lookup)?,
            None => None,
        };
        let office_id = event.office_id.or(case.and_then(|c| c.office_id));

        let (admin_ids, manager_ids, assignee_ids) = tokio::try_join!(
            admins(directory),
            office_managers(directory, office_id),
            assignees(directory, event.case_id),
        )
        .map_err(lookup)?;

        let mut candidates = RecipientSet::new();
        candidates.extend(admin_ids);
        candidates.extend(manager_ids);
        candidates.extend(primary_staff(case.as_ref()));
        candidates.extend(assignee_ids);
        candidates.extend(explicit_staff(event));

        let candidates = exclude_actor(candidates, event.actor.id);
        let recipients = directory
            .notifiable_ids(&candidates)
            .await
            .map_err(lookup)?;

        tracing::debug!(
            event_kind = %event.kind,
            case_id = ?event.case_id,
            office_id = ?office_id,
            candidates = candidates.len(),
            recipients = recipients.len(),
            "Recipients resolved"
        );

        Ok(recipients)
    }
}

fn lookup(err: sqlx::Error) -> EngineError {
    EngineError::Lookup(format!("Recipient directory query failed: {}", err))
}
