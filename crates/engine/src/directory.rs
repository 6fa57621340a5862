//! User directory lookups used to resolve notification recipients.
//!
//! The directory answers narrow membership questions (who holds a role, who
//! manages an office, who is assigned to a case) and filters candidate sets
//! down to accounts that may be notified.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use sqlx::PgPool;

use casedesk_common::types::{Role, User};

/// Routing facts about a case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::FromRow)]
pub struct CaseInfo {
    pub id: i64,
    pub office_id: Option<i64>,
    pub primary_staff_id: Option<i64>,
}

/// Read-only view of users, offices and case assignments.
#[async_trait]
pub trait RecipientDirectory: Send + Sync {
    /// IDs of active, non-deleted users holding `role`.
    async fn active_ids_by_role(&self, role: Role) -> Result<HashSet<i64>, sqlx::Error>;

    /// IDs of active office managers scoped to `office_id`.
    async fn office_manager_ids(&self, office_id: i64) -> Result<HashSet<i64>, sqlx::Error>;

    async fn case_info(&self, case_id: i64) -> Result<Option<CaseInfo>, sqlx::Error>;

    /// IDs of users with a current (non-removed) assignment to the case.
    async fn case_assignee_ids(&self, case_id: i64) -> Result<HashSet<i64>, sqlx::Error>;

    /// The subset of `candidates` that is active, not deleted and not a client.
    /// Unknown IDs are dropped.
    async fn notifiable_ids(&self, candidates: &HashSet<i64>)
    -> Result<HashSet<i64>, sqlx::Error>;
}

/// PostgreSQL-backed directory.
#[derive(Debug, Clone)]
pub struct PgDirectory {
    pool: PgPool,
}

impl PgDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn collect_ids(rows: Vec<(i64,)>) -> HashSet<i64> {
    rows.into_iter().map(|(id,)| id).collect()
}

#[async_trait]
impl RecipientDirectory for PgDirectory {
    async fn active_ids_by_role(&self, role: Role) -> Result<HashSet<i64>, sqlx::Error> {
        let rows: Vec<(i64,)> = sqlx::query_as(
            r#"
            SELECT id
            FROM users
            WHERE role = $1
              AND is_active = true
              AND deleted_at IS NULL
            "#,
        )
        .bind(role.to_string())
        .fetch_all(&self.pool)
        .await?;

        Ok(collect_ids(rows))
    }

    async fn office_manager_ids(&self, office_id: i64) -> Result<HashSet<i64>, sqlx::Error> {
        let rows: Vec<(i64,)> = sqlx::query_as(
            r#"
            SELECT id
            FROM users
            WHERE role = $1
              AND office_id = $2
              AND is_active = true
              AND deleted_at IS NULL
            "#,
        )
        .bind(Role::OfficeManager.to_string())
        .bind(office_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(collect_ids(rows))
    }

    async fn case_info(&self, case_id: i64) -> Result<Option<CaseInfo>, sqlx::Error> {
        sqlx::query_as("SELECT id, office_id, primary_staff_id FROM cases WHERE id = $1")
            .bind(case_id)
            .fetch_optional(&self.pool)
            .await
    }

    async fn case_assignee_ids(&self, case_id: i64) -> Result<HashSet<i64>, sqlx::Error> {
        let rows: Vec<(i64,)> = sqlx::query_as(
            r#"
            SELECT DISTINCT user_id
            FROM case_assignments
            WHERE case_id = $1
              AND removed_at IS NULL
            "#,
        )
        .bind(case_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(collect_ids(rows))
    }

    async fn notifiable_ids(
        &self,
        candidates: &HashSet<i64>,
    ) -> Result<HashSet<i64>, sqlx::Error> {
        if candidates.is_empty() {
            return Ok(HashSet::new());
        }

        let ids: Vec<i64> = candidates.iter().copied().collect();
        let rows: Vec<(i64,)> = sqlx::query_as(
            r#"
            SELECT id
            FROM users
            WHERE id = ANY($1)
              AND is_active = true
              AND deleted_at IS NULL
              AND role <> $2
            "#,
        )
        .bind(&ids)
        .bind(Role::Client.to_string())
        .fetch_all(&self.pool)
        .await?;

        Ok(collect_ids(rows))
    }
}

/// Fixed in-memory directory, for tests and embedded use.
#[derive(Debug, Clone, Default)]
pub struct StaticDirectory {
    users: HashMap<i64, User>,
    cases: HashMap<i64, CaseInfo>,
    assignments: HashMap<i64, HashSet<i64>>,
}

impl StaticDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_user(mut self, user: User) -> Self {
        self.users.insert(user.id, user);
        self
    }

    pub fn with_case(mut self, case: CaseInfo) -> Self {
        self.cases.insert(case.id, case);
        self
    }

    /// Record a current assignment of `user_id` to `case_id`.
    pub fn with_assignment(mut self, case_id: i64, user_id: i64) -> Self {
        self.assignments.entry(case_id).or_default().insert(user_id);
        self
    }

    fn active(&self) -> impl Iterator<Item = &User> {
        self.users
            .values()
            .filter(|u| u.is_active && u.deleted_at.is_none())
    }
}

#[async_trait]
impl RecipientDirectory for StaticDirectory {
    async fn active_ids_by_role(&self, role: Role) -> Result<HashSet<i64>, sqlx::Error> {
        Ok(self.active().filter(|u| u.role == role).map(|u| u.id).collect())
    }

    async fn office_manager_ids(&self, office_id: i64) -> Result<HashSet<i64>, sqlx::Error> {
        Ok(self
            .active()
            .filter(|u| u.role == Role::OfficeManager && u.office_id == Some(office_id))
            .map(|u| u.id)
            .collect())
    }

    async fn case_info(&self, case_id: i64) -> Result<Option<CaseInfo>, sqlx::Error> {
        Ok(self.cases.get(&case_id).copied())
    }

    async fn case_assignee_ids(&self, case_id: i64) -> Result<HashSet<i64>, sqlx::Error> {
        Ok(self.assignments.get(&case_id).cloned().unwrap_or_default())
    }

    async fn notifiable_ids(
        &self,
        candidates: &HashSet<i64>,
    ) -> Result<HashSet<i64>, sqlx::Error> {
        Ok(candidates
            .iter()
            .filter(|id| self.users.get(id).is_some_and(User::is_notifiable))
            .copied()
            .collect())
    }
}
