use std::future::Future;

use warden_core::CursorError;
use warden_core::Page;
use warden_core::activity::{ActivityHits, ActivityQuery, ActivityRecord, ActivitySearch};
use warden_core::assignment::{JoinRow, PairFilter, TenantRoleFilter, UserTenantRoleAssignment};
use warden_core::rule::{NewRule, PolicyRule, RuleFilter, RuleQuery, RuleUpdate};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StorageError {
    #[error("{entity} '{id}' does not exist")]
    NotFound { entity: &'static str, id: String },
    #[error("{0} already exists")]
    AlreadyExists(String),
    #[error("expected a single {0}, found several")]
    NotSingular(&'static str),
    #[error("invalid cursor: {0}")]
    InvalidCursor(#[from] CursorError),
    #[error("delete filter must have at least one field set")]
    EmptyDeleteFilter,
    #[error("internal storage error: {0}")]
    Internal(String),
}

impl StorageError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Outcome of replacing the whole rule set in one transaction.
#[derive(Debug, Clone, Default)]
pub struct Replaced {
    pub removed: Vec<PolicyRule>,
    pub inserted: Vec<PolicyRule>,
}

pub trait RuleStore: Send + Sync {
    fn create_rule(
        &self,
        rule: NewRule,
    ) -> impl Future<Output = Result<PolicyRule, StorageError>> + Send;

    fn create_rules(
        &self,
        rules: Vec<NewRule>,
    ) -> impl Future<Output = Result<Vec<PolicyRule>, StorageError>> + Send;

    fn get_rule(
        &self,
        id: &str,
    ) -> impl Future<Output = Result<Option<PolicyRule>, StorageError>> + Send;

    /// Every matching rule, oldest first.
    fn find_rules(
        &self,
        filter: &RuleFilter,
    ) -> impl Future<Output = Result<Vec<PolicyRule>, StorageError>> + Send;

    /// Exactly one matching rule: `NotFound` for none, `NotSingular` for more.
    fn find_one_rule(
        &self,
        filter: &RuleFilter,
    ) -> impl Future<Output = Result<PolicyRule, StorageError>> + Send;

    fn list_rules(
        &self,
        query: &RuleQuery,
    ) -> impl Future<Output = Result<Page<PolicyRule>, StorageError>> + Send;

    fn update_rule(
        &self,
        id: &str,
        update: &RuleUpdate,
    ) -> impl Future<Output = Result<PolicyRule, StorageError>> + Send;

    /// Deletes one rule and returns it.
    fn delete_rule(
        &self,
        id: &str,
    ) -> impl Future<Output = Result<PolicyRule, StorageError>> + Send;

    /// Deletes every matching rule and returns the removed rows.
    fn delete_rules(
        &self,
        filter: &RuleFilter,
    ) -> impl Future<Output = Result<Vec<PolicyRule>, StorageError>> + Send;

    fn count_rules(
        &self,
        filter: &RuleFilter,
    ) -> impl Future<Output = Result<u64, StorageError>> + Send;

    /// Atomically swaps the stored rule set for `rules`.
    fn replace_rules(
        &self,
        rules: Vec<NewRule>,
    ) -> impl Future<Output = Result<Replaced, StorageError>> + Send;
}

pub trait AssignmentStore: Send + Sync {
    fn create_assignment<R: JoinRow>(
        &self,
        left: &str,
        right: &str,
    ) -> impl Future<Output = Result<R, StorageError>> + Send;

    /// Matching rows in grant order.
    fn find_assignments<R: JoinRow>(
        &self,
        filter: &PairFilter,
    ) -> impl Future<Output = Result<Vec<R>, StorageError>> + Send;

    fn delete_assignments<R: JoinRow>(
        &self,
        filter: &PairFilter,
    ) -> impl Future<Output = Result<Vec<R>, StorageError>> + Send;

    fn count_assignments<R: JoinRow>(
        &self,
        filter: &PairFilter,
    ) -> impl Future<Output = Result<u64, StorageError>> + Send;
}

pub trait TenantRoleStore: Send + Sync {
    fn create_tenant_role(
        &self,
        user_id: &str,
        tenant_id: &str,
        role_id: &str,
    ) -> impl Future<Output = Result<UserTenantRoleAssignment, StorageError>> + Send;

    fn find_tenant_roles(
        &self,
        filter: &TenantRoleFilter,
    ) -> impl Future<Output = Result<Vec<UserTenantRoleAssignment>, StorageError>> + Send;

    fn delete_tenant_roles(
        &self,
        filter: &TenantRoleFilter,
    ) -> impl Future<Output = Result<Vec<UserTenantRoleAssignment>, StorageError>> + Send;

    fn count_tenant_roles(
        &self,
        filter: &TenantRoleFilter,
    ) -> impl Future<Output = Result<u64, StorageError>> + Send;
}

pub trait ActivityLog: Send + Sync {
    fn insert_activity(
        &self,
        record: &ActivityRecord,
    ) -> impl Future<Output = Result<(), StorageError>> + Send;

    fn get_activity(
        &self,
        id: &str,
    ) -> impl Future<Output = Result<Option<ActivityRecord>, StorageError>> + Send;

    fn list_activities(
        &self,
        query: &ActivityQuery,
    ) -> impl Future<Output = Result<Page<ActivityRecord>, StorageError>> + Send;

    fn search_activities(
        &self,
        search: &ActivitySearch,
    ) -> impl Future<Output = Result<ActivityHits, StorageError>> + Send;
}
