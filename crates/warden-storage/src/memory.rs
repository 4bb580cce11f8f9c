use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use warden_core::activity::{ActivityHits, ActivityQuery, ActivityRecord, ActivitySearch};
use warden_core::assignment::{JoinRow, PairFilter, TenantRoleFilter, UserTenantRoleAssignment};
use warden_core::cursor::{Page, SortDirection, page_size};
use warden_core::rule::{NewRule, PolicyRule, RuleFilter, RuleQuery, RuleUpdate};
use warden_core::{new_id, now};

use crate::traits::{
    ActivityLog, AssignmentStore, Replaced, RuleStore, StorageError, TenantRoleStore,
};

#[derive(Debug, Clone)]
struct StoredPair {
    left: String,
    right: String,
    created_at: DateTime<Utc>,
}

impl StoredPair {
    fn to_row<R: JoinRow>(&self) -> R {
        R::from_parts(self.left.clone(), self.right.clone(), self.created_at)
    }
}

#[derive(Debug, Default)]
struct InnerState {
    rules: Vec<PolicyRule>,
    joins: HashMap<&'static str, Vec<StoredPair>>,
    tenant_roles: Vec<UserTenantRoleAssignment>,
    activities: Vec<ActivityRecord>,
}

/// Process-local store. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    state: Arc<Mutex<InnerState>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, InnerState>, StorageError> {
        self.state
            .lock()
            .map_err(|_| StorageError::Internal("memory store lock poisoned".to_string()))
    }
}

fn sort_by_position<T, F>(rows: &mut [T], direction: SortDirection, key: F)
where
    F: Fn(&T) -> (DateTime<Utc>, &str),
{
    rows.sort_by(|a, b| {
        let ord = key(a).cmp(&key(b));
        match direction {
            SortDirection::Asc => ord,
            SortDirection::Desc => ord.reverse(),
        }
    });
}

impl RuleStore for InMemoryStore {
    async fn create_rule(&self, rule: NewRule) -> Result<PolicyRule, StorageError> {
        let mut state = self.lock()?;
        let stored = rule.into_rule(new_id(), now());
        state.rules.push(stored.clone());
        Ok(stored)
    }

    async fn create_rules(&self, rules: Vec<NewRule>) -> Result<Vec<PolicyRule>, StorageError> {
        let mut state = self.lock()?;
        let at = now();
        let stored: Vec<PolicyRule> = rules
            .into_iter()
            .map(|r| r.into_rule(new_id(), at))
            .collect();
        state.rules.extend(stored.iter().cloned());
        Ok(stored)
    }

    async fn get_rule(&self, id: &str) -> Result<Option<PolicyRule>, StorageError> {
        let state = self.lock()?;
        Ok(state.rules.iter().find(|r| r.id == id).cloned())
    }

    async fn find_rules(&self, filter: &RuleFilter) -> Result<Vec<PolicyRule>, StorageError> {
        let state = self.lock()?;
        Ok(state
            .rules
            .iter()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect())
    }

    async fn find_one_rule(&self, filter: &RuleFilter) -> Result<PolicyRule, StorageError> {
        let state = self.lock()?;
        let mut matching = state.rules.iter().filter(|r| filter.matches(r));
        match (matching.next(), matching.next()) {
            (Some(rule), None) => Ok(rule.clone()),
            (Some(_), Some(_)) => Err(StorageError::NotSingular("policy rule")),
            (None, _) => Err(StorageError::not_found("policy rule", format!("{filter:?}"))),
        }
    }

    async fn list_rules(&self, query: &RuleQuery) -> Result<Page<PolicyRule>, StorageError> {
        let state = self.lock()?;
        let limit = page_size(query.limit);

        let mut rows: Vec<PolicyRule> = state
            .rules
            .iter()
            .filter(|r| query.filter.matches(r))
            .filter(|r| {
                query
                    .cursor
                    .as_ref()
                    .is_none_or(|c| c.admits(r.created_at, &r.id, query.direction))
            })
            .cloned()
            .collect();
        sort_by_position(&mut rows, query.direction, |r| (r.created_at, r.id.as_str()));
        rows.truncate(limit + 1);

        Ok(Page::from_overfetch(rows, limit, PolicyRule::cursor))
    }

    async fn update_rule(&self, id: &str, update: &RuleUpdate) -> Result<PolicyRule, StorageError> {
        let mut state = self.lock()?;
        let rule = state
            .rules
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| StorageError::not_found("policy rule", id))?;
        update.apply(rule, now());
        Ok(rule.clone())
    }

    async fn delete_rule(&self, id: &str) -> Result<PolicyRule, StorageError> {
        let mut state = self.lock()?;
        let index = state
            .rules
            .iter()
            .position(|r| r.id == id)
            .ok_or_else(|| StorageError::not_found("policy rule", id))?;
        Ok(state.rules.remove(index))
    }

    async fn delete_rules(&self, filter: &RuleFilter) -> Result<Vec<PolicyRule>, StorageError> {
        if filter.ptype.is_none() && !filter.has_value_constraints() {
            return Err(StorageError::EmptyDeleteFilter);
        }
        let mut state = self.lock()?;
        let (removed, kept): (Vec<PolicyRule>, Vec<PolicyRule>) = state
            .rules
            .drain(..)
            .partition(|r| filter.matches(r));
        state.rules = kept;
        Ok(removed)
    }

    async fn count_rules(&self, filter: &RuleFilter) -> Result<u64, StorageError> {
        let state = self.lock()?;
        Ok(state.rules.iter().filter(|r| filter.matches(r)).count() as u64)
    }

    async fn replace_rules(&self, rules: Vec<NewRule>) -> Result<Replaced, StorageError> {
        let mut state = self.lock()?;
        let at = now();
        let inserted: Vec<PolicyRule> = rules
            .into_iter()
            .map(|r| r.into_rule(new_id(), at))
            .collect();
        let removed = std::mem::replace(&mut state.rules, inserted.clone());
        Ok(Replaced { removed, inserted })
    }
}

impl AssignmentStore for InMemoryStore {
    async fn create_assignment<R: JoinRow>(
        &self,
        left: &str,
        right: &str,
    ) -> Result<R, StorageError> {
        let mut state = self.lock()?;
        let table = state.joins.entry(R::TABLE).or_default();
        if table.iter().any(|p| p.left == left && p.right == right) {
            return Err(StorageError::AlreadyExists(format!(
                "{} ({left}, {right})",
                R::TABLE
            )));
        }
        let pair = StoredPair {
            left: left.to_string(),
            right: right.to_string(),
            created_at: now(),
        };
        let row = pair.to_row();
        table.push(pair);
        Ok(row)
    }

    async fn find_assignments<R: JoinRow>(
        &self,
        filter: &PairFilter,
    ) -> Result<Vec<R>, StorageError> {
        let state = self.lock()?;
        Ok(state
            .joins
            .get(R::TABLE)
            .map(|table| {
                table
                    .iter()
                    .filter(|p| filter.matches(&p.left, &p.right))
                    .map(|p| p.to_row())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn delete_assignments<R: JoinRow>(
        &self,
        filter: &PairFilter,
    ) -> Result<Vec<R>, StorageError> {
        if filter.left.is_none() && filter.right.is_none() {
            return Err(StorageError::EmptyDeleteFilter);
        }
        let mut state = self.lock()?;
        let Some(table) = state.joins.get_mut(R::TABLE) else {
            return Ok(Vec::new());
        };
        let (removed, kept): (Vec<StoredPair>, Vec<StoredPair>) = table
            .drain(..)
            .partition(|p| filter.matches(&p.left, &p.right));
        *table = kept;
        Ok(removed.iter().map(|p| p.to_row()).collect())
    }

    async fn count_assignments<R: JoinRow>(
        &self,
        filter: &PairFilter,
    ) -> Result<u64, StorageError> {
        let state = self.lock()?;
        Ok(state.joins.get(R::TABLE).map_or(0, |table| {
            table
                .iter()
                .filter(|p| filter.matches(&p.left, &p.right))
                .count() as u64
        }))
    }
}

impl TenantRoleStore for InMemoryStore {
    async fn create_tenant_role(
        &self,
        user_id: &str,
        tenant_id: &str,
        role_id: &str,
    ) -> Result<UserTenantRoleAssignment, StorageError> {
        let mut state = self.lock()?;
        let exists = state
            .tenant_roles
            .iter()
            .any(|r| r.user_id == user_id && r.tenant_id == tenant_id && r.role_id == role_id);
        if exists {
            return Err(StorageError::AlreadyExists(format!(
                "user_tenant_roles ({user_id}, {tenant_id}, {role_id})"
            )));
        }
        let row = UserTenantRoleAssignment {
            user_id: user_id.to_string(),
            tenant_id: tenant_id.to_string(),
            role_id: role_id.to_string(),
            created_at: now(),
        };
        state.tenant_roles.push(row.clone());
        Ok(row)
    }

    async fn find_tenant_roles(
        &self,
        filter: &TenantRoleFilter,
    ) -> Result<Vec<UserTenantRoleAssignment>, StorageError> {
        let state = self.lock()?;
        Ok(state
            .tenant_roles
            .iter()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect())
    }

    async fn delete_tenant_roles(
        &self,
        filter: &TenantRoleFilter,
    ) -> Result<Vec<UserTenantRoleAssignment>, StorageError> {
        if *filter == TenantRoleFilter::default() {
            return Err(StorageError::EmptyDeleteFilter);
        }
        let mut state = self.lock()?;
        let (removed, kept): (Vec<_>, Vec<_>) = state
            .tenant_roles
            .drain(..)
            .partition(|r| filter.matches(r));
        state.tenant_roles = kept;
        Ok(removed)
    }

    async fn count_tenant_roles(&self, filter: &TenantRoleFilter) -> Result<u64, StorageError> {
        let state = self.lock()?;
        Ok(state.tenant_roles.iter().filter(|r| filter.matches(r)).count() as u64)
    }
}

impl ActivityLog for InMemoryStore {
    async fn insert_activity(&self, record: &ActivityRecord) -> Result<(), StorageError> {
        let mut state = self.lock()?;
        if state.activities.iter().any(|a| a.id == record.id) {
            return Err(StorageError::AlreadyExists(format!("activity {}", record.id)));
        }
        state.activities.push(record.clone());
        Ok(())
    }

    async fn get_activity(&self, id: &str) -> Result<Option<ActivityRecord>, StorageError> {
        let state = self.lock()?;
        Ok(state.activities.iter().find(|a| a.id == id).cloned())
    }

    async fn list_activities(
        &self,
        query: &ActivityQuery,
    ) -> Result<Page<ActivityRecord>, StorageError> {
        let state = self.lock()?;
        let limit = page_size(query.limit);

        let mut rows: Vec<ActivityRecord> = state
            .activities
            .iter()
            .filter(|a| query.matches(a))
            .filter(|a| {
                query
                    .cursor
                    .as_ref()
                    .is_none_or(|c| c.admits(a.created_at, &a.id, query.direction))
            })
            .cloned()
            .collect();
        sort_by_position(&mut rows, query.direction, |a| (a.created_at, a.id.as_str()));
        rows.truncate(limit + 1);

        Ok(Page::from_overfetch(rows, limit, ActivityRecord::cursor))
    }

    async fn search_activities(
        &self,
        search: &ActivitySearch,
    ) -> Result<ActivityHits, StorageError> {
        let state = self.lock()?;
        let mut matching: Vec<ActivityRecord> = state
            .activities
            .iter()
            .filter(|a| search.user_id.as_deref().is_none_or(|u| u == a.user_id))
            .filter(|a| a.matches_text(&search.query))
            .cloned()
            .collect();
        sort_by_position(&mut matching, SortDirection::Desc, |a| {
            (a.created_at, a.id.as_str())
        });

        let total = matching.len() as u64;
        let records = matching
            .into_iter()
            .skip(search.from)
            .take(page_size(search.size))
            .collect();
        Ok(ActivityHits { records, total })
    }
}
