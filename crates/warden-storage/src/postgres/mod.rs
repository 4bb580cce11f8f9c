pub mod migrations;
mod queries;

use std::time::Duration;

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

use warden_core::activity::{ActivityHits, ActivityQuery, ActivityRecord, ActivitySearch};
use warden_core::assignment::{JoinRow, PairFilter, TenantRoleFilter, UserTenantRoleAssignment};
use warden_core::cursor::{Page, page_size};
use warden_core::rule::{NewRule, PolicyRule, RuleFilter, RuleQuery, RuleUpdate};
use warden_core::{new_id, now};

use crate::traits::{
    ActivityLog, AssignmentStore, Replaced, RuleStore, StorageError, TenantRoleStore,
};

/// PostgreSQL store with separate write and read pools.
///
/// Reads that feed a cache go to `reader`; everything that mutates, and
/// every read inside a mutation, goes to `writer`.
#[derive(Debug, Clone)]
pub struct PostgresStore {
    writer: PgPool,
    reader: PgPool,
}

impl PostgresStore {
    pub fn new(writer: PgPool, reader: PgPool) -> Self {
        Self { writer, reader }
    }

    /// Uses one pool for both reads and writes.
    pub fn single(pool: PgPool) -> Self {
        Self::new(pool.clone(), pool)
    }

    /// Opens the primary pool and, when configured, a replica pool.
    pub async fn connect(
        url: &str,
        replica_url: Option<&str>,
        max_connections: u32,
    ) -> Result<Self, StorageError> {
        let options = || {
            PgPoolOptions::new()
                .max_connections(max_connections)
                .acquire_timeout(Duration::from_secs(5))
        };
        let writer = options().connect(url).await.map_err(queries::classify)?;
        let reader = match replica_url {
            Some(replica) => options().connect(replica).await.map_err(queries::classify)?,
            None => writer.clone(),
        };
        tracing::info!(replica = replica_url.is_some(), "connected to postgres");
        Ok(Self::new(writer, reader))
    }

    pub async fn migrate(&self) -> Result<(), StorageError> {
        migrations::run_migrations(&self.writer)
            .await
            .map_err(queries::classify)
    }
}

impl RuleStore for PostgresStore {
    async fn create_rule(&self, rule: NewRule) -> Result<PolicyRule, StorageError> {
        let stored = rule.into_rule(new_id(), now());
        queries::insert_rule(&self.writer, &stored).await?;
        Ok(stored)
    }

    async fn create_rules(&self, rules: Vec<NewRule>) -> Result<Vec<PolicyRule>, StorageError> {
        let at = now();
        let stored: Vec<PolicyRule> = rules
            .into_iter()
            .map(|r| r.into_rule(new_id(), at))
            .collect();

        let mut tx = self.writer.begin().await.map_err(queries::classify)?;
        for rule in &stored {
            queries::insert_rule(&mut *tx, rule).await?;
        }
        tx.commit().await.map_err(queries::classify)?;

        Ok(stored)
    }

    async fn get_rule(&self, id: &str) -> Result<Option<PolicyRule>, StorageError> {
        queries::fetch_rule(&self.reader, id, false).await
    }

    async fn find_rules(&self, filter: &RuleFilter) -> Result<Vec<PolicyRule>, StorageError> {
        queries::select_rules(&self.reader, filter, None).await
    }

    async fn find_one_rule(&self, filter: &RuleFilter) -> Result<PolicyRule, StorageError> {
        let mut rows = queries::select_rules(&self.reader, filter, Some(2)).await?;
        match rows.len() {
            0 => Err(StorageError::not_found("policy rule", format!("{filter:?}"))),
            1 => Ok(rows.remove(0)),
            _ => Err(StorageError::NotSingular("policy rule")),
        }
    }

    async fn list_rules(&self, query: &RuleQuery) -> Result<Page<PolicyRule>, StorageError> {
        let limit = page_size(query.limit);
        let rows = queries::page_rules(
            &self.reader,
            &query.filter,
            query.cursor.as_ref(),
            query.direction,
            limit,
        )
        .await?;
        Ok(Page::from_overfetch(rows, limit, PolicyRule::cursor))
    }

    async fn update_rule(&self, id: &str, update: &RuleUpdate) -> Result<PolicyRule, StorageError> {
        let mut tx = self.writer.begin().await.map_err(queries::classify)?;
        let mut rule = queries::fetch_rule(&mut *tx, id, true)
            .await?
            .ok_or_else(|| StorageError::not_found("policy rule", id))?;
        update.apply(&mut rule, now());
        queries::write_rule(&mut *tx, &rule).await?;
        tx.commit().await.map_err(queries::classify)?;
        Ok(rule)
    }

    async fn delete_rule(&self, id: &str) -> Result<PolicyRule, StorageError> {
        queries::delete_rule_by_id(&self.writer, id)
            .await?
            .ok_or_else(|| StorageError::not_found("policy rule", id))
    }

    async fn delete_rules(&self, filter: &RuleFilter) -> Result<Vec<PolicyRule>, StorageError> {
        if filter.ptype.is_none() && !filter.has_value_constraints() {
            return Err(StorageError::EmptyDeleteFilter);
        }
        queries::delete_matching_rules(&self.writer, filter).await
    }

    async fn count_rules(&self, filter: &RuleFilter) -> Result<u64, StorageError> {
        queries::count_rules(&self.reader, filter).await
    }

    async fn replace_rules(&self, rules: Vec<NewRule>) -> Result<Replaced, StorageError> {
        let at = now();
        let inserted: Vec<PolicyRule> = rules
            .into_iter()
            .map(|r| r.into_rule(new_id(), at))
            .collect();

        let mut tx = self.writer.begin().await.map_err(queries::classify)?;
        let removed = queries::delete_matching_rules(&mut *tx, &RuleFilter::default()).await?;
        for rule in &inserted {
            queries::insert_rule(&mut *tx, rule).await?;
        }
        tx.commit().await.map_err(queries::classify)?;

        Ok(Replaced { removed, inserted })
    }
}

impl AssignmentStore for PostgresStore {
    async fn create_assignment<R: JoinRow>(
        &self,
        left: &str,
        right: &str,
    ) -> Result<R, StorageError> {
        queries::insert_pair::<R>(&self.writer, left, right, now()).await
    }

    async fn find_assignments<R: JoinRow>(
        &self,
        filter: &PairFilter,
    ) -> Result<Vec<R>, StorageError> {
        queries::select_pairs::<R>(&self.reader, filter).await
    }

    async fn delete_assignments<R: JoinRow>(
        &self,
        filter: &PairFilter,
    ) -> Result<Vec<R>, StorageError> {
        if filter.left.is_none() && filter.right.is_none() {
            return Err(StorageError::EmptyDeleteFilter);
        }
        queries::delete_pairs::<R>(&self.writer, filter).await
    }

    async fn count_assignments<R: JoinRow>(
        &self,
        filter: &PairFilter,
    ) -> Result<u64, StorageError> {
        queries::count_pairs::<R>(&self.reader, filter).await
    }
}

impl TenantRoleStore for PostgresStore {
    async fn create_tenant_role(
        &self,
        user_id: &str,
        tenant_id: &str,
        role_id: &str,
    ) -> Result<UserTenantRoleAssignment, StorageError> {
        let row = UserTenantRoleAssignment {
            user_id: user_id.to_string(),
            tenant_id: tenant_id.to_string(),
            role_id: role_id.to_string(),
            created_at: now(),
        };
        queries::insert_tenant_role(&self.writer, &row).await?;
        Ok(row)
    }

    async fn find_tenant_roles(
        &self,
        filter: &TenantRoleFilter,
    ) -> Result<Vec<UserTenantRoleAssignment>, StorageError> {
        queries::select_tenant_roles(&self.reader, filter).await
    }

    async fn delete_tenant_roles(
        &self,
        filter: &TenantRoleFilter,
    ) -> Result<Vec<UserTenantRoleAssignment>, StorageError> {
        if *filter == TenantRoleFilter::default() {
            return Err(StorageError::EmptyDeleteFilter);
        }
        queries::delete_tenant_roles(&self.writer, filter).await
    }

    async fn count_tenant_roles(&self, filter: &TenantRoleFilter) -> Result<u64, StorageError> {
        queries::count_tenant_roles(&self.reader, filter).await
    }
}

impl ActivityLog for PostgresStore {
    async fn insert_activity(&self, record: &ActivityRecord) -> Result<(), StorageError> {
        queries::insert_activity(&self.writer, record).await
    }

    async fn get_activity(&self, id: &str) -> Result<Option<ActivityRecord>, StorageError> {
        queries::fetch_activity(&self.reader, id).await
    }

    async fn list_activities(
        &self,
        query: &ActivityQuery,
    ) -> Result<Page<ActivityRecord>, StorageError> {
        let limit = page_size(query.limit);
        let rows = queries::page_activities(&self.reader, query, limit).await?;
        Ok(Page::from_overfetch(rows, limit, ActivityRecord::cursor))
    }

    async fn search_activities(
        &self,
        search: &ActivitySearch,
    ) -> Result<ActivityHits, StorageError> {
        let size = page_size(search.size);
        let records = queries::search_activities(&self.reader, search, size).await?;
        let total = queries::count_search_hits(&self.reader, search).await?;
        Ok(ActivityHits { records, total })
    }
}
