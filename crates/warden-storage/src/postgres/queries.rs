use chrono::{DateTime, Utc};
use warden_core::activity::{ActivityQuery, ActivityRecord, ActivitySearch};
use warden_core::assignment::{JoinRow, PairFilter, TenantRoleFilter, UserTenantRoleAssignment};
use warden_core::cursor::{Cursor, CursorError, SortDirection};
use warden_core::rule::{PolicyRule, RULE_ARITY, RuleFilter};

use crate::traits::StorageError;

const VALUE_COLUMNS: [&str; RULE_ARITY] = ["v0", "v1", "v2", "v3", "v4", "v5"];

const RULE_COLUMNS: &str =
    "id, ptype, v0, v1, v2, v3, v4, v5, created_by, created_at, updated_by, updated_at";

const ACTIVITY_COLUMNS: &str =
    "id, user_id, type AS kind, details, metadata, created_at, updated_at";

/// Maps a driver error onto the storage taxonomy. Constraint violations
/// become `AlreadyExists`; everything else is opaque.
pub fn classify(e: sqlx::Error) -> StorageError {
    if let sqlx::Error::Database(ref db_err) = e
        && (db_err.is_unique_violation() || db_err.is_foreign_key_violation())
    {
        return StorageError::AlreadyExists(db_err.message().to_string());
    }
    StorageError::Internal(e.to_string())
}

/// Conjunctive `column = $n` clauses with their text binds, numbered from 1.
struct Conditions<'a> {
    clauses: Vec<String>,
    binds: Vec<&'a str>,
    next: usize,
}

impl<'a> Conditions<'a> {
    fn new() -> Self {
        Self {
            clauses: Vec::new(),
            binds: Vec::new(),
            next: 1,
        }
    }

    fn eq(&mut self, column: &str, value: &'a str) {
        self.clauses.push(format!("{column} = ${}", self.next));
        self.binds.push(value);
        self.next += 1;
    }

    /// Reserves a placeholder bound by the caller after the text binds.
    fn placeholder(&mut self) -> usize {
        let idx = self.next;
        self.next += 1;
        idx
    }

    fn where_clause(&self) -> String {
        if self.clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", self.clauses.join(" AND "))
        }
    }
}

/// Appends the keyset condition for `cursor` and returns its timestamp bind.
fn push_cursor(
    conditions: &mut Conditions<'_>,
    cursor: &Cursor,
    direction: SortDirection,
) -> Result<DateTime<Utc>, StorageError> {
    let ts = cursor
        .timestamp()
        .ok_or_else(|| CursorError::Malformed(format!("timestamp {}", cursor.created_at)))?;
    let op = match direction {
        SortDirection::Desc => "<",
        SortDirection::Asc => ">",
    };
    let ts_idx = conditions.placeholder();
    let id_idx = conditions.placeholder();
    conditions
        .clauses
        .push(format!("(created_at, id) {op} (${ts_idx}, ${id_idx})"));
    Ok(ts)
}

fn order_clause(direction: SortDirection) -> &'static str {
    match direction {
        SortDirection::Desc => " ORDER BY created_at DESC, id DESC",
        SortDirection::Asc => " ORDER BY created_at ASC, id ASC",
    }
}

#[derive(Debug, sqlx::FromRow)]
struct RuleRow {
    id: String,
    ptype: String,
    v0: String,
    v1: String,
    v2: String,
    v3: String,
    v4: String,
    v5: String,
    created_by: Option<String>,
    created_at: DateTime<Utc>,
    updated_by: Option<String>,
    updated_at: DateTime<Utc>,
}

impl From<RuleRow> for PolicyRule {
    fn from(row: RuleRow) -> Self {
        PolicyRule {
            id: row.id,
            ptype: row.ptype,
            values: [row.v0, row.v1, row.v2, row.v3, row.v4, row.v5],
            created_by: row.created_by,
            created_at: row.created_at,
            updated_by: row.updated_by,
            updated_at: row.updated_at,
        }
    }
}

fn rule_conditions(filter: &RuleFilter) -> Conditions<'_> {
    let mut conditions = Conditions::new();
    if let Some(ref ptype) = filter.ptype {
        conditions.eq("ptype", ptype);
    }
    for (column, value) in VALUE_COLUMNS.iter().zip(&filter.values) {
        if let Some(v) = value {
            conditions.eq(column, v);
        }
    }
    conditions
}

pub async fn insert_rule<'e>(
    executor: impl sqlx::PgExecutor<'e>,
    rule: &PolicyRule,
) -> Result<(), StorageError> {
    let [v0, v1, v2, v3, v4, v5] = &rule.values;
    sqlx::query(
        r#"
        INSERT INTO policy_rules
            (id, ptype, v0, v1, v2, v3, v4, v5, created_by, created_at, updated_by, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
        "#,
    )
    .bind(&rule.id)
    .bind(&rule.ptype)
    .bind(v0)
    .bind(v1)
    .bind(v2)
    .bind(v3)
    .bind(v4)
    .bind(v5)
    .bind(&rule.created_by)
    .bind(rule.created_at)
    .bind(&rule.updated_by)
    .bind(rule.updated_at)
    .execute(executor)
    .await
    .map_err(classify)?;
    Ok(())
}

pub async fn fetch_rule<'e>(
    executor: impl sqlx::PgExecutor<'e>,
    id: &str,
    for_update: bool,
) -> Result<Option<PolicyRule>, StorageError> {
    let lock = if for_update { " FOR UPDATE" } else { "" };
    let sql = format!("SELECT {RULE_COLUMNS} FROM policy_rules WHERE id = $1{lock}");
    let row = sqlx::query_as::<_, RuleRow>(&sql)
        .bind(id)
        .fetch_optional(executor)
        .await
        .map_err(classify)?;
    Ok(row.map(PolicyRule::from))
}

pub async fn select_rules<'e>(
    executor: impl sqlx::PgExecutor<'e>,
    filter: &RuleFilter,
    limit: Option<usize>,
) -> Result<Vec<PolicyRule>, StorageError> {
    let conditions = rule_conditions(filter);
    let limit_clause = match limit {
        Some(n) => format!(" LIMIT {n}"),
        None => String::new(),
    };
    let sql = format!(
        "SELECT {RULE_COLUMNS} FROM policy_rules{}{}{limit_clause}",
        conditions.where_clause(),
        order_clause(SortDirection::Asc),
    );

    let mut q = sqlx::query_as::<_, RuleRow>(&sql);
    for bind in &conditions.binds {
        q = q.bind(*bind);
    }
    let rows = q.fetch_all(executor).await.map_err(classify)?;
    Ok(rows.into_iter().map(PolicyRule::from).collect())
}

/// Fetches up to `limit + 1` rules past the cursor.
pub async fn page_rules<'e>(
    executor: impl sqlx::PgExecutor<'e>,
    filter: &RuleFilter,
    cursor: Option<&Cursor>,
    direction: SortDirection,
    limit: usize,
) -> Result<Vec<PolicyRule>, StorageError> {
    let mut conditions = rule_conditions(filter);
    let position = match cursor {
        Some(c) => Some((push_cursor(&mut conditions, c, direction)?, c.id.as_str())),
        None => None,
    };
    let sql = format!(
        "SELECT {RULE_COLUMNS} FROM policy_rules{}{} LIMIT {}",
        conditions.where_clause(),
        order_clause(direction),
        limit + 1,
    );

    let mut q = sqlx::query_as::<_, RuleRow>(&sql);
    for bind in &conditions.binds {
        q = q.bind(*bind);
    }
    if let Some((ts, id)) = position {
        q = q.bind(ts).bind(id);
    }
    let rows = q.fetch_all(executor).await.map_err(classify)?;
    Ok(rows.into_iter().map(PolicyRule::from).collect())
}

pub async fn write_rule<'e>(
    executor: impl sqlx::PgExecutor<'e>,
    rule: &PolicyRule,
) -> Result<(), StorageError> {
    let [v0, v1, v2, v3, v4, v5] = &rule.values;
    sqlx::query(
        r#"
        UPDATE policy_rules
        SET ptype = $2, v0 = $3, v1 = $4, v2 = $5, v3 = $6, v4 = $7, v5 = $8,
            updated_by = $9, updated_at = $10
        WHERE id = $1
        "#,
    )
    .bind(&rule.id)
    .bind(&rule.ptype)
    .bind(v0)
    .bind(v1)
    .bind(v2)
    .bind(v3)
    .bind(v4)
    .bind(v5)
    .bind(&rule.updated_by)
    .bind(rule.updated_at)
    .execute(executor)
    .await
    .map_err(classify)?;
    Ok(())
}

pub async fn delete_rule_by_id<'e>(
    executor: impl sqlx::PgExecutor<'e>,
    id: &str,
) -> Result<Option<PolicyRule>, StorageError> {
    let sql = format!("DELETE FROM policy_rules WHERE id = $1 RETURNING {RULE_COLUMNS}");
    let row = sqlx::query_as::<_, RuleRow>(&sql)
        .bind(id)
        .fetch_optional(executor)
        .await
        .map_err(classify)?;
    Ok(row.map(PolicyRule::from))
}

/// Deletes every matching rule. An empty filter deletes the whole table.
pub async fn delete_matching_rules<'e>(
    executor: impl sqlx::PgExecutor<'e>,
    filter: &RuleFilter,
) -> Result<Vec<PolicyRule>, StorageError> {
    let conditions = rule_conditions(filter);
    let sql = format!(
        "DELETE FROM policy_rules{} RETURNING {RULE_COLUMNS}",
        conditions.where_clause()
    );

    let mut q = sqlx::query_as::<_, RuleRow>(&sql);
    for bind in &conditions.binds {
        q = q.bind(*bind);
    }
    let rows = q.fetch_all(executor).await.map_err(classify)?;
    Ok(rows.into_iter().map(PolicyRule::from).collect())
}

pub async fn count_rules<'e>(
    executor: impl sqlx::PgExecutor<'e>,
    filter: &RuleFilter,
) -> Result<u64, StorageError> {
    let conditions = rule_conditions(filter);
    let sql = format!("SELECT COUNT(*) FROM policy_rules{}", conditions.where_clause());

    let mut q = sqlx::query_as::<_, (i64,)>(&sql);
    for bind in &conditions.binds {
        q = q.bind(*bind);
    }
    let (count,) = q.fetch_one(executor).await.map_err(classify)?;
    #[allow(clippy::cast_sign_loss)]
    Ok(count as u64)
}

#[derive(Debug, sqlx::FromRow)]
struct PairRow {
    left_id: String,
    right_id: String,
    created_at: DateTime<Utc>,
}

impl PairRow {
    fn into_join<R: JoinRow>(self) -> R {
        R::from_parts(self.left_id, self.right_id, self.created_at)
    }
}

fn pair_conditions<'a, R: JoinRow>(filter: &'a PairFilter) -> Conditions<'a> {
    let mut conditions = Conditions::new();
    if let Some(ref left) = filter.left {
        conditions.eq(R::LEFT_COLUMN, left);
    }
    if let Some(ref right) = filter.right {
        conditions.eq(R::RIGHT_COLUMN, right);
    }
    conditions
}

pub async fn insert_pair<'e, R: JoinRow>(
    executor: impl sqlx::PgExecutor<'e>,
    left: &str,
    right: &str,
    at: DateTime<Utc>,
) -> Result<R, StorageError> {
    let sql = format!(
        "INSERT INTO {} ({}, {}, created_at) VALUES ($1, $2, $3)",
        R::TABLE,
        R::LEFT_COLUMN,
        R::RIGHT_COLUMN
    );
    sqlx::query(&sql)
        .bind(left)
        .bind(right)
        .bind(at)
        .execute(executor)
        .await
        .map_err(classify)?;
    Ok(R::from_parts(left.to_string(), right.to_string(), at))
}

pub async fn select_pairs<'e, R: JoinRow>(
    executor: impl sqlx::PgExecutor<'e>,
    filter: &PairFilter,
) -> Result<Vec<R>, StorageError> {
    let conditions = pair_conditions::<R>(filter);
    let sql = format!(
        "SELECT {} AS left_id, {} AS right_id, created_at FROM {}{} ORDER BY seq",
        R::LEFT_COLUMN,
        R::RIGHT_COLUMN,
        R::TABLE,
        conditions.where_clause()
    );

    let mut q = sqlx::query_as::<_, PairRow>(&sql);
    for bind in &conditions.binds {
        q = q.bind(*bind);
    }
    let rows = q.fetch_all(executor).await.map_err(classify)?;
    Ok(rows.into_iter().map(PairRow::into_join).collect())
}

pub async fn delete_pairs<'e, R: JoinRow>(
    executor: impl sqlx::PgExecutor<'e>,
    filter: &PairFilter,
) -> Result<Vec<R>, StorageError> {
    let conditions = pair_conditions::<R>(filter);
    let sql = format!(
        r#"
        WITH removed AS (
            DELETE FROM {table}{where_clause}
            RETURNING seq, {left} AS left_id, {right} AS right_id, created_at
        )
        SELECT left_id, right_id, created_at FROM removed ORDER BY seq
        "#,
        table = R::TABLE,
        where_clause = conditions.where_clause(),
        left = R::LEFT_COLUMN,
        right = R::RIGHT_COLUMN,
    );

    let mut q = sqlx::query_as::<_, PairRow>(&sql);
    for bind in &conditions.binds {
        q = q.bind(*bind);
    }
    let rows = q.fetch_all(executor).await.map_err(classify)?;
    Ok(rows.into_iter().map(PairRow::into_join).collect())
}

pub async fn count_pairs<'e, R: JoinRow>(
    executor: impl sqlx::PgExecutor<'e>,
    filter: &PairFilter,
) -> Result<u64, StorageError> {
    let conditions = pair_conditions::<R>(filter);
    let sql = format!("SELECT COUNT(*) FROM {}{}", R::TABLE, conditions.where_clause());

    let mut q = sqlx::query_as::<_, (i64,)>(&sql);
    for bind in &conditions.binds {
        q = q.bind(*bind);
    }
    let (count,) = q.fetch_one(executor).await.map_err(classify)?;
    #[allow(clippy::cast_sign_loss)]
    Ok(count as u64)
}

#[derive(Debug, sqlx::FromRow)]
struct TenantRoleRow {
    user_id: String,
    tenant_id: String,
    role_id: String,
    created_at: DateTime<Utc>,
}

impl From<TenantRoleRow> for UserTenantRoleAssignment {
    fn from(row: TenantRoleRow) -> Self {
        UserTenantRoleAssignment {
            user_id: row.user_id,
            tenant_id: row.tenant_id,
            role_id: row.role_id,
            created_at: row.created_at,
        }
    }
}

fn tenant_role_conditions(filter: &TenantRoleFilter) -> Conditions<'_> {
    let mut conditions = Conditions::new();
    if let Some(ref user_id) = filter.user_id {
        conditions.eq("user_id", user_id);
    }
    if let Some(ref tenant_id) = filter.tenant_id {
        conditions.eq("tenant_id", tenant_id);
    }
    if let Some(ref role_id) = filter.role_id {
        conditions.eq("role_id", role_id);
    }
    conditions
}

pub async fn insert_tenant_role<'e>(
    executor: impl sqlx::PgExecutor<'e>,
    row: &UserTenantRoleAssignment,
) -> Result<(), StorageError> {
    sqlx::query(
        "INSERT INTO user_tenant_roles (user_id, tenant_id, role_id, created_at) \
         VALUES ($1, $2, $3, $4)",
    )
    .bind(&row.user_id)
    .bind(&row.tenant_id)
    .bind(&row.role_id)
    .bind(row.created_at)
    .execute(executor)
    .await
    .map_err(classify)?;
    Ok(())
}

pub async fn select_tenant_roles<'e>(
    executor: impl sqlx::PgExecutor<'e>,
    filter: &TenantRoleFilter,
) -> Result<Vec<UserTenantRoleAssignment>, StorageError> {
    let conditions = tenant_role_conditions(filter);
    let sql = format!(
        "SELECT user_id, tenant_id, role_id, created_at FROM user_tenant_roles{} ORDER BY seq",
        conditions.where_clause()
    );

    let mut q = sqlx::query_as::<_, TenantRoleRow>(&sql);
    for bind in &conditions.binds {
        q = q.bind(*bind);
    }
    let rows = q.fetch_all(executor).await.map_err(classify)?;
    Ok(rows.into_iter().map(UserTenantRoleAssignment::from).collect())
}

pub async fn delete_tenant_roles<'e>(
    executor: impl sqlx::PgExecutor<'e>,
    filter: &TenantRoleFilter,
) -> Result<Vec<UserTenantRoleAssignment>, StorageError> {
    let conditions = tenant_role_conditions(filter);
    let sql = format!(
        r#"
        WITH removed AS (
            DELETE FROM user_tenant_roles{}
            RETURNING seq, user_id, tenant_id, role_id, created_at
        )
        SELECT user_id, tenant_id, role_id, created_at FROM removed ORDER BY seq
        "#,
        conditions.where_clause()
    );

    let mut q = sqlx::query_as::<_, TenantRoleRow>(&sql);
    for bind in &conditions.binds {
        q = q.bind(*bind);
    }
    let rows = q.fetch_all(executor).await.map_err(classify)?;
    Ok(rows.into_iter().map(UserTenantRoleAssignment::from).collect())
}

pub async fn count_tenant_roles<'e>(
    executor: impl sqlx::PgExecutor<'e>,
    filter: &TenantRoleFilter,
) -> Result<u64, StorageError> {
    let conditions = tenant_role_conditions(filter);
    let sql = format!(
        "SELECT COUNT(*) FROM user_tenant_roles{}",
        conditions.where_clause()
    );

    let mut q = sqlx::query_as::<_, (i64,)>(&sql);
    for bind in &conditions.binds {
        q = q.bind(*bind);
    }
    let (count,) = q.fetch_one(executor).await.map_err(classify)?;
    #[allow(clippy::cast_sign_loss)]
    Ok(count as u64)
}

#[derive(Debug, sqlx::FromRow)]
struct ActivityRow {
    id: String,
    user_id: String,
    kind: String,
    details: String,
    metadata: serde_json::Value,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<ActivityRow> for ActivityRecord {
    fn from(row: ActivityRow) -> Self {
        ActivityRecord {
            id: row.id,
            user_id: row.user_id,
            kind: row.kind,
            details: row.details,
            metadata: row.metadata,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

pub async fn insert_activity<'e>(
    executor: impl sqlx::PgExecutor<'e>,
    record: &ActivityRecord,
) -> Result<(), StorageError> {
    sqlx::query(
        r#"
        INSERT INTO activities (id, user_id, type, details, metadata, created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        "#,
    )
    .bind(&record.id)
    .bind(&record.user_id)
    .bind(&record.kind)
    .bind(&record.details)
    .bind(&record.metadata)
    .bind(record.created_at)
    .bind(record.updated_at)
    .execute(executor)
    .await
    .map_err(classify)?;
    Ok(())
}

pub async fn fetch_activity<'e>(
    executor: impl sqlx::PgExecutor<'e>,
    id: &str,
) -> Result<Option<ActivityRecord>, StorageError> {
    let sql = format!("SELECT {ACTIVITY_COLUMNS} FROM activities WHERE id = $1");
    let row = sqlx::query_as::<_, ActivityRow>(&sql)
        .bind(id)
        .fetch_optional(executor)
        .await
        .map_err(classify)?;
    Ok(row.map(ActivityRecord::from))
}

/// Fetches up to `limit + 1` activities past the query cursor.
pub async fn page_activities<'e>(
    executor: impl sqlx::PgExecutor<'e>,
    query: &ActivityQuery,
    limit: usize,
) -> Result<Vec<ActivityRecord>, StorageError> {
    let mut conditions = Conditions::new();
    if let Some(ref user_id) = query.user_id {
        conditions.eq("user_id", user_id);
    }
    if let Some(ref kind) = query.kind {
        conditions.eq("type", kind);
    }
    let position = match query.cursor {
        Some(ref c) => Some((push_cursor(&mut conditions, c, query.direction)?, c.id.as_str())),
        None => None,
    };
    let sql = format!(
        "SELECT {ACTIVITY_COLUMNS} FROM activities{}{} LIMIT {}",
        conditions.where_clause(),
        order_clause(query.direction),
        limit + 1,
    );

    let mut q = sqlx::query_as::<_, ActivityRow>(&sql);
    for bind in &conditions.binds {
        q = q.bind(*bind);
    }
    if let Some((ts, id)) = position {
        q = q.bind(ts).bind(id);
    }
    let rows = q.fetch_all(executor).await.map_err(classify)?;
    Ok(rows.into_iter().map(ActivityRecord::from).collect())
}

fn search_conditions(search: &ActivitySearch) -> Conditions<'_> {
    let mut conditions = Conditions::new();
    if let Some(ref user_id) = search.user_id {
        conditions.eq("user_id", user_id);
    }
    let idx = conditions.next;
    conditions.clauses.push(format!(
        "(position(lower(${idx}) IN lower(type)) > 0 \
         OR position(lower(${idx}) IN lower(details)) > 0)"
    ));
    conditions.binds.push(&search.query);
    conditions.next += 1;
    conditions
}

pub async fn search_activities<'e>(
    executor: impl sqlx::PgExecutor<'e>,
    search: &ActivitySearch,
    size: usize,
) -> Result<Vec<ActivityRecord>, StorageError> {
    let conditions = search_conditions(search);
    let sql = format!(
        "SELECT {ACTIVITY_COLUMNS} FROM activities{}{} LIMIT {size} OFFSET {}",
        conditions.where_clause(),
        order_clause(SortDirection::Desc),
        search.from,
    );

    let mut q = sqlx::query_as::<_, ActivityRow>(&sql);
    for bind in &conditions.binds {
        q = q.bind(*bind);
    }
    let rows = q.fetch_all(executor).await.map_err(classify)?;
    Ok(rows.into_iter().map(ActivityRecord::from).collect())
}

pub async fn count_search_hits<'e>(
    executor: impl sqlx::PgExecutor<'e>,
    search: &ActivitySearch,
) -> Result<u64, StorageError> {
    let conditions = search_conditions(search);
    let sql = format!("SELECT COUNT(*) FROM activities{}", conditions.where_clause());

    let mut q = sqlx::query_as::<_, (i64,)>(&sql);
    for bind in &conditions.binds {
        q = q.bind(*bind);
    }
    let (count,) = q.fetch_one(executor).await.map_err(classify)?;
    #[allow(clippy::cast_sign_loss)]
    Ok(count as u64)
}
