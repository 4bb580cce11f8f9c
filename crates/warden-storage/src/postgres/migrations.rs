use sqlx::PgPool;

const STATEMENTS: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS policy_rules (
        id          TEXT PRIMARY KEY,
        ptype       TEXT NOT NULL,
        v0          TEXT NOT NULL DEFAULT '',
        v1          TEXT NOT NULL DEFAULT '',
        v2          TEXT NOT NULL DEFAULT '',
        v3          TEXT NOT NULL DEFAULT '',
        v4          TEXT NOT NULL DEFAULT '',
        v5          TEXT NOT NULL DEFAULT '',
        created_by  TEXT,
        created_at  TIMESTAMPTZ NOT NULL,
        updated_by  TEXT,
        updated_at  TIMESTAMPTZ NOT NULL
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_policy_rules_ptype
    ON policy_rules (ptype, v0, v1)
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_policy_rules_position
    ON policy_rules (created_at, id)
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS role_permissions (
        seq             BIGSERIAL,
        role_id         TEXT NOT NULL,
        permission_id   TEXT NOT NULL,
        created_at      TIMESTAMPTZ NOT NULL,
        PRIMARY KEY (role_id, permission_id)
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_role_permissions_reverse
    ON role_permissions (permission_id)
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS user_roles (
        seq         BIGSERIAL,
        user_id     TEXT NOT NULL,
        role_id     TEXT NOT NULL,
        created_at  TIMESTAMPTZ NOT NULL,
        PRIMARY KEY (user_id, role_id)
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_user_roles_reverse
    ON user_roles (role_id)
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS user_tenant_roles (
        seq         BIGSERIAL,
        user_id     TEXT NOT NULL,
        tenant_id   TEXT NOT NULL,
        role_id     TEXT NOT NULL,
        created_at  TIMESTAMPTZ NOT NULL,
        PRIMARY KEY (user_id, tenant_id, role_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS activities (
        id          TEXT PRIMARY KEY,
        user_id     TEXT NOT NULL,
        type        TEXT NOT NULL,
        details     TEXT NOT NULL DEFAULT '',
        metadata    JSONB NOT NULL DEFAULT '{}'::jsonb,
        created_at  TIMESTAMPTZ NOT NULL,
        updated_at  TIMESTAMPTZ NOT NULL
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_activities_user
    ON activities (user_id, created_at DESC, id DESC)
    "#,
];

/// Creates every table and index. Safe to run repeatedly.
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    for statement in STATEMENTS {
        sqlx::query(statement).execute(pool).await?;
    }
    Ok(())
}
