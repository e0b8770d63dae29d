use crate::error::{CheckerError, Result};
use sqlx::PgPool;
use tracing::info;

/// Run all database migrations.
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    create_migrations_table(pool).await?;

    let migrations = get_migrations();

    for (version, name, sql) in migrations {
        if !is_migration_applied(pool, version).await? {
            info!(version = version, name = name, "Applying migration");

            sqlx::query(sql)
                .execute(pool)
                .await
                .map_err(CheckerError::Database)?;

            record_migration(pool, version, name).await?;

            info!(version = version, name = name, "Migration applied successfully");
        }
    }

    Ok(())
}

async fn create_migrations_table(pool: &PgPool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            name VARCHAR(255) NOT NULL,
            applied_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(CheckerError::Database)?;

    Ok(())
}

async fn is_migration_applied(pool: &PgPool, version: i32) -> Result<bool> {
    let result =
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM schema_migrations WHERE version = $1")
            .bind(version)
            .fetch_one(pool)
            .await
            .map_err(CheckerError::Database)?;

    Ok(result > 0)
}

async fn record_migration(pool: &PgPool, version: i32, name: &str) -> Result<()> {
    sqlx::query("INSERT INTO schema_migrations (version, name) VALUES ($1, $2)")
        .bind(version)
        .bind(name)
        .execute(pool)
        .await
        .map_err(CheckerError::Database)?;

    Ok(())
}

fn get_migrations() -> Vec<(i32, &'static str, &'static str)> {
    vec![
        (1, "proxy_table", MIGRATION_001_PROXY),
        (2, "check_definition_table", MIGRATION_002_CHECK_DEFINITION),
        (3, "proxy_check_definition_table", MIGRATION_003_PROXY_CHECK_DEFINITION),
        (4, "check_result_table", MIGRATION_004_CHECK_RESULT),
    ]
}

// Migration 1: Proxy registry (spec §3, §6).
const MIGRATION_001_PROXY: &str = r#"
CREATE TABLE IF NOT EXISTS proxy (
    id BIGSERIAL PRIMARY KEY,
    host VARCHAR(255) NOT NULL,
    port INTEGER NOT NULL,
    protocol VARCHAR(20) NOT NULL,
    recheck_every BIGINT,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    CONSTRAINT unique_proxy_host_port_protocol UNIQUE (host, port, protocol)
);

CREATE INDEX IF NOT EXISTS idx_proxy_protocol ON proxy(protocol);
"#;

// Migration 2: Check definitions, keyed by canonical serialized JSON for
// uniqueness (spec §3, §6).
const MIGRATION_002_CHECK_DEFINITION: &str = r#"
CREATE TABLE IF NOT EXISTS check_definition (
    id BIGSERIAL PRIMARY KEY,
    name VARCHAR(255) UNIQUE,
    url TEXT NOT NULL,
    expected_status INTEGER[] NOT NULL DEFAULT ARRAY[200],
    xpath_assertions JSONB NOT NULL DEFAULT '[]',
    timeout_secs INTEGER NOT NULL DEFAULT 2,
    netloc VARCHAR(255) NOT NULL,
    canonical_definition TEXT NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    CONSTRAINT unique_check_definition UNIQUE (canonical_definition)
);

CREATE INDEX IF NOT EXISTS idx_check_definition_netloc ON check_definition(netloc);
"#;

// Migration 3: Proxy <-> CheckDefinition association (spec §3).
const MIGRATION_003_PROXY_CHECK_DEFINITION: &str = r#"
CREATE TABLE IF NOT EXISTS proxy_check_definition (
    proxy_id BIGINT NOT NULL REFERENCES proxy(id) ON DELETE CASCADE,
    check_id BIGINT NOT NULL REFERENCES check_definition(id) ON DELETE CASCADE,
    PRIMARY KEY (proxy_id, check_id)
);

CREATE INDEX IF NOT EXISTS idx_proxy_check_definition_check_id ON proxy_check_definition(check_id);
"#;

// Migration 4: Append-only check results, indexed for the latest-per-check
// view (spec §3, §6).
const MIGRATION_004_CHECK_RESULT: &str = r#"
CREATE TABLE IF NOT EXISTS check_result (
    id BIGSERIAL PRIMARY KEY,
    proxy_id BIGINT NOT NULL REFERENCES proxy(id) ON DELETE CASCADE,
    check_id BIGINT NOT NULL REFERENCES check_definition(id) ON DELETE CASCADE,
    is_passed BOOLEAN NOT NULL,
    is_banned BOOLEAN NOT NULL,
    status INTEGER,
    time DOUBLE PRECISION NOT NULL,
    error VARCHAR(64),
    done_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE INDEX IF NOT EXISTS idx_check_result_latest
    ON check_result(proxy_id, check_id, done_at DESC);
"#;
