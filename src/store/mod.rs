//! The Store (spec §4.1): durable CRUD over Proxy / CheckDefinition /
//! ProxyCheck / CheckResult, plus the two aggregate queries that derive
//! liveness and ban state from the latest-per-(proxy, check) result.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::{info, instrument, warn};

use crate::error::{CheckerError, Result};
use crate::models::check::canonical_json;
use crate::models::{Assertion, CheckDefinition, CheckResult, NewCheckDefinition, NewProxy, Proxy, ProxyRow};

/// Which proxies `list_proxies` should return.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyFilter {
    All,
    AliveOnly,
}

/// Durable repository backing the dispatch pipeline and the control plane.
///
/// The Store is the single shared mutable resource across Workers (spec
/// §5); Postgres' row-level locking and the unique constraints on
/// `(host, port, protocol)` / `canonical_definition` / `(proxy_id, check_id)`
/// are what provide the serialization spec §5 requires — no application-level
/// write lock is needed on top of an external RDBMS.
#[derive(Clone)]
pub struct Store {
    pool: PgPool,
}

#[derive(sqlx::FromRow)]
struct CheckDefinitionRow {
    id: i64,
    name: Option<String>,
    url: String,
    expected_status: Vec<i32>,
    xpath_assertions: sqlx::types::Json<Vec<Assertion>>,
    timeout_secs: i32,
    netloc: String,
    created_at: DateTime<Utc>,
}

impl From<CheckDefinitionRow> for CheckDefinition {
    fn from(row: CheckDefinitionRow) -> Self {
        CheckDefinition {
            id: row.id,
            name: row.name,
            url: row.url,
            expected_status: row.expected_status,
            xpath_assertions: row.xpath_assertions.0,
            timeout_secs: row.timeout_secs,
            netloc: row.netloc,
            created_at: row.created_at,
        }
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db_err) if db_err.is_unique_violation())
}

impl Store {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    // ---- Proxy -----------------------------------------------------

    /// `add_proxy(host, port, protocol, recheck_every) → id | error{conflict}` (spec §4.1).
    #[instrument(skip(self))]
    pub async fn add_proxy(&self, new: NewProxy) -> Result<i64> {
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO proxy (host, port, protocol, recheck_every)
            VALUES ($1, $2, $3, $4)
            RETURNING id
            "#,
        )
        .bind(&new.host)
        .bind(new.port)
        .bind(new.protocol.as_str())
        .bind(new.recheck_every)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                CheckerError::Conflict(format!(
                    "proxy {}:{} ({}) already exists",
                    new.host, new.port, new.protocol
                ))
            } else {
                CheckerError::Database(e)
            }
        })?;

        info!(proxy_id = id, host = %new.host, port = new.port, "Proxy added");
        Ok(id)
    }

    /// Idempotent ingestion helper (spec SPEC_FULL §11.2): returns the
    /// existing id on conflict instead of failing the whole ingestion batch.
    #[instrument(skip(self))]
    pub async fn get_or_create_proxy(&self, new: NewProxy) -> Result<i64> {
        match self.add_proxy(new.clone()).await {
            Ok(id) => Ok(id),
            Err(CheckerError::Conflict(_)) => {
                let id: i64 = sqlx::query_scalar(
                    "SELECT id FROM proxy WHERE host = $1 AND port = $2 AND protocol = $3",
                )
                .bind(&new.host)
                .bind(new.port)
                .bind(new.protocol.as_str())
                .fetch_one(&self.pool)
                .await
                .map_err(CheckerError::Database)?;
                Ok(id)
            }
            Err(e) => Err(e),
        }
    }

    /// `remove_proxy(id) → {ok, not_exists}` (spec §4.1). Cascades to
    /// `proxy_check_definition` and `check_result` rows.
    #[instrument(skip(self))]
    pub async fn remove_proxy(&self, id: i64) -> Result<()> {
        let result = sqlx::query("DELETE FROM proxy WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(CheckerError::Database)?;

        if result.rows_affected() == 0 {
            return Err(CheckerError::NotExists(format!("proxy {id}")));
        }
        Ok(())
    }

    pub async fn get_proxy(&self, id: i64) -> Result<Proxy> {
        sqlx::query_as::<_, Proxy>("SELECT * FROM proxy WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(CheckerError::Database)?
            .ok_or_else(|| CheckerError::NotExists(format!("proxy {id}")))
    }

    /// All known proxies, used by the Manager to (re-)populate its schedule
    /// (spec §4.5 sync loop).
    pub async fn get_all_proxies(&self) -> Result<Vec<Proxy>> {
        sqlx::query_as::<_, Proxy>("SELECT * FROM proxy ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .map_err(CheckerError::Database)
    }

    /// `list_proxies(filter) → [ProxyRow]` (spec §4.1): the aggregate query
    /// joining each proxy's associated checks against the latest CheckResult
    /// per (proxy, check), deriving `alive` and `banned_on`.
    #[instrument(skip(self))]
    pub async fn list_proxies(&self, filter: ProxyFilter) -> Result<Vec<ProxyRow>> {
        let proxies = self.get_all_proxies().await?;
        let mut rows = Vec::with_capacity(proxies.len());

        for proxy in proxies {
            let check_ids: Vec<i64> = sqlx::query_scalar(
                "SELECT check_id FROM proxy_check_definition WHERE proxy_id = $1",
            )
            .bind(proxy.id)
            .fetch_all(&self.pool)
            .await
            .map_err(CheckerError::Database)?;

            // Latest result per associated check, joined with its definition's netloc.
            let latest: Vec<(i64, bool, bool, String)> = sqlx::query_as(
                r#"
                SELECT DISTINCT ON (cr.check_id)
                    cr.check_id, cr.is_passed, cr.is_banned, cd.netloc
                FROM check_result cr
                JOIN check_definition cd ON cd.id = cr.check_id
                WHERE cr.proxy_id = $1
                ORDER BY cr.check_id, cr.done_at DESC
                "#,
            )
            .bind(proxy.id)
            .fetch_all(&self.pool)
            .await
            .map_err(CheckerError::Database)?;

            let passed_count = latest.iter().filter(|(_, passed, ..)| *passed).count();
            let alive = !check_ids.is_empty() && passed_count == check_ids.len();

            if filter == ProxyFilter::AliveOnly && !alive {
                continue;
            }

            let banned_on: Vec<String> = latest
                .iter()
                .filter(|(_, _, banned, _)| *banned)
                .map(|(_, _, _, netloc)| netloc.clone())
                .collect();

            rows.push(ProxyRow {
                id: proxy.id,
                host: proxy.host,
                port: proxy.port,
                protocol: proxy.protocol,
                recheck_every: proxy.recheck_every,
                alive,
                check_ids,
                banned_on,
            });
        }

        Ok(rows)
    }

    // ---- CheckDefinition --------------------------------------------

    /// `add_check(definition, name?) → id | error{conflict}` (spec §4.1).
    #[instrument(skip(self))]
    pub async fn add_check(&self, new: NewCheckDefinition) -> Result<i64> {
        let netloc = CheckDefinition::derive_netloc(&new.url)?;
        let status = new.expected_status();
        let xpath = new.xpath_assertions();
        let timeout = new.timeout_secs();
        let canonical = canonical_json(&new.url, &status, &xpath, timeout);

        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO check_definition
                (name, url, expected_status, xpath_assertions, timeout_secs, netloc, canonical_definition)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id
            "#,
        )
        .bind(&new.name)
        .bind(&new.url)
        .bind(&status)
        .bind(sqlx::types::Json(&xpath))
        .bind(timeout)
        .bind(&netloc)
        .bind(&canonical)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                CheckerError::Conflict(format!(
                    "check definition already exists (name or canonical definition clash): {}",
                    new.name.clone().unwrap_or_else(|| new.url.clone())
                ))
            } else {
                CheckerError::Database(e)
            }
        })?;

        info!(check_id = id, url = %new.url, "Check definition added");
        Ok(id)
    }

    /// `remove_check(id | name) → {ok, not_exists}` (spec §4.1).
    pub async fn remove_check(&self, id_or_name: &str) -> Result<()> {
        let result = if let Ok(id) = id_or_name.parse::<i64>() {
            sqlx::query("DELETE FROM check_definition WHERE id = $1")
                .bind(id)
                .execute(&self.pool)
                .await
        } else {
            sqlx::query("DELETE FROM check_definition WHERE name = $1")
                .bind(id_or_name)
                .execute(&self.pool)
                .await
        }
        .map_err(CheckerError::Database)?;

        if result.rows_affected() == 0 {
            return Err(CheckerError::NotExists(format!("check {id_or_name}")));
        }
        Ok(())
    }

    /// `list_check(id | name) → definition | not_exists` (spec §4.1).
    pub async fn get_check(&self, id_or_name: &str) -> Result<CheckDefinition> {
        let row = if let Ok(id) = id_or_name.parse::<i64>() {
            sqlx::query_as::<_, CheckDefinitionRow>("SELECT * FROM check_definition WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await
        } else {
            sqlx::query_as::<_, CheckDefinitionRow>(
                "SELECT * FROM check_definition WHERE name = $1",
            )
            .bind(id_or_name)
            .fetch_optional(&self.pool)
            .await
        }
        .map_err(CheckerError::Database)?;

        row.map(CheckDefinition::from)
            .ok_or_else(|| CheckerError::NotExists(format!("check {id_or_name}")))
    }

    /// All checks associated with a proxy (used by the Worker to fan out
    /// probes, spec §4.4).
    pub async fn checks_for_proxy(&self, proxy_id: i64) -> Result<Vec<CheckDefinition>> {
        let rows = sqlx::query_as::<_, CheckDefinitionRow>(
            r#"
            SELECT cd.* FROM check_definition cd
            JOIN proxy_check_definition pcd ON pcd.check_id = cd.id
            WHERE pcd.proxy_id = $1
            "#,
        )
        .bind(proxy_id)
        .fetch_all(&self.pool)
        .await
        .map_err(CheckerError::Database)?;

        Ok(rows.into_iter().map(CheckDefinition::from).collect())
    }

    // ---- ProxyCheck association ---------------------------------------

    /// `associate(proxy_id, check_id) → {ok, not_exists}`, idempotent (spec §4.1, §8).
    #[instrument(skip(self))]
    pub async fn associate(&self, proxy_id: i64, check_id: i64) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO proxy_check_definition (proxy_id, check_id)
            VALUES ($1, $2)
            ON CONFLICT (proxy_id, check_id) DO NOTHING
            "#,
        )
        .bind(proxy_id)
        .bind(check_id)
        .execute(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(db_err) if db_err.is_foreign_key_violation() => {
                CheckerError::NotExists(format!("proxy {proxy_id} or check {check_id}"))
            }
            other => CheckerError::Database(other),
        })?;

        Ok(())
    }

    /// `disassociate(proxy_id, check_id | check_name) → {ok, not_exists}` (spec §4.1).
    pub async fn disassociate(&self, proxy_id: i64, check_id_or_name: &str) -> Result<()> {
        let check = self.get_check(check_id_or_name).await?;

        let result = sqlx::query(
            "DELETE FROM proxy_check_definition WHERE proxy_id = $1 AND check_id = $2",
        )
        .bind(proxy_id)
        .bind(check.id)
        .execute(&self.pool)
        .await
        .map_err(CheckerError::Database)?;

        if result.rows_affected() == 0 {
            return Err(CheckerError::NotExists(format!(
                "association proxy {proxy_id} / check {}",
                check.id
            )));
        }
        Ok(())
    }

    // ---- CheckResult ----------------------------------------------------

    /// `record_result(CheckResult) → void` (spec §4.1). Append-only; never
    /// mutates a prior row.
    #[instrument(skip(self, result))]
    pub async fn record_result(&self, result: crate::models::result::NewCheckResult) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO check_result (proxy_id, check_id, is_passed, is_banned, status, time, error)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(result.proxy_id)
        .bind(result.check_id)
        .bind(result.is_passed)
        .bind(result.is_banned)
        .bind(result.status)
        .bind(result.time)
        .bind(&result.error)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            warn!(proxy_id = result.proxy_id, check_id = result.check_id, error = %e, "record_result failed");
            CheckerError::Database(e)
        })?;

        Ok(())
    }

    /// Used only by tests/introspection; not part of the core dispatch path.
    pub async fn latest_results_for_proxy(&self, proxy_id: i64) -> Result<Vec<CheckResult>> {
        sqlx::query_as::<_, CheckResult>(
            r#"
            SELECT DISTINCT ON (check_id) *
            FROM check_result
            WHERE proxy_id = $1
            ORDER BY check_id, done_at DESC
            "#,
        )
        .bind(proxy_id)
        .fetch_all(&self.pool)
        .await
        .map_err(CheckerError::Database)
    }
}
