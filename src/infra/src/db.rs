// Copyright 2024 Zinc Labs Inc.
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

//! Relational-store connection pool and the primitives the core's bulk
//! loader (§4.9) and metadata loader (§4.10 `LoadingMeta`) build on.
//! Grounded on `openobserve/src/infra/src/file_list/postgres.rs`'s `sqlx`
//! usage (`$1`-placeholder queries, a shared pool, chunked batch calls).

use std::time::Duration;

use bytes::Bytes;
use config::DatabaseConfig;
use sqlx::postgres::PgPoolOptions;

use crate::errors::{Error, Result};

pub type PgPool = sqlx::PgPool;

/// Opens a connection pool honoring the run's connect/read timeouts. Retried
/// with backoff (§7) since a transient network blip during startup
/// shouldn't be fatal on its own.
pub async fn connect_pool(
    cfg: &DatabaseConfig,
    connect_timeout_secs: u64,
    read_timeout_secs: u64,
) -> Result<PgPool> {
    let url = format!(
        "postgres://{}:{}@{}:{}/{}",
        cfg.user, cfg.password, cfg.host, cfg.port, cfg.db
    );
    let pool = crate::retry::with_backoff("database connect", || async {
        PgPoolOptions::new()
            .acquire_timeout(Duration::from_secs(connect_timeout_secs))
            .connect(&url)
            .await
            .map_err(Error::from)
    })
    .await?;
    // read_timeout_secs is enforced per-statement by the caller via
    // `sqlx::query(...).fetch_all(...)` racing a `tokio::time::timeout`;
    // this pool only owns the connect timeout.
    let _ = read_timeout_secs;
    tracing::info!(host = %cfg.host, db = %cfg.db, "database pool connected");
    Ok(pool)
}

/// Truncates `schema.table` in its own statement. Per §7, when `truncate` is
/// requested the caller decides whether this happens inside the same
/// transaction as the first bulk-copy (only when `use_bulk_copy=true`) or in
/// its own committed transaction beforehand (the fallback insert path) —
/// this function only issues the statement; transaction scoping is the
/// caller's (`loader::write`'s) responsibility.
pub async fn truncate_table<'c, E>(executor: E, schema: &str, table: &str) -> Result<()>
where
    E: sqlx::Executor<'c, Database = sqlx::Postgres>,
{
    let sql = format!("TRUNCATE TABLE \"{schema}\".\"{table}\"");
    sqlx::query(&sql).execute(executor).await?;
    Ok(())
}

/// Streams `csv_data` into `table` over the wire-level `COPY ... FROM STDIN`
/// path (§4.9's "preferred path"). `copy_sql` must be a full
/// `COPY schema.table (col, ...) FROM STDIN WITH (FORMAT csv)` statement;
/// building it is the caller's job since column lists vary by table.
pub async fn copy_in_csv(pool: &PgPool, copy_sql: &str, csv_data: Bytes) -> Result<u64> {
    let mut conn = pool.acquire().await?;
    let mut copy = conn.copy_in_raw(copy_sql).await?;
    copy.send(csv_data).await?;
    let rows = copy.finish().await?;
    Ok(rows)
}

/// Reads the enabled pod-label keys from `schema.reporting_enabledtagkeys`
/// (§6 "Relational-store tables consumed"). Retried with backoff (§7).
pub async fn fetch_enabled_tag_keys(
    pool: &PgPool,
    schema: &str,
) -> Result<std::collections::HashSet<String>> {
    let sql = format!("SELECT key FROM \"{schema}\".\"reporting_enabledtagkeys\"");
    let rows: Vec<(String,)> = crate::retry::with_backoff("fetch enabled tag keys", || async {
        sqlx::query_as(&sql).fetch_all(pool).await.map_err(Error::from)
    })
    .await?;
    Ok(rows.into_iter().map(|(k,)| k).collect())
}

/// Reads namespace-pattern -> cost-category-id mappings from
/// `schema.reporting_ocp_cost_category_namespace` (§6, optional table). The
/// table's absence (`42P01`) is a permanent condition, not a transient one,
/// so it short-circuits without retrying; any other database error is
/// retried with backoff (§7) before giving up.
pub async fn fetch_cost_category_patterns(
    pool: &PgPool,
    schema: &str,
) -> Result<Vec<(String, i64)>> {
    let sql = format!(
        "SELECT namespace, cost_category_id FROM \"{schema}\".\"reporting_ocp_cost_category_namespace\""
    );
    let mut last_err = None;
    for (attempt, backoff) in std::iter::once(None)
        .chain(crate::retry::BACKOFFS.iter().map(Some))
        .enumerate()
    {
        if let Some(delay) = backoff {
            tracing::warn!(attempt, "retrying cost-category fetch after backoff");
            tokio::time::sleep(*delay).await;
        }
        match sqlx::query_as::<_, (String, i64)>(&sql).fetch_all(pool).await {
            Ok(rows) => return Ok(rows),
            Err(sqlx::Error::Database(e)) if e.code().as_deref() == Some("42P01") => {
                return Ok(Vec::new());
            }
            Err(e) => {
                tracing::warn!(attempt, error = %e, "cost-category fetch attempt failed");
                last_err = Some(e);
            }
        }
    }
    Err(last_err.expect("loop runs at least once").into())
}
