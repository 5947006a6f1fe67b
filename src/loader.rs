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

//! Bulk loader (§4.9): writes `DailySummary` rows into
//! `reporting_ocpusagelineitem_daily_summary`. Prefers the wire-level
//! `COPY ... FROM STDIN` path (`infra::db::copy_in_csv`), retried with
//! backoff via `crate::retry`, and falls back to chunked `INSERT ... VALUES`
//! via `sqlx::QueryBuilder` — the same `QueryBuilder::push_values` pattern as
//! `infra/src/file_list/postgres.rs`'s `batch_add_deleted`, chunked at the
//! operator-configured `batch_size` (§6).

use bytes::Bytes;
use infra::db::PgPool;
use sqlx::{Postgres, QueryBuilder};

use crate::{
    error::{Error, Result},
    model::DailySummary,
};

const TABLE: &str = "reporting_ocpusagelineitem_daily_summary";

const CSV_COLUMNS: [&str; 23] = [
    "usage_start",
    "namespace",
    "node",
    "pod_labels",
    "pod_usage_cpu_core_hours",
    "pod_request_cpu_core_hours",
    "pod_limit_cpu_core_hours",
    "pod_usage_memory_gigabyte_hours",
    "pod_request_memory_gigabyte_hours",
    "pod_limit_memory_gigabyte_hours",
    "pod_effective_usage_cpu_core_hours",
    "pod_effective_usage_memory_gigabyte_hours",
    "node_capacity_cpu_core_hours",
    "node_capacity_memory_gigabyte_hours",
    "cluster_capacity_cpu_core_hours",
    "cluster_capacity_memory_gigabyte_hours",
    "resource_id",
    "cost_category_id",
    "source_uuid",
    "source",
    "year",
    "month",
    "day",
];

/// Serializes `rows` as headerless CSV in `CSV_COLUMNS` order (§4.9 "CSV
/// encoding matches the COPY column list exactly").
fn to_csv(rows: &[DailySummary]) -> Result<Bytes> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::new());
    for row in rows {
        writer
            .write_record([
                row.usage_start.to_string(),
                row.namespace.clone(),
                row.node.clone(),
                row.pod_labels.clone(),
                row.pod_usage_cpu_core_hours.to_string(),
                row.pod_request_cpu_core_hours.to_string(),
                row.pod_limit_cpu_core_hours.to_string(),
                row.pod_usage_memory_gigabyte_hours.to_string(),
                row.pod_request_memory_gigabyte_hours.to_string(),
                row.pod_limit_memory_gigabyte_hours.to_string(),
                row.pod_effective_usage_cpu_core_hours.to_string(),
                row.pod_effective_usage_memory_gigabyte_hours.to_string(),
                row.node_capacity_cpu_core_hours.to_string(),
                row.node_capacity_memory_gigabyte_hours.to_string(),
                row.cluster_capacity_cpu_core_hours.to_string(),
                row.cluster_capacity_memory_gigabyte_hours.to_string(),
                row.resource_id.clone().unwrap_or_default(),
                row.cost_category_id.map(|v| v.to_string()).unwrap_or_default(),
                row.source_uuid.clone(),
                row.source.clone(),
                row.year.clone(),
                row.month.clone(),
                row.day.clone(),
            ])
            .map_err(|e| Error::BulkLoad(format!("csv encode: {e}")))?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|e| Error::BulkLoad(format!("csv flush: {e}")))?;
    Ok(Bytes::from(bytes))
}

fn copy_sql(schema: &str) -> String {
    format!(
        "COPY \"{schema}\".\"{TABLE}\" ({}) FROM STDIN WITH (FORMAT csv)",
        CSV_COLUMNS.join(", ")
    )
}

/// Attempts the `COPY` path with backoff (§4.9 "retry with backoff", §7).
/// Returns the last error if every attempt fails, so the caller can fall
/// back to inserts.
async fn try_copy(pool: &PgPool, schema: &str, rows: &[DailySummary]) -> Result<u64> {
    let sql = copy_sql(schema);
    let csv_data = to_csv(rows)?;

    crate::retry::with_backoff("bulk copy", || async {
        infra::db::copy_in_csv(pool, &sql, csv_data.clone())
            .await
            .map_err(Error::from)
    })
    .await
}

/// Clamps only the pathological zero case — an operator-configured
/// `batch_size` (§6 "Fallback insert batch size", default 1000 per
/// `config::DEFAULT_BATCH_SIZE`) is otherwise honored as given, never
/// silently capped to a fixed ceiling.
fn effective_batch_size(batch_size: usize) -> usize {
    batch_size.max(1)
}

/// Chunked `INSERT ... VALUES` fallback (§4.9), `batch_size` rows per
/// statement.
async fn insert_chunked(pool: &PgPool, schema: &str, rows: &[DailySummary], batch_size: usize) -> Result<u64> {
    let batch_size = effective_batch_size(batch_size);
    let mut total = 0u64;
    for chunk in rows.chunks(batch_size) {
        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(format!(
            "INSERT INTO \"{schema}\".\"{TABLE}\" ({})",
            CSV_COLUMNS.join(", ")
        ));
        qb.push_values(chunk, |mut b, row| {
            b.push_bind(row.usage_start)
                .push_bind(&row.namespace)
                .push_bind(&row.node)
                .push_bind(&row.pod_labels)
                .push_bind(row.pod_usage_cpu_core_hours)
                .push_bind(row.pod_request_cpu_core_hours)
                .push_bind(row.pod_limit_cpu_core_hours)
                .push_bind(row.pod_usage_memory_gigabyte_hours)
                .push_bind(row.pod_request_memory_gigabyte_hours)
                .push_bind(row.pod_limit_memory_gigabyte_hours)
                .push_bind(row.pod_effective_usage_cpu_core_hours)
                .push_bind(row.pod_effective_usage_memory_gigabyte_hours)
                .push_bind(row.node_capacity_cpu_core_hours)
                .push_bind(row.node_capacity_memory_gigabyte_hours)
                .push_bind(row.cluster_capacity_cpu_core_hours)
                .push_bind(row.cluster_capacity_memory_gigabyte_hours)
                .push_bind(&row.resource_id)
                .push_bind(row.cost_category_id)
                .push_bind(&row.source_uuid)
                .push_bind(&row.source)
                .push_bind(&row.year)
                .push_bind(&row.month)
                .push_bind(&row.day);
        });
        let result = qb
            .build()
            .execute(pool)
            .await
            .map_err(|e| Error::BulkLoad(format!("insert chunk: {e}")))?;
        total += result.rows_affected();
    }
    Ok(total)
}

/// Writes every row in `rows` to the relational store, truncating first if
/// `truncate` is set (§4.9, §7 truncate/transaction-scoping trade-off:
/// truncate runs in its own committed statement before the load, so a load
/// failure after truncation leaves the table empty rather than rolling the
/// truncate back — acceptable because a failed run is re-run from scratch).
pub async fn write(
    pool: &PgPool,
    schema: &str,
    rows: &[DailySummary],
    truncate: bool,
    use_bulk_copy: bool,
    batch_size: usize,
) -> Result<u64> {
    if truncate {
        infra::db::truncate_table(pool, schema, TABLE).await?;
        tracing::info!(schema, table = TABLE, "truncated destination table");
    }
    if rows.is_empty() {
        return Ok(0);
    }

    if use_bulk_copy {
        match try_copy(pool, schema, rows).await {
            Ok(n) => return Ok(n),
            Err(e) => {
                tracing::warn!(error = %e, "falling back to chunked insert after copy failure");
            }
        }
    }
    insert_chunked(pool, schema, rows, batch_size).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn sample_row() -> DailySummary {
        DailySummary {
            usage_start: NaiveDate::from_ymd_opt(2025, 10, 1).unwrap(),
            namespace: "ns1".to_string(),
            node: "n1".to_string(),
            pod_labels: "{}".to_string(),
            pod_usage_cpu_core_hours: 2.0,
            pod_request_cpu_core_hours: 1.0,
            pod_limit_cpu_core_hours: 0.0,
            pod_usage_memory_gigabyte_hours: 0.0,
            pod_request_memory_gigabyte_hours: 0.0,
            pod_limit_memory_gigabyte_hours: 0.0,
            pod_effective_usage_cpu_core_hours: 2.0,
            pod_effective_usage_memory_gigabyte_hours: 0.0,
            node_capacity_cpu_core_hours: 4.0,
            node_capacity_memory_gigabyte_hours: 0.0,
            cluster_capacity_cpu_core_hours: 4.0,
            cluster_capacity_memory_gigabyte_hours: 0.0,
            resource_id: Some("i-1".to_string()),
            cost_category_id: Some(5),
            source_uuid: "prov-1".to_string(),
            source: "prov-1".to_string(),
            year: "2025".to_string(),
            month: "10".to_string(),
            day: "1".to_string(),
        }
    }

    #[test]
    fn csv_has_one_line_per_row_and_no_header() {
        let rows = vec![sample_row(), sample_row()];
        let csv_bytes = to_csv(&rows).unwrap();
        let text = String::from_utf8(csv_bytes.to_vec()).unwrap();
        assert_eq!(text.lines().count(), 2);
        assert!(text.starts_with("2025-10-01,ns1,n1,"));
    }

    #[test]
    fn csv_null_resource_id_is_empty_field() {
        let mut row = sample_row();
        row.resource_id = None;
        row.cost_category_id = None;
        let csv_bytes = to_csv(&[row]).unwrap();
        let text = String::from_utf8(csv_bytes.to_vec()).unwrap();
        assert!(text.contains(",,,prov-1,prov-1,"));
    }

    #[test]
    fn copy_sql_names_every_column_once() {
        let sql = copy_sql("public");
        for col in CSV_COLUMNS {
            assert_eq!(sql.matches(col).count(), 1, "column {col} should appear exactly once");
        }
    }

    #[test]
    fn effective_batch_size_honors_configured_value_above_the_old_fixed_cap() {
        // §6 documents batch_size's default as 1000; it must not be clamped
        // down to a hardcoded ceiling.
        assert_eq!(effective_batch_size(1000), 1000);
        assert_eq!(effective_batch_size(50_000), 50_000);
    }

    #[test]
    fn effective_batch_size_floors_zero_to_one() {
        assert_eq!(effective_batch_size(0), 1);
    }
}
