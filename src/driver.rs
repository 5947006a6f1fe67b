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

//! Pipeline driver (§4.1, §4.10): wires enumeration, reading, aggregation,
//! and bulk-loading into one run, moving through
//! `Init -> LoadingMeta -> Reading -> Aggregating -> Writing -> Done`, with
//! `Failed` reachable from any state. Every transition is logged at `info`;
//! the state a run failed in is logged at `error` alongside the taxonomy
//! name from `error::Error::taxonomy` (§7).

use std::collections::{HashMap, HashSet};

use config::RunConfig;

use crate::{
    capacity::{self, ClusterDailyCapacity, NodeDailyCapacity},
    chunk::{self, LabelSnapshots},
    cost_category::CategoryPattern,
    error::Result,
    format::{self, FormatContext},
    loader,
    model::{CapacityIntervalRow, DailySummary, GroupAccumulator, GroupKey, LabelSet, UsageRecord},
    reader::{
        columnar,
        enumerator::{self, FileKind},
    },
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Init,
    LoadingMeta,
    Reading,
    Aggregating,
    Writing,
    Done,
}

impl Stage {
    fn name(self) -> &'static str {
        match self {
            Stage::Init => "Init",
            Stage::LoadingMeta => "LoadingMeta",
            Stage::Reading => "Reading",
            Stage::Aggregating => "Aggregating",
            Stage::Writing => "Writing",
            Stage::Done => "Done",
        }
    }
}

fn enter(stage: Stage) {
    tracing::info!(stage = stage.name(), "entering stage");
}

/// Summary of one completed run, logged at `Done` and returned to `main.rs`.
#[derive(Debug, Clone, Default)]
pub struct PipelineReport {
    pub files_read: usize,
    pub rows_read: usize,
    pub groups_written: usize,
    pub rows_loaded: u64,
}

/// Builds the deduplicated `key -> labels` snapshot for a label-tier kind
/// (§4.1 step 2, §5 "dedup to one row per key"). Rows across all matching
/// files are folded in path order; the last row seen for a key wins, since
/// the source files carry no ordering guarantee beyond lexicographic path
/// order (§9 "deterministic but not meaningful tie-break").
async fn build_label_snapshot(
    store: &dyn object_store::ObjectStore,
    paths: &[String],
    key_column: &str,
) -> Result<HashMap<String, LabelSet>> {
    let mut snapshot = HashMap::new();
    for path in paths {
        let rows = columnar::read_label_rows(store, path, key_column).await?;
        for (key, labels) in rows {
            snapshot.insert(key, labels);
        }
    }
    Ok(snapshot)
}

/// Runs one full pipeline pass for the run described by `cfg` (§4.1-§4.10).
pub async fn run(cfg: &RunConfig) -> Result<PipelineReport> {
    enter(Stage::Init);
    tracing::info!(
        provider_uuid = %cfg.provider_uuid,
        year = %cfg.year,
        month = %cfg.month,
        "starting run"
    );

    enter(Stage::LoadingMeta);
    let store = infra::storage::build_client(
        &cfg.object_store,
        cfg.connect_timeout_secs,
        cfg.read_timeout_secs,
    )?;
    let pool = infra::db::connect_pool(
        &cfg.database,
        cfg.connect_timeout_secs,
        cfg.read_timeout_secs,
    )
    .await?;

    let enabled_keys: HashSet<String> =
        infra::db::fetch_enabled_tag_keys(&pool, &cfg.database.schema).await?;
    let cost_category_rows =
        infra::db::fetch_cost_category_patterns(&pool, &cfg.database.schema).await?;
    let cost_patterns: Vec<CategoryPattern> = cost_category_rows
        .into_iter()
        .map(|(pattern, id)| CategoryPattern::new(pattern, id))
        .collect();

    let node_label_files = enumerator::list_files(
        store.as_ref(),
        &cfg.provider_uuid,
        &cfg.year,
        &cfg.month,
        FileKind::NodeLabels,
    )
    .await?;
    let namespace_label_files = enumerator::list_files(
        store.as_ref(),
        &cfg.provider_uuid,
        &cfg.year,
        &cfg.month,
        FileKind::NamespaceLabels,
    )
    .await?;
    let pod_usage_files = enumerator::list_files(
        store.as_ref(),
        &cfg.provider_uuid,
        &cfg.year,
        &cfg.month,
        FileKind::PodUsage,
    )
    .await?;
    tracing::info!(
        pod_usage_files = pod_usage_files.len(),
        node_label_files = node_label_files.len(),
        namespace_label_files = namespace_label_files.len(),
        "enumerated source files"
    );

    let node_labels = build_label_snapshot(store.as_ref(), &node_label_files, "node").await?;
    let namespace_labels =
        build_label_snapshot(store.as_ref(), &namespace_label_files, "namespace").await?;

    enter(Stage::Reading);
    // §5 "Memory discipline": peak memory must be a function of
    // `chunk_size x max_workers`, not of total input size. Each batch is
    // folded into `hourly_capacity_max` (bounded by distinct (node, hour)
    // pairs) as soon as it's read, then handed to `pending_batches`; once
    // `pending_batches` reaches `fan_out` batches it is fanned out to the
    // rayon pool, re-reduced, folded into `groups`, and dropped — raw
    // batches never accumulate for the whole run.
    let snapshots = LabelSnapshots {
        node_labels: &node_labels,
        namespace_labels: &namespace_labels,
        enabled_keys: &enabled_keys,
    };
    let mut groups: HashMap<GroupKey, GroupAccumulator> = HashMap::new();
    let mut hourly_capacity_max: capacity::HourlyMax = capacity::HourlyMax::new();
    let mut pending_batches: Vec<Vec<UsageRecord>> = Vec::new();
    let mut rows_read = 0usize;
    let mut batches_read = 0usize;
    let batch_size = if cfg.use_streaming { cfg.chunk_size } else { usize::MAX };
    let fan_out = cfg.max_workers.max(1);

    for path in &pod_usage_files {
        columnar::stream_file_categorical(
            store.as_ref(),
            path,
            cfg.column_filtering,
            cfg.use_categorical,
            batch_size,
            |batch| {
                rows_read += batch.len();
                batches_read += 1;
                // Empty-node rows represent nonexistent placements (invariant
                // 3) and must not contribute phantom node capacity to the
                // cluster-capacity sum (§4.4 step 4 sums *real* nodes only).
                for record in batch.iter().filter(|r| !r.node.is_empty()) {
                    capacity::fold_hourly_max(
                        &mut hourly_capacity_max,
                        &record.node,
                        &CapacityIntervalRow {
                            interval_start: record.interval_start,
                            cpu_core_seconds: record.node_capacity_cpu_core_seconds,
                            memory_byte_seconds: record.node_capacity_memory_byte_seconds,
                        },
                    );
                }
                pending_batches.push(batch);
                if pending_batches.len() >= fan_out {
                    let processed = crate::coordinator::process_chunks(
                        &pending_batches,
                        &snapshots,
                        cfg.parallel_chunks,
                        cfg.max_workers,
                    );
                    chunk::merge_into(&mut groups, processed);
                    pending_batches.clear();
                }
                Ok(())
            },
        )
        .await?;
    }
    if !pending_batches.is_empty() {
        let processed = crate::coordinator::process_chunks(
            &pending_batches,
            &snapshots,
            cfg.parallel_chunks,
            cfg.max_workers,
        );
        chunk::merge_into(&mut groups, processed);
        pending_batches.clear();
    }
    tracing::info!(rows_read, batches_read, "finished reading and aggregating pod usage files");

    enter(Stage::Aggregating);
    let (node_capacity, cluster_capacity): (NodeDailyCapacity, ClusterDailyCapacity) =
        capacity::finalize(hourly_capacity_max);

    let ctx = FormatContext {
        node_capacity: &node_capacity,
        cluster_capacity: &cluster_capacity,
        cost_patterns: &cost_patterns,
        source_uuid: &cfg.provider_uuid,
        year: &cfg.year,
        month: &cfg.month,
    };
    let summaries: Vec<DailySummary> = groups
        .iter()
        .map(|(key, acc)| format::build(key, acc, &ctx))
        .collect();
    tracing::info!(groups = summaries.len(), "aggregation complete");

    enter(Stage::Writing);
    let rows_loaded = loader::write(
        &pool,
        &cfg.database.schema,
        &summaries,
        cfg.truncate,
        cfg.use_bulk_copy,
        cfg.batch_size,
    )
    .await?;

    enter(Stage::Done);
    let report = PipelineReport {
        files_read: pod_usage_files.len(),
        rows_read,
        groups_written: summaries.len(),
        rows_loaded,
    };
    tracing::info!(
        files_read = report.files_read,
        rows_read = report.rows_read,
        groups_written = report.groups_written,
        rows_loaded = report.rows_loaded,
        "run complete"
    );
    Ok(report)
}
