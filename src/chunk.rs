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

//! Chunk processor (§4.5): for one batch of `UsageRecord`s, attach label
//! tiers, merge them, group-by, and sum. §9 "per-row lambda over tabular
//! data": the merge runs over three aligned per-row values (node-labels,
//! namespace-labels, filtered pod-labels) rather than a dataframe
//! `.apply(axis=1)` — here that's simply three lookups plus `labels::merge_tiers`
//! per row, which is trivially batch-friendly and trivially parallel.

use std::collections::{HashMap, HashSet};

use crate::{
    labels,
    model::{GroupAccumulator, GroupKey, LabelSet, UsageRecord, canonical_label_json},
};

/// Read-only label snapshots the chunk processor joins against. Built once
/// per run, deduplicated to one row per key (§5 "Shared-resource policy") —
/// callers must pass already-deduplicated maps; this module does not
/// deduplicate, to keep the cartesian-product risk (§9) visibly the
/// caller's responsibility.
pub struct LabelSnapshots<'a> {
    pub node_labels: &'a HashMap<String, LabelSet>,
    pub namespace_labels: &'a HashMap<String, LabelSet>,
    pub enabled_keys: &'a HashSet<String>,
}

/// Processes one chunk of `UsageRecord`s into a per-key accumulator map
/// (§4.5). Empty-node rows are dropped (invariant 3) before grouping.
pub fn process_chunk(
    records: &[UsageRecord],
    snapshots: &LabelSnapshots,
) -> HashMap<GroupKey, GroupAccumulator> {
    let mut groups: HashMap<GroupKey, GroupAccumulator> = HashMap::new();

    for record in records {
        if record.node.is_empty() {
            continue;
        }

        let node_labels = snapshots
            .node_labels
            .get(&record.node)
            .cloned()
            .unwrap_or_default();
        let namespace_labels = snapshots
            .namespace_labels
            .get(&record.namespace)
            .cloned()
            .unwrap_or_default();
        let pod_labels_filtered = labels::filter_enabled(&record.pod_labels, snapshots.enabled_keys);
        let merged = labels::merge_tiers(&node_labels, &namespace_labels, &pod_labels_filtered);
        let canonical = canonical_label_json(&merged);

        let key = GroupKey {
            usage_start: record.interval_start.date(),
            namespace: record.namespace.clone(),
            node: record.node.clone(),
            canonical_labels: canonical,
        };

        let resource_id = record
            .resource_id
            .as_ref()
            .filter(|s| !s.is_empty())
            .cloned();

        let entry = groups.entry(key).or_default();
        entry.pod_usage_cpu_core_seconds += record.pod_usage_cpu_core_seconds;
        entry.pod_request_cpu_core_seconds += record.pod_request_cpu_core_seconds;
        entry.pod_limit_cpu_core_seconds += record.pod_limit_cpu_core_seconds;
        entry.pod_usage_memory_byte_seconds += record.pod_usage_memory_byte_seconds;
        entry.pod_request_memory_byte_seconds += record.pod_request_memory_byte_seconds;
        entry.pod_limit_memory_byte_seconds += record.pod_limit_memory_byte_seconds;
        entry.node_capacity_cpu_core_seconds = entry
            .node_capacity_cpu_core_seconds
            .max(record.node_capacity_cpu_core_seconds);
        entry.node_capacity_memory_byte_seconds = entry
            .node_capacity_memory_byte_seconds
            .max(record.node_capacity_memory_byte_seconds);
        entry.resource_id = match (entry.resource_id.take(), resource_id) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (Some(a), None) => Some(a),
            (None, Some(b)) => Some(b),
            (None, None) => None,
        };
    }

    groups
}

/// Re-reduces a collection of per-chunk group maps into one (§4.6 "Final
/// re-aggregation"). Sums and maxes compose trivially because
/// `GroupAccumulator::merge` never recomputes effective usage — effective
/// usage is derived only once, downstream in `format.rs`, from the final
/// summed accumulator (§4.5 "Correctness under chunking", §9).
pub fn re_reduce<I>(chunks: I) -> HashMap<GroupKey, GroupAccumulator>
where
    I: IntoIterator<Item = HashMap<GroupKey, GroupAccumulator>>,
{
    let mut merged: HashMap<GroupKey, GroupAccumulator> = HashMap::new();
    for chunk in chunks {
        for (key, acc) in chunk {
            merged.entry(key).or_default().merge(&acc);
        }
    }
    merged
}

/// Folds one already-reduced chunk-group map into a running total in place
/// (§5 "Memory discipline"). Unlike [`re_reduce`], which builds a fresh
/// merged map from a batch of chunk maps, this lets the driver keep a single
/// running `HashMap` across the whole run and drop each fanned-out group's
/// map as soon as it has been folded in.
pub fn merge_into(
    target: &mut HashMap<GroupKey, GroupAccumulator>,
    source: HashMap<GroupKey, GroupAccumulator>,
) {
    for (key, acc) in source {
        target.entry(key).or_default().merge(&acc);
    }
}

/// `max(usage, request)` per resource, computed after summation — never as
/// a per-chunk max of per-chunk effectives (§9, invariant: "Effective-usage
/// computed as max(sum, sum), never sum(max)").
pub fn effective_usage_cpu_core_hours(acc_core_hours_usage: f64, acc_core_hours_request: f64) -> f64 {
    acc_core_hours_usage.max(acc_core_hours_request)
}

pub fn effective_usage_memory_gib_hours(acc_gib_hours_usage: f64, acc_gib_hours_request: f64) -> f64 {
    acc_gib_hours_usage.max(acc_gib_hours_request)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDateTime;

    fn usage_record(ts: &str, namespace: &str, node: &str, cpu_usage: f64, cpu_req: f64) -> UsageRecord {
        UsageRecord {
            interval_start: NaiveDateTime::parse_from_str(ts, "%Y-%m-%dT%H:%M:%S").unwrap(),
            namespace: namespace.to_string(),
            node: node.to_string(),
            pod: "p1".to_string(),
            resource_id: None,
            pod_labels: LabelSet::new(),
            pod_usage_cpu_core_seconds: cpu_usage,
            pod_request_cpu_core_seconds: cpu_req,
            pod_limit_cpu_core_seconds: 0.0,
            pod_usage_memory_byte_seconds: 0.0,
            pod_request_memory_byte_seconds: 0.0,
            pod_limit_memory_byte_seconds: 0.0,
            node_capacity_cpu_core_seconds: 0.0,
            node_capacity_memory_byte_seconds: 0.0,
        }
    }

    // Scenario D (spec §8): empty node is dropped.
    #[test]
    fn scenario_d_empty_node_dropped() {
        let records = vec![
            usage_record("2025-10-01T00:00:00", "ns1", "", 1.0, 1.0),
            usage_record("2025-10-01T00:00:00", "ns1", "n1", 2.0, 1.0),
        ];
        let snapshots = LabelSnapshots {
            node_labels: &HashMap::new(),
            namespace_labels: &HashMap::new(),
            enabled_keys: &HashSet::new(),
        };
        let groups = process_chunk(&records, &snapshots);
        assert_eq!(groups.len(), 1);
        let key = groups.keys().next().unwrap();
        assert_eq!(key.node, "n1");
    }

    #[test]
    fn re_reduce_sums_across_chunks_not_max_of_sums() {
        let records_a = vec![usage_record("2025-10-01T00:00:00", "ns1", "n1", 10.0, 0.0)];
        let records_b = vec![usage_record("2025-10-01T00:00:00", "ns1", "n1", 20.0, 0.0)];
        let snapshots = LabelSnapshots {
            node_labels: &HashMap::new(),
            namespace_labels: &HashMap::new(),
            enabled_keys: &HashSet::new(),
        };
        let chunk_a = process_chunk(&records_a, &snapshots);
        let chunk_b = process_chunk(&records_b, &snapshots);
        let merged = re_reduce(vec![chunk_a, chunk_b]);
        assert_eq!(merged.len(), 1);
        let acc = merged.values().next().unwrap();
        assert_eq!(acc.pod_usage_cpu_core_seconds, 30.0);
    }

    #[test]
    fn chunking_granularity_does_not_change_totals() {
        // Invariant 3 / Scenario F (spec §8), at unit scale: one big chunk
        // vs many small chunks of the same records produce the same sum.
        let records: Vec<UsageRecord> = (0..20)
            .map(|_| usage_record("2025-10-01T00:00:00", "ns1", "n1", 5.0, 0.0))
            .collect();
        let snapshots = LabelSnapshots {
            node_labels: &HashMap::new(),
            namespace_labels: &HashMap::new(),
            enabled_keys: &HashSet::new(),
        };

        let one_chunk = process_chunk(&records, &snapshots);
        let many_chunks: Vec<_> = records
            .chunks(3)
            .map(|c| process_chunk(c, &snapshots))
            .collect();
        let re_reduced = re_reduce(many_chunks);

        let sum_one = one_chunk.values().next().unwrap().pod_usage_cpu_core_seconds;
        let sum_many = re_reduced.values().next().unwrap().pod_usage_cpu_core_seconds;
        assert_eq!(sum_one, sum_many);
        assert_eq!(sum_one, 100.0);
    }
}
