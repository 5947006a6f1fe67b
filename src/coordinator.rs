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

//! Chunk coordinator (§4.6): fans a run's chunks out over a bounded worker
//! pool when `parallel_chunks` is set, or folds them serially otherwise, and
//! re-reduces every chunk's per-key accumulator map into one. Chunk
//! processing itself cannot fail (`chunk::process_chunk` is infallible) —
//! the only fatal errors in a run originate upstream, in the reader, so
//! there is nothing here to cancel on.

use std::collections::HashMap;

use rayon::prelude::*;

use crate::{
    chunk::{self, LabelSnapshots},
    model::{GroupAccumulator, GroupKey, UsageRecord},
};

/// Processes every chunk in `chunks` and re-reduces the results (§4.6).
/// Runs on a dedicated `rayon` pool sized `max_workers` when `parallel` is
/// true (grounded on the teacher's `rayon`-based chunked parallelism, e.g.
/// `common/utils/json.rs`'s `par_iter` usage over record batches); otherwise
/// folds chunks one at a time on the calling thread.
pub fn process_chunks(
    chunks: &[Vec<UsageRecord>],
    snapshots: &LabelSnapshots,
    parallel: bool,
    max_workers: usize,
) -> HashMap<GroupKey, GroupAccumulator> {
    if !parallel || chunks.len() <= 1 {
        let per_chunk = chunks
            .iter()
            .map(|c| chunk::process_chunk(c, snapshots))
            .collect::<Vec<_>>();
        return chunk::re_reduce(per_chunk);
    }

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(max_workers.max(1))
        .build()
        .expect("thread pool with a positive thread count always builds");

    let per_chunk = pool.install(|| {
        chunks
            .par_iter()
            .map(|c| chunk::process_chunk(c, snapshots))
            .collect::<Vec<_>>()
    });
    chunk::re_reduce(per_chunk)
}

#[cfg(test)]
mod tests {
    use std::collections::{HashMap, HashSet};

    use chrono::NaiveDateTime;

    use super::*;
    use crate::model::LabelSet;

    fn usage_record(cpu_usage: f64) -> UsageRecord {
        UsageRecord {
            interval_start: NaiveDateTime::parse_from_str("2025-10-01T00:00:00", "%Y-%m-%dT%H:%M:%S")
                .unwrap(),
            namespace: "ns1".to_string(),
            node: "n1".to_string(),
            pod: "p1".to_string(),
            resource_id: None,
            pod_labels: LabelSet::new(),
            pod_usage_cpu_core_seconds: cpu_usage,
            pod_request_cpu_core_seconds: 0.0,
            pod_limit_cpu_core_seconds: 0.0,
            pod_usage_memory_byte_seconds: 0.0,
            pod_request_memory_byte_seconds: 0.0,
            pod_limit_memory_byte_seconds: 0.0,
            node_capacity_cpu_core_seconds: 0.0,
            node_capacity_memory_byte_seconds: 0.0,
        }
    }

    #[test]
    fn serial_and_parallel_paths_agree() {
        let chunks: Vec<Vec<UsageRecord>> = (0..8)
            .map(|_| vec![usage_record(5.0), usage_record(5.0)])
            .collect();
        let node_labels = HashMap::new();
        let namespace_labels = HashMap::new();
        let enabled_keys = HashSet::new();
        let snapshots = LabelSnapshots {
            node_labels: &node_labels,
            namespace_labels: &namespace_labels,
            enabled_keys: &enabled_keys,
        };

        let serial = process_chunks(&chunks, &snapshots, false, 1);
        let parallel = process_chunks(&chunks, &snapshots, true, 4);

        let serial_sum = serial.values().next().unwrap().pod_usage_cpu_core_seconds;
        let parallel_sum = parallel.values().next().unwrap().pod_usage_cpu_core_seconds;
        assert_eq!(serial_sum, 80.0);
        assert_eq!(serial_sum, parallel_sum);
    }

    #[test]
    fn single_chunk_takes_the_serial_path() {
        let chunks = vec![vec![usage_record(1.0)]];
        let node_labels = HashMap::new();
        let namespace_labels = HashMap::new();
        let enabled_keys = HashSet::new();
        let snapshots = LabelSnapshots {
            node_labels: &node_labels,
            namespace_labels: &namespace_labels,
            enabled_keys: &enabled_keys,
        };
        let result = process_chunks(&chunks, &snapshots, true, 4);
        assert_eq!(result.len(), 1);
    }
}
