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

//! Core data model (§3). `LabelSet` is a `BTreeMap` rather than an
//! insertion-ordered map because canonical serialization needs sorted keys,
//! which falls out of `BTreeMap`'s iteration order for free.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Ordered, key-unique string->string mapping. Canonical form is compact
/// JSON with sorted keys; empty set serializes as `{}`.
pub type LabelSet = BTreeMap<String, String>;

/// Serializes a `LabelSet` to its canonical compact, sorted-key JSON form.
/// `BTreeMap`'s `Serialize` impl already iterates in key order, so no
/// separate sort step is needed.
pub fn canonical_label_json(labels: &LabelSet) -> String {
    serde_json::to_string(labels).expect("LabelSet of strings never fails to serialize")
}

/// One row as read from a `*pod_usage*` columnar file (§3 `UsageRecord`).
/// Node-label and namespace-label tiers are *not* fields here: they live in
/// separate `*node_labels*` / `*namespace_labels*` files and are attached by
/// lookup during chunk processing (§4.5 steps 2-3), not parsed per row.
#[derive(Debug, Clone, PartialEq)]
pub struct UsageRecord {
    pub interval_start: chrono::NaiveDateTime,
    pub namespace: String,
    pub node: String,
    pub pod: String,
    pub resource_id: Option<String>,
    pub pod_labels: LabelSet,
    pub pod_usage_cpu_core_seconds: f64,
    pub pod_request_cpu_core_seconds: f64,
    pub pod_limit_cpu_core_seconds: f64,
    pub pod_usage_memory_byte_seconds: f64,
    pub pod_request_memory_byte_seconds: f64,
    pub pod_limit_memory_byte_seconds: f64,
    pub node_capacity_cpu_core_seconds: f64,
    pub node_capacity_memory_byte_seconds: f64,
}

/// One hourly capacity reading for a node (§3 `CapacityIntervalRow`).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CapacityIntervalRow {
    pub interval_start: chrono::NaiveDateTime,
    pub cpu_core_seconds: f64,
    pub memory_byte_seconds: f64,
}

/// The group-by key for a chunk's aggregation (§4.5 step 6) and for
/// re-reduction across chunks (§4.6). `canonical_labels` is the merged,
/// sorted-key JSON string — carrying labels as a fixed-type string in the
/// key lets group-by work over a type that implements `Hash`/`Eq` without
/// promoting label keys to struct fields (§9 "dynamic label schemas").
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GroupKey {
    pub usage_start: NaiveDate,
    pub namespace: String,
    pub node: String,
    pub canonical_labels: String,
}

/// Accumulator for one `GroupKey` across a chunk (or across chunks, during
/// re-reduction). Consumption counters are raw sums in core-seconds /
/// byte-seconds; unit conversion happens once, at finalization
/// (`into_daily_summary`), so that re-reduction can keep summing the same
/// unit without double-converting.
#[derive(Debug, Clone, Default)]
pub struct GroupAccumulator {
    pub pod_usage_cpu_core_seconds: f64,
    pub pod_request_cpu_core_seconds: f64,
    pub pod_limit_cpu_core_seconds: f64,
    pub pod_usage_memory_byte_seconds: f64,
    pub pod_request_memory_byte_seconds: f64,
    pub pod_limit_memory_byte_seconds: f64,
    pub node_capacity_cpu_core_seconds: f64,
    pub node_capacity_memory_byte_seconds: f64,
    pub resource_id: Option<String>,
}

impl GroupAccumulator {
    /// Merges `other` into `self` in place: sums compose trivially, and
    /// capacity / resource-id are re-maxed (§4.5 "correctness under
    /// chunking" — max composes trivially too).
    pub fn merge(&mut self, other: &GroupAccumulator) {
        self.pod_usage_cpu_core_seconds += other.pod_usage_cpu_core_seconds;
        self.pod_request_cpu_core_seconds += other.pod_request_cpu_core_seconds;
        self.pod_limit_cpu_core_seconds += other.pod_limit_cpu_core_seconds;
        self.pod_usage_memory_byte_seconds += other.pod_usage_memory_byte_seconds;
        self.pod_request_memory_byte_seconds += other.pod_request_memory_byte_seconds;
        self.pod_limit_memory_byte_seconds += other.pod_limit_memory_byte_seconds;
        self.node_capacity_cpu_core_seconds = self
            .node_capacity_cpu_core_seconds
            .max(other.node_capacity_cpu_core_seconds);
        self.node_capacity_memory_byte_seconds = self
            .node_capacity_memory_byte_seconds
            .max(other.node_capacity_memory_byte_seconds);
        self.resource_id = max_opt_lexicographic(self.resource_id.take(), other.resource_id.clone());
    }
}

fn max_opt_lexicographic(a: Option<String>, b: Option<String>) -> Option<String> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (Some(a), None) => Some(a),
        (None, Some(b)) => Some(b),
        (None, None) => None,
    }
}

const CORE_SECONDS_PER_HOUR: f64 = 3600.0;
const BYTES_PER_GIB: f64 = 1024.0 * 1024.0 * 1024.0;

pub fn core_seconds_to_core_hours(v: f64) -> f64 {
    v / CORE_SECONDS_PER_HOUR
}

pub fn byte_seconds_to_gib_hours(v: f64) -> f64 {
    v / CORE_SECONDS_PER_HOUR / BYTES_PER_GIB
}

/// Daily per-(namespace, node, label-set) summary row (§3 `DailySummary`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailySummary {
    pub usage_start: NaiveDate,
    pub namespace: String,
    pub node: String,
    pub pod_labels: String,
    pub pod_usage_cpu_core_hours: f64,
    pub pod_request_cpu_core_hours: f64,
    pub pod_limit_cpu_core_hours: f64,
    pub pod_usage_memory_gigabyte_hours: f64,
    pub pod_request_memory_gigabyte_hours: f64,
    pub pod_limit_memory_gigabyte_hours: f64,
    pub pod_effective_usage_cpu_core_hours: f64,
    pub pod_effective_usage_memory_gigabyte_hours: f64,
    pub node_capacity_cpu_core_hours: f64,
    pub node_capacity_memory_gigabyte_hours: f64,
    pub cluster_capacity_cpu_core_hours: f64,
    pub cluster_capacity_memory_gigabyte_hours: f64,
    pub resource_id: Option<String>,
    pub cost_category_id: Option<i64>,
    pub source_uuid: String,
    pub source: String,
    pub year: String,
    pub month: String,
    pub day: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_json_is_sorted_and_idempotent() {
        let mut labels = LabelSet::new();
        labels.insert("tier".to_string(), "infra".to_string());
        labels.insert("app".to_string(), "w".to_string());
        let json = canonical_label_json(&labels);
        assert_eq!(json, r#"{"app":"w","tier":"infra"}"#);
        let parsed: LabelSet = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, labels);
        assert_eq!(canonical_label_json(&parsed), json);
    }

    #[test]
    fn empty_label_set_is_empty_object() {
        assert_eq!(canonical_label_json(&LabelSet::new()), "{}");
    }

    #[test]
    fn accumulator_merge_sums_and_maxes() {
        let mut a = GroupAccumulator {
            pod_usage_cpu_core_seconds: 10.0,
            node_capacity_cpu_core_seconds: 5.0,
            resource_id: Some("abc".to_string()),
            ..Default::default()
        };
        let b = GroupAccumulator {
            pod_usage_cpu_core_seconds: 20.0,
            node_capacity_cpu_core_seconds: 8.0,
            resource_id: Some("xyz".to_string()),
            ..Default::default()
        };
        a.merge(&b);
        assert_eq!(a.pod_usage_cpu_core_seconds, 30.0);
        assert_eq!(a.node_capacity_cpu_core_seconds, 8.0);
        assert_eq!(a.resource_id, Some("xyz".to_string()));
    }
}
