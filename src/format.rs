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

//! Output formatter (§4.8): attach derived fields, join capacity, assign
//! cost category, and sanitize nulls. This is where the final
//! `GroupAccumulator` -> `DailySummary` conversion happens — unit
//! conversion and effective-usage happen exactly once, here, after every
//! chunk has been re-reduced (§4.5 "Correctness under chunking").

use chrono::Datelike;

use crate::{
    capacity::{ClusterDailyCapacity, NodeDailyCapacity},
    chunk,
    cost_category::{self, CategoryPattern},
    model::{
        DailySummary, GroupAccumulator, GroupKey, byte_seconds_to_gib_hours,
        core_seconds_to_core_hours,
    },
};

/// Replaces a non-finite value with 0.0 (§4.8 "Null-sanitize"; invariant 4
/// "null->0 in all arithmetic"). Every counter in this pipeline starts at
/// 0.0 and only ever adds non-negative finite inputs, so in practice this is
/// a defensive last line before the value reaches the bulk-load boundary,
/// not a path exercised by correct upstream data.
fn sanitize(v: f64) -> f64 {
    if v.is_finite() { v } else { 0.0 }
}

/// Narrows a full-width year (e.g. the `year=<YYYY>` path segment's value,
/// §6) to the two-character form invariant 7 requires of the output row.
/// Takes the last two characters, zero-padding if the input is already
/// shorter than that — the same "never emit a bare `\"1\"`" rule §9's
/// "Month zero-padding" note applies to month, extended to year's output
/// form.
fn two_char_suffix(s: &str) -> String {
    if s.len() <= 2 {
        format!("{s:0>2}")
    } else {
        s[s.len() - 2..].to_string()
    }
}

pub struct FormatContext<'a> {
    pub node_capacity: &'a NodeDailyCapacity,
    pub cluster_capacity: &'a ClusterDailyCapacity,
    pub cost_patterns: &'a [CategoryPattern],
    pub source_uuid: &'a str,
    pub year: &'a str,
    pub month: &'a str,
}

/// Builds one `DailySummary` row from a re-reduced group (§4.8).
pub fn build(key: &GroupKey, acc: &GroupAccumulator, ctx: &FormatContext) -> DailySummary {
    let usage_cpu_h = sanitize(core_seconds_to_core_hours(acc.pod_usage_cpu_core_seconds));
    let request_cpu_h = sanitize(core_seconds_to_core_hours(acc.pod_request_cpu_core_seconds));
    let limit_cpu_h = sanitize(core_seconds_to_core_hours(acc.pod_limit_cpu_core_seconds));
    let usage_mem_h = sanitize(byte_seconds_to_gib_hours(acc.pod_usage_memory_byte_seconds));
    let request_mem_h = sanitize(byte_seconds_to_gib_hours(
        acc.pod_request_memory_byte_seconds,
    ));
    let limit_mem_h = sanitize(byte_seconds_to_gib_hours(acc.pod_limit_memory_byte_seconds));

    let effective_cpu_h = chunk::effective_usage_cpu_core_hours(usage_cpu_h, request_cpu_h);
    let effective_mem_h = chunk::effective_usage_memory_gib_hours(usage_mem_h, request_mem_h);

    let (node_cpu_h, node_mem_h) = ctx
        .node_capacity
        .get(&(key.node.clone(), key.usage_start))
        .copied()
        .unwrap_or((0.0, 0.0));
    let (cluster_cpu_h, cluster_mem_h) = ctx
        .cluster_capacity
        .get(&key.usage_start)
        .copied()
        .unwrap_or((0.0, 0.0));

    let cost_category_id = cost_category::assign(&key.namespace, ctx.cost_patterns);

    DailySummary {
        usage_start: key.usage_start,
        namespace: key.namespace.clone(),
        node: key.node.clone(),
        pod_labels: key.canonical_labels.clone(),
        pod_usage_cpu_core_hours: usage_cpu_h,
        pod_request_cpu_core_hours: request_cpu_h,
        pod_limit_cpu_core_hours: limit_cpu_h,
        pod_usage_memory_gigabyte_hours: usage_mem_h,
        pod_request_memory_gigabyte_hours: request_mem_h,
        pod_limit_memory_gigabyte_hours: limit_mem_h,
        pod_effective_usage_cpu_core_hours: effective_cpu_h,
        pod_effective_usage_memory_gigabyte_hours: effective_mem_h,
        node_capacity_cpu_core_hours: sanitize(node_cpu_h),
        node_capacity_memory_gigabyte_hours: sanitize(node_mem_h),
        cluster_capacity_cpu_core_hours: sanitize(cluster_cpu_h),
        cluster_capacity_memory_gigabyte_hours: sanitize(cluster_mem_h),
        resource_id: acc.resource_id.clone(),
        cost_category_id,
        source_uuid: ctx.source_uuid.to_string(),
        source: ctx.source_uuid.to_string(),
        year: two_char_suffix(ctx.year),
        month: two_char_suffix(ctx.month),
        day: key.usage_start.day().to_string(),
    }
}
