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

//! Two-level capacity reducer (§4.4). Kept as two explicit group-by passes
//! rather than fused into one (§9 "two-level aggregation" design note) —
//! capacity is reported as a running maximum over the hour in the source,
//! so the daily total is the sum of 24 hourly maxima, never the max of all
//! readings.

use std::collections::HashMap;

use chrono::{Datelike, NaiveDate, Timelike};

use crate::model::{CapacityIntervalRow, byte_seconds_to_gib_hours, core_seconds_to_core_hours};

/// `(node, date) -> (cpu core-hours, memory GiB-hours)`.
pub type NodeDailyCapacity = HashMap<(String, NaiveDate), (f64, f64)>;
/// `date -> (cpu core-hours, memory GiB-hours)`.
pub type ClusterDailyCapacity = HashMap<NaiveDate, (f64, f64)>;
/// `(node, date, hour) -> (max cpu core-seconds, max memory byte-seconds)`
/// seen so far (§4.4 step 1's running table). Bounded by the number of
/// distinct (node, hour) pairs in the run, not by total row count — folding
/// into this table as batches are read is what keeps §5's "peak memory is a
/// function of chunk_size x max_workers" true for capacity too.
pub type HourlyMax = HashMap<(String, NaiveDate, u32), (f64, f64)>;

/// Folds one hourly capacity row into the running per-(node, hour) maximum
/// table (§4.4 step 1). Callers fold every row of a batch into the same
/// `acc` as it is read, then drop the raw batch — `acc`'s size never grows
/// with total input size, only with distinct (node, hour) pairs.
pub fn fold_hourly_max(acc: &mut HourlyMax, node: &str, row: &CapacityIntervalRow) {
    let date = row.interval_start.date();
    let hour = row.interval_start.hour();
    let entry = acc.entry((node.to_string(), date, hour)).or_insert((0.0, 0.0));
    entry.0 = entry.0.max(row.cpu_core_seconds);
    entry.1 = entry.1.max(row.memory_byte_seconds);
}

/// Finishes the two-level reduction (§4.4 steps 2-4) from an already-built
/// hourly-max table: sum the hourly maxima across hours per node per day,
/// convert units, then sum per-node daily capacity across nodes per day for
/// cluster capacity.
pub fn finalize(hourly_max: HourlyMax) -> (NodeDailyCapacity, ClusterDailyCapacity) {
    // Step 2: group those maxima by (node, date), sum across hours.
    let mut node_daily_seconds: HashMap<(String, NaiveDate), (f64, f64)> = HashMap::new();
    for ((node, date, _hour), (cpu, mem)) in hourly_max {
        let entry = node_daily_seconds
            .entry((node, date))
            .or_insert((0.0, 0.0));
        entry.0 += cpu;
        entry.1 += mem;
    }

    // Step 3: convert units.
    let node_daily: NodeDailyCapacity = node_daily_seconds
        .into_iter()
        .map(|(key, (cpu_s, mem_s))| {
            (
                key,
                (
                    core_seconds_to_core_hours(cpu_s),
                    byte_seconds_to_gib_hours(mem_s),
                ),
            )
        })
        .collect();

    // Step 4: cluster capacity is the sum across nodes for each date.
    let mut cluster_daily: ClusterDailyCapacity = HashMap::new();
    for ((_node, date), (cpu_h, mem_h)) in &node_daily {
        let entry = cluster_daily.entry(*date).or_insert((0.0, 0.0));
        entry.0 += cpu_h;
        entry.1 += mem_h;
    }

    (node_daily, cluster_daily)
}

/// Runs the two-level reduction over every hourly capacity row seen this
/// run, keyed by node. Returns per-node daily capacity and, derived from it,
/// per-date cluster capacity (the sum across nodes — invariant 6: sum of
/// node-capacity over nodes on a date equals cluster-capacity on that date,
/// by construction). A convenience wrapper around [`fold_hourly_max`] +
/// [`finalize`] for callers (non-streaming paths, tests) that already have
/// every row in hand at once; the streaming driver folds incrementally
/// instead and calls [`finalize`] only once, after reading.
pub fn reduce<'a, I>(rows: I) -> (NodeDailyCapacity, ClusterDailyCapacity)
where
    I: IntoIterator<Item = (&'a str, &'a CapacityIntervalRow)>,
{
    let mut hourly_max = HourlyMax::new();
    for (node, row) in rows {
        fold_hourly_max(&mut hourly_max, node, row);
    }
    finalize(hourly_max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDateTime;
    use float_cmp::approx_eq;

    fn row(ts: &str, cpu: f64, mem: f64) -> CapacityIntervalRow {
        CapacityIntervalRow {
            interval_start: NaiveDateTime::parse_from_str(ts, "%Y-%m-%dT%H:%M:%S").unwrap(),
            cpu_core_seconds: cpu,
            memory_byte_seconds: mem,
        }
    }

    // Scenario A (spec §8): single hour, capacity 14400 core-seconds -> 4.0 core-hours.
    #[test]
    fn scenario_a_single_hour_capacity() {
        let r = row("2025-10-01T00:00:00", 14400.0, 0.0);
        let rows = vec![("n1", &r)];
        let (node_daily, _) = reduce(rows);
        let date = NaiveDate::from_ymd_opt(2025, 10, 1).unwrap();
        let (cpu_h, _) = node_daily[&("n1".to_string(), date)];
        assert!(approx_eq!(f64, cpu_h, 4.0, epsilon = 1e-9));
    }

    // Scenario B (spec §8): two hourly maxima of 3600 core-seconds sum to 2.0 core-hours.
    #[test]
    fn scenario_b_two_hours_sum_of_hourly_maxima() {
        let r0 = row("2025-10-01T00:00:00", 3600.0, 0.0);
        let r1 = row("2025-10-01T01:00:00", 3600.0, 0.0);
        let rows = vec![("n1", &r0), ("n1", &r1)];
        let (node_daily, cluster_daily) = reduce(rows);
        let date = NaiveDate::from_ymd_opt(2025, 10, 1).unwrap();
        let (cpu_h, _) = node_daily[&("n1".to_string(), date)];
        assert!(approx_eq!(f64, cpu_h, 2.0, epsilon = 1e-9));
        let (cluster_cpu_h, _) = cluster_daily[&date];
        assert!(approx_eq!(f64, cluster_cpu_h, 2.0, epsilon = 1e-9));
    }

    #[test]
    fn within_hour_takes_max_not_sum() {
        // Two readings in the same hour for the same node: the source
        // reports capacity as a running max, so duplicate/partial readings
        // within the hour must not be summed.
        let r0 = row("2025-10-01T00:00:00", 3600.0, 0.0);
        let r1 = row("2025-10-01T00:00:00", 7200.0, 0.0);
        let rows = vec![("n1", &r0), ("n1", &r1)];
        let (node_daily, _) = reduce(rows);
        let date = NaiveDate::from_ymd_opt(2025, 10, 1).unwrap();
        let (cpu_h, _) = node_daily[&("n1".to_string(), date)];
        assert!(approx_eq!(f64, cpu_h, 2.0, epsilon = 1e-9));
    }

    #[test]
    fn cluster_capacity_sums_multiple_nodes() {
        let r0 = row("2025-10-01T00:00:00", 3600.0, 0.0);
        let r1 = row("2025-10-01T00:00:00", 7200.0, 0.0);
        let rows = vec![("n1", &r0), ("n2", &r1)];
        let (_, cluster_daily) = reduce(rows);
        let date = NaiveDate::from_ymd_opt(2025, 10, 1).unwrap();
        let (cluster_cpu_h, _) = cluster_daily[&date];
        assert!(approx_eq!(f64, cluster_cpu_h, 3.0, epsilon = 1e-9));
    }
}
