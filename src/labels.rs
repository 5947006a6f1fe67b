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

//! Label parsing, filtering, and tier merge (§4.3, §4.5 step 4).
//!
//! §9 "Mixed types in label columns": a column's raw cells may arrive as a
//! JSON string or, when the reader has already decoded them, a native map.
//! `LabelValue` carries both shapes and `parse` collapses either into the
//! same canonical `LabelSet`, so downstream code never branches on the
//! original representation.

use std::collections::{BTreeMap, HashSet};

use crate::model::LabelSet;

/// The raw shape a label cell can arrive in before parsing.
#[derive(Debug, Clone)]
pub enum LabelValue {
    Null,
    Json(String),
    Map(BTreeMap<String, String>),
}

/// Parses one label cell into its canonical map. `null` -> `{}`. Already-a-map
/// cells are used as-is (no deserialization is performed), per §4.3.
pub fn parse(value: &LabelValue) -> LabelSet {
    match value {
        LabelValue::Null => LabelSet::new(),
        LabelValue::Map(m) => m.clone(),
        LabelValue::Json(s) => {
            if s.trim().is_empty() {
                LabelSet::new()
            } else {
                serde_json::from_str(s).unwrap_or_default()
            }
        }
    }
}

/// Drops any pod-label key not present in `enabled_keys` (§4.3 "Enabled-key
/// filter applies only to pod labels"). Node and namespace tiers are never
/// filtered here.
pub fn filter_enabled(pod_labels: &LabelSet, enabled_keys: &HashSet<String>) -> LabelSet {
    pod_labels
        .iter()
        .filter(|(k, _)| enabled_keys.contains(*k))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// Merges node, namespace, and (enabled-key-filtered) pod label tiers with
/// precedence pod > namespace > node (§4.5 step 4, invariant 2). Later
/// tiers overwrite earlier ones on key collision.
pub fn merge_tiers(
    node_labels: &LabelSet,
    namespace_labels: &LabelSet,
    pod_labels_filtered: &LabelSet,
) -> LabelSet {
    let mut merged = node_labels.clone();
    for (k, v) in namespace_labels {
        merged.insert(k.clone(), v.clone());
    }
    for (k, v) in pod_labels_filtered {
        merged.insert(k.clone(), v.clone());
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(pairs: &[(&str, &str)]) -> LabelSet {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn null_parses_to_empty() {
        assert_eq!(parse(&LabelValue::Null), LabelSet::new());
    }

    #[test]
    fn json_and_map_paths_agree() {
        let json = parse(&LabelValue::Json(r#"{"a":"1","b":"2"}"#.to_string()));
        let map = parse(&LabelValue::Map(set(&[("a", "1"), ("b", "2")])));
        assert_eq!(json, map);
    }

    #[test]
    fn enabled_key_filter_drops_unlisted_keys() {
        let pod = set(&[("env", "dev"), ("app", "w"), ("secret", "x")]);
        let enabled: HashSet<String> = ["env", "app"].iter().map(|s| s.to_string()).collect();
        let filtered = filter_enabled(&pod, &enabled);
        assert_eq!(filtered, set(&[("env", "dev"), ("app", "w")]));
    }

    #[test]
    fn empty_enabled_set_drops_everything() {
        let pod = set(&[("env", "dev")]);
        let filtered = filter_enabled(&pod, &HashSet::new());
        assert!(filtered.is_empty());
    }

    // Scenario C (spec §8).
    #[test]
    fn scenario_c_label_precedence() {
        let node = set(&[("env", "prod"), ("tier", "infra")]);
        let namespace = set(&[("env", "staging"), ("team", "x")]);
        let pod = set(&[("env", "dev"), ("app", "w")]);
        let enabled: HashSet<String> = ["env", "tier", "team", "app"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let pod_filtered = filter_enabled(&pod, &enabled);
        let merged = merge_tiers(&node, &namespace, &pod_filtered);
        assert_eq!(
            crate::model::canonical_label_json(&merged),
            r#"{"app":"w","env":"dev","team":"x","tier":"infra"}"#
        );
    }

    #[test]
    fn pod_key_wins_over_node_key_on_collision() {
        let node = set(&[("env", "prod")]);
        let namespace = set(&[]);
        let pod = set(&[("env", "dev")]);
        let enabled: HashSet<String> = ["env"].iter().map(|s| s.to_string()).collect();
        let pod_filtered = filter_enabled(&pod, &enabled);
        let merged = merge_tiers(&node, &namespace, &pod_filtered);
        assert_eq!(merged.get("env"), Some(&"dev".to_string()));
    }
}
