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

//! Cost-category matcher (§4.7): SQL-LIKE pattern match against a
//! namespace, disambiguated by `MAX(id)` when more than one pattern
//! matches. The open question in §9 ("is multi-match-then-max intentional")
//! is resolved as intentional, per the spec's own instruction.

use regex::Regex;

/// One `(pattern, category_id)` row, in the shape the matcher consumes
/// (loaded from `reporting_ocp_cost_category_namespace`, §6).
pub struct CategoryPattern {
    pub pattern: String,
    pub category_id: i64,
    regex: Regex,
}

impl CategoryPattern {
    pub fn new(pattern: impl Into<String>, category_id: i64) -> Self {
        let pattern = pattern.into();
        let regex = like_to_regex(&pattern);
        Self {
            pattern,
            category_id,
            regex,
        }
    }
}

/// Translates a SQL-LIKE pattern (`_` = one char, `%` = any run of chars)
/// into an anchored regex, escaping every other character so literal regex
/// metacharacters in the pattern (e.g. `.`) match themselves.
fn like_to_regex(pattern: &str) -> Regex {
    let mut out = String::with_capacity(pattern.len() * 2 + 2);
    out.push('^');
    for c in pattern.chars() {
        match c {
            '%' => out.push_str(".*"),
            '_' => out.push('.'),
            other => out.push_str(&regex::escape(&other.to_string())),
        }
    }
    out.push('$');
    Regex::new(&out).expect("translated LIKE pattern is always a valid regex")
}

/// Assigns `namespace` the maximum `category_id` among all patterns that
/// match it, or `None` if no pattern matches (§4.7, invariant 6).
pub fn assign(namespace: &str, patterns: &[CategoryPattern]) -> Option<i64> {
    patterns
        .iter()
        .filter(|p| p.regex.is_match(namespace))
        .map(|p| p.category_id)
        .max()
}

#[cfg(test)]
mod tests {
    use super::*;

    // Scenario E (spec §8).
    #[test]
    fn scenario_e_cost_category_max_of_matches() {
        let patterns = vec![
            CategoryPattern::new("kube-%", 1),
            CategoryPattern::new("kube-system", 5),
        ];
        assert_eq!(assign("kube-system", &patterns), Some(5));
    }

    #[test]
    fn no_match_returns_none() {
        let patterns = vec![CategoryPattern::new("kube-%", 1)];
        assert_eq!(assign("openshift-monitoring", &patterns), None);
    }

    #[test]
    fn underscore_matches_exactly_one_char() {
        let patterns = vec![CategoryPattern::new("ns_1", 2)];
        assert_eq!(assign("nsA1", &patterns), Some(2));
        assert_eq!(assign("nsAB1", &patterns), None);
    }

    #[test]
    fn literal_regex_metacharacters_are_escaped() {
        let patterns = vec![CategoryPattern::new("a.b", 3)];
        assert_eq!(assign("a.b", &patterns), Some(3));
        assert_eq!(assign("aXb", &patterns), None);
    }
}
