//! Targeting rule matching.
use std::collections::BTreeMap;

use crate::models::{DeliveryRequest, Dimension, RuleType, TargetingRule};

/// Return `true` if a campaign with the given `rules` should be delivered for `request`.
///
/// Rules are grouped by dimension and every dimension that has at least one rule must be
/// satisfied. A campaign without rules matches every request.
pub fn matches(rules: &[TargetingRule], request: &DeliveryRequest) -> bool {
    group_by_dimension(rules)
        .into_iter()
        .all(|(dimension, rules)| dimension_matches(dimension, &rules, request))
}

fn group_by_dimension(rules: &[TargetingRule]) -> BTreeMap<Dimension, Vec<&TargetingRule>> {
    let mut grouped: BTreeMap<Dimension, Vec<&TargetingRule>> = BTreeMap::new();
    for rule in rules {
        grouped.entry(rule.dimension).or_default().push(rule);
    }
    grouped
}

/// Exclude rules are checked first and win over include rules. A dimension without include rules
/// allows every value.
fn dimension_matches(
    dimension: Dimension,
    rules: &[&TargetingRule],
    request: &DeliveryRequest,
) -> bool {
    // Unknown dimensions fail closed.
    let Some(value) = request.value_of(dimension) else {
        return false;
    };

    let (include, exclude): (Vec<&TargetingRule>, Vec<&TargetingRule>) = rules
        .iter()
        .copied()
        .filter(|rule| rule.rule_type != RuleType::Unknown)
        .partition(|rule| rule.rule_type == RuleType::Include);

    if exclude
        .iter()
        .any(|rule| contains(dimension, &rule.values, value))
    {
        return false;
    }

    include.is_empty()
        || include
            .iter()
            .any(|rule| contains(dimension, &rule.values, value))
}

fn contains(dimension: Dimension, values: &[String], value: &str) -> bool {
    values
        .iter()
        .any(|candidate| value_matches(dimension, candidate, value))
}

/// Apps are compared exactly; other dimensions ignore case.
fn value_matches(dimension: Dimension, candidate: &str, value: &str) -> bool {
    match dimension {
        Dimension::App => candidate == value,
        _ => eq_ignore_case(candidate, value),
    }
}

fn eq_ignore_case(a: &str, b: &str) -> bool {
    if a.is_ascii() && b.is_ascii() {
        a.eq_ignore_ascii_case(b)
    } else {
        a.to_lowercase() == b.to_lowercase()
    }
}
