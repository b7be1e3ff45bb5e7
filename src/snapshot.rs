use std::{
    collections::{BTreeMap, HashMap},
    time::Instant,
};

use chrono::Utc;

use crate::models::{Campaign, TargetingRule, Timestamp};

/// Campaigns and their targeting rules loaded together at one point in time.
///
/// A `Snapshot` is immutable. The cache replaces it completely on every successful refresh, so a
/// reader holding one sees a consistent pair of campaigns and rules for the whole request.
///
/// Campaigns iterate in id order so that delivery results are stable between requests.
#[derive(Debug)]
pub struct Snapshot {
    /// Monotonically increasing number of the refresh that produced this snapshot.
    pub generation: u64,
    /// Wall-clock time the snapshot was loaded.
    pub loaded_at: Timestamp,
    pub(crate) refreshed_at: Instant,
    campaigns: BTreeMap<String, Campaign>,
    rules: HashMap<String, Vec<TargetingRule>>,
}

impl Snapshot {
    pub(crate) fn new(
        generation: u64,
        campaigns: HashMap<String, Campaign>,
        rules: HashMap<String, Vec<TargetingRule>>,
    ) -> Snapshot {
        Snapshot {
            generation,
            loaded_at: Utc::now(),
            refreshed_at: Instant::now(),
            campaigns: campaigns.into_iter().collect(),
            rules,
        }
    }

    /// All campaigns in id order, regardless of status.
    pub fn campaigns(&self) -> impl Iterator<Item = &Campaign> {
        self.campaigns.values()
    }

    /// Look up a campaign by id.
    pub fn campaign(&self, id: &str) -> Option<&Campaign> {
        self.campaigns.get(id)
    }

    /// Targeting rules of a campaign. Returns an empty slice if the campaign has no rules.
    pub fn rules_for(&self, campaign_id: &str) -> &[TargetingRule] {
        self.rules
            .get(campaign_id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Number of campaigns in the snapshot.
    pub fn campaign_count(&self) -> usize {
        self.campaigns.len()
    }

    /// Number of targeting rules across all campaigns.
    pub fn rule_count(&self) -> usize {
        self.rules.values().map(Vec::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use chrono::Utc;

    use super::Snapshot;
    use crate::models::{Dimension, RuleType, TargetingRule};

    #[test]
    fn missing_rules_are_empty() {
        let snapshot = Snapshot::new(
            1,
            HashMap::new(),
            HashMap::from([(
                "spotify".to_owned(),
                vec![TargetingRule::new(
                    "spotify",
                    Dimension::Country,
                    RuleType::Include,
                    ["US", "Canada"],
                )],
            )]),
        );

        assert_eq!(snapshot.rules_for("spotify").len(), 1);
        assert!(snapshot.rules_for("duolingo").is_empty());
        assert_eq!(snapshot.rule_count(), 1);
        assert_eq!(snapshot.campaign_count(), 0);
    }

    #[test]
    fn records_load_time() {
        let before = Utc::now();
        let snapshot = Snapshot::new(7, HashMap::new(), HashMap::new());
        let after = Utc::now();

        assert_eq!(snapshot.generation, 7);
        assert!(before <= snapshot.loaded_at && snapshot.loaded_at <= after);
    }
}
