//! Loading campaigns and targeting rules from a backing store.
use std::{
    collections::HashMap,
    fs::File,
    io::BufReader,
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        PoisonError, RwLock,
    },
};

use serde::{Deserialize, Serialize};

use crate::{
    models::{Campaign, TargetingRule},
    LoaderError,
};

/// Campaigns keyed by id, paired with their targeting rules grouped by campaign id.
pub type LoadedData = (
    HashMap<String, Campaign>,
    HashMap<String, Vec<TargetingRule>>,
);

/// Source of truth for campaigns and targeting rules.
///
/// Every method must return a complete replacement set. The cache calls them only from refresh
/// paths, never while serving a request from an existing snapshot.
pub trait DataLoader: Send + Sync {
    /// Load all campaigns keyed by campaign id.
    fn load_campaigns(&self) -> Result<HashMap<String, Campaign>, LoaderError>;

    /// Load all targeting rules grouped by campaign id.
    fn load_targeting_rules(&self) -> Result<HashMap<String, Vec<TargetingRule>>, LoaderError>;

    /// Load campaigns and rules as one consistent pair. The cache builds every snapshot from this.
    ///
    /// The default calls [`DataLoader::load_campaigns`] then
    /// [`DataLoader::load_targeting_rules`]. Loaders that read both from one document should
    /// override it so the two halves cannot come from different versions of that document.
    fn load(&self) -> Result<LoadedData, LoaderError> {
        let campaigns = self.load_campaigns()?;
        let rules = self.load_targeting_rules()?;
        Ok((campaigns, rules))
    }
}

/// Full data set as it appears in a JSON document or HTTP response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TargetingData {
    /// All campaigns, in any order.
    #[serde(default)]
    pub campaigns: Vec<Campaign>,
    /// All targeting rules, in any order.
    #[serde(default)]
    pub targeting_rules: Vec<TargetingRule>,
}

/// Index campaigns by id. Duplicate ids violate the data model and fail the load.
pub(crate) fn index_campaigns(
    campaigns: Vec<Campaign>,
) -> Result<HashMap<String, Campaign>, LoaderError> {
    let mut indexed = HashMap::with_capacity(campaigns.len());
    for campaign in campaigns {
        if indexed.contains_key(&campaign.id) {
            return Err(LoaderError::Inconsistent(format!(
                "duplicate campaign id {:?}",
                campaign.id
            )));
        }
        indexed.insert(campaign.id.clone(), campaign);
    }
    Ok(indexed)
}

impl TargetingData {
    /// Index the document into the form stored in a snapshot.
    pub fn into_loaded(self) -> Result<LoadedData, LoaderError> {
        Ok((index_campaigns(self.campaigns)?, group_rules(self.targeting_rules)))
    }
}

/// Group rules by the campaign they belong to, preserving their relative order.
pub(crate) fn group_rules(rules: Vec<TargetingRule>) -> HashMap<String, Vec<TargetingRule>> {
    let mut grouped: HashMap<String, Vec<TargetingRule>> = HashMap::new();
    for rule in rules {
        grouped.entry(rule.campaign_id.clone()).or_default().push(rule);
    }
    grouped
}

/// Reads a [`TargetingData`] JSON document from disk on every load.
pub struct JsonFileLoader {
    path: PathBuf,
}

impl JsonFileLoader {
    /// Create a loader for the document at `path`. The file is not read until the first load.
    pub fn new(path: impl Into<PathBuf>) -> JsonFileLoader {
        JsonFileLoader { path: path.into() }
    }

    fn read(&self) -> Result<TargetingData, LoaderError> {
        log::debug!(target: "targeting", path:display = self.path.display(); "reading targeting data file");
        let file = File::open(&self.path)?;
        Ok(serde_json::from_reader(BufReader::new(file))?)
    }
}

impl DataLoader for JsonFileLoader {
    fn load_campaigns(&self) -> Result<HashMap<String, Campaign>, LoaderError> {
        index_campaigns(self.read()?.campaigns)
    }

    fn load_targeting_rules(&self) -> Result<HashMap<String, Vec<TargetingRule>>, LoaderError> {
        Ok(group_rules(self.read()?.targeting_rules))
    }

    fn load(&self) -> Result<LoadedData, LoaderError> {
        self.read()?.into_loaded()
    }
}

/// In-memory data that can be replaced at runtime.
///
/// Useful for embedding the engine with data from another source and for tests. Setting the loader
/// unavailable makes every load fail with [`LoaderError::Unavailable`].
#[derive(Default)]
pub struct StaticLoader {
    data: RwLock<TargetingData>,
    unavailable: AtomicBool,
    loads: AtomicUsize,
}

impl StaticLoader {
    /// Create a loader serving `data`.
    pub fn new(data: TargetingData) -> StaticLoader {
        StaticLoader {
            data: RwLock::new(data),
            ..StaticLoader::default()
        }
    }

    /// Replace the whole data set.
    pub fn set_data(&self, data: TargetingData) {
        *self.data.write().unwrap_or_else(PoisonError::into_inner) = data;
    }

    /// Apply `update` to the campaign with `id`. Returns `false` if there is no such campaign.
    pub fn update_campaign(&self, id: &str, update: impl FnOnce(&mut Campaign)) -> bool {
        let mut data = self.data.write().unwrap_or_else(PoisonError::into_inner);
        match data.campaigns.iter_mut().find(|campaign| campaign.id == id) {
            Some(campaign) => {
                update(campaign);
                true
            }
            None => false,
        }
    }

    /// Make loads fail with [`LoaderError::Unavailable`] until set back to `true`.
    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    /// Number of campaign loads served so far, failed ones included.
    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    fn data(&self) -> Result<TargetingData, LoaderError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(LoaderError::Unavailable);
        }
        Ok(self
            .data
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }
}

impl DataLoader for StaticLoader {
    fn load_campaigns(&self) -> Result<HashMap<String, Campaign>, LoaderError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        index_campaigns(self.data()?.campaigns)
    }

    fn load_targeting_rules(&self) -> Result<HashMap<String, Vec<TargetingRule>>, LoaderError> {
        Ok(group_rules(self.data()?.targeting_rules))
    }

    fn load(&self) -> Result<LoadedData, LoaderError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        self.data()?.into_loaded()
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;
    use crate::models::{CampaignStatus, Dimension, RuleType};

    fn campaign(id: &str) -> Campaign {
        Campaign {
            id: id.into(),
            name: id.into(),
            image_url: format!("https://img/{id}"),
            cta: "Install".into(),
            status: CampaignStatus::Active,
            created_at: None,
            updated_at: None,
        }
    }

    #[test]
    fn duplicate_campaign_ids_are_rejected() {
        let result = index_campaigns(vec![campaign("spotify"), campaign("spotify")]);
        assert!(matches!(result, Err(LoaderError::Inconsistent(_))));
    }

    #[test]
    fn rules_are_grouped_in_order() {
        let grouped = group_rules(vec![
            TargetingRule::new("duolingo", Dimension::Os, RuleType::Include, ["Android", "iOS"]),
            TargetingRule::new("spotify", Dimension::Country, RuleType::Include, ["US"]),
            TargetingRule::new("duolingo", Dimension::Country, RuleType::Exclude, ["US"]),
        ]);

        let duolingo = &grouped["duolingo"];
        assert_eq!(duolingo.len(), 2);
        assert_eq!(duolingo[0].dimension, Dimension::Os);
        assert_eq!(duolingo[1].dimension, Dimension::Country);
        assert_eq!(grouped["spotify"].len(), 1);
    }

    #[test]
    fn json_file_loader_reads_document() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "campaigns": [
                    {{"id": "spotify", "name": "Spotify", "image_url": "https://somelink",
                      "cta": "Download", "status": "ACTIVE"}}
                ],
                "targeting_rules": [
                    {{"campaign_id": "spotify", "dimension": "country", "rule_type": "include",
                      "values": ["US", "Canada"]}}
                ]
            }}"#
        )
        .unwrap();

        let loader = JsonFileLoader::new(file.path());

        let campaigns = loader.load_campaigns().unwrap();
        let rules = loader.load_targeting_rules().unwrap();

        assert_eq!(campaigns["spotify"].cta, "Download");
        assert_eq!(rules["spotify"][0].values, vec!["US", "Canada"]);
    }

    #[test]
    fn json_file_loader_loads_campaigns_and_rules_from_one_read() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let data = TargetingData {
            campaigns: vec![campaign("spotify"), campaign("duolingo")],
            targeting_rules: vec![TargetingRule::new(
                "duolingo",
                Dimension::Os,
                RuleType::Include,
                ["Android"],
            )],
        };
        serde_json::to_writer(&mut file, &data).unwrap();

        let (campaigns, rules) = JsonFileLoader::new(file.path()).load().unwrap();

        assert_eq!(campaigns.len(), 2);
        assert_eq!(rules.len(), 1);
        assert_eq!(rules["duolingo"][0].values, vec!["Android"]);
    }

    #[test]
    fn json_file_loader_reports_missing_file() {
        let loader = JsonFileLoader::new("does/not/exist.json");
        assert!(matches!(loader.load_campaigns(), Err(LoaderError::Io(_))));
    }

    #[test]
    fn json_file_loader_reports_malformed_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{ not json").unwrap();

        let loader = JsonFileLoader::new(file.path());
        assert!(matches!(loader.load_campaigns(), Err(LoaderError::Parse(_))));
    }

    #[test]
    fn static_loader_can_be_made_unavailable() {
        let loader = StaticLoader::new(TargetingData {
            campaigns: vec![campaign("spotify")],
            targeting_rules: vec![],
        });

        assert_eq!(loader.load_campaigns().unwrap().len(), 1);

        loader.set_available(false);
        assert!(matches!(
            loader.load_campaigns(),
            Err(LoaderError::Unavailable)
        ));
        assert_eq!(loader.load_count(), 2);
    }

    #[test]
    fn static_loader_load_counts_once() {
        let loader = StaticLoader::new(TargetingData {
            campaigns: vec![campaign("spotify")],
            targeting_rules: vec![TargetingRule::new(
                "spotify",
                Dimension::Country,
                RuleType::Include,
                ["US"],
            )],
        });

        let (campaigns, rules) = loader.load().unwrap();
        assert_eq!(campaigns.len(), 1);
        assert_eq!(rules["spotify"].len(), 1);
        assert_eq!(loader.load_count(), 1);

        loader.set_available(false);
        assert!(matches!(loader.load(), Err(LoaderError::Unavailable)));
        assert_eq!(loader.load_count(), 2);
    }

    #[test]
    fn static_loader_updates_campaign() {
        let loader = StaticLoader::new(TargetingData {
            campaigns: vec![campaign("spotify")],
            targeting_rules: vec![],
        });

        assert!(loader.update_campaign("spotify", |c| c.status = CampaignStatus::Inactive));
        assert!(!loader.update_campaign("missing", |_| {}));
        assert_eq!(
            loader.load_campaigns().unwrap()["spotify"].status,
            CampaignStatus::Inactive
        );
    }
}
