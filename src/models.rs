//! Campaigns, targeting rules and delivery requests as stored and served by the engine.
use derive_more::Display;
use serde::{Deserialize, Serialize};

use crate::ValidationError;

/// Point in time as stored alongside campaigns and rules.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// An advertising campaign.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Campaign {
    /// Globally unique, immutable identifier.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Image reference served to clients as `img`.
    pub image_url: String,
    /// Call-to-action text.
    pub cta: String,
    /// Delivery status. Only [`CampaignStatus::Active`] campaigns are delivered.
    pub status: CampaignStatus,
    /// Creation time, if the store records it.
    #[serde(default)]
    pub created_at: Option<Timestamp>,
    /// Last modification time, if the store records it.
    #[serde(default)]
    pub updated_at: Option<Timestamp>,
}

impl Campaign {
    /// Only active campaigns are eligible for delivery.
    pub fn is_active(&self) -> bool {
        self.status == CampaignStatus::Active
    }
}

/// Delivery status of a campaign.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CampaignStatus {
    /// Eligible for delivery.
    #[display("ACTIVE")]
    Active,
    /// Paused or ended.
    #[display("INACTIVE")]
    Inactive,
    /// Any status this version does not know about. Never eligible for delivery.
    #[serde(other)]
    #[display("UNKNOWN")]
    Unknown,
}

/// A single targeting criterion attached to a campaign.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetingRule {
    /// Store-assigned identifier, if any.
    #[serde(default)]
    pub id: Option<i64>,
    /// Campaign the rule belongs to.
    pub campaign_id: String,
    /// Request attribute the rule tests.
    pub dimension: Dimension,
    /// Whether listed values are allowed or denied.
    pub rule_type: RuleType,
    /// Ordered values the request value is compared against.
    #[serde(default)]
    pub values: Vec<String>,
    /// Creation time, if the store records it.
    #[serde(default)]
    pub created_at: Option<Timestamp>,
    /// Last modification time, if the store records it.
    #[serde(default)]
    pub updated_at: Option<Timestamp>,
}

impl TargetingRule {
    /// Create a rule without an id or timestamps.
    pub fn new(
        campaign_id: impl Into<String>,
        dimension: Dimension,
        rule_type: RuleType,
        values: impl IntoIterator<Item = impl Into<String>>,
    ) -> TargetingRule {
        TargetingRule {
            id: None,
            campaign_id: campaign_id.into(),
            dimension,
            rule_type,
            values: values.into_iter().map(Into::into).collect(),
            created_at: None,
            updated_at: None,
        }
    }
}

/// Request attribute a rule applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    /// Request country, compared ignoring case.
    #[display("country")]
    Country,
    /// Request operating system, compared ignoring case.
    #[display("os")]
    Os,
    /// Requesting app identifier, compared exactly.
    #[display("app")]
    App,
    /// A dimension this version does not recognize. Rules on it never match.
    #[serde(other)]
    #[display("unknown")]
    Unknown,
}

/// Effect of a rule on matching values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
pub enum RuleType {
    /// Values form an allow-list.
    #[display("include")]
    Include,
    /// Values form a deny-list. Exclusion wins over inclusion.
    #[display("exclude")]
    Exclude,
    /// Ignored by the matcher.
    #[serde(other)]
    #[display("unknown")]
    Unknown,
}

/// A validated delivery request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryRequest {
    /// Requesting app identifier.
    pub app: String,
    /// Country of the user.
    pub country: String,
    /// Operating system of the device.
    pub os: String,
}

impl DeliveryRequest {
    /// Build a request from raw parameters, failing on the first missing or empty one in the order
    /// `app`, `country`, `os`.
    pub fn from_params(
        app: Option<String>,
        country: Option<String>,
        os: Option<String>,
    ) -> std::result::Result<DeliveryRequest, ValidationError> {
        fn required(
            value: Option<String>,
            name: &'static str,
        ) -> std::result::Result<String, ValidationError> {
            value
                .filter(|v| !v.is_empty())
                .ok_or(ValidationError::MissingParam(name))
        }

        Ok(DeliveryRequest {
            app: required(app, "app")?,
            country: required(country, "country")?,
            os: required(os, "os")?,
        })
    }

    /// Value of the request for `dimension`, or `None` for dimensions the engine does not know.
    pub fn value_of(&self, dimension: Dimension) -> Option<&str> {
        match dimension {
            Dimension::Country => Some(&self.country),
            Dimension::Os => Some(&self.os),
            Dimension::App => Some(&self.app),
            Dimension::Unknown => None,
        }
    }
}

/// Wire format of a delivered campaign.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignResponse {
    /// Campaign id.
    pub cid: String,
    /// Image URL.
    pub img: String,
    /// Call-to-action text.
    pub cta: String,
}

impl From<&Campaign> for CampaignResponse {
    fn from(campaign: &Campaign) -> Self {
        CampaignResponse {
            cid: campaign.id.clone(),
            img: campaign.image_url.clone(),
            cta: campaign.cta.clone(),
        }
    }
}

/// Wire format of an error response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Human-readable error message.
    pub error: String,
}

impl ErrorResponse {
    /// Create a response carrying `error`.
    pub fn new(error: impl Into<String>) -> Self {
        ErrorResponse {
            error: error.into(),
        }
    }
}
