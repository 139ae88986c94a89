//! Wire model of the datafile (schema version 4).
//!
//! These structs are a faithful mirror of the JSON document shared by all SDKs. Derived lookup
//! structures live in [`ProjectConfig`](crate::ProjectConfig).
use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::audience::ConditionHolder;

/// Only datafiles of this schema version can be loaded.
pub const SUPPORTED_VERSION: &str = "4";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Datafile {
    pub version: String,
    #[serde(default)]
    pub project_id: String,
    #[serde(default)]
    pub account_id: String,
    #[serde(default)]
    pub revision: String,
    #[serde(default)]
    pub sdk_key: Option<String>,
    #[serde(default)]
    pub environment_key: Option<String>,
    #[serde(default)]
    pub experiments: Vec<Experiment>,
    #[serde(default)]
    pub groups: Vec<Group>,
    #[serde(default)]
    pub feature_flags: Vec<FeatureFlag>,
    #[serde(default)]
    pub rollouts: Vec<Rollout>,
    #[serde(default)]
    pub audiences: Vec<Audience>,
    #[serde(default)]
    pub typed_audiences: Vec<Audience>,
    #[serde(default)]
    pub attributes: Vec<Attribute>,
    #[serde(default)]
    pub events: Vec<Event>,
    #[serde(default)]
    pub holdouts: Vec<Holdout>,
}

/// Just enough of a datafile to check its schema version before parsing the rest.
#[derive(Debug, Deserialize)]
pub(crate) struct DatafileVersion {
    pub version: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExperimentStatus {
    #[serde(rename = "Running", alias = "running")]
    Running,
    #[serde(rename = "Launched", alias = "launched")]
    Launched,
    #[serde(rename = "Paused", alias = "paused")]
    Paused,
    #[serde(rename = "Not started", alias = "not_started")]
    NotStarted,
    #[serde(rename = "Archived", alias = "archived")]
    Archived,
    /// Status added by a newer datafile. Never eligible for bucketing.
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HoldoutStatus {
    #[serde(rename = "Draft", alias = "draft")]
    Draft,
    #[serde(rename = "Running", alias = "running")]
    Running,
    #[serde(rename = "Concluded", alias = "concluded")]
    Concluded,
    #[serde(rename = "Archived", alias = "archived")]
    Archived,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Experiment {
    pub id: String,
    pub key: String,
    pub status: ExperimentStatus,
    #[serde(default)]
    pub layer_id: String,
    #[serde(default)]
    pub variations: Vec<Variation>,
    #[serde(default)]
    pub traffic_allocation: Vec<TrafficAllocation>,
    #[serde(default)]
    pub audience_ids: Vec<String>,
    #[serde(default)]
    pub audience_conditions: Option<ConditionHolder>,
    /// User id to variation key.
    #[serde(default)]
    pub forced_variations: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Holdout {
    pub id: String,
    pub key: String,
    pub status: HoldoutStatus,
    #[serde(default)]
    pub variations: Vec<Variation>,
    #[serde(default)]
    pub traffic_allocation: Vec<TrafficAllocation>,
    #[serde(default)]
    pub audience_ids: Vec<String>,
    #[serde(default)]
    pub audience_conditions: Option<ConditionHolder>,
    /// Flag ids this holdout is limited to. Empty means "all flags".
    #[serde(default)]
    pub included_flags: Vec<String>,
    /// Flag ids this holdout never applies to.
    #[serde(default)]
    pub excluded_flags: Vec<String>,
}

impl Holdout {
    /// A holdout with neither include nor exclude lists applies to every flag.
    pub fn is_global(&self) -> bool {
        self.included_flags.is_empty() && self.excluded_flags.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Variation {
    pub id: String,
    pub key: String,
    #[serde(default)]
    pub feature_enabled: Option<bool>,
    #[serde(default)]
    pub variables: Vec<VariableOverride>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableOverride {
    pub id: String,
    pub value: String,
}

/// Cumulative range boundary: `entity_id` owns bucket values up to and including `end_of_range`
/// that were not claimed by a previous entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrafficAllocation {
    pub entity_id: String,
    pub end_of_range: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupPolicy {
    Random,
    Overlapping,
}

/// Mutual exclusion group.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Group {
    pub id: String,
    pub policy: GroupPolicy,
    #[serde(default)]
    pub experiments: Vec<Experiment>,
    #[serde(default)]
    pub traffic_allocation: Vec<TrafficAllocation>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureFlag {
    pub id: String,
    pub key: String,
    #[serde(default)]
    pub rollout_id: String,
    #[serde(default)]
    pub experiment_ids: Vec<String>,
    #[serde(default)]
    pub variables: Vec<FeatureVariable>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VariableType {
    String,
    Integer,
    Double,
    Boolean,
    Json,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureVariable {
    pub id: String,
    pub key: String,
    #[serde(rename = "type")]
    pub variable_type: VariableType,
    #[serde(default)]
    pub sub_type: Option<String>,
    pub default_value: String,
}

impl FeatureVariable {
    /// Type after applying the legacy `string` + `json` sub-type convention.
    pub fn effective_type(&self) -> VariableType {
        match (self.variable_type, self.sub_type.as_deref()) {
            (VariableType::String, Some("json")) => VariableType::Json,
            (t, _) => t,
        }
    }
}

/// Ordered delivery rules of a flag. The last rule is "Everyone Else".
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rollout {
    pub id: String,
    #[serde(default)]
    pub experiments: Vec<Experiment>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Audience {
    pub id: String,
    #[serde(default)]
    pub name: String,
    /// Legacy datafiles carry the condition tree as a JSON-encoded string.
    #[serde(deserialize_with = "crate::audience::deserialize_conditions")]
    pub conditions: ConditionHolder,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attribute {
    pub id: String,
    pub key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub id: String,
    pub key: String,
    #[serde(default)]
    pub experiment_ids: Vec<String>,
}

/// Common shape of experiments, rollout rules, and holdouts: anything that can be targeted and
/// bucketed into.
pub trait BucketingEntity {
    fn id(&self) -> &str;
    fn key(&self) -> &str;
    fn variations(&self) -> &[Variation];
    fn traffic_allocation(&self) -> &[TrafficAllocation];
    fn audience_ids(&self) -> &[String];
    fn audience_conditions(&self) -> Option<&ConditionHolder>;
    fn is_running(&self) -> bool;

    fn variation_by_id(&self, id: &str) -> Option<&Variation> {
        self.variations().iter().find(|v| v.id == id)
    }

    fn variation_by_key(&self, key: &str) -> Option<&Variation> {
        self.variations().iter().find(|v| v.key == key)
    }
}

impl BucketingEntity for Experiment {
    fn id(&self) -> &str {
        &self.id
    }
    fn key(&self) -> &str {
        &self.key
    }
    fn variations(&self) -> &[Variation] {
        &self.variations
    }
    fn traffic_allocation(&self) -> &[TrafficAllocation] {
        &self.traffic_allocation
    }
    fn audience_ids(&self) -> &[String] {
        &self.audience_ids
    }
    fn audience_conditions(&self) -> Option<&ConditionHolder> {
        self.audience_conditions.as_ref()
    }
    fn is_running(&self) -> bool {
        self.status == ExperimentStatus::Running
    }
}

impl BucketingEntity for Holdout {
    fn id(&self) -> &str {
        &self.id
    }
    fn key(&self) -> &str {
        &self.key
    }
    fn variations(&self) -> &[Variation] {
        &self.variations
    }
    fn traffic_allocation(&self) -> &[TrafficAllocation] {
        &self.traffic_allocation
    }
    fn audience_ids(&self) -> &[String] {
        &self.audience_ids
    }
    fn audience_conditions(&self) -> Option<&ConditionHolder> {
        self.audience_conditions.as_ref()
    }
    fn is_running(&self) -> bool {
        self.status == HoldoutStatus::Running
    }
}
