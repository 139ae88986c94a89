//! Decision pipeline and its outputs.
use std::{collections::HashMap, collections::HashSet, fmt};

use serde::{Deserialize, Serialize};

use crate::datafile::Variation;

mod reasons;
mod service;
mod variables;

pub use reasons::DecisionReasons;
pub use service::DecisionService;
pub(crate) use variables::variable_map;
pub use variables::VariableValue;

/// Options altering how a decision is made and reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DecideOption {
    /// Do not pass the decision to the [`DecisionLogger`](crate::DecisionLogger).
    DisableDecisionEvent,
    /// Leave disabled flags out of multi-flag decisions.
    EnabledFlagsOnly,
    /// Neither read nor write user profiles.
    IgnoreUserProfileService,
    /// Report informational reasons in addition to errors.
    IncludeReasons,
    /// Do not compute variable values.
    ExcludeVariables,
}

pub type DecideOptions = HashSet<DecideOption>;

/// Which stage of the pipeline produced a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DecisionSource {
    /// Regular bucketing into an experiment rule.
    Experiment,
    /// A forced decision or whitelisted variation.
    FeatureTest,
    Rollout,
    Holdout,
}

impl DecisionSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionSource::Experiment => "experiment",
            DecisionSource::FeatureTest => "feature-test",
            DecisionSource::Rollout => "rollout",
            DecisionSource::Holdout => "holdout",
        }
    }
}

impl fmt::Display for DecisionSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a pipeline stage bundled with the reasons collected along the way.
#[derive(Debug, Clone, PartialEq)]
pub struct DecisionResponse<T> {
    pub result: Option<T>,
    pub reasons: Vec<String>,
}

/// Rule and variation a flag decision resolved to.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeatureDecision<'c> {
    /// Key of the experiment, delivery rule, or holdout. `None` for flag-level forced decisions.
    pub rule_key: Option<&'c str>,
    pub variation: &'c Variation,
    pub source: DecisionSource,
}

/// Decision for a single flag and user.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Decision {
    /// `None` if the user was not bucketed into any rule.
    pub variation_key: Option<String>,
    pub enabled: bool,
    pub variables: HashMap<String, VariableValue>,
    pub rule_key: Option<String>,
    pub flag_key: String,
    pub user_id: String,
    pub source: Option<DecisionSource>,
    pub reasons: Vec<String>,
}

impl Decision {
    /// Decision for a flag that could not be evaluated at all.
    pub(crate) fn error(flag_key: &str, user_id: &str, reasons: Vec<String>) -> Decision {
        Decision {
            variation_key: None,
            enabled: false,
            variables: HashMap::new(),
            rule_key: None,
            flag_key: flag_key.to_owned(),
            user_id: user_id.to_owned(),
            source: None,
            reasons,
        }
    }
}
