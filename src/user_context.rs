use std::collections::{HashMap, HashSet};

use crate::{attributes::BUCKETING_ID_ATTRIBUTE, AttributeValue, Attributes, Error, Result};

/// Key of a forced decision: a whole flag, or a single rule of a flag.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ForcedDecisionKey {
    pub flag_key: String,
    pub rule_key: Option<String>,
}

impl ForcedDecisionKey {
    /// Forced decision for the whole flag.
    pub fn flag(flag_key: impl Into<String>) -> Self {
        ForcedDecisionKey {
            flag_key: flag_key.into(),
            rule_key: None,
        }
    }

    /// Forced decision for a single experiment or delivery rule of the flag.
    pub fn rule(flag_key: impl Into<String>, rule_key: impl Into<String>) -> Self {
        ForcedDecisionKey {
            flag_key: flag_key.into(),
            rule_key: Some(rule_key.into()),
        }
    }
}

/// The user decisions are made for.
///
/// Decisions take `&UserContext`, so the user is a consistent snapshot for the duration of each
/// call.
///
/// # Examples
/// ```
/// # use optimizely::{ForcedDecisionKey, UserContext};
/// let mut user = UserContext::new("user-1", [("country".to_owned(), "US".into())].into());
/// user.set_forced_decision(ForcedDecisionKey::flag("checkout"), "treatment").unwrap();
/// assert_eq!(user.forced_decision(&ForcedDecisionKey::flag("checkout")), Some("treatment"));
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UserContext {
    user_id: String,
    attributes: Attributes,
    forced_decisions: HashMap<ForcedDecisionKey, String>,
    qualified_segments: HashSet<String>,
}

impl UserContext {
    pub fn new(user_id: impl Into<String>, attributes: Attributes) -> Self {
        UserContext {
            user_id: user_id.into(),
            attributes,
            ..Default::default()
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    pub fn set_attribute(&mut self, key: impl Into<String>, value: impl Into<AttributeValue>) {
        self.attributes.insert(key.into(), value.into());
    }

    /// Id used for bucketing: the `$opt_bucketing_id` attribute if it is a string, the user id
    /// otherwise.
    pub fn bucketing_id(&self) -> &str {
        match self.attributes.get(BUCKETING_ID_ATTRIBUTE) {
            Some(AttributeValue::String(id)) => id,
            Some(_) => {
                log::warn!(target: "optimizely",
                           user_id:display = self.user_id;
                           "bucketing id attribute is not a string, using user id instead");
                &self.user_id
            }
            None => &self.user_id,
        }
    }

    pub fn qualified_segments(&self) -> &HashSet<String> {
        &self.qualified_segments
    }

    pub fn set_qualified_segments(&mut self, segments: impl IntoIterator<Item = String>) {
        self.qualified_segments = segments.into_iter().collect();
    }

    pub fn is_qualified_for(&self, segment: &str) -> bool {
        self.qualified_segments.contains(segment)
    }

    /// Force a variation for a flag or a rule.
    ///
    /// The variation key is only validated against the datafile when a decision is made. Invalid
    /// forced decisions are ignored at that point.
    pub fn set_forced_decision(
        &mut self,
        key: ForcedDecisionKey,
        variation_key: impl Into<String>,
    ) -> Result<()> {
        let variation_key = variation_key.into();
        if variation_key.is_empty() {
            return Err(Error::InvalidForcedDecision);
        }
        self.forced_decisions.insert(key, variation_key);
        Ok(())
    }

    pub fn forced_decision(&self, key: &ForcedDecisionKey) -> Option<&str> {
        self.forced_decisions.get(key).map(String::as_str)
    }

    /// Returns `true` if there was a forced decision for the key.
    pub fn remove_forced_decision(&mut self, key: &ForcedDecisionKey) -> bool {
        self.forced_decisions.remove(key).is_some()
    }

    pub fn remove_all_forced_decisions(&mut self) {
        self.forced_decisions.clear();
    }
}
