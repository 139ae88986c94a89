use std::{cmp::Ordering, collections::HashSet, fmt};

use serde::{Deserialize, Serialize};

use crate::{
    attributes::{is_valid_number, AttributeValue},
    Attributes,
};

use super::semver::compare_versions;

const CUSTOM_ATTRIBUTE: &str = "custom_attribute";
const THIRD_PARTY_DIMENSION: &str = "third_party_dimension";

/// A single attribute match, e.g. `{"name": "age", "type": "custom_attribute", "match": "gt",
/// "value": 18}`.
///
/// All fields are optional so that conditions written for newer SDKs still parse. Unsupported
/// types and match types evaluate to "unknown".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserAttribute {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub condition_type: Option<String>,
    #[serde(rename = "match", default, skip_serializing_if = "Option::is_none")]
    pub match_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MatchType {
    Exact,
    Exists,
    Substring,
    Lt,
    Le,
    Gt,
    Ge,
    SemverEq,
    SemverLt,
    SemverLe,
    SemverGt,
    SemverGe,
    Qualified,
}

impl MatchType {
    fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "exact" => Self::Exact,
            "exists" => Self::Exists,
            "substring" => Self::Substring,
            "lt" => Self::Lt,
            "le" => Self::Le,
            "gt" => Self::Gt,
            "ge" => Self::Ge,
            "semver_eq" => Self::SemverEq,
            "semver_lt" => Self::SemverLt,
            "semver_le" => Self::SemverLe,
            "semver_gt" => Self::SemverGt,
            "semver_ge" => Self::SemverGe,
            "qualified" => Self::Qualified,
            _ => return None,
        })
    }
}

/// Reasons an attribute condition evaluates to "unknown".
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ConditionError {
    #[error("condition has an unsupported type")]
    UnsupportedType,
    #[error("condition has an unsupported match type")]
    UnsupportedMatch,
    #[error("condition has no attribute name")]
    MissingName,
    #[error("condition has a null or missing value")]
    MissingConditionValue,
    #[error("condition value is not valid for its match type")]
    InvalidConditionValue,
    #[error("no attribute \"{0}\" was passed")]
    MissingAttribute(String),
    #[error("attribute \"{0}\" is null")]
    NullAttribute(String),
    #[error("attribute \"{0}\" has a type incompatible with the condition")]
    MismatchedType(String),
    #[error("attribute \"{0}\" is outside of the range of valid numbers")]
    OutOfRange(String),
    #[error("attribute \"{0}\" or condition value is not a valid version")]
    InvalidVersion(String),
}

impl ConditionError {
    /// Return `true` if the error is caused by the user's attributes rather than by the datafile.
    pub(super) fn is_normal(&self) -> bool {
        matches!(
            self,
            ConditionError::MissingAttribute(_) | ConditionError::NullAttribute(_)
        )
    }
}

impl UserAttribute {
    pub fn evaluate(
        &self,
        attributes: &Attributes,
        qualified_segments: &HashSet<String>,
    ) -> Result<bool, ConditionError> {
        let match_type = match self.match_type.as_deref() {
            // Legacy audiences have no match type.
            None => MatchType::Exact,
            Some(s) => MatchType::parse(s).ok_or(ConditionError::UnsupportedMatch)?,
        };

        match (self.condition_type.as_deref(), match_type) {
            (Some(THIRD_PARTY_DIMENSION), MatchType::Qualified) => {
                let segment = self
                    .value
                    .as_ref()
                    .and_then(|v| v.as_str())
                    .ok_or(ConditionError::InvalidConditionValue)?;
                Ok(qualified_segments.contains(segment))
            }
            (Some(CUSTOM_ATTRIBUTE), match_type) if match_type != MatchType::Qualified => {
                self.evaluate_custom_attribute(match_type, attributes)
            }
            _ => Err(ConditionError::UnsupportedType),
        }
    }

    fn evaluate_custom_attribute(
        &self,
        match_type: MatchType,
        attributes: &Attributes,
    ) -> Result<bool, ConditionError> {
        let name = self.name.as_deref().ok_or(ConditionError::MissingName)?;
        let attribute = attributes.get(name);

        if match_type == MatchType::Exists {
            return Ok(attribute.is_some_and(|value| !value.is_null()));
        }

        let attribute = attribute.ok_or_else(|| ConditionError::MissingAttribute(name.to_owned()))?;
        let condition_value = match &self.value {
            None | Some(serde_json::Value::Null) => {
                return Err(ConditionError::MissingConditionValue)
            }
            Some(value) => value,
        };
        if attribute.is_null() {
            return Err(ConditionError::NullAttribute(name.to_owned()));
        }

        match match_type {
            MatchType::Exact => exact_match(name, condition_value, attribute),
            MatchType::Substring => {
                let needle = condition_value
                    .as_str()
                    .ok_or(ConditionError::InvalidConditionValue)?;
                let haystack = attribute
                    .as_str()
                    .ok_or_else(|| ConditionError::MismatchedType(name.to_owned()))?;
                Ok(haystack.contains(needle))
            }
            MatchType::Lt | MatchType::Le | MatchType::Gt | MatchType::Ge => {
                let ordering = compare_numbers(name, condition_value, attribute)?;
                Ok(match match_type {
                    MatchType::Lt => ordering == Ordering::Less,
                    MatchType::Le => ordering != Ordering::Greater,
                    MatchType::Gt => ordering == Ordering::Greater,
                    _ => ordering != Ordering::Less,
                })
            }
            MatchType::SemverEq
            | MatchType::SemverLt
            | MatchType::SemverLe
            | MatchType::SemverGt
            | MatchType::SemverGe => {
                let target = condition_value
                    .as_str()
                    .ok_or(ConditionError::InvalidConditionValue)?;
                let version = attribute
                    .as_str()
                    .ok_or_else(|| ConditionError::MismatchedType(name.to_owned()))?;
                let ordering = compare_versions(version, target)
                    .ok_or_else(|| ConditionError::InvalidVersion(name.to_owned()))?;
                Ok(match match_type {
                    MatchType::SemverEq => ordering == Ordering::Equal,
                    MatchType::SemverLt => ordering == Ordering::Less,
                    MatchType::SemverLe => ordering != Ordering::Greater,
                    MatchType::SemverGt => ordering == Ordering::Greater,
                    _ => ordering != Ordering::Less,
                })
            }
            MatchType::Exists | MatchType::Qualified => Err(ConditionError::UnsupportedMatch),
        }
    }
}

fn exact_match(
    name: &str,
    condition_value: &serde_json::Value,
    attribute: &AttributeValue,
) -> Result<bool, ConditionError> {
    match condition_value {
        serde_json::Value::String(expected) => attribute
            .as_str()
            .map(|actual| actual == expected)
            .ok_or_else(|| ConditionError::MismatchedType(name.to_owned())),
        serde_json::Value::Bool(expected) => attribute
            .as_boolean()
            .map(|actual| actual == *expected)
            .ok_or_else(|| ConditionError::MismatchedType(name.to_owned())),
        serde_json::Value::Number(_) => {
            compare_numbers(name, condition_value, attribute).map(|o| o == Ordering::Equal)
        }
        _ => Err(ConditionError::InvalidConditionValue),
    }
}

/// Compare user attribute against condition value, both of which must be valid numbers.
fn compare_numbers(
    name: &str,
    condition_value: &serde_json::Value,
    attribute: &AttributeValue,
) -> Result<Ordering, ConditionError> {
    let expected = condition_value
        .as_f64()
        .filter(|n| is_valid_number(*n))
        .ok_or(ConditionError::InvalidConditionValue)?;
    let actual = attribute
        .as_number()
        .ok_or_else(|| ConditionError::MismatchedType(name.to_owned()))?;
    if !is_valid_number(actual) {
        return Err(ConditionError::OutOfRange(name.to_owned()));
    }
    actual
        .partial_cmp(&expected)
        .ok_or_else(|| ConditionError::OutOfRange(name.to_owned()))
}

impl fmt::Display for UserAttribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = serde_json::to_string(self).map_err(|_| fmt::Error)?;
        f.write_str(&s)
    }
}
