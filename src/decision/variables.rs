use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::datafile::{FeatureFlag, FeatureVariable, VariableType, Variation};

use super::DecisionReasons;

/// Typed value of a flag variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum VariableValue {
    String(String),
    Integer(i64),
    Double(f64),
    Boolean(bool),
    Json(serde_json::Value),
}

impl VariableValue {
    /// Parse a raw datafile value according to the variable type.
    pub fn parse(variable_type: VariableType, raw: &str) -> Option<VariableValue> {
        match variable_type {
            VariableType::String => Some(Self::String(raw.to_owned())),
            VariableType::Integer => raw.parse().ok().map(Self::Integer),
            VariableType::Double => raw
                .parse::<f64>()
                .ok()
                .filter(|d| d.is_finite())
                .map(Self::Double),
            VariableType::Boolean => raw.parse().ok().map(Self::Boolean),
            VariableType::Json => serde_json::from_str::<serde_json::Value>(raw)
                .ok()
                .filter(|v| v.is_object())
                .map(Self::Json),
            VariableType::Unknown => None,
        }
    }

    pub fn is_string(&self) -> bool {
        self.as_str().is_some()
    }
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_integer(&self) -> bool {
        self.as_integer().is_some()
    }
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Self::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn is_double(&self) -> bool {
        self.as_double().is_some()
    }
    pub fn as_double(&self) -> Option<f64> {
        match self {
            Self::Double(d) => Some(*d),
            _ => None,
        }
    }

    pub fn is_boolean(&self) -> bool {
        self.as_boolean().is_some()
    }
    pub fn as_boolean(&self) -> Option<bool> {
        match self {
            Self::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn is_json(&self) -> bool {
        self.as_json().is_some()
    }
    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Json(v) => Some(v),
            _ => None,
        }
    }
}

/// Variable values for a decision: variation overrides if the feature is enabled, flag
/// defaults otherwise.
pub(crate) fn variable_map(
    flag: &FeatureFlag,
    variation: Option<&Variation>,
    enabled: bool,
    reasons: &mut DecisionReasons,
) -> HashMap<String, VariableValue> {
    let overrides = variation
        .filter(|_| enabled)
        .map(|v| v.variables.as_slice())
        .unwrap_or_default();

    flag.variables
        .iter()
        .filter_map(|variable| {
            let raw = overrides
                .iter()
                .find(|o| o.id == variable.id)
                .map_or(variable.default_value.as_str(), |o| o.value.as_str());
            parse_variable(variable, raw, reasons).map(|value| (variable.key.clone(), value))
        })
        .collect()
}

fn parse_variable(
    variable: &FeatureVariable,
    raw: &str,
    reasons: &mut DecisionReasons,
) -> Option<VariableValue> {
    let value = VariableValue::parse(variable.effective_type(), raw);
    if value.is_none() {
        reasons.add_error(format!(
            "Variable value for key \"{}\" is invalid or wrong type.",
            variable.key
        ));
    }
    value
}
