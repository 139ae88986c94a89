use std::{collections::HashSet, fmt};

use serde::{de, Deserialize, Deserializer, Serialize};

use crate::{datafile::Audience, Attributes};

use super::user_attribute::UserAttribute;

/// Boolean expression tree over attribute matches and audience references.
///
/// Mirrors the datafile encoding: an array whose first element is an operator applies that
/// operator to the remaining elements, any other array is an implicit OR.
///
/// ```json
/// ["and", "1234", ["or", {"name": "age", "type": "custom_attribute", "match": "gt", "value": 18}]]
/// ```
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ConditionHolder {
    Leaf(ConditionLeaf),
    Operator(LogicalOperator),
    Array(Vec<ConditionHolder>),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ConditionLeaf {
    /// Reference to another audience by id.
    AudienceId(String),
    Attribute(UserAttribute),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogicalOperator {
    And,
    Or,
    Not,
}

impl LogicalOperator {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "and" => Some(Self::And),
            "or" => Some(Self::Or),
            "not" => Some(Self::Not),
            _ => None,
        }
    }
}

impl TryFrom<serde_json::Value> for ConditionHolder {
    type Error = String;

    fn try_from(value: serde_json::Value) -> Result<Self, Self::Error> {
        match value {
            serde_json::Value::String(s) => Ok(match LogicalOperator::parse(&s) {
                Some(op) => ConditionHolder::Operator(op),
                None => ConditionHolder::Leaf(ConditionLeaf::AudienceId(s)),
            }),
            serde_json::Value::Array(items) => items
                .into_iter()
                .map(ConditionHolder::try_from)
                .collect::<Result<_, _>>()
                .map(ConditionHolder::Array),
            value @ serde_json::Value::Object(_) => serde_json::from_value(value)
                .map(|attribute| ConditionHolder::Leaf(ConditionLeaf::Attribute(attribute)))
                .map_err(|err| err.to_string()),
            other => Err(format!("invalid condition: {other}")),
        }
    }
}

impl<'de> Deserialize<'de> for ConditionHolder {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = serde_json::Value::deserialize(deserializer)?;
        ConditionHolder::try_from(value).map_err(de::Error::custom)
    }
}

/// Accept audience conditions either inline or as a JSON-encoded string.
pub(crate) fn deserialize_conditions<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<ConditionHolder, D::Error> {
    let value = match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => serde_json::from_str(&s).map_err(de::Error::custom)?,
        value => value,
    };
    ConditionHolder::try_from(value).map_err(de::Error::custom)
}

impl fmt::Display for ConditionHolder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = serde_json::to_string(self).map_err(|_| fmt::Error)?;
        f.write_str(&s)
    }
}

/// Lookup of audiences referenced from condition trees.
pub trait AudienceSource {
    fn audience(&self, id: &str) -> Option<&Audience>;
}

/// Evaluates condition trees for a single user with three-valued logic.
///
/// `None` stands for "unknown": the condition could not be evaluated, e.g. because the attribute
/// is missing or has an incompatible type.
pub struct ConditionEvaluator<'a> {
    audiences: &'a dyn AudienceSource,
    attributes: &'a Attributes,
    qualified_segments: &'a HashSet<String>,
    /// Audiences currently being evaluated, used to break reference cycles.
    path: Vec<&'a str>,
}

impl<'a> ConditionEvaluator<'a> {
    pub fn new(
        audiences: &'a dyn AudienceSource,
        attributes: &'a Attributes,
        qualified_segments: &'a HashSet<String>,
    ) -> Self {
        ConditionEvaluator {
            audiences,
            attributes,
            qualified_segments,
            path: Vec::new(),
        }
    }

    pub fn evaluate(&mut self, condition: &ConditionHolder) -> Option<bool> {
        match condition {
            ConditionHolder::Leaf(leaf) => self.evaluate_leaf(leaf),
            ConditionHolder::Operator(_) => None,
            ConditionHolder::Array(items) => match items.split_first() {
                Some((ConditionHolder::Operator(op), operands)) => self.apply(*op, operands),
                _ => self.apply(LogicalOperator::Or, items),
            },
        }
    }

    fn apply(&mut self, op: LogicalOperator, operands: &[ConditionHolder]) -> Option<bool> {
        match op {
            LogicalOperator::And => self.and(operands),
            LogicalOperator::Or => self.or(operands),
            LogicalOperator::Not => self.evaluate(operands.first()?).map(|b| !b),
        }
    }

    fn and(&mut self, operands: &[ConditionHolder]) -> Option<bool> {
        if operands.is_empty() {
            return None;
        }
        let mut found_unknown = false;
        for operand in operands {
            match self.evaluate(operand) {
                Some(false) => return Some(false),
                Some(true) => {}
                None => found_unknown = true,
            }
        }
        if found_unknown {
            None
        } else {
            Some(true)
        }
    }

    fn or(&mut self, operands: &[ConditionHolder]) -> Option<bool> {
        if operands.is_empty() {
            return None;
        }
        let mut found_unknown = false;
        for operand in operands {
            match self.evaluate(operand) {
                Some(true) => return Some(true),
                Some(false) => {}
                None => found_unknown = true,
            }
        }
        if found_unknown {
            None
        } else {
            Some(false)
        }
    }

    fn evaluate_leaf(&mut self, leaf: &ConditionLeaf) -> Option<bool> {
        match leaf {
            ConditionLeaf::AudienceId(id) => self.evaluate_audience(id),
            ConditionLeaf::Attribute(attribute) => {
                match attribute.evaluate(self.attributes, self.qualified_segments) {
                    Ok(result) => Some(result),
                    Err(err) if err.is_normal() => {
                        log::debug!(target: "optimizely", condition:display = attribute; "{err}");
                        None
                    }
                    Err(err) => {
                        log::warn!(target: "optimizely", condition:display = attribute; "{err}");
                        None
                    }
                }
            }
        }
    }

    fn evaluate_audience(&mut self, id: &str) -> Option<bool> {
        let audiences = self.audiences;
        let Some(audience) = audiences.audience(id) else {
            log::warn!(target: "optimizely", audience_id = id; "audience is not in datafile");
            return None;
        };

        if self.path.contains(&audience.id.as_str()) {
            log::warn!(target: "optimizely",
                       audience_id = id,
                       path:serde = self.path;
                       "audience reference cycle detected");
            return None;
        }

        log::debug!(target: "optimizely",
                    audience_id = id,
                    conditions:display = audience.conditions;
                    "starting to evaluate audience");

        self.path.push(&audience.id);
        let result = self.evaluate(&audience.conditions);
        self.path.pop();

        log::debug!(target: "optimizely",
                    audience_id = id,
                    result:? = result;
                    "audience evaluated");
        result
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{HashMap, HashSet};

    use serde_json::json;

    use crate::{datafile::Audience, Attributes};

    use super::{AudienceSource, ConditionEvaluator, ConditionHolder, ConditionLeaf};

    impl AudienceSource for HashMap<String, Audience> {
        fn audience(&self, id: &str) -> Option<&Audience> {
            self.get(id)
        }
    }

    const TRUE: &str = r#"{"name": "t", "type": "custom_attribute", "match": "exact", "value": true}"#;
    const FALSE: &str =
        r#"{"name": "t", "type": "custom_attribute", "match": "exact", "value": false}"#;
    const UNKNOWN: &str =
        r#"{"name": "missing", "type": "custom_attribute", "match": "exact", "value": 1}"#;

    fn eval_with(audiences: &HashMap<String, Audience>, condition: &str) -> Option<bool> {
        let condition: ConditionHolder = serde_json::from_str(condition).unwrap();
        let attributes: Attributes = [("t".to_owned(), true.into())].into();
        let segments = HashSet::new();
        ConditionEvaluator::new(audiences, &attributes, &segments).evaluate(&condition)
    }

    fn eval(condition: &str) -> Option<bool> {
        eval_with(&HashMap::new(), condition)
    }

    #[test]
    fn parses_operator_arrays() {
        let condition: ConditionHolder =
            serde_json::from_value(json!(["and", "1", ["not", "2"]])).unwrap();
        let ConditionHolder::Array(items) = &condition else {
            panic!("expected array");
        };
        assert_eq!(items.len(), 3);
        assert_eq!(
            items[1],
            ConditionHolder::Leaf(ConditionLeaf::AudienceId("1".to_owned()))
        );
        assert_eq!(condition.to_string(), r#"["and","1",["not","2"]]"#);
    }

    #[test]
    fn rejects_invalid_condition_values() {
        assert!(serde_json::from_value::<ConditionHolder>(json!(["and", 1])).is_err());
    }

    #[test]
    fn and_follows_three_valued_logic() {
        assert_eq!(eval(&format!(r#"["and", {TRUE}, {TRUE}]"#)), Some(true));
        assert_eq!(eval(&format!(r#"["and", {TRUE}, {UNKNOWN}]"#)), None);
        assert_eq!(eval(&format!(r#"["and", {FALSE}, {UNKNOWN}]"#)), Some(false));
        assert_eq!(eval(&format!(r#"["and", {UNKNOWN}, {FALSE}]"#)), Some(false));
        assert_eq!(eval(r#"["and"]"#), None);
    }

    #[test]
    fn or_follows_three_valued_logic() {
        assert_eq!(eval(&format!(r#"["or", {FALSE}, {FALSE}]"#)), Some(false));
        assert_eq!(eval(&format!(r#"["or", {FALSE}, {UNKNOWN}]"#)), None);
        assert_eq!(eval(&format!(r#"["or", {TRUE}, {UNKNOWN}]"#)), Some(true));
        assert_eq!(eval(&format!(r#"["or", {UNKNOWN}, {TRUE}]"#)), Some(true));
        assert_eq!(eval(r#"["or"]"#), None);
    }

    #[test]
    fn not_flips_known_values_only() {
        assert_eq!(eval(&format!(r#"["not", {TRUE}]"#)), Some(false));
        assert_eq!(eval(&format!(r#"["not", {FALSE}]"#)), Some(true));
        assert_eq!(eval(&format!(r#"["not", {UNKNOWN}]"#)), None);
        assert_eq!(eval(r#"["not"]"#), None);
    }

    #[test]
    fn array_without_operator_is_implicit_or() {
        assert_eq!(eval(&format!(r#"[{FALSE}, {TRUE}]"#)), Some(true));
        assert_eq!(eval(&format!(r#"[{FALSE}, {FALSE}]"#)), Some(false));
        assert_eq!(eval("[]"), None);
    }

    #[test]
    fn single_leaf_evaluates_directly() {
        assert_eq!(eval(TRUE), Some(true));
        assert_eq!(eval(UNKNOWN), None);
    }

    fn audience(id: &str, conditions: serde_json::Value) -> (String, Audience) {
        (
            id.to_owned(),
            Audience {
                id: id.to_owned(),
                name: format!("audience {id}"),
                conditions: serde_json::from_value(conditions).unwrap(),
            },
        )
    }

    #[test]
    fn evaluates_audience_references() {
        let truthy: serde_json::Value = serde_json::from_str(TRUE).unwrap();
        let audiences: HashMap<_, _> = [
            audience("1", json!(["and", truthy])),
            audience("2", json!(["not", "1"])),
        ]
        .into();

        assert_eq!(eval_with(&audiences, r#"["or", "1"]"#), Some(true));
        assert_eq!(eval_with(&audiences, r#"["or", "2"]"#), Some(false));
        assert_eq!(eval_with(&audiences, r#"["or", "unknown-audience"]"#), None);
    }

    #[test]
    fn audience_cycles_evaluate_to_unknown() {
        let audiences: HashMap<_, _> = [
            audience("1", json!(["and", "2"])),
            audience("2", json!(["or", "1"])),
            audience("3", json!(["not", "3"])),
        ]
        .into();

        assert_eq!(eval_with(&audiences, r#"["or", "1"]"#), None);
        assert_eq!(eval_with(&audiences, r#"["or", "3"]"#), None);
    }

    #[test]
    fn same_audience_may_appear_twice_without_a_cycle() {
        let truthy: serde_json::Value = serde_json::from_str(TRUE).unwrap();
        let audiences: HashMap<_, _> = [audience("1", json!(["and", truthy]))].into();

        assert_eq!(eval_with(&audiences, r#"["and", "1", "1"]"#), Some(true));
    }
}
