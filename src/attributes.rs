use std::collections::HashMap;

use derive_more::From;
use serde::{Deserialize, Serialize};

/// User attributes used for audience targeting.
///
/// # Examples
/// ```
/// # use optimizely::{AttributeValue, Attributes};
/// let attributes: Attributes = [
///     ("country".to_owned(), "US".into()),
///     ("age".to_owned(), 30.into()),
///     ("premium".to_owned(), true.into()),
/// ]
/// .into();
/// ```
pub type Attributes = HashMap<String, AttributeValue>;

/// Reserved attribute that overrides the user id for bucketing.
pub const BUCKETING_ID_ATTRIBUTE: &str = "$opt_bucketing_id";

/// Numbers with a larger magnitude cannot be compared reliably across SDKs.
pub(crate) const MAX_SAFE_NUMBER: f64 = 9_007_199_254_740_992.0;

/// Value of a single user attribute.
///
/// Integers and doubles are kept apart so that callers do not lose precision at the boundary,
/// but they compare equal to each other when numerically equal.
#[derive(Debug, Serialize, Deserialize, PartialEq, From, Clone)]
#[serde(untagged)]
pub enum AttributeValue {
    String(String),
    Integer(i64),
    Double(f64),
    Boolean(bool),
    Null,
    /// Arrays and objects. Accepted so that arbitrary attribute maps can be passed in, but no
    /// match type applies to them.
    Json(serde_json::Value),
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}

impl From<i32> for AttributeValue {
    fn from(value: i32) -> Self {
        Self::Integer(value.into())
    }
}

impl AttributeValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Numeric value for either integers or doubles.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Integer(i) => Some(*i as f64),
            Self::Double(d) => Some(*d),
            _ => None,
        }
    }

    pub fn as_boolean(&self) -> Option<bool> {
        match self {
            Self::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null | Self::Json(serde_json::Value::Null))
    }
}

/// Return `true` if `n` can take part in a numeric comparison.
pub(crate) fn is_valid_number(n: f64) -> bool {
    n.is_finite() && n.abs() <= MAX_SAFE_NUMBER
}
