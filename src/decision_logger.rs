use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::{Attributes, DecisionSource};

/// Record of a flag decision, passed to [`DecisionLogger`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionEvent {
    pub flag_key: String,
    pub rule_key: Option<String>,
    pub variation_key: Option<String>,
    pub source: Option<DecisionSource>,
    pub enabled: bool,
    pub user_id: String,
    pub attributes: Attributes,
    /// RFC 3339 time of the decision.
    pub timestamp: String,
    pub meta_data: HashMap<String, String>,
}

/// Receives decision events, e.g. to forward them to your analytics pipeline.
///
/// Called synchronously on the decision path. Implementations should hand events off quickly.
pub trait DecisionLogger {
    fn log_decision(&self, event: DecisionEvent);
}

pub(crate) struct NoopDecisionLogger;
impl DecisionLogger for NoopDecisionLogger {
    fn log_decision(&self, _event: DecisionEvent) {}
}

impl<T: Fn(DecisionEvent)> DecisionLogger for T {
    fn log_decision(&self, event: DecisionEvent) {
        self(event);
    }
}
