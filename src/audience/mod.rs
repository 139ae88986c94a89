//! Audience targeting.
//!
//! Conditions are evaluated with three-valued logic so that diagnostics can tell "does not match"
//! apart from "could not be evaluated". At the gate, unknown is always treated as not matching.
mod condition;
mod semver;
mod user_attribute;

pub use condition::{
    AudienceSource, ConditionEvaluator, ConditionHolder, ConditionLeaf, LogicalOperator,
};
pub(crate) use condition::deserialize_conditions;
pub use user_attribute::{ConditionError, UserAttribute};

use crate::{datafile::BucketingEntity, decision::DecisionReasons, UserContext};

/// Return `true` if the user may be bucketed into `entity`.
///
/// `kind` and `logging_key` only affect reasons, e.g. `("experiment", "checkout_test")` or
/// `("rule", "Everyone Else")`.
pub(crate) fn does_meet_audience_conditions(
    audiences: &dyn AudienceSource,
    entity: &impl BucketingEntity,
    kind: &str,
    logging_key: &str,
    user: &UserContext,
    reasons: &mut DecisionReasons,
) -> bool {
    let condition = match entity.audience_conditions() {
        Some(ConditionHolder::Array(items)) if items.is_empty() => return true,
        Some(condition) => condition.clone(),
        None if entity.audience_ids().is_empty() => return true,
        // Datafiles without condition trees list audience ids that are OR-ed together.
        None => ConditionHolder::Array(
            entity
                .audience_ids()
                .iter()
                .map(|id| ConditionHolder::Leaf(ConditionLeaf::AudienceId(id.clone())))
                .collect(),
        ),
    };

    reasons.add_info(format!(
        "Evaluating audiences for {kind} ({logging_key}): {condition}."
    ));

    let result = ConditionEvaluator::new(audiences, user.attributes(), user.qualified_segments())
        .evaluate(&condition);

    reasons.add_info(format!(
        "Audiences for {kind} ({logging_key}) collectively evaluated to {}.",
        match result {
            Some(true) => "TRUE",
            Some(false) => "FALSE",
            None => "UNKNOWN",
        }
    ));

    result.unwrap_or(false)
}
