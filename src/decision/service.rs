use crate::{
    audience::does_meet_audience_conditions,
    bucketer::Bucketer,
    datafile::{BucketingEntity, Experiment, FeatureFlag, Variation},
    forced_variations::ForcedVariations,
    user_profile::{UserProfileService, UserProfileTracker},
    ForcedDecisionKey, ProjectConfig, Result, UserContext,
};

use super::{
    DecideOption, DecideOptions, DecisionReasons, DecisionResponse, DecisionSource,
    FeatureDecision,
};

/// Runs the decision pipeline.
///
/// For a flag, stages are evaluated in order and the first conclusive one wins:
///
/// 1. flag-level forced decision,
/// 2. holdouts applying to the flag,
/// 3. experiment rules (per rule: forced decision, runtime whitelist, datafile whitelist, user
///    profile, audience, bucketing),
/// 4. delivery rules (per rule: forced decision, audience, bucketing).
///
/// The service holds no datafile state. Every call receives the configuration snapshot it must
/// use, so a datafile update during a call does not affect it.
pub struct DecisionService<'a> {
    bucketer: Bucketer,
    user_profile_service: Box<dyn UserProfileService + Send + Sync + 'a>,
    forced_variations: ForcedVariations,
}

/// Outcome of a single delivery rule.
enum RuleOutcome<'c> {
    Bucketed(&'c Variation),
    /// Audience did not match, the next rule is evaluated.
    AudienceMismatch,
    /// Audience matched but traffic allocation did not, only "Everyone Else" is left to try.
    NotBucketed,
}

impl<'a> DecisionService<'a> {
    pub fn new(user_profile_service: Box<dyn UserProfileService + Send + Sync + 'a>) -> Self {
        DecisionService {
            bucketer: Bucketer::new(),
            user_profile_service,
            forced_variations: ForcedVariations::new(),
        }
    }

    /// Decide variation of a single experiment.
    pub fn get_variation<'c>(
        &self,
        config: &'c ProjectConfig,
        experiment: &'c Experiment,
        user: &UserContext,
        options: &DecideOptions,
    ) -> DecisionResponse<&'c Variation> {
        let mut reasons = DecisionReasons::new(options.contains(&DecideOption::IncludeReasons));
        let mut profile = self.profile_tracker(user, options);
        let result = self
            .variation_for_experiment(config, experiment, user, &mut profile, &mut reasons)
            .map(|(variation, _source)| variation);
        DecisionResponse {
            result,
            reasons: reasons.into_vec(),
        }
    }

    /// Decide rule and variation of a flag.
    pub fn get_variation_for_feature<'c>(
        &self,
        config: &'c ProjectConfig,
        flag: &FeatureFlag,
        user: &UserContext,
        options: &DecideOptions,
    ) -> DecisionResponse<FeatureDecision<'c>> {
        let mut reasons = DecisionReasons::new(options.contains(&DecideOption::IncludeReasons));
        let result = self.decide_feature(config, &flag.key, user, options, &mut reasons);
        DecisionResponse {
            result,
            reasons: reasons.into_vec(),
        }
    }

    pub(crate) fn decide_feature<'c>(
        &self,
        config: &'c ProjectConfig,
        flag_key: &str,
        user: &UserContext,
        options: &DecideOptions,
        reasons: &mut DecisionReasons,
    ) -> Option<FeatureDecision<'c>> {
        if let Some(variation) = self.validated_forced_decision(config, flag_key, None, user, reasons)
        {
            return Some(FeatureDecision {
                rule_key: None,
                variation,
                source: DecisionSource::FeatureTest,
            });
        }

        if let Some(decision) = self.holdout_decision(config, flag_key, user, reasons) {
            return Some(decision);
        }

        let mut profile = self.profile_tracker(user, options);
        for rule in config.experiment_rules(flag_key) {
            if let Some(variation) =
                self.validated_forced_decision(config, flag_key, Some(rule), user, reasons)
            {
                return Some(FeatureDecision {
                    rule_key: Some(&rule.key),
                    variation,
                    source: DecisionSource::FeatureTest,
                });
            }

            if let Some((variation, source)) =
                self.variation_for_experiment(config, rule, user, &mut profile, reasons)
            {
                return Some(FeatureDecision {
                    rule_key: Some(&rule.key),
                    variation,
                    source,
                });
            }
        }

        if let Some(decision) = self.rollout_decision(config, flag_key, user, reasons) {
            return Some(decision);
        }

        reasons.add_info(format!(
            "User ({}) is not bucketed into any rule of flag ({flag_key}).",
            user.user_id()
        ));
        None
    }

    fn profile_tracker<'s>(
        &'s self,
        user: &'s UserContext,
        options: &DecideOptions,
    ) -> Option<UserProfileTracker<'s>> {
        if options.contains(&DecideOption::IgnoreUserProfileService) {
            None
        } else {
            Some(UserProfileTracker::new(
                &*self.user_profile_service,
                user.user_id(),
            ))
        }
    }

    fn holdout_decision<'c>(
        &self,
        config: &'c ProjectConfig,
        flag_key: &str,
        user: &UserContext,
        reasons: &mut DecisionReasons,
    ) -> Option<FeatureDecision<'c>> {
        let user_id = user.user_id();

        for holdout in config.holdouts_for_flag(flag_key) {
            if !holdout.is_running() {
                reasons.add_info(format!("Holdout ({}) is not running.", holdout.key));
                continue;
            }

            if !does_meet_audience_conditions(config, holdout, "holdout", &holdout.key, user, reasons)
            {
                reasons.add_info(format!(
                    "User ({user_id}) does not meet conditions for holdout ({}).",
                    holdout.key
                ));
                continue;
            }
            reasons.add_info(format!(
                "User ({user_id}) meets conditions for holdout ({}).",
                holdout.key
            ));

            match self.bucketer.bucket_to_variation(holdout, user.bucketing_id()) {
                Some(variation) => {
                    reasons.add_info(format!(
                        "User ({user_id}) is in variation ({}) of holdout ({}).",
                        variation.key, holdout.key
                    ));
                    return Some(FeatureDecision {
                        rule_key: Some(&holdout.key),
                        variation,
                        source: DecisionSource::Holdout,
                    });
                }
                None => reasons.add_info(format!(
                    "User ({user_id}) is not in any variation of holdout ({}).",
                    holdout.key
                )),
            }
        }

        None
    }

    /// Whitelists, user profile, audience, and bucketing for a single experiment.
    fn variation_for_experiment<'c>(
        &self,
        config: &ProjectConfig,
        experiment: &'c Experiment,
        user: &UserContext,
        profile: &mut Option<UserProfileTracker<'_>>,
        reasons: &mut DecisionReasons,
    ) -> Option<(&'c Variation, DecisionSource)> {
        let user_id = user.user_id();

        if !experiment.is_running() {
            reasons.add_info(format!("Experiment ({}) is not running.", experiment.key));
            return None;
        }

        if let Some(variation) = self.forced_variations.get(experiment, user_id, reasons) {
            return Some((variation, DecisionSource::FeatureTest));
        }

        if let Some(variation) = whitelisted_variation(experiment, user_id, reasons) {
            return Some((variation, DecisionSource::FeatureTest));
        }

        if let Some(profile) = profile.as_mut() {
            if let Some(variation) = stored_variation(experiment, profile, user_id, reasons) {
                return Some((variation, DecisionSource::Experiment));
            }
        }

        if !does_meet_audience_conditions(
            config,
            experiment,
            "experiment",
            &experiment.key,
            user,
            reasons,
        ) {
            reasons.add_info(format!(
                "User ({user_id}) does not meet conditions to be in experiment ({}).",
                experiment.key
            ));
            return None;
        }

        let Some(variation) =
            self.bucketer
                .bucket_experiment(config, experiment, user.bucketing_id(), reasons)
        else {
            reasons.add_info(format!(
                "User ({user_id}) is in no variation of experiment ({}).",
                experiment.key
            ));
            return None;
        };

        reasons.add_info(format!(
            "User ({user_id}) is in variation ({}) of experiment ({}).",
            variation.key, experiment.key
        ));
        if let Some(profile) = profile.as_mut() {
            profile.save(&experiment.id, &variation.id);
        }
        Some((variation, DecisionSource::Experiment))
    }

    fn rollout_decision<'c>(
        &self,
        config: &'c ProjectConfig,
        flag_key: &str,
        user: &UserContext,
        reasons: &mut DecisionReasons,
    ) -> Option<FeatureDecision<'c>> {
        let rules = config.rollout_rules(flag_key);
        if rules.is_empty() {
            reasons.add_info(format!(
                "The feature flag ({flag_key}) is not used in a rollout."
            ));
            return None;
        }
        let everyone_else = rules.len() - 1;

        let mut index = 0;
        while let Some(rule) = rules.get(index) {
            if let Some(variation) =
                self.validated_forced_decision(config, flag_key, Some(rule), user, reasons)
            {
                return Some(FeatureDecision {
                    rule_key: Some(&rule.key),
                    variation,
                    source: DecisionSource::Rollout,
                });
            }

            match self.delivery_rule_variation(config, rule, index, index == everyone_else, user, reasons)
            {
                RuleOutcome::Bucketed(variation) => {
                    return Some(FeatureDecision {
                        rule_key: Some(&rule.key),
                        variation,
                        source: DecisionSource::Rollout,
                    });
                }
                RuleOutcome::AudienceMismatch => index += 1,
                RuleOutcome::NotBucketed if index < everyone_else => index = everyone_else,
                RuleOutcome::NotBucketed => index += 1,
            }
        }

        None
    }

    /// "Everyone Else" is evaluated without its audience conditions.
    fn delivery_rule_variation<'c>(
        &self,
        config: &ProjectConfig,
        rule: &'c Experiment,
        index: usize,
        is_everyone_else: bool,
        user: &UserContext,
        reasons: &mut DecisionReasons,
    ) -> RuleOutcome<'c> {
        let user_id = user.user_id();
        let logging_key = if is_everyone_else {
            "Everyone Else".to_owned()
        } else {
            (index + 1).to_string()
        };

        if !is_everyone_else {
            if !does_meet_audience_conditions(config, rule, "rule", &logging_key, user, reasons) {
                reasons.add_info(format!(
                    "User ({user_id}) does not meet conditions for targeting rule ({logging_key})."
                ));
                return RuleOutcome::AudienceMismatch;
            }
            reasons.add_info(format!(
                "User ({user_id}) meets conditions for targeting rule ({logging_key})."
            ));
        }

        match self.bucketer.bucket_to_variation(rule, user.bucketing_id()) {
            Some(variation) => {
                reasons.add_info(format!(
                    "User ({user_id}) bucketed into a targeting rule ({logging_key})."
                ));
                RuleOutcome::Bucketed(variation)
            }
            None if is_everyone_else => {
                reasons.add_info(format!(
                    "User ({user_id}) not bucketed into everyone targeting rule due to traffic allocation."
                ));
                RuleOutcome::NotBucketed
            }
            None => {
                reasons.add_info(format!(
                    "User ({user_id}) not bucketed into a targeting rule ({logging_key}). Checking (Everyone Else) rule now."
                ));
                RuleOutcome::NotBucketed
            }
        }
    }

    /// Forced decision for the flag (`rule` is `None`) or one of its rules, if it names an
    /// existing variation.
    fn validated_forced_decision<'c>(
        &self,
        config: &'c ProjectConfig,
        flag_key: &str,
        rule: Option<&'c Experiment>,
        user: &UserContext,
        reasons: &mut DecisionReasons,
    ) -> Option<&'c Variation> {
        let key = ForcedDecisionKey {
            flag_key: flag_key.to_owned(),
            rule_key: rule.map(|r| r.key.clone()),
        };
        let variation_key = user.forced_decision(&key)?;

        let (variation, target) = match rule {
            Some(rule) => (
                rule.variation_by_key(variation_key),
                format!("flag ({flag_key}), rule ({})", rule.key),
            ),
            None => (
                config.flag_variation_by_key(flag_key, variation_key),
                format!("flag ({flag_key})"),
            ),
        };
        let user_id = user.user_id();

        match variation {
            Some(variation) => {
                reasons.add_info(format!(
                    "Variation ({variation_key}) is mapped to {target} and user ({user_id}) in the forced decision map."
                ));
                Some(variation)
            }
            None => {
                log::warn!(target: "optimizely",
                           flag_key,
                           user_id,
                           variation_key;
                           "ignoring forced decision with invalid variation");
                reasons.add_info(format!(
                    "Invalid variation is mapped to {target} and user ({user_id}) in the forced decision map."
                ));
                None
            }
        }
    }

    /// See [`Client::set_forced_variation`](crate::Client::set_forced_variation).
    pub fn set_forced_variation(
        &self,
        config: &ProjectConfig,
        experiment_key: &str,
        user_id: &str,
        variation_key: Option<&str>,
    ) -> Result<()> {
        self.forced_variations
            .set(config, experiment_key, user_id, variation_key)
    }

    /// Forced variation of the user in an experiment, if set and still valid.
    pub fn forced_variation<'c>(
        &self,
        config: &'c ProjectConfig,
        experiment_key: &str,
        user_id: &str,
    ) -> Option<&'c Variation> {
        let experiment = config.experiment_by_key(experiment_key)?;
        self.forced_variations
            .get(experiment, user_id, &mut DecisionReasons::default())
    }
}

/// Variation forced for the user in the datafile.
fn whitelisted_variation<'e>(
    experiment: &'e Experiment,
    user_id: &str,
    reasons: &mut DecisionReasons,
) -> Option<&'e Variation> {
    let variation_key = experiment.forced_variations.get(user_id)?;
    match experiment.variation_by_key(variation_key) {
        Some(variation) => {
            reasons.add_info(format!(
                "User ({user_id}) is forced in variation ({variation_key})."
            ));
            Some(variation)
        }
        None => {
            log::warn!(target: "optimizely",
                       experiment_key:display = experiment.key,
                       user_id,
                       variation_key:display = variation_key;
                       "whitelisted variation is not in datafile");
            reasons.add_info(format!(
                "Variation key ({variation_key}) for user ({user_id}) is not in experiment ({}).",
                experiment.key
            ));
            None
        }
    }
}

/// Variation remembered by the user profile service, if it is still in the datafile.
fn stored_variation<'e>(
    experiment: &'e Experiment,
    profile: &mut UserProfileTracker<'_>,
    user_id: &str,
    reasons: &mut DecisionReasons,
) -> Option<&'e Variation> {
    let variation_id = profile.variation_id(&experiment.id)?;
    match experiment.variation_by_id(variation_id) {
        Some(variation) => {
            reasons.add_info(format!(
                "Returning previously activated variation ({}) of experiment ({}) for user ({user_id}) from user profile.",
                variation.key, experiment.key
            ));
            Some(variation)
        }
        None => {
            reasons.add_info(format!(
                "User ({user_id}) was previously bucketed into variation with ID ({variation_id}) for experiment ({}), but no matching variation was found. Re-bucketing user.",
                experiment.key
            ));
            None
        }
    }
}
