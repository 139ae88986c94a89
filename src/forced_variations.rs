//! Runtime whitelist: variations forced for a user in a single experiment.
//!
//! Unlike the datafile, these overrides are mutated at runtime from any thread, and survive
//! datafile updates. Entries are keyed by experiment id and re-validated against the current
//! datafile every time they are read.
use std::collections::HashMap;

use crate::{
    datafile::{BucketingEntity, Experiment, Variation},
    decision::DecisionReasons,
    guarded_cell::GuardedCell,
    Error, ProjectConfig, Result,
};

/// User id to experiment id to variation id.
type ForcedVariationMap = HashMap<String, HashMap<String, String>>;

#[derive(Debug, Default)]
pub(crate) struct ForcedVariations {
    map: GuardedCell<ForcedVariationMap>,
}

impl ForcedVariations {
    pub fn new() -> Self {
        Self::default()
    }

    /// Force `variation_key` for the user in the experiment, or remove the override if
    /// `variation_key` is `None`.
    pub fn set(
        &self,
        config: &ProjectConfig,
        experiment_key: &str,
        user_id: &str,
        variation_key: Option<&str>,
    ) -> Result<()> {
        let experiment = config
            .experiment_by_key(experiment_key)
            .ok_or_else(|| Error::InvalidExperimentKey(experiment_key.to_owned()))?;

        let Some(variation_key) = variation_key else {
            self.map.with(|map| {
                if let Some(user_map) = map.get_mut(user_id) {
                    user_map.remove(&experiment.id);
                    if user_map.is_empty() {
                        map.remove(user_id);
                    }
                }
            });
            log::debug!(target: "optimizely",
                        experiment_key,
                        user_id;
                        "removed forced variation");
            return Ok(());
        };

        let variation_key = variation_key.trim();
        let variation = experiment
            .variation_by_key(variation_key)
            .filter(|_| !variation_key.is_empty())
            .ok_or_else(|| Error::InvalidVariationKey {
                experiment_key: experiment_key.to_owned(),
                variation_key: variation_key.to_owned(),
            })?;

        self.map.with(|map| {
            map.entry(user_id.to_owned())
                .or_default()
                .insert(experiment.id.clone(), variation.id.clone());
        });
        log::debug!(target: "optimizely",
                    experiment_key,
                    user_id,
                    variation_key;
                    "set forced variation");
        Ok(())
    }

    /// Forced variation of the user in the experiment, if it is still valid.
    pub fn get<'e>(
        &self,
        experiment: &'e Experiment,
        user_id: &str,
        reasons: &mut DecisionReasons,
    ) -> Option<&'e Variation> {
        let variation_id = self.map.with(|map| {
            map.get(user_id)
                .and_then(|user_map| user_map.get(&experiment.id))
                .cloned()
        })?;

        match experiment.variation_by_id(&variation_id) {
            Some(variation) => {
                reasons.add_info(format!(
                    "Variation ({}) is mapped to experiment ({}) and user ({user_id}) in the forced variation map.",
                    variation.key, experiment.key
                ));
                Some(variation)
            }
            None => {
                reasons.add_info(format!(
                    "Forced variation id ({variation_id}) for user ({user_id}) is not in experiment ({}).",
                    experiment.key
                ));
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::{decision::DecisionReasons, Error, ProjectConfig};

    use super::ForcedVariations;

    fn config() -> ProjectConfig {
        ProjectConfig::from_json(
            br#"{
                "version": "4",
                "experiments": [{
                    "id": "exp_id", "key": "exp", "status": "Running",
                    "variations": [{"id": "v1", "key": "control"}, {"id": "v2", "key": "treatment"}],
                    "trafficAllocation": [{"entityId": "v1", "endOfRange": 10000}]
                }]
            }"#,
        )
        .unwrap()
    }

    fn forced_key(forced: &ForcedVariations, config: &ProjectConfig, user_id: &str) -> Option<String> {
        let experiment = config.experiment_by_key("exp").unwrap();
        forced
            .get(experiment, user_id, &mut DecisionReasons::default())
            .map(|v| v.key.clone())
    }

    #[test]
    fn sets_and_removes_forced_variation() {
        let config = config();
        let forced = ForcedVariations::new();

        forced.set(&config, "exp", "user", Some("treatment")).unwrap();
        assert_eq!(forced_key(&forced, &config, "user").as_deref(), Some("treatment"));
        assert_eq!(forced_key(&forced, &config, "other"), None);

        forced.set(&config, "exp", "user", None).unwrap();
        assert_eq!(forced_key(&forced, &config, "user"), None);
    }

    #[test]
    fn trims_variation_key() {
        let config = config();
        let forced = ForcedVariations::new();

        forced.set(&config, "exp", "user", Some(" control ")).unwrap();
        assert_eq!(forced_key(&forced, &config, "user").as_deref(), Some("control"));
    }

    #[test]
    fn rejects_invalid_input_without_touching_state() {
        let config = config();
        let forced = ForcedVariations::new();
        forced.set(&config, "exp", "user", Some("control")).unwrap();

        assert!(matches!(
            forced.set(&config, "unknown", "user", Some("control")),
            Err(Error::InvalidExperimentKey(_))
        ));
        assert!(matches!(
            forced.set(&config, "exp", "user", Some("  ")),
            Err(Error::InvalidVariationKey { .. })
        ));
        assert!(matches!(
            forced.set(&config, "exp", "user", Some("unknown")),
            Err(Error::InvalidVariationKey { .. })
        ));
        assert_eq!(forced_key(&forced, &config, "user").as_deref(), Some("control"));
    }

    #[test]
    fn stale_variation_is_ignored() {
        let forced = ForcedVariations::new();
        forced.set(&config(), "exp", "user", Some("treatment")).unwrap();

        let updated = ProjectConfig::from_json(
            br#"{
                "version": "4",
                "experiments": [{
                    "id": "exp_id", "key": "exp", "status": "Running",
                    "variations": [{"id": "v1", "key": "control"}],
                    "trafficAllocation": [{"entityId": "v1", "endOfRange": 10000}]
                }]
            }"#,
        )
        .unwrap();
        assert_eq!(forced_key(&forced, &updated, "user"), None);
    }

    #[test]
    fn concurrent_writers_do_not_interfere() {
        let config = config();
        let forced = ForcedVariations::new();

        std::thread::scope(|s| {
            for i in 0..8 {
                let (config, forced) = (&config, &forced);
                s.spawn(move || {
                    for _ in 0..100 {
                        forced
                            .set(config, "exp", &format!("user{i}"), Some("treatment"))
                            .unwrap();
                        forced.set(config, "exp", &format!("user{i}"), None).unwrap();
                    }
                    forced
                        .set(config, "exp", &format!("user{i}"), Some("control"))
                        .unwrap();
                });
            }
        });

        for i in 0..8 {
            assert_eq!(
                forced_key(&forced, &config, &format!("user{i}")).as_deref(),
                Some("control")
            );
        }
    }

    #[test]
    fn clearing_last_variation_forgets_user() {
        let config = config();
        let forced = ForcedVariations::new();

        forced.set(&config, "exp", "user", Some("treatment")).unwrap();
        assert!(forced.map.with(|map| map.contains_key("user")));

        forced.set(&config, "exp", "user", None).unwrap();
        assert!(!forced.map.with(|map| map.contains_key("user")));
        assert_eq!(forced_key(&forced, &config, "user"), None);
    }
}
