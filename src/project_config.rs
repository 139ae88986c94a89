//! Read-only index over a parsed datafile.
use std::collections::HashMap;

use crate::{
    audience::AudienceSource,
    datafile::{
        Attribute, Audience, Datafile, DatafileVersion, Event, Experiment, FeatureFlag, Group,
        Holdout, Rollout, Variation, SUPPORTED_VERSION,
    },
    Error, Result,
};

/// Lookup structure built once per datafile revision.
///
/// `ProjectConfig` is never mutated after construction. A new datafile produces a new
/// `ProjectConfig` which replaces the old one in the [`Client`](crate::Client) as a whole.
#[derive(Debug)]
pub struct ProjectConfig {
    datafile: Datafile,

    /// Top-level and group experiments by id.
    experiments: HashMap<String, Experiment>,
    experiment_ids_by_key: HashMap<String, String>,
    groups: HashMap<String, Group>,
    /// Experiment id to id of the group it belongs to.
    experiment_groups: HashMap<String, String>,
    flags: HashMap<String, FeatureFlag>,
    flag_keys_by_id: HashMap<String, String>,
    rollouts: HashMap<String, Rollout>,
    audiences: HashMap<String, Audience>,
    attributes: HashMap<String, Attribute>,
    events: HashMap<String, Event>,
    holdouts: HashMap<String, Holdout>,

    /// Per flag key.
    flag_rules: HashMap<String, FlagRules>,
}

/// Everything a flag decision needs, precomputed per flag.
#[derive(Debug, Default)]
struct FlagRules {
    experiment_rules: Vec<Experiment>,
    rollout_rules: Vec<Experiment>,
    /// All variations across the flag's rules, de-duplicated by id.
    variations: Vec<Variation>,
    /// Holdouts applying to the flag in evaluation order.
    holdouts: Vec<Holdout>,
}

impl ProjectConfig {
    /// Parse and index a datafile.
    ///
    /// Fails if the datafile is not valid JSON or has an unsupported schema version.
    pub fn from_json(json: &[u8]) -> Result<ProjectConfig> {
        let DatafileVersion { version } = serde_json::from_slice(json)?;
        if version != SUPPORTED_VERSION {
            return Err(Error::UnsupportedDatafileVersion(version));
        }

        let datafile: Datafile = serde_json::from_slice(json)?;
        Ok(ProjectConfig::new(datafile))
    }

    /// Index an already parsed datafile. Schema version is not checked.
    pub fn new(datafile: Datafile) -> ProjectConfig {
        let mut experiments = HashMap::new();
        let mut experiment_groups = HashMap::new();
        for experiment in &datafile.experiments {
            experiments.insert(experiment.id.clone(), experiment.clone());
        }
        for group in &datafile.groups {
            for experiment in &group.experiments {
                experiment_groups.insert(experiment.id.clone(), group.id.clone());
                experiments.insert(experiment.id.clone(), experiment.clone());
            }
        }
        let experiment_ids_by_key = experiments
            .values()
            .map(|e| (e.key.clone(), e.id.clone()))
            .collect();

        let groups = index_by(&datafile.groups, |g| &g.id);
        let rollouts = index_by(&datafile.rollouts, |r| &r.id);
        let flags = index_by(&datafile.feature_flags, |f| &f.key);
        let flag_keys_by_id = datafile
            .feature_flags
            .iter()
            .map(|f| (f.id.clone(), f.key.clone()))
            .collect();
        let attributes = index_by(&datafile.attributes, |a| &a.key);
        let events = index_by(&datafile.events, |e| &e.key);
        let holdouts = index_by(&datafile.holdouts, |h| &h.id);

        // Typed audiences take precedence over legacy audiences with the same id.
        let mut audiences = index_by(&datafile.audiences, |a| &a.id);
        audiences.extend(index_by(&datafile.typed_audiences, |a| &a.id));

        let flag_rules = datafile
            .feature_flags
            .iter()
            .map(|flag| {
                let rules = FlagRules::new(flag, &experiments, &rollouts, &datafile.holdouts);
                (flag.key.clone(), rules)
            })
            .collect();

        ProjectConfig {
            datafile,
            experiments,
            experiment_ids_by_key,
            groups,
            experiment_groups,
            flags,
            flag_keys_by_id,
            rollouts,
            audiences,
            attributes,
            events,
            holdouts,
            flag_rules,
        }
    }

    pub fn datafile(&self) -> &Datafile {
        &self.datafile
    }

    pub fn revision(&self) -> &str {
        &self.datafile.revision
    }

    pub fn experiment_by_id(&self, id: &str) -> Option<&Experiment> {
        self.experiments.get(id)
    }

    pub fn experiment_by_key(&self, key: &str) -> Option<&Experiment> {
        self.experiment_ids_by_key
            .get(key)
            .and_then(|id| self.experiments.get(id))
    }

    pub fn group_by_id(&self, id: &str) -> Option<&Group> {
        self.groups.get(id)
    }

    /// Mutual exclusion group `experiment_id` belongs to, if any.
    pub fn group_for_experiment(&self, experiment_id: &str) -> Option<&Group> {
        self.experiment_groups
            .get(experiment_id)
            .and_then(|group_id| self.groups.get(group_id))
    }

    pub fn flag_by_key(&self, key: &str) -> Option<&FeatureFlag> {
        self.flags.get(key)
    }

    pub fn flag_by_id(&self, id: &str) -> Option<&FeatureFlag> {
        self.flag_keys_by_id
            .get(id)
            .and_then(|key| self.flags.get(key))
    }

    /// Flag keys in datafile order.
    pub fn flag_keys(&self) -> impl Iterator<Item = &str> {
        self.datafile.feature_flags.iter().map(|f| f.key.as_str())
    }

    pub fn rollout_by_id(&self, id: &str) -> Option<&Rollout> {
        self.rollouts.get(id)
    }

    pub fn attribute_by_key(&self, key: &str) -> Option<&Attribute> {
        self.attributes.get(key)
    }

    pub fn event_by_key(&self, key: &str) -> Option<&Event> {
        self.events.get(key)
    }

    pub fn holdout_by_id(&self, id: &str) -> Option<&Holdout> {
        self.holdouts.get(id)
    }

    /// Experiment rules of a flag, in the order the flag declares them.
    pub fn experiment_rules(&self, flag_key: &str) -> &[Experiment] {
        self.flag_rules
            .get(flag_key)
            .map(|rules| rules.experiment_rules.as_slice())
            .unwrap_or_default()
    }

    /// Delivery rules of a flag. The last one is "Everyone Else".
    pub fn rollout_rules(&self, flag_key: &str) -> &[Experiment] {
        self.flag_rules
            .get(flag_key)
            .map(|rules| rules.rollout_rules.as_slice())
            .unwrap_or_default()
    }

    /// Experiment rules followed by delivery rules.
    pub fn rules(&self, flag_key: &str) -> impl Iterator<Item = &Experiment> {
        self.experiment_rules(flag_key)
            .iter()
            .chain(self.rollout_rules(flag_key))
    }

    /// Holdouts that apply to the flag, in evaluation order.
    pub fn holdouts_for_flag(&self, flag_key: &str) -> &[Holdout] {
        self.flag_rules
            .get(flag_key)
            .map(|rules| rules.holdouts.as_slice())
            .unwrap_or_default()
    }

    /// All variations reachable from any rule of the flag.
    pub fn flag_variations(&self, flag_key: &str) -> &[Variation] {
        self.flag_rules
            .get(flag_key)
            .map(|rules| rules.variations.as_slice())
            .unwrap_or_default()
    }

    pub fn flag_variation_by_key(&self, flag_key: &str, variation_key: &str) -> Option<&Variation> {
        self.flag_variations(flag_key)
            .iter()
            .find(|v| v.key == variation_key)
    }
}

impl AudienceSource for ProjectConfig {
    fn audience(&self, id: &str) -> Option<&Audience> {
        self.audiences.get(id)
    }
}

impl FlagRules {
    fn new(
        flag: &FeatureFlag,
        experiments: &HashMap<String, Experiment>,
        rollouts: &HashMap<String, Rollout>,
        holdouts: &[Holdout],
    ) -> FlagRules {
        let experiment_rules: Vec<Experiment> = flag
            .experiment_ids
            .iter()
            .filter_map(|id| {
                let experiment = experiments.get(id);
                if experiment.is_none() {
                    log::warn!(target: "optimizely",
                               flag_key:display = flag.key,
                               experiment_id:display = id;
                               "flag references an experiment that is not in datafile");
                }
                experiment.cloned()
            })
            .collect();

        let rollout_rules = if flag.rollout_id.is_empty() {
            Vec::new()
        } else if let Some(rollout) = rollouts.get(&flag.rollout_id) {
            rollout.experiments.clone()
        } else {
            log::warn!(target: "optimizely",
                       flag_key:display = flag.key,
                       rollout_id:display = flag.rollout_id;
                       "flag references a rollout that is not in datafile");
            Vec::new()
        };

        let mut variations: Vec<Variation> = Vec::new();
        for variation in experiment_rules
            .iter()
            .chain(&rollout_rules)
            .flat_map(|rule| &rule.variations)
        {
            if !variations.iter().any(|v| v.id == variation.id) {
                variations.push(variation.clone());
            }
        }

        FlagRules {
            experiment_rules,
            rollout_rules,
            variations,
            holdouts: holdouts_for_flag(&flag.id, holdouts),
        }
    }
}

/// Holdouts with neither include nor exclude lists apply to every flag and come first. They are
/// followed by the holdouts listing the flag in their include list or, if there are none, by the
/// exclude-only holdouts that do not exclude the flag.
fn holdouts_for_flag(flag_id: &str, holdouts: &[Holdout]) -> Vec<Holdout> {
    let flag_id = flag_id.to_owned();
    let global = holdouts.iter().filter(|h| h.is_global());
    let included: Vec<&Holdout> = holdouts
        .iter()
        .filter(|h| h.included_flags.contains(&flag_id))
        .collect();

    let local = if included.is_empty() {
        holdouts
            .iter()
            .filter(|h| {
                h.included_flags.is_empty()
                    && !h.excluded_flags.is_empty()
                    && !h.excluded_flags.contains(&flag_id)
            })
            .collect()
    } else {
        included
    };

    global.chain(local).cloned().collect()
}

fn index_by<T: Clone>(items: &[T], key: impl Fn(&T) -> &String) -> HashMap<String, T> {
    items
        .iter()
        .map(|item| (key(item).clone(), item.clone()))
        .collect()
}
