//! Deterministic bucketing of users into traffic allocations.
use crate::{
    datafile::{BucketingEntity, Experiment, GroupPolicy, TrafficAllocation, Variation},
    decision::DecisionReasons,
    sharder::{Murmur3Sharder, Sharder},
    ProjectConfig,
};

/// Bucket values lie in `[0, MAX_TRAFFIC_VALUE)`.
pub const MAX_TRAFFIC_VALUE: u64 = 10_000;

/// Stateless bucketer.
///
/// Results only depend on the datafile, the bucketing id, and entity ids, so concurrent calls
/// always agree.
#[derive(Debug, Default, Clone)]
pub struct Bucketer<S = Murmur3Sharder> {
    sharder: S,
}

impl Bucketer<Murmur3Sharder> {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<S: Sharder> Bucketer<S> {
    pub fn with_sharder(sharder: S) -> Self {
        Bucketer { sharder }
    }

    /// Map a bucketing key to a value in `[0, MAX_TRAFFIC_VALUE)`.
    pub fn generate_bucket_value(&self, bucketing_key: &str) -> u64 {
        self.sharder.get_shard(bucketing_key, MAX_TRAFFIC_VALUE)
    }

    /// Bucket user into a variation of `experiment`, resolving its mutual exclusion group first.
    pub fn bucket_experiment<'e>(
        &self,
        config: &ProjectConfig,
        experiment: &'e Experiment,
        bucketing_id: &str,
        reasons: &mut DecisionReasons,
    ) -> Option<&'e Variation> {
        if let Some(group) = config.group_for_experiment(&experiment.id) {
            if group.policy == GroupPolicy::Random {
                let bucket_value =
                    self.generate_bucket_value(&make_hash_id(bucketing_id, &group.id));
                let Some(winner) = bucket_to_entity(bucket_value, &group.traffic_allocation)
                else {
                    reasons.add_info(format!(
                        "User with bucketingId ({bucketing_id}) is not in any experiment of group ({}).",
                        group.id
                    ));
                    return None;
                };

                if winner != experiment.id {
                    reasons.add_info(format!(
                        "User with bucketingId ({bucketing_id}) is not in experiment ({}) of group ({}).",
                        experiment.key, group.id
                    ));
                    return None;
                }

                reasons.add_info(format!(
                    "User with bucketingId ({bucketing_id}) is in experiment ({}) of group ({}).",
                    experiment.key, group.id
                ));
            }
        }

        self.bucket_to_variation(experiment, bucketing_id)
    }

    /// Bucket user into a variation of `entity` ignoring mutual exclusion.
    pub fn bucket_to_variation<'e, E: BucketingEntity>(
        &self,
        entity: &'e E,
        bucketing_id: &str,
    ) -> Option<&'e Variation> {
        let bucket_value = self.generate_bucket_value(&make_hash_id(bucketing_id, entity.id()));
        log::trace!(target: "optimizely",
                    bucketing_id,
                    entity_key = entity.key(),
                    bucket_value;
                    "assigned bucket");

        let variation_id = bucket_to_entity(bucket_value, entity.traffic_allocation())?;
        let variation = entity.variation_by_id(variation_id);
        if variation.is_none() {
            log::warn!(target: "optimizely",
                       entity_key = entity.key(),
                       variation_id;
                       "traffic allocation points to a variation that is not in datafile");
        }
        variation
    }
}

/// Key that is hashed for bucketing. Plain concatenation keeps results consistent across SDKs.
pub fn make_hash_id(bucketing_id: &str, entity_id: &str) -> String {
    format!("{bucketing_id}{entity_id}")
}

/// Resolve a bucket value against cumulative traffic allocation ranges.
///
/// Returns `None` when the value falls into the unallocated tail or outside of the valid range.
pub fn bucket_to_entity(bucket_value: u64, allocations: &[TrafficAllocation]) -> Option<&str> {
    if allocations.is_empty() {
        log::warn!(target: "optimizely", "traffic allocation is empty");
        return None;
    }
    if bucket_value >= MAX_TRAFFIC_VALUE {
        return None;
    }

    allocations
        .iter()
        .find(|allocation| allocation.end_of_range >= bucket_value)
        .map(|allocation| allocation.entity_id.as_str())
}

#[cfg(test)]
mod tests {
    use crate::{
        datafile::{Experiment, TrafficAllocation},
        decision::DecisionReasons,
        sharder::Sharder,
        ProjectConfig,
    };

    use super::{bucket_to_entity, make_hash_id, Bucketer, MAX_TRAFFIC_VALUE};

    fn allocation(entity_id: &str, end_of_range: u64) -> TrafficAllocation {
        TrafficAllocation {
            entity_id: entity_id.to_owned(),
            end_of_range,
        }
    }

    #[test]
    fn resolves_cumulative_ranges() {
        let allocations = [allocation("v1", 5000), allocation("v2", 10000)];

        assert_eq!(bucket_to_entity(0, &allocations), Some("v1"));
        assert_eq!(bucket_to_entity(4999, &allocations), Some("v1"));
        assert_eq!(bucket_to_entity(5000, &allocations), Some("v1"));
        assert_eq!(bucket_to_entity(5001, &allocations), Some("v2"));
        assert_eq!(bucket_to_entity(9999, &allocations), Some("v2"));
        assert_eq!(bucket_to_entity(MAX_TRAFFIC_VALUE, &allocations), None);
    }

    #[test]
    fn unallocated_tail_is_not_bucketed() {
        let allocations = [allocation("v1", 2500)];
        assert_eq!(bucket_to_entity(2500, &allocations), Some("v1"));
        assert_eq!(bucket_to_entity(2501, &allocations), None);
        assert_eq!(bucket_to_entity(0, &[]), None);
    }

    #[test]
    fn hash_id_is_concatenation() {
        assert_eq!(make_hash_id("ppid1", "1886780721"), "ppid11886780721");
    }

    #[test]
    fn bucket_values_match_other_sdks() {
        let bucketer = Bucketer::new();
        let value = |b: &str, e: &str| bucketer.generate_bucket_value(&make_hash_id(b, e));

        assert_eq!(value("ppid1", "1886780721"), 5254);
        assert_eq!(value("ppid2", "1886780721"), 4299);
        assert_eq!(value("ppid2", "1886780722"), 2434);
        assert_eq!(value("ppid3", "1886780721"), 5439);
        assert_eq!(
            value(
                "a very very very very very very very very very very very very very very very long ppd string",
                "1886780721"
            ),
            6128
        );
    }

    fn config() -> ProjectConfig {
        ProjectConfig::from_json(
            br#"{
                "version": "4",
                "experiments": [{
                    "id": "exp", "key": "exp", "status": "Running",
                    "variations": [{"id": "v1", "key": "a"}, {"id": "v2", "key": "b"}],
                    "trafficAllocation": [
                        {"entityId": "v1", "endOfRange": 5000},
                        {"entityId": "v2", "endOfRange": 10000}
                    ]
                }],
                "groups": [{
                    "id": "group1", "policy": "random",
                    "trafficAllocation": [
                        {"entityId": "expA", "endOfRange": 5000},
                        {"entityId": "expB", "endOfRange": 10000}
                    ],
                    "experiments": [
                        {"id": "expA", "key": "a", "status": "Running",
                         "variations": [{"id": "a1", "key": "a1"}],
                         "trafficAllocation": [{"entityId": "a1", "endOfRange": 10000}]},
                        {"id": "expB", "key": "b", "status": "Running",
                         "variations": [{"id": "b1", "key": "b1"}],
                         "trafficAllocation": [{"entityId": "b1", "endOfRange": 10000}]}
                    ]
                }, {
                    "id": "group2", "policy": "overlapping",
                    "trafficAllocation": [],
                    "experiments": [
                        {"id": "expC", "key": "c", "status": "Running",
                         "variations": [{"id": "c1", "key": "c1"}],
                         "trafficAllocation": [{"entityId": "c1", "endOfRange": 10000}]}
                    ]
                }]
            }"#,
        )
        .unwrap()
    }

    fn experiment<'a>(config: &'a ProjectConfig, key: &str) -> &'a Experiment {
        config.experiment_by_key(key).unwrap()
    }

    #[test]
    fn bucketing_is_deterministic() {
        let config = config();
        let bucketer = Bucketer::new();
        let exp = experiment(&config, "exp");
        let mut reasons = DecisionReasons::default();

        let first = bucketer
            .bucket_experiment(&config, exp, "user1", &mut reasons)
            .map(|v| v.key.clone());
        assert!(first.is_some());
        for _ in 0..10_000 {
            let next = bucketer.bucket_experiment(&config, exp, "user1", &mut reasons);
            assert_eq!(next.map(|v| &v.key), first.as_ref());
        }
    }

    #[test]
    fn random_group_excludes_other_experiments() {
        let config = config();
        let bucketer = Bucketer::new();
        let mut reasons = DecisionReasons::default();

        // "user3group1" falls into bucket 3734, which the group assigns to experiment A.
        let a = bucketer.bucket_experiment(&config, experiment(&config, "a"), "user3", &mut reasons);
        let b = bucketer.bucket_experiment(&config, experiment(&config, "b"), "user3", &mut reasons);
        assert_eq!(a.map(|v| v.key.as_str()), Some("a1"));
        assert_eq!(b, None);

        // "user1group1" falls into bucket 6285 and is routed to experiment B.
        let a = bucketer.bucket_experiment(&config, experiment(&config, "a"), "user1", &mut reasons);
        let b = bucketer.bucket_experiment(&config, experiment(&config, "b"), "user1", &mut reasons);
        assert_eq!(a, None);
        assert_eq!(b.map(|v| v.key.as_str()), Some("b1"));
    }

    #[test]
    fn overlapping_group_imposes_no_exclusion() {
        let config = config();
        let bucketer = Bucketer::new();
        let mut reasons = DecisionReasons::default();

        let c = bucketer.bucket_experiment(&config, experiment(&config, "c"), "user1", &mut reasons);
        assert_eq!(c.map(|v| v.key.as_str()), Some("c1"));
    }

    /// Sharder that always returns the same bucket.
    struct FixedSharder(u64);

    impl Sharder for FixedSharder {
        fn get_shard(&self, _input: impl AsRef<[u8]>, _total_shards: u64) -> u64 {
            self.0
        }
    }

    #[test]
    fn variation_is_resolved_from_bucket_value() {
        let config = config();
        let exp = experiment(&config, "exp");

        let low = Bucketer::with_sharder(FixedSharder(5000)).bucket_to_variation(exp, "user");
        let high = Bucketer::with_sharder(FixedSharder(5001)).bucket_to_variation(exp, "user");
        assert_eq!(low.map(|v| v.key.as_str()), Some("a"));
        assert_eq!(high.map(|v| v.key.as_str()), Some("b"));
    }

    #[test]
    fn group_without_traffic_does_not_bucket() {
        let config = config();
        let mut reasons = DecisionReasons::default();

        // Group allocation ends at 10000, so a value of 10000 is outside every range.
        let bucketer = Bucketer::with_sharder(FixedSharder(MAX_TRAFFIC_VALUE));
        let a = bucketer.bucket_experiment(&config, experiment(&config, "a"), "user", &mut reasons);
        assert_eq!(a, None);
    }
}
