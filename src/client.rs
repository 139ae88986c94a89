use std::{collections::HashMap, sync::Arc};

use crate::{
    configuration_store::ConfigurationStore,
    decision::{variable_map, DecideOptions, DecisionReasons, DecisionService},
    ClientConfig, DecideOption, Decision, DecisionEvent, DecisionLogger, Error, ProjectConfig,
    Result, UserContext,
};

/// A client making flag decisions against the most recently loaded datafile.
///
/// In order to create a client instance, first create [`ClientConfig`].
///
/// # Examples
/// ```
/// # use optimizely::{Client, ClientConfig};
/// Client::new(ClientConfig::from_sdk_key("sdk-key"));
/// ```
pub struct Client<'a> {
    configuration_store: Arc<ConfigurationStore>,
    decision_service: DecisionService<'a>,
    decision_logger: Box<dyn DecisionLogger + Send + Sync + 'a>,
    sdk_key: String,
    default_decide_options: Vec<DecideOption>,
}

impl<'a> Client<'a> {
    /// Create a new `Client` using the specified configuration.
    ///
    /// ```
    /// # use optimizely::{Client, ClientConfig};
    /// let client = Client::new(ClientConfig::from_sdk_key("sdk-key"));
    /// ```
    pub fn new(config: ClientConfig<'a>) -> Self {
        Self::new_with_configuration_store(config, Arc::new(ConfigurationStore::new()))
    }

    fn new_with_configuration_store(
        config: ClientConfig<'a>,
        configuration_store: Arc<ConfigurationStore>,
    ) -> Self {
        let ClientConfig {
            sdk_key,
            user_profile_service,
            decision_logger,
            default_decide_options,
        } = config;

        Client {
            configuration_store,
            decision_service: DecisionService::new(user_profile_service),
            decision_logger,
            sdk_key,
            default_decide_options,
        }
    }

    /// Parse a datafile and make it the current configuration.
    ///
    /// Decisions in progress finish against the configuration they started with. If the datafile
    /// is rejected, the previous configuration (if any) stays active.
    pub fn update_datafile(&self, datafile: &[u8]) -> Result<()> {
        let config = ProjectConfig::from_json(datafile).inspect_err(|err| {
            log::warn!(target: "optimizely",
                       sdk_key = self.sdk_key;
                       "rejected datafile, keeping previous configuration: {err}");
        })?;

        let revision = config.revision().to_owned();
        let previous = self.configuration_store.set_configuration(config);
        log::info!(target: "optimizely",
                   sdk_key = self.sdk_key,
                   revision,
                   previous_revision = previous.as_ref().map(|c| c.revision());
                   "updated datafile");
        Ok(())
    }

    /// Snapshot of the current configuration, if a datafile has been loaded.
    pub fn project_config(&self) -> Option<Arc<ProjectConfig>> {
        self.configuration_store.get_configuration()
    }

    /// Decide a flag for the user.
    ///
    /// Returns [`Error::NotReady`] if no datafile has been loaded yet. Every other problem
    /// (unknown flag, broken datafile references) results in a decision without a variation and
    /// with the problem listed in its reasons.
    ///
    /// ```
    /// # use optimizely::{Client, ClientConfig, Error, UserContext};
    /// let client = ClientConfig::from_sdk_key("sdk-key").to_client();
    /// let user = UserContext::new("user-1", Default::default());
    /// assert!(matches!(client.decide(&user, "flag", &[]), Err(Error::NotReady)));
    /// ```
    pub fn decide(
        &self,
        user: &UserContext,
        flag_key: &str,
        options: &[DecideOption],
    ) -> Result<Decision> {
        let config = self.ready_configuration(user)?;
        let options = self.decide_options(options);
        Ok(self.decide_with_config(&config, user, flag_key, &options))
    }

    /// Decide several flags against the same configuration snapshot.
    pub fn decide_for_keys(
        &self,
        user: &UserContext,
        flag_keys: &[&str],
        options: &[DecideOption],
    ) -> Result<HashMap<String, Decision>> {
        let config = self.ready_configuration(user)?;
        let options = self.decide_options(options);
        Ok(self.decide_many(&config, user, flag_keys.iter().copied(), &options))
    }

    /// Decide every flag of the current datafile.
    pub fn decide_all(
        &self,
        user: &UserContext,
        options: &[DecideOption],
    ) -> Result<HashMap<String, Decision>> {
        let config = self.ready_configuration(user)?;
        let options = self.decide_options(options);
        Ok(self.decide_many(&config, user, config.flag_keys(), &options))
    }

    /// Variation key of the user in a single experiment.
    ///
    /// Does not pass anything to the decision logger.
    pub fn variation(&self, experiment_key: &str, user: &UserContext) -> Result<Option<String>> {
        let config = self.ready_configuration(user)?;
        let Some(experiment) = config.experiment_by_key(experiment_key) else {
            log::warn!(target: "optimizely",
                       experiment_key,
                       user_id = user.user_id();
                       "experiment is not in datafile");
            return Ok(None);
        };

        let options = self.decide_options(&[]);
        let response = self
            .decision_service
            .get_variation(&config, experiment, user, &options);
        Ok(response.result.map(|v| v.key.clone()))
    }

    /// Force a variation for the user in an experiment, or remove the override if
    /// `variation_key` is `None`.
    ///
    /// The override outlives datafile updates, but it is ignored while the current datafile has
    /// no matching variation.
    pub fn set_forced_variation(
        &self,
        experiment_key: &str,
        user_id: &str,
        variation_key: Option<&str>,
    ) -> Result<()> {
        let config = self.configuration_store.get_configuration().ok_or(Error::NotReady)?;
        self.decision_service
            .set_forced_variation(&config, experiment_key, user_id, variation_key)
            .inspect_err(|err| {
                log::warn!(target: "optimizely",
                           experiment_key,
                           user_id;
                           "rejected forced variation: {err}");
            })
    }

    pub fn forced_variation(&self, experiment_key: &str, user_id: &str) -> Result<Option<String>> {
        let config = self.configuration_store.get_configuration().ok_or(Error::NotReady)?;
        Ok(self
            .decision_service
            .forced_variation(&config, experiment_key, user_id)
            .map(|v| v.key.clone()))
    }

    fn ready_configuration(&self, user: &UserContext) -> Result<Arc<ProjectConfig>> {
        self.configuration_store.get_configuration().ok_or_else(|| {
            log::warn!(target: "optimizely",
                       user_id = user.user_id();
                       "deciding before a datafile has been loaded");
            Error::NotReady
        })
    }

    fn decide_options(&self, options: &[DecideOption]) -> DecideOptions {
        self.default_decide_options
            .iter()
            .chain(options)
            .copied()
            .collect()
    }

    fn decide_many<'k>(
        &self,
        config: &ProjectConfig,
        user: &UserContext,
        flag_keys: impl IntoIterator<Item = &'k str>,
        options: &DecideOptions,
    ) -> HashMap<String, Decision> {
        let enabled_only = options.contains(&DecideOption::EnabledFlagsOnly);
        flag_keys
            .into_iter()
            .map(|flag_key| self.decide_with_config(config, user, flag_key, options))
            .filter(|decision| !enabled_only || decision.enabled)
            .map(|decision| (decision.flag_key.clone(), decision))
            .collect()
    }

    fn decide_with_config(
        &self,
        config: &ProjectConfig,
        user: &UserContext,
        flag_key: &str,
        options: &DecideOptions,
    ) -> Decision {
        let user_id = user.user_id();
        let mut reasons = DecisionReasons::new(options.contains(&DecideOption::IncludeReasons));

        let Some(flag) = config.flag_by_key(flag_key) else {
            reasons.add_error(Error::InvalidFlagKey(flag_key.to_owned()).to_string());
            return Decision::error(flag_key, user_id, reasons.into_vec());
        };

        let feature_decision =
            self.decision_service
                .decide_feature(config, flag_key, user, options, &mut reasons);
        let variation = feature_decision.map(|d| d.variation);
        let enabled = variation.and_then(|v| v.feature_enabled).unwrap_or(false);

        let variables = if options.contains(&DecideOption::ExcludeVariables) {
            HashMap::new()
        } else {
            variable_map(flag, variation, enabled, &mut reasons)
        };

        let decision = Decision {
            variation_key: variation.map(|v| v.key.clone()),
            enabled,
            variables,
            rule_key: feature_decision.and_then(|d| d.rule_key).map(str::to_owned),
            flag_key: flag_key.to_owned(),
            user_id: user_id.to_owned(),
            source: feature_decision.map(|d| d.source),
            reasons: reasons.into_vec(),
        };

        log::trace!(target: "optimizely",
                    flag_key,
                    user_id,
                    attributes:serde = user.attributes(),
                    decision:serde = decision;
                    "decided a flag");

        if decision.variation_key.is_some()
            && !options.contains(&DecideOption::DisableDecisionEvent)
        {
            let event = self.decision_event(config, user, &decision);
            log::trace!(target: "optimizely",
                        event:serde = event;
                        "logging decision");
            self.decision_logger.log_decision(event);
        }

        decision
    }

    fn decision_event(
        &self,
        config: &ProjectConfig,
        user: &UserContext,
        decision: &Decision,
    ) -> DecisionEvent {
        DecisionEvent {
            flag_key: decision.flag_key.clone(),
            rule_key: decision.rule_key.clone(),
            variation_key: decision.variation_key.clone(),
            source: decision.source,
            enabled: decision.enabled,
            user_id: decision.user_id.clone(),
            attributes: user.attributes().clone(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            meta_data: HashMap::from([
                ("sdkLanguage".to_owned(), "rust".to_owned()),
                (
                    "sdkVersion".to_owned(),
                    env!("CARGO_PKG_VERSION").to_owned(),
                ),
                ("sdkKey".to_owned(), self.sdk_key.clone()),
                ("revision".to_owned(), config.revision().to_owned()),
            ]),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        fs::File,
        io::Read,
        sync::{
            atomic::{AtomicBool, Ordering},
            Arc, Mutex,
        },
    };

    use serde_json::json;

    use crate::{
        configuration_store::ConfigurationStore, user_profile::UserProfile, ClientConfig,
        DecideOption, DecisionEvent, DecisionSource, Error, ProjectConfig, UserContext,
        UserProfileService,
    };

    use super::Client;

    /// Flag `flag` with a single experiment sending all traffic to `variation_id`.
    fn datafile(revision: &str, variation_id: &str) -> Vec<u8> {
        serde_json::to_vec(&json!({
            "version": "4",
            "revision": revision,
            "experiments": [{
                "id": "e1", "key": "exp1", "status": "Running", "layerId": "layer",
                "variations": [
                    {"id": "v1", "key": "one", "featureEnabled": true,
                     "variables": [{"id": "title", "value": "One"}]},
                    {"id": "v2", "key": "two", "featureEnabled": false}
                ],
                "trafficAllocation": [{"entityId": variation_id, "endOfRange": 10000}]
            }],
            "featureFlags": [
                {"id": "f1", "key": "flag", "rolloutId": "", "experimentIds": ["e1"],
                 "variables": [{"id": "title", "key": "title", "type": "string", "defaultValue": "Default"}]},
                {"id": "f2", "key": "empty", "rolloutId": "", "experimentIds": [], "variables": []}
            ]
        }))
        .unwrap()
    }

    fn user() -> UserContext {
        UserContext::new("user", Default::default())
    }

    fn client() -> Client<'static> {
        let client = ClientConfig::from_sdk_key("sdk-key").to_client();
        client.update_datafile(&datafile("1", "v1")).unwrap();
        client
    }

    #[test]
    fn returns_not_ready_while_no_configuration() {
        let _ = env_logger::builder().is_test(true).try_init();

        let client = ClientConfig::from_sdk_key("sdk-key").to_client();

        assert!(matches!(
            client.decide(&user(), "flag", &[]),
            Err(Error::NotReady)
        ));
        assert!(matches!(client.decide_all(&user(), &[]), Err(Error::NotReady)));
        assert!(matches!(
            client.set_forced_variation("exp1", "user", Some("two")),
            Err(Error::NotReady)
        ));
    }

    #[test]
    fn decides_flag_with_variables() {
        let _ = env_logger::builder().is_test(true).try_init();

        let decision = client().decide(&user(), "flag", &[]).unwrap();

        assert_eq!(decision.variation_key.as_deref(), Some("one"));
        assert!(decision.enabled);
        assert_eq!(decision.rule_key.as_deref(), Some("exp1"));
        assert_eq!(decision.source, Some(DecisionSource::Experiment));
        assert_eq!(decision.variables["title"].as_str(), Some("One"));
        assert!(decision.reasons.is_empty());

        let decision = client()
            .decide(&user(), "flag", &[DecideOption::ExcludeVariables])
            .unwrap();
        assert!(decision.variables.is_empty());
    }

    #[test]
    fn unknown_flag_is_reported_in_reasons() {
        let decision = client().decide(&user(), "missing", &[]).unwrap();

        assert_eq!(decision.variation_key, None);
        assert!(!decision.enabled);
        assert_eq!(
            decision.reasons,
            ["No flag was found for key \"missing\"."]
        );
    }

    #[test]
    fn rejected_datafile_keeps_previous_configuration() {
        let client = client();

        assert!(matches!(
            client.update_datafile(b"{not json"),
            Err(Error::InvalidDatafile(_))
        ));
        assert!(matches!(
            client.update_datafile(br#"{"version": "3"}"#),
            Err(Error::UnsupportedDatafileVersion(_))
        ));
        assert_eq!(client.project_config().unwrap().revision(), "1");
    }

    #[test]
    fn decide_all_filters_disabled_flags() {
        let client = client();

        let all = client.decide_all(&user(), &[]).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all["empty"].variation_key, None);

        let enabled = client
            .decide_all(&user(), &[DecideOption::EnabledFlagsOnly])
            .unwrap();
        assert_eq!(enabled.keys().map(String::as_str).collect::<Vec<_>>(), ["flag"]);

        let some = client
            .decide_for_keys(&user(), &["flag", "missing"], &[])
            .unwrap();
        assert_eq!(some.len(), 2);
        assert_eq!(some["missing"].reasons.len(), 1);
    }

    #[test]
    fn logs_decision_events() {
        let events = Mutex::new(Vec::<DecisionEvent>::new());
        let mut config = ClientConfig::from_sdk_key("sdk-key");
        config.decision_logger(|event: DecisionEvent| events.lock().unwrap().push(event));
        let client = config.to_client();
        client.update_datafile(&datafile("1", "v1")).unwrap();

        client.decide(&user(), "flag", &[]).unwrap();
        client.decide(&user(), "empty", &[]).unwrap();
        client
            .decide(&user(), "flag", &[DecideOption::DisableDecisionEvent])
            .unwrap();
        drop(client);

        let events = events.into_inner().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].flag_key, "flag");
        assert_eq!(events[0].variation_key.as_deref(), Some("one"));
        assert_eq!(events[0].source, Some(DecisionSource::Experiment));
        assert_eq!(events[0].meta_data["sdkKey"], "sdk-key");
    }

    #[test]
    fn default_options_are_merged() {
        let mut config = ClientConfig::from_sdk_key("sdk-key");
        config.default_decide_options([DecideOption::IncludeReasons]);
        let client = config.to_client();
        client.update_datafile(&datafile("1", "v1")).unwrap();

        let decision = client.decide(&user(), "flag", &[]).unwrap();
        assert!(!decision.reasons.is_empty());
    }

    #[test]
    fn legacy_experiment_api() {
        let client = client();

        assert_eq!(
            client.variation("exp1", &user()).unwrap().as_deref(),
            Some("one")
        );
        assert_eq!(client.variation("missing", &user()).unwrap(), None);

        client
            .set_forced_variation("exp1", "user", Some("two"))
            .unwrap();
        assert_eq!(
            client.forced_variation("exp1", "user").unwrap().as_deref(),
            Some("two")
        );
        assert_eq!(
            client.variation("exp1", &user()).unwrap().as_deref(),
            Some("two")
        );

        let decision = client.decide(&user(), "flag", &[]).unwrap();
        assert_eq!(decision.source, Some(DecisionSource::FeatureTest));
        assert!(!decision.enabled);
        assert_eq!(decision.variables["title"].as_str(), Some("Default"));

        assert!(matches!(
            client.set_forced_variation("exp1", "user", Some("three")),
            Err(Error::InvalidVariationKey { .. })
        ));
        client.set_forced_variation("exp1", "user", None).unwrap();
        assert_eq!(client.forced_variation("exp1", "user").unwrap(), None);
    }

    #[test]
    fn concurrent_decisions_agree() {
        let client = client();

        let decisions: Vec<_> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    s.spawn(|| {
                        (0..100)
                            .map(|_| client.decide(&user(), "flag", &[]).unwrap())
                            .collect::<Vec<_>>()
                    })
                })
                .collect();
            handles
                .into_iter()
                .flat_map(|h| h.join().unwrap())
                .collect()
        });

        assert_eq!(decisions.len(), 800);
        assert!(decisions.iter().all(|d| d == &decisions[0]));
    }

    /// Publishes a new datafile the first time a profile is looked up, i.e. in the middle of a
    /// decision.
    struct SwappingProfileService {
        store: Arc<ConfigurationStore>,
        swapped: AtomicBool,
    }

    impl UserProfileService for SwappingProfileService {
        fn lookup(&self, _user_id: &str) -> Option<UserProfile> {
            if !self.swapped.swap(true, Ordering::SeqCst) {
                let next = ProjectConfig::from_json(&datafile("2", "v2")).unwrap();
                self.store.set_configuration(next);
            }
            None
        }

        fn save(&self, _user_id: &str, _experiment_id: &str, _variation_id: &str) {}
    }

    #[test]
    fn decision_uses_snapshot_taken_at_start() {
        let store = Arc::new(ConfigurationStore::new());
        let mut config = ClientConfig::from_sdk_key("sdk-key");
        config.user_profile_service(SwappingProfileService {
            store: store.clone(),
            swapped: AtomicBool::new(false),
        });
        let client = Client::new_with_configuration_store(config, store.clone());
        client.update_datafile(&datafile("1", "v1")).unwrap();

        let decision = client.decide(&user(), "flag", &[]).unwrap();
        assert_eq!(decision.variation_key.as_deref(), Some("one"));
        assert_eq!(store.get_configuration().unwrap().revision(), "2");

        let decision = client.decide(&user(), "flag", &[]).unwrap();
        assert_eq!(decision.variation_key.as_deref(), Some("two"));
    }

    fn fixture_client() -> Client<'static> {
        let mut json = Vec::new();
        File::open("tests/data/datafile.json")
            .unwrap()
            .read_to_end(&mut json)
            .unwrap();
        let client = ClientConfig::from_sdk_key("sdk-key").to_client();
        client.update_datafile(&json).unwrap();
        client
    }

    fn fixture_user(user_id: &str, attributes: serde_json::Value) -> UserContext {
        UserContext::new(user_id, serde_json::from_value(attributes).unwrap())
    }

    #[test]
    fn decides_fixture_flags() {
        let _ = env_logger::builder().is_test(true).try_init();

        let client = fixture_client();
        let decide = |user_id: &str, attributes: serde_json::Value| {
            let decision = client
                .decide(&fixture_user(user_id, attributes), "checkout", &[])
                .unwrap();
            (
                decision.rule_key.unwrap(),
                decision.variation_key.unwrap(),
                decision.enabled,
            )
        };

        assert_eq!(
            decide("alice", json!({"country": "US"})),
            ("checkout_test".to_owned(), "control".to_owned(), false)
        );
        assert_eq!(
            decide("erin", json!({"country": "US"})),
            ("checkout_test".to_owned(), "treatment".to_owned(), true)
        );
        assert_eq!(
            decide("bob", json!({"beta": true})),
            ("checkout_beta".to_owned(), "rollout_on".to_owned(), true)
        );
        assert_eq!(
            decide("erin", json!({"beta": true})),
            ("checkout_everyone".to_owned(), "rollout_off".to_owned(), false)
        );
        assert_eq!(
            decide("qa_user", json!({})),
            ("checkout_test".to_owned(), "treatment".to_owned(), true)
        );

        let decision = client
            .decide(&fixture_user("erin", json!({"country": "US"})), "checkout", &[])
            .unwrap();
        assert_eq!(decision.variables["button_color"].as_str(), Some("green"));
        assert_eq!(decision.variables["discount"].as_double(), Some(0.15));
        assert_eq!(
            decision.variables["layout"].as_json(),
            Some(&json!({"columns": 2}))
        );
    }

    #[test]
    fn mutually_exclusive_experiments_share_a_flag() {
        let client = fixture_client();

        let decision = client
            .decide(&fixture_user("bob", json!({})), "mutex_flag", &[])
            .unwrap();
        assert_eq!(decision.rule_key.as_deref(), Some("mutex_a"));

        let decision = client
            .decide(&fixture_user("carol", json!({})), "mutex_flag", &[])
            .unwrap();
        assert_eq!(decision.rule_key.as_deref(), Some("mutex_b"));
    }
}
