use crate::{
    decision_logger::NoopDecisionLogger, user_profile::NoopUserProfileService, Client,
    DecideOption, DecisionLogger, UserProfileService,
};

/// Configuration for [`Client`].
pub struct ClientConfig<'a> {
    pub(crate) sdk_key: String,
    pub(crate) user_profile_service: Box<dyn UserProfileService + Send + Sync + 'a>,
    pub(crate) decision_logger: Box<dyn DecisionLogger + Send + Sync + 'a>,
    pub(crate) default_decide_options: Vec<DecideOption>,
}

impl<'a> ClientConfig<'a> {
    /// Create a default configuration for the specified SDK key.
    ///
    /// The key is only reported in decision event metadata. Datafiles are passed to the client
    /// explicitly with [`Client::update_datafile`].
    ///
    /// ```
    /// # use optimizely::ClientConfig;
    /// ClientConfig::from_sdk_key("sdk-key");
    /// ```
    pub fn from_sdk_key(sdk_key: impl Into<String>) -> Self {
        ClientConfig {
            sdk_key: sdk_key.into(),
            user_profile_service: Box::new(NoopUserProfileService),
            decision_logger: Box::new(NoopDecisionLogger),
            default_decide_options: Vec::new(),
        }
    }

    /// Set user profile service to make experiment bucketing sticky.
    ///
    /// ```
    /// # use optimizely::{ClientConfig, InMemoryUserProfileService};
    /// let mut config = ClientConfig::from_sdk_key("sdk-key");
    /// config.user_profile_service(InMemoryUserProfileService::new());
    /// ```
    pub fn user_profile_service(
        &mut self,
        user_profile_service: impl UserProfileService + Send + Sync + 'a,
    ) -> &mut Self {
        self.user_profile_service = Box::new(user_profile_service);
        self
    }

    /// Set decision logger to pass flag decisions to your data warehouse.
    ///
    /// ```
    /// # use optimizely::{ClientConfig, DecisionEvent};
    /// let config = ClientConfig::from_sdk_key("sdk-key").decision_logger(|event: DecisionEvent| {
    ///   println!("{:?}", event);
    /// });
    /// ```
    pub fn decision_logger(
        &mut self,
        decision_logger: impl DecisionLogger + Send + Sync + 'a,
    ) -> &mut Self {
        self.decision_logger = Box::new(decision_logger);
        self
    }

    /// Options applied to every decision in addition to the ones passed per call.
    pub fn default_decide_options(
        &mut self,
        options: impl IntoIterator<Item = DecideOption>,
    ) -> &mut Self {
        self.default_decide_options = options.into_iter().collect();
        self
    }

    /// Create a new [`Client`] using the specified configuration.
    ///
    /// ```
    /// # use optimizely::{ClientConfig, Client};
    /// let client: Client = ClientConfig::from_sdk_key("sdk-key").to_client();
    /// ```
    pub fn to_client(self) -> Client<'a> {
        Client::new(self)
    }
}
