//! Sticky bucketing support.
use std::{collections::HashMap, sync::Arc};

use crate::guarded_cell::GuardedCell;

/// Experiment id to variation id of previous bucketing decisions for one user.
pub type UserProfile = HashMap<String, String>;

/// Storage of previous bucketing decisions.
///
/// Once a user has been bucketed into an experiment, the same variation is returned for that
/// experiment even if its traffic allocation changes later. Implementations are called from the
/// decision path, so they should be fast and must not call back into the client.
pub trait UserProfileService {
    /// Return profile of the user, if any.
    fn lookup(&self, user_id: &str) -> Option<UserProfile>;

    /// Remember that the user was bucketed into a variation of an experiment.
    fn save(&self, user_id: &str, experiment_id: &str, variation_id: &str);
}

/// Default service that remembers nothing.
pub(crate) struct NoopUserProfileService;

impl UserProfileService for NoopUserProfileService {
    fn lookup(&self, _user_id: &str) -> Option<UserProfile> {
        None
    }

    fn save(&self, _user_id: &str, _experiment_id: &str, _variation_id: &str) {}
}

impl<T: UserProfileService + ?Sized> UserProfileService for Arc<T> {
    fn lookup(&self, user_id: &str) -> Option<UserProfile> {
        (**self).lookup(user_id)
    }

    fn save(&self, user_id: &str, experiment_id: &str, variation_id: &str) {
        (**self).save(user_id, experiment_id, variation_id)
    }
}

/// Process-local user profiles.
///
/// ```
/// # use optimizely::{InMemoryUserProfileService, UserProfileService};
/// let service = InMemoryUserProfileService::new();
/// service.save("user", "experiment", "variation");
/// assert_eq!(service.lookup("user").unwrap()["experiment"], "variation");
/// ```
#[derive(Debug, Default)]
pub struct InMemoryUserProfileService {
    profiles: GuardedCell<HashMap<String, UserProfile>>,
}

impl InMemoryUserProfileService {
    pub fn new() -> Self {
        Self::default()
    }
}

impl UserProfileService for InMemoryUserProfileService {
    fn lookup(&self, user_id: &str) -> Option<UserProfile> {
        self.profiles.with(|profiles| profiles.get(user_id).cloned())
    }

    fn save(&self, user_id: &str, experiment_id: &str, variation_id: &str) {
        self.profiles.with(|profiles| {
            profiles
                .entry(user_id.to_owned())
                .or_default()
                .insert(experiment_id.to_owned(), variation_id.to_owned());
        });
    }
}

/// Loads the user profile at most once per decision, and only when an experiment rule actually
/// needs it.
pub(crate) struct UserProfileTracker<'a> {
    service: &'a dyn UserProfileService,
    user_id: &'a str,
    profile: Option<UserProfile>,
    loaded: bool,
}

impl<'a> UserProfileTracker<'a> {
    pub fn new(service: &'a dyn UserProfileService, user_id: &'a str) -> Self {
        UserProfileTracker {
            service,
            user_id,
            profile: None,
            loaded: false,
        }
    }

    pub fn variation_id(&mut self, experiment_id: &str) -> Option<&str> {
        if !self.loaded {
            self.profile = self.service.lookup(self.user_id);
            self.loaded = true;
        }
        self.profile
            .as_ref()?
            .get(experiment_id)
            .map(String::as_str)
    }

    /// Write-through save.
    pub fn save(&mut self, experiment_id: &str, variation_id: &str) {
        self.service.save(self.user_id, experiment_id, variation_id);
        self.profile
            .get_or_insert_with(UserProfile::new)
            .insert(experiment_id.to_owned(), variation_id.to_owned());
    }
}
