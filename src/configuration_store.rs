use std::sync::{Arc, RwLock};

use crate::ProjectConfig;

/// `ConfigurationStore` provides a Sync storage for the current [`ProjectConfig`] that allows
/// concurrent access for readers and writers.
///
/// Readers get an `Arc` snapshot and keep using it for the whole call, so a concurrent update
/// never mixes two datafile revisions within one decision.
#[derive(Debug, Default)]
pub struct ConfigurationStore {
    configuration: RwLock<Option<Arc<ProjectConfig>>>,
}

impl ConfigurationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_configuration(&self) -> Option<Arc<ProjectConfig>> {
        // Err() is only possible if a writer panicked while holding the lock. Using .ok()? here to
        // not crash the app.
        let configuration = self.configuration.read().ok()?;
        configuration.clone()
    }

    /// Set new configuration, returning the previous one.
    pub fn set_configuration(&self, config: ProjectConfig) -> Option<Arc<ProjectConfig>> {
        // Constructing new value before requesting the lock to minimize lock span.
        let new_value = Some(Arc::new(config));

        let mut configuration_slot = self.configuration.write().ok()?;
        std::mem::replace(&mut configuration_slot, new_value)
    }
}
