use std::sync::Arc;

use thiserror::Error;

/// Result type used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the public API.
///
/// Problems found inside a datafile (dangling ids, empty traffic allocations) are never reported
/// through this type. They resolve to "no decision" with reasons attached instead.
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum Error {
    /// Datafile is not valid JSON or does not match the expected shape.
    // serde_json::Error is not clonable, so we're wrapping it in an Arc.
    #[error("invalid datafile")]
    InvalidDatafile(#[source] Arc<serde_json::Error>),

    /// Datafile schema version is not supported by this SDK.
    #[error("unsupported datafile version: {0}")]
    UnsupportedDatafileVersion(String),

    /// A decision was requested before any datafile has been loaded.
    #[error("sdkNotReady")]
    NotReady,

    /// No flag with this key exists in the current datafile. Reported as a decision reason.
    #[error("No flag was found for key \"{0}\".")]
    InvalidFlagKey(String),

    /// No experiment with this key exists in the current datafile.
    #[error("experiment key \"{0}\" is not in datafile")]
    InvalidExperimentKey(String),

    /// Variation key is empty or does not belong to the experiment.
    #[error("variation key \"{variation_key}\" is not valid for experiment \"{experiment_key}\"")]
    InvalidVariationKey {
        /// Experiment the variation was looked up in.
        experiment_key: String,
        /// Offending variation key.
        variation_key: String,
    },

    /// Forced decision was rejected (e.g., empty variation key).
    #[error("invalid forced decision")]
    InvalidForcedDecision,
}

impl From<serde_json::Error> for Error {
    fn from(value: serde_json::Error) -> Self {
        Self::InvalidDatafile(Arc::new(value))
    }
}
