//! Feature flag and experimentation decision engine compatible with Optimizely datafiles.
//!
//! # Overview
//!
//! The crate revolves around a [`Client`] that decides feature flags for users. A user is
//! described by a [`UserContext`]: a user id, [`Attributes`] used for audience targeting, and
//! optional forced decisions. Deciding a flag results in a [`Decision`] naming the variation the
//! user is bucketed into, whether the flag is enabled for them, and the flag's variable values.
//!
//! Decisions are made locally against a datafile passed to [`Client::update_datafile`]. Fetching
//! datafiles and dispatching events are left to the application. A [`DecisionLogger`] can be
//! provided to receive every decision, and a [`UserProfileService`] to make experiment bucketing
//! sticky.
//!
//! Bucketing is deterministic and uses MurmurHash3, so the same user lands in the same variation
//! across SDKs sharing a datafile.
//!
//! # Error Handling
//!
//! Errors are represented by the [`Error`] enum.
//!
//! Problems found in the datafile or in a decision request never fail a decision. They result in
//! a decision without a variation and are listed in [`Decision::reasons`]. The only error a
//! decision returns is [`Error::NotReady`], when no datafile has been loaded yet.
//!
//! # Logging
//!
//! The package uses the [`log`](https://docs.rs/log/latest/log/) crate for logging messages under
//! the `optimizely` target. Consider integrating a `log`-compatible logger implementation for
//! better visibility into decisions.
//!
//! # Examples
//!
//! ```
//! # use optimizely::{ClientConfig, UserContext};
//! let client = ClientConfig::from_sdk_key("sdk-key").to_client();
//! client.update_datafile(br#"{"version": "4", "revision": "1"}"#)?;
//!
//! let user = UserContext::new("user-1", [("country".to_owned(), "US".into())].into());
//! let decision = client.decide(&user, "checkout", &[])?;
//! assert!(!decision.enabled);
//! # Ok::<(), optimizely::Error>(())
//! ```
//!
//! A complete example can be found in the `demos/simple` directory of the crate repository.

#![warn(rustdoc::missing_crate_level_docs)]

mod attributes;
pub mod audience;
pub mod bucketer;
mod client;
mod config;
mod configuration_store;
pub mod datafile;
pub mod decision;
mod decision_logger;
mod error;
mod forced_variations;
mod guarded_cell;
mod project_config;
pub mod sharder;
mod user_context;
mod user_profile;

pub use attributes::{AttributeValue, Attributes, BUCKETING_ID_ATTRIBUTE};
pub use client::Client;
pub use config::ClientConfig;
pub use decision::{DecideOption, Decision, DecisionSource, VariableValue};
pub use decision_logger::{DecisionEvent, DecisionLogger};
pub use error::{Error, Result};
pub use project_config::ProjectConfig;
pub use user_context::{ForcedDecisionKey, UserContext};
pub use user_profile::{InMemoryUserProfileService, UserProfile, UserProfileService};
