//! Engine-wide configuration.

use serde::{Deserialize, Serialize};

use rallypoint_activity::TrackerConfig;
use rallypoint_session::SessionConfig;
use rallypoint_token::DEFAULT_EXPIRY_SKEW_SECS;

use crate::EngineError;

/// Where the login screen lives, for route-guard redirects.
pub const DEFAULT_LOGIN_PATH: &str = "/login";

/// Configuration for a [`SessionEngine`](crate::SessionEngine).
///
/// Every field has a default, so a JSON document only needs the fields
/// it changes:
///
/// ```rust
/// use std::time::Duration;
/// use rallypoint::EngineConfig;
///
/// let config = EngineConfig::from_json_str(
///     r#"{ "tracker": { "idle_timeout_secs": 900 } }"#,
/// ).unwrap();
/// assert_eq!(config.tracker.idle_timeout, Duration::from_secs(900));
/// assert_eq!(config.session.storage_key, "auth-storage");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub session: SessionConfig,
    pub tracker: TrackerConfig,
    /// Seconds before `exp` at which an access token is treated as
    /// expired and refreshed.
    pub expiry_skew_secs: i64,
    pub login_path: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            session: SessionConfig::default(),
            tracker: TrackerConfig::default(),
            expiry_skew_secs: DEFAULT_EXPIRY_SKEW_SECS,
            login_path: DEFAULT_LOGIN_PATH.to_string(),
        }
    }
}

impl EngineConfig {
    /// Parses a JSON document. Missing fields take their defaults.
    ///
    /// # Errors
    /// [`EngineError::Config`] if the document is not valid JSON or a
    /// field has the wrong type.
    pub fn from_json_str(json: &str) -> Result<Self, EngineError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Clamps values that would make the engine misbehave.
    pub fn validated(mut self) -> Self {
        self.tracker = self.tracker.validated();
        if self.expiry_skew_secs < 0 {
            tracing::warn!(
                expiry_skew_secs = self.expiry_skew_secs,
                "negative expiry skew, using 0"
            );
            self.expiry_skew_secs = 0;
        }
        self
    }
}
