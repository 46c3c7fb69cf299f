//! Unified error type for the Rallypoint session engine.

use rallypoint_activity::TrackerError;
use rallypoint_session::{SessionError, StorageError};
use rallypoint_token::TokenError;

use crate::api::ApiError;

/// Top-level error that wraps all crate-specific errors.
///
/// When using the `rallypoint` meta-crate you deal with this single error
/// type instead of importing errors from each sub-crate. The `#[from]`
/// attribute on each variant lets `?` convert sub-crate errors.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// A token could not be decoded.
    #[error(transparent)]
    Token(#[from] TokenError),

    /// A session mutation was rejected.
    #[error(transparent)]
    Session(#[from] SessionError),

    /// The storage backend failed.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// An interaction source failed.
    #[error(transparent)]
    Tracker(#[from] TrackerError),

    /// The auth API answered with an error.
    #[error(transparent)]
    Api(#[from] ApiError),

    /// A login attempt failed. The message is the one shown to the member
    /// and is also left in the session's `error` field.
    #[error("{0}")]
    LoginFailed(String),

    /// An [`EngineConfig`](crate::EngineConfig) document did not parse.
    #[error("invalid configuration: {0}")]
    Config(#[from] serde_json::Error),
}
