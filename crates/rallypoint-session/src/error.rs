//! Error types for the session layer.

/// Errors returned by a [`KeyValueStorage`](crate::KeyValueStorage).
///
/// The store never lets these escape during restore or persistence: a
/// failed read means "no prior session" and a failed write is logged. They
/// are still typed so storage implementations can be tested on their own.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// The backing store refused the operation (disabled, over quota,
    /// private browsing, no data directory...).
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    /// Reading or writing the backing file failed.
    #[error("storage I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that can occur while mutating the session.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// `set_auth` or `update_token` was handed an empty access token.
    /// Accepting it would produce an "authenticated" session that can't
    /// authenticate anything.
    #[error("access token must not be empty")]
    EmptyAccessToken,

    /// The session could not be serialized for storage.
    #[error("could not encode session: {0}")]
    Encode(#[from] serde_json::Error),

    /// The storage backend failed.
    #[error(transparent)]
    Storage(#[from] StorageError),
}
