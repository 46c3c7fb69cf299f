//! Error types for the activity layer.
//!
//! These only cross the [`InteractionSource`](crate::InteractionSource)
//! boundary. The tracker itself logs them and degrades; its public methods
//! never return them.

use crate::ListenerId;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TrackerError {
    /// There is nothing to attach listeners to (no window, no document).
    #[error("no event target available")]
    NoEventTarget,

    /// `detach` was called with an id the source never issued, or one
    /// that was already detached.
    #[error("unknown listener {0}")]
    UnknownListener(ListenerId),
}
