//! Client-side session management for Rallypoint.
//!
//! This crate owns the answer to "who is logged in on this device":
//!
//! 1. **Session data**: the signed-in user, their credential, and the
//!    device id ([`UserProfile`], [`Credential`], [`SessionSnapshot`])
//! 2. **Session store**: the single place that mutates that data
//!    ([`SessionStore`]) and tells subscribers about it ([`SessionEvent`])
//! 3. **Persistence**: a whitelisted subset of the session written to a
//!    key-value store ([`KeyValueStorage`]) and restored at startup
//!
//! # How it fits in the stack
//!
//! ```text
//! Facade / Activity Tracker (above)  ← call store methods, subscribe
//!     ↕
//! Session Layer (this crate)  ← owns session fields, persists them
//!     ↕
//! Token Layer (below)  ← decodes claims when asked about expiry
//! ```

mod error;
mod session;
mod storage;
mod store;

pub use error::{SessionError, StorageError};
pub use session::{
    AUTH_STORAGE_KEY, Credential, LogoutReason, PersistedSession, SessionConfig,
    SessionEvent, SessionSnapshot, UserId, UserPatch, UserProfile,
};
pub use storage::{FileStorage, KeyValueStorage, MemoryStorage, UnavailableStorage};
pub use store::{SessionStore, SubscriptionId};
