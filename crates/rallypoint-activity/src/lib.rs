//! User-activity tracking for Rallypoint sessions.
//!
//! While a member is signed in, the [`ActivityTracker`] listens for
//! interaction signals (pointer, keyboard, click, scroll, touch), stamps
//! the session's last-activity time on each one, and runs a coarse idle
//! check that signs the member out once they've been away longer than the
//! configured timeout.
//!
//! # States
//!
//! ```text
//!   Disarmed ──(session authenticated / start_tracking)──→ Armed
//!      ↑                                                     │
//!      └──(session cleared / stop_tracking / idle timeout)───┘
//! ```
//!
//! # Integration
//!
//! Exactly one tracker per application. Startup code builds it and binds
//! it to the store, which then arms and disarms it on login and logout:
//!
//! ```ignore
//! let store = Arc::new(SessionStore::open(storage, SessionConfig::default()));
//! let bus = Arc::new(EventBus::new());
//! let tracker = ActivityTracker::new(store.clone(), bus.clone(), TrackerConfig::default());
//! tracker.bind();
//!
//! // host glue: forward raw UI events
//! bus.emit(InteractionKind::Click);
//! ```
//!
//! The tracker is best-effort UX. If no event target exists (a headless
//! context) or no async runtime is running, it logs and carries on with
//! whatever it could set up. The server remains the authority on whether a
//! token is still good.

mod error;
mod source;
mod tracker;

pub use error::TrackerError;
pub use source::{
    DetachedSource, EventBus, InteractionHandler, InteractionKind, InteractionSource, ListenerId,
};
pub use tracker::{ActivityTracker, IdleCheck, TrackerConfig};
