//! # Rallypoint
//!
//! Client-side session and authentication engine for the Rallypoint
//! membership platform.
//!
//! Rallypoint keeps track of who is signed in on this device, remembers it
//! across restarts, and signs the member out after a period without
//! interaction. UI code talks to an [`AuthFacade`] and a [`RouteGuard`];
//! the [`SessionEngine`] wires them to the store and the activity tracker.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use rallypoint::prelude::*;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), EngineError> {
//! rallypoint::telemetry::init_tracing();
//!
//! let bus = Arc::new(EventBus::new());
//! let engine = SessionEngine::builder()
//!     .storage(Arc::new(FileStorage::open("./data")?))
//!     .interaction_source(bus.clone())
//!     .build();
//!
//! // Forward UI events into `bus`, then:
//! // engine.auth().sign_in(&api, "a@example.org", "pw").await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Crates
//!
//! - [`token`]: access-token claims decoding.
//! - [`session`]: the session store and its storage backends.
//! - [`activity`]: interaction listeners and the idle timeout.

mod api;
mod config;
mod engine;
mod error;
mod facade;
mod guard;
pub mod telemetry;

pub use api::{ApiError, AuthApi, LoginRequest, LoginResponse};
pub use config::{DEFAULT_LOGIN_PATH, EngineConfig};
pub use engine::{SessionEngine, SessionEngineBuilder};
pub use error::EngineError;
pub use facade::AuthFacade;
pub use guard::{ADMIN_ROLE, GuardDecision, Requirement, RouteGuard};

pub use rallypoint_activity as activity;
pub use rallypoint_session as session;
pub use rallypoint_token as token;

/// The types most applications need.
pub mod prelude {
    pub use crate::{
        ApiError, AuthApi, AuthFacade, EngineConfig, EngineError, GuardDecision,
        LoginRequest, LoginResponse, Requirement, RouteGuard, SessionEngine,
    };
    pub use rallypoint_activity::{
        ActivityTracker, DetachedSource, EventBus, IdleCheck, InteractionKind,
        InteractionSource, TrackerConfig,
    };
    pub use rallypoint_session::{
        FileStorage, KeyValueStorage, LogoutReason, MemoryStorage, SessionConfig,
        SessionEvent, SessionStore, UserId, UserPatch, UserProfile,
    };
}
