//! `SessionEngine` builder and wiring.
//!
//! This is the entry point for an application using Rallypoint sessions.
//! It ties the layers together: storage → session store → activity
//! tracker → facade and route guard.

use std::sync::Arc;

use rallypoint_activity::{ActivityTracker, DetachedSource, InteractionSource};
use rallypoint_session::{KeyValueStorage, MemoryStorage, SessionStore, SubscriptionId};

use crate::{AuthFacade, EngineConfig, RouteGuard};

/// Builder for a [`SessionEngine`].
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use rallypoint::prelude::*;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let bus = Arc::new(EventBus::new());
/// let engine = SessionEngine::builder()
///     .storage(Arc::new(MemoryStorage::new()))
///     .interaction_source(bus.clone())
///     .build();
///
/// engine.auth().login(UserProfile::new(1), "token", None).unwrap();
/// assert!(engine.tracker().is_armed());
/// # }
/// ```
pub struct SessionEngineBuilder {
    config: EngineConfig,
    storage: Option<Arc<dyn KeyValueStorage>>,
    source: Option<Arc<dyn InteractionSource>>,
}

impl SessionEngineBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self {
            config: EngineConfig::default(),
            storage: None,
            source: None,
        }
    }

    /// Sets the engine configuration.
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets where the session is persisted. Default: in memory, which
    /// loses the session when the process exits.
    pub fn storage(mut self, storage: Arc<dyn KeyValueStorage>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Sets where interaction signals come from. Default:
    /// [`DetachedSource`], which has none.
    pub fn interaction_source(mut self, source: Arc<dyn InteractionSource>) -> Self {
        self.source = Some(source);
        self
    }

    /// Restores the session and starts the engine.
    ///
    /// If the restored session is signed in, the tracker is armed right
    /// away so the idle timeout also covers a member who reloads and then
    /// walks off. Call from inside a Tokio runtime for the idle timer to
    /// run; outside one, only the interaction listeners are attached.
    pub fn build(self) -> SessionEngine {
        let config = self.config.validated();
        let storage = self.storage.unwrap_or_else(|| {
            tracing::debug!("no storage configured, session will not survive restart");
            Arc::new(MemoryStorage::new())
        });
        let source = self
            .source
            .unwrap_or_else(|| Arc::new(DetachedSource));

        let store = Arc::new(SessionStore::open(storage, config.session.clone()));
        let tracker = ActivityTracker::new(Arc::clone(&store), source, config.tracker.clone());
        let subscription = tracker.bind();
        tracker.sync_with_session();

        let auth = AuthFacade::new(Arc::clone(&store), config.expiry_skew_secs);
        let guard = RouteGuard::new(Arc::clone(&store), config.login_path.clone());

        tracing::info!(
            restored = store.is_authenticated(),
            idle_timeout_secs = config.tracker.idle_timeout.as_secs(),
            "session engine started"
        );

        SessionEngine {
            config,
            store,
            tracker,
            auth,
            guard,
            subscription,
        }
    }
}

impl Default for SessionEngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A running session engine: one store, one tracker bound to it, and the
/// facade and guard over them.
pub struct SessionEngine {
    config: EngineConfig,
    store: Arc<SessionStore>,
    tracker: Arc<ActivityTracker>,
    auth: AuthFacade,
    guard: RouteGuard,
    subscription: SubscriptionId,
}

impl SessionEngine {
    /// Creates a new builder.
    pub fn builder() -> SessionEngineBuilder {
        SessionEngineBuilder::new()
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    pub fn tracker(&self) -> &Arc<ActivityTracker> {
        &self.tracker
    }

    pub fn auth(&self) -> &AuthFacade {
        &self.auth
    }

    pub fn guard(&self) -> &RouteGuard {
        &self.guard
    }

    /// The configuration after validation.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Unbinds and disarms the tracker. The session itself is untouched
    /// and stays persisted.
    pub fn shutdown(&self) {
        self.store.unsubscribe(self.subscription);
        self.tracker.stop_tracking();
        tracing::info!("session engine stopped");
    }
}

impl Drop for SessionEngine {
    fn drop(&mut self) {
        self.store.unsubscribe(self.subscription);
    }
}
