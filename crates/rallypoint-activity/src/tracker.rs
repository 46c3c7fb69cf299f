//! The activity tracker: interaction listeners plus a periodic idle check.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use rallypoint_session::{SessionEvent, SessionStore, SubscriptionId};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::{InteractionHandler, InteractionKind, InteractionSource, ListenerId};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Configuration for the activity tracker.
///
/// Durations are whole seconds on the wire:
///
/// ```json
/// { "idle_timeout_secs": 1800, "check_interval_secs": 60, "signals": ["click", "key_down"] }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// How long a signed-in member may go without interacting before the
    /// session is cleared. Default: 30 minutes.
    #[serde(rename = "idle_timeout_secs", with = "duration_secs")]
    pub idle_timeout: Duration,

    /// How often the idle check runs. Default: 60 seconds.
    ///
    /// The forced logout lands at most one interval after the timeout
    /// actually elapsed. Shorter intervals are more punctual and wake the
    /// host more often.
    #[serde(rename = "check_interval_secs", with = "duration_secs")]
    pub check_interval: Duration,

    /// Which interactions count as activity. Default: all of them.
    pub signals: Vec<InteractionKind>,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(30 * 60),
            check_interval: Duration::from_secs(60),
            signals: InteractionKind::ALL.to_vec(),
        }
    }
}

impl TrackerConfig {
    /// Shortest allowed check interval.
    pub const MIN_CHECK_INTERVAL: Duration = Duration::from_secs(1);

    /// Fix any out-of-range values so the config is safe to use.
    ///
    /// Called automatically by [`ActivityTracker::new`]. Rules:
    /// - `check_interval` raised to [`Self::MIN_CHECK_INTERVAL`].
    /// - A zero `idle_timeout` becomes one `check_interval`.
    /// - Duplicate `signals` are dropped (one listener per kind).
    pub fn validated(mut self) -> Self {
        if self.check_interval < Self::MIN_CHECK_INTERVAL {
            warn!(
                interval_ms = self.check_interval.as_millis() as u64,
                "check_interval below minimum, raising to 1s"
            );
            self.check_interval = Self::MIN_CHECK_INTERVAL;
        }
        if self.idle_timeout.is_zero() {
            warn!("idle_timeout is zero, using one check interval");
            self.idle_timeout = self.check_interval;
        }
        let mut seen = Vec::with_capacity(self.signals.len());
        self.signals.retain(|kind| {
            if seen.contains(kind) {
                false
            } else {
                seen.push(*kind);
                true
            }
        });
        if self.signals.is_empty() {
            warn!("no interaction signals configured, sessions will time out from login");
        }
        self
    }
}

/// Serde adapter storing a [`Duration`] as whole seconds. Sub-second
/// parts are dropped.
mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}

// ---------------------------------------------------------------------------
// IdleCheck
// ---------------------------------------------------------------------------

/// Outcome of one idle check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleCheck {
    /// Nobody is signed in (no activity stamp to measure from).
    NoSession,
    /// Signed in and within the timeout.
    Active { idle_for: Duration },
    /// The timeout elapsed and the session was cleared. The tracker is
    /// disarmed unless a new login landed right after.
    TimedOut,
}

// ---------------------------------------------------------------------------
// Tracker
// ---------------------------------------------------------------------------

/// Resources held while armed. Dropping the tracker's `Armed` without
/// going through `disarm` would leak listeners, so it is only ever taken
/// out by `disarm`.
struct Armed {
    listeners: Vec<ListenerId>,
    idle_task: Option<JoinHandle<()>>,
}

/// Stamps session activity and enforces the idle timeout.
///
/// The tracker only ever calls public [`SessionStore`] methods; it never
/// touches session fields directly.
pub struct ActivityTracker {
    store: Arc<SessionStore>,
    source: Arc<dyn InteractionSource>,
    config: TrackerConfig,
    armed: Mutex<Option<Armed>>,
    /// Handed to the idle-check task so it doesn't keep the tracker alive.
    weak_self: Weak<ActivityTracker>,
}

impl ActivityTracker {
    /// Creates a disarmed tracker.
    ///
    /// Build one per application and share the `Arc`. Call
    /// [`bind`](Self::bind) to let the store arm and disarm it.
    pub fn new(
        store: Arc<SessionStore>,
        source: Arc<dyn InteractionSource>,
        config: TrackerConfig,
    ) -> Arc<Self> {
        let config = config.validated();
        debug!(
            idle_timeout_secs = config.idle_timeout.as_secs(),
            check_interval_secs = config.check_interval.as_secs(),
            signals = config.signals.len(),
            "activity tracker created"
        );
        Arc::new_cyclic(|weak_self| Self {
            store,
            source,
            config,
            armed: Mutex::new(None),
            weak_self: weak_self.clone(),
        })
    }

    /// Subscribes this tracker to its store. On every `Authenticated` or
    /// `Cleared` event the tracker re-reads the store and arms or disarms
    /// to match (see [`sync_with_session`](Self::sync_with_session)).
    ///
    /// The subscription holds a weak reference, so the store does not keep
    /// the tracker alive.
    pub fn bind(self: &Arc<Self>) -> SubscriptionId {
        let weak = Arc::downgrade(self);
        self.store.subscribe(move |event| {
            if let Some(tracker) = weak.upgrade() {
                tracker.handle_session_event(event);
            }
        })
    }

    /// Reacts to one store notification.
    ///
    /// The event only says that the session changed. Whether to be armed
    /// is decided from the store's current state, since events from other
    /// threads or from re-entrant subscribers can arrive out of order.
    pub fn handle_session_event(&self, event: &SessionEvent) {
        match event {
            SessionEvent::Authenticated { .. } | SessionEvent::Cleared { .. } => {
                self.sync_with_session()
            }
            _ => {}
        }
    }

    /// Arms if the store is signed in, disarms if it is not.
    ///
    /// An already armed tracker stays armed with its current listeners and
    /// timer. The store is read while the tracker's own lock is held, so
    /// when several of these run at once the last one sees the final
    /// session state.
    pub fn sync_with_session(&self) {
        let mut armed = self.lock_armed();
        if self.store.is_authenticated() {
            if armed.is_none() {
                *armed = Some(self.arm());
            }
        } else if let Some(previous) = armed.take() {
            self.disarm(previous);
            debug!("activity tracker disarmed");
        }
    }

    /// Arms the tracker: attaches one listener per configured signal and
    /// starts the idle-check timer.
    ///
    /// Calling this while already armed disarms first, so there is never
    /// more than one set of listeners or more than one timer.
    pub fn start_tracking(&self) {
        let mut armed = self.lock_armed();
        if let Some(previous) = armed.take() {
            self.disarm(previous);
        }
        *armed = Some(self.arm());
    }

    /// Disarms the tracker: removes listeners and cancels the timer.
    ///
    /// Idempotent. Calling it while disarmed does nothing.
    pub fn stop_tracking(&self) {
        let previous = self.lock_armed().take();
        if let Some(previous) = previous {
            self.disarm(previous);
            debug!("activity tracker disarmed");
        }
    }

    /// Runs one idle check now.
    ///
    /// If the signed-in member's last activity is older than the idle
    /// timeout, clears the session with
    /// [`LogoutReason::IdleTimeout`](rallypoint_session::LogoutReason::IdleTimeout)
    /// and disarms. The timer task calls this once per interval.
    ///
    /// The store re-checks the deadline as it clears, so activity or a
    /// new login that lands after the first read keeps the session.
    pub fn check_idle(&self) -> IdleCheck {
        let Some(last_activity) = self.store.last_activity() else {
            return IdleCheck::NoSession;
        };

        let idle_for = Instant::now().saturating_duration_since(last_activity);
        if idle_for <= self.config.idle_timeout {
            return IdleCheck::Active { idle_for };
        }

        if !self.store.expire_idle(self.config.idle_timeout) {
            return match self.store.last_activity() {
                Some(at) => IdleCheck::Active {
                    idle_for: Instant::now().saturating_duration_since(at),
                },
                None => IdleCheck::NoSession,
            };
        }

        info!(
            idle_secs = idle_for.as_secs(),
            timeout_secs = self.config.idle_timeout.as_secs(),
            "idle timeout reached, session cleared"
        );
        // A bound tracker has already synced on `Cleared`. An unbound one
        // has not.
        self.sync_with_session();
        IdleCheck::TimedOut
    }

    /// `true` while armed.
    pub fn is_armed(&self) -> bool {
        self.lock_armed().is_some()
    }

    /// Listeners currently attached by this tracker.
    pub fn listener_count(&self) -> usize {
        self.lock_armed()
            .as_ref()
            .map_or(0, |armed| armed.listeners.len())
    }

    /// `true` while an idle-check timer is scheduled.
    pub fn has_idle_timer(&self) -> bool {
        self.lock_armed()
            .as_ref()
            .is_some_and(|armed| armed.idle_task.is_some())
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    // -- Internals --------------------------------------------------------

    fn lock_armed(&self) -> MutexGuard<'_, Option<Armed>> {
        self.armed.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn disarm(&self, armed: Armed) {
        for id in armed.listeners {
            if let Err(e) = self.source.detach(id) {
                debug!(error = %e, "listener already gone");
            }
        }
        // May be the task running this very call (idle timeout path);
        // aborting it takes effect at its next await, after it has
        // already decided to stop.
        if let Some(task) = armed.idle_task {
            task.abort();
        }
    }

    /// Attaches one listener per configured signal and starts the
    /// idle-check timer. The caller holds the `armed` lock.
    fn arm(&self) -> Armed {
        let mut listeners = Vec::with_capacity(self.config.signals.len());
        for &kind in &self.config.signals {
            let store = Arc::clone(&self.store);
            let handler: InteractionHandler = Arc::new(move |_: InteractionKind| store.update_last_activity());
            match self.source.attach(kind, handler) {
                Ok(id) => listeners.push(id),
                Err(e) => {
                    // Same host, same answer for the remaining kinds.
                    warn!(error = %e, %kind, "cannot attach activity listeners");
                    break;
                }
            }
        }

        let idle_task = self.spawn_idle_check();
        debug!(
            listeners = listeners.len(),
            idle_timer = idle_task.is_some(),
            "activity tracker armed"
        );
        Armed {
            listeners,
            idle_task,
        }
    }

    /// Starts the periodic idle check on the current Tokio runtime.
    ///
    /// Returns `None` outside a runtime: listeners still stamp activity,
    /// but nothing will force the logout.
    fn spawn_idle_check(&self) -> Option<JoinHandle<()>> {
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                warn!("no async runtime, idle timeout will not be enforced");
                return None;
            }
        };

        let weak = self.weak_self.clone();
        let period = self.config.check_interval;
        Some(runtime.spawn(async move {
            // First check one full period from now, not immediately.
            let mut ticker = time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let Some(tracker) = weak.upgrade() else {
                    break;
                };
                // Disarming aborts this task, so it never outlives its
                // `Armed`.
                tracker.check_idle();
            }
        }))
    }
}

impl Drop for ActivityTracker {
    fn drop(&mut self) {
        let armed = self
            .armed
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(armed) = armed {
            self.disarm(armed);
        }
    }
}

impl std::fmt::Debug for ActivityTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActivityTracker")
            .field("config", &self.config)
            .field("armed", &self.is_armed())
            .finish_non_exhaustive()
    }
}
