//! The session store: the one owner of session state on this device.
//!
//! Every read and write of the session goes through [`SessionStore`]. It is
//! responsible for:
//! - Replacing the session on login, clearing it on logout
//! - Keeping `is_authenticated` honest (user AND credential, or neither)
//! - Writing the persisted subset to storage after every mutation
//! - Restoring from storage at startup
//! - Telling subscribers what changed
//!
//! # Concurrency note
//!
//! The store is shared (`Arc<SessionStore>`) between UI code, the
//! activity tracker's listeners, and its timer task. State sits behind a
//! `Mutex` that is only held for the few lines that read or write fields.
//! Every mutation replaces or clears whole fields, so when a login races
//! an idle timeout the in-memory session ends up as whichever took the
//! state lock last.
//!
//! Storage writes go through a second lock and always write the state as
//! it is at write time, so storage converges on that same final session.
//!
//! Subscriber callbacks run after both locks are released, so a
//! subscriber may call straight back into the store. Events from
//! different threads can reach a subscriber in either order: treat an
//! event as "something changed" and read the store for the current
//! state.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use rand::Rng;
use tokio::time::Instant;

use crate::{
    Credential, KeyValueStorage, LogoutReason, PersistedSession, SessionConfig,
    SessionError, SessionEvent, SessionSnapshot, UserPatch, UserProfile,
};

/// Handle returned by [`SessionStore::subscribe`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Listener = Arc<dyn Fn(&SessionEvent) + Send + Sync>;

/// The mutable fields behind the store's lock.
///
/// There is no `is_authenticated` field: it is computed from `user` and
/// `credential` every time it's read, so it can't drift out of sync.
#[derive(Debug, Default)]
struct SessionState {
    user: Option<UserProfile>,
    credential: Option<Credential>,
    last_activity: Option<Instant>,
    device_id: Option<String>,
    is_loading: bool,
    error: Option<String>,
    last_logout_reason: Option<LogoutReason>,
    generation: u64,
}

impl SessionState {
    fn is_authenticated(&self) -> bool {
        self.user.is_some() && self.credential.is_some()
    }

    /// Returns whether someone was signed in.
    fn clear(&mut self, reason: LogoutReason) -> bool {
        let was_authenticated = self.is_authenticated();
        self.user = None;
        self.credential = None;
        self.last_activity = None;
        self.generation += 1;
        self.is_loading = false;
        self.error = None;
        self.last_logout_reason = Some(reason);
        was_authenticated
    }

    fn to_persisted(&self) -> PersistedSession {
        PersistedSession {
            user: self.user.clone(),
            credential: self.credential.clone(),
            is_authenticated: self.is_authenticated(),
            device_id: self.device_id.clone(),
        }
    }

    /// Rebuilds in-memory state from a persisted record.
    ///
    /// The persisted `isAuthenticated` flag is only trusted when the user
    /// and credential are also there. A half-written record (flag set,
    /// credential missing) comes back signed out, with its device id.
    fn from_persisted(record: PersistedSession) -> Self {
        let PersistedSession {
            user,
            credential,
            is_authenticated,
            device_id,
        } = record;

        let credential = credential.filter(|c| !c.access.is_empty());
        let consistent = is_authenticated && user.is_some() && credential.is_some();
        if !consistent && (user.is_some() || credential.is_some()) {
            tracing::warn!("persisted session is inconsistent, restoring signed out");
        }

        if consistent {
            Self {
                user,
                credential,
                // The idle window starts now, not at whatever time the
                // previous page load last saw activity.
                last_activity: Some(Instant::now()),
                device_id,
                ..Self::default()
            }
        } else {
            Self {
                device_id,
                ..Self::default()
            }
        }
    }
}

/// The process-wide session.
///
/// ## Lifecycle
///
/// ```text
///            open() ──→ [restored or empty]
///                              │
///        set_auth() ───────────┼──────────→ [Authenticated] ──┐
///                              │              │    ↑          │ update_user()
///                              │              │    └──────────┘ update_token()
///                              │              │                 update_last_activity()
///                              ▼              ▼
///                        [Signed out] ←── clear_auth() / clear_auth_with(reason)
///                     (device id kept)
/// ```
pub struct SessionStore {
    state: Mutex<SessionState>,
    storage: Arc<dyn KeyValueStorage>,
    /// Held from reading the state to the end of `storage.set`.
    writer: Mutex<()>,
    config: SessionConfig,
    listeners: Mutex<Vec<(SubscriptionId, Listener)>>,
    next_subscription: AtomicU64,
}

impl SessionStore {
    /// Creates a store, restoring any session persisted under
    /// `config.storage_key`.
    ///
    /// Never fails: unreadable storage, a missing record, and a record
    /// that doesn't parse all produce an empty, signed-out session.
    pub fn open(storage: Arc<dyn KeyValueStorage>, config: SessionConfig) -> Self {
        let state = match storage.get(&config.storage_key) {
            Ok(Some(raw)) => match serde_json::from_str::<PersistedSession>(&raw) {
                Ok(record) => SessionState::from_persisted(record),
                Err(e) => {
                    tracing::warn!(error = %e, "persisted session is malformed, starting empty");
                    SessionState::default()
                }
            },
            Ok(None) => SessionState::default(),
            Err(e) => {
                tracing::warn!(error = %e, "could not read persisted session, starting empty");
                SessionState::default()
            }
        };

        if let Some(user) = &state.user {
            tracing::info!(user_id = %user.id, "session restored");
        } else {
            tracing::debug!("no session to restore");
        }

        Self {
            state: Mutex::new(state),
            storage,
            writer: Mutex::new(()),
            config,
            listeners: Mutex::new(Vec::new()),
            next_subscription: AtomicU64::new(1),
        }
    }

    // -- Mutations --------------------------------------------------------

    /// Signs `user` in with the given credential.
    ///
    /// Replaces any existing session wholesale, stamps `last_activity`,
    /// and reuses the device id (generating one on the very first login).
    /// Subscribers get [`SessionEvent::Authenticated`].
    ///
    /// An empty refresh token is treated as "no refresh token".
    ///
    /// # Errors
    /// Returns [`SessionError::EmptyAccessToken`] if `access_token` is
    /// blank. The session is left exactly as it was.
    pub fn set_auth(
        &self,
        user: UserProfile,
        access_token: impl Into<String>,
        refresh_token: Option<String>,
    ) -> Result<(), SessionError> {
        let access = access_token.into();
        if access.trim().is_empty() {
            return Err(SessionError::EmptyAccessToken);
        }
        let refresh = refresh_token.filter(|r| !r.trim().is_empty());
        let user_id = user.id;

        {
            let mut state = self.lock_state();
            state.user = Some(user);
            state.credential = Some(Credential { access, refresh });
            state.last_activity = Some(Instant::now());
            if state.device_id.is_none() {
                state.device_id = Some(generate_device_id());
            }
            state.generation += 1;
            state.is_loading = false;
            state.error = None;
            state.last_logout_reason = None;
        }

        tracing::info!(%user_id, "session authenticated");
        self.persist();
        self.notify(&SessionEvent::Authenticated { user_id });
        Ok(())
    }

    /// Signs out with [`LogoutReason::UserInitiated`].
    pub fn clear_auth(&self) {
        self.clear_auth_with(LogoutReason::UserInitiated);
    }

    /// Signs out, recording why.
    ///
    /// Drops the user and credential and resets `last_activity`. The device
    /// id stays: it identifies the browser, not the member. Safe to call
    /// when already signed out; subscribers are still notified so anything
    /// left armed gets disarmed.
    pub fn clear_auth_with(&self, reason: LogoutReason) {
        let was_authenticated = self.lock_state().clear(reason);
        self.finish_clear(reason, was_authenticated);
    }

    /// Signs out only if the session is still the one identified by
    /// `generation` (see [`generation`](Self::generation)).
    ///
    /// Returns `false`, changing nothing, when a login or logout happened
    /// in between.
    pub fn clear_auth_for(&self, generation: u64, reason: LogoutReason) -> bool {
        {
            let mut state = self.lock_state();
            if state.generation != generation || !state.is_authenticated() {
                tracing::debug!(?reason, "clear skipped, session changed");
                return false;
            }
            state.clear(reason);
        }
        self.finish_clear(reason, true);
        true
    }

    /// Signs out with [`LogoutReason::IdleTimeout`] if the last activity is
    /// more than `timeout` ago.
    ///
    /// The check and the clear happen under one lock, so an interaction or
    /// a fresh login that lands first keeps the session. Returns whether
    /// the session was cleared.
    pub fn expire_idle(&self, timeout: Duration) -> bool {
        {
            let mut state = self.lock_state();
            let idle = state
                .last_activity
                .is_some_and(|at| Instant::now().saturating_duration_since(at) > timeout);
            if !idle || !state.is_authenticated() {
                return false;
            }
            state.clear(LogoutReason::IdleTimeout);
        }
        self.finish_clear(LogoutReason::IdleTimeout, true);
        true
    }

    /// Shallow-merges `patch` into the current user.
    ///
    /// Returns `false` (and changes nothing) when no one is signed in.
    pub fn update_user(&self, patch: UserPatch) -> bool {
        {
            let mut state = self.lock_state();
            let Some(user) = state.user.as_mut() else {
                return false;
            };
            patch.apply_to(user);
            state.is_loading = false;
            state.error = None;
        }

        self.persist();
        self.notify(&SessionEvent::UserUpdated);
        true
    }

    /// Swaps in a new access token after a silent refresh.
    ///
    /// Leaves the refresh token and `last_activity` alone: a background
    /// refresh is not user activity. Returns `Ok(false)` when no one is
    /// signed in, since a token without a user would break the
    /// authenticated invariant.
    ///
    /// # Errors
    /// Returns [`SessionError::EmptyAccessToken`] if `access_token` is
    /// blank.
    pub fn update_token(&self, access_token: impl Into<String>) -> Result<bool, SessionError> {
        self.replace_token(None, access_token.into())
    }

    /// Like [`update_token`](Self::update_token), but only while the
    /// session is still the one identified by `generation`.
    ///
    /// A refresh started for one member must not land on the session of
    /// whoever signed in while it was in flight. Returns `Ok(false)` when
    /// the session changed.
    ///
    /// # Errors
    /// Returns [`SessionError::EmptyAccessToken`] if `access_token` is
    /// blank.
    pub fn update_token_for(
        &self,
        generation: u64,
        access_token: impl Into<String>,
    ) -> Result<bool, SessionError> {
        self.replace_token(Some(generation), access_token.into())
    }

    /// Stamps `last_activity = now`.
    ///
    /// No-op while signed out, so a stray interaction after logout can't
    /// break "`last_activity` is `None` whenever signed out". Not
    /// persisted and not broadcast: this runs on every mouse move.
    pub fn update_last_activity(&self) {
        let mut state = self.lock_state();
        if state.is_authenticated() {
            state.last_activity = Some(Instant::now());
            tracing::trace!("activity stamped");
        }
    }

    /// Generates a fresh device id, replacing the current one.
    ///
    /// This is the only way the device id ever changes after it's been
    /// assigned. Returns the new id.
    pub fn reset_device_id(&self) -> String {
        let device_id = generate_device_id();
        self.lock_state().device_id = Some(device_id.clone());

        tracing::info!("device id reset");
        self.persist();
        self.notify(&SessionEvent::DeviceReset);
        device_id
    }

    /// Sets the transient loading flag (not persisted, not broadcast).
    pub fn set_loading(&self, loading: bool) {
        self.lock_state().is_loading = loading;
    }

    /// Sets the transient, user-facing error message.
    pub fn set_error(&self, error: Option<String>) {
        self.lock_state().error = error;
    }

    /// Writes the persisted subset to storage right now.
    ///
    /// Mutations already do this and swallow failures; call this when you
    /// need to know whether the write landed.
    ///
    /// # Errors
    /// Returns [`SessionError::Encode`] or [`SessionError::Storage`].
    pub fn flush(&self) -> Result<(), SessionError> {
        let _writer = self.lock_writer();
        self.write_current()
    }

    // -- Queries ----------------------------------------------------------

    /// Identifies the current session. Bumped by every login and logout,
    /// untouched by profile and token updates.
    pub fn generation(&self) -> u64 {
        self.lock_state().generation
    }

    /// `true` iff a user AND a credential are present.
    pub fn is_authenticated(&self) -> bool {
        self.lock_state().is_authenticated()
    }

    /// Does the signed-in user hold `permission`?
    ///
    /// `false` when signed out. This is a UX hint read from the user
    /// record; the API re-checks every request.
    pub fn has_permission(&self, permission: &str) -> bool {
        let state = self.lock_state();
        state.is_authenticated()
            && state
                .user
                .as_ref()
                .is_some_and(|u| u.permissions.contains(permission))
    }

    /// Does the signed-in user hold `role`? `false` when signed out.
    pub fn has_role(&self, role: &str) -> bool {
        let state = self.lock_state();
        state.is_authenticated() && state.user.as_ref().is_some_and(|u| u.roles.contains(role))
    }

    pub fn user(&self) -> Option<UserProfile> {
        self.lock_state().user.clone()
    }

    pub fn access_token(&self) -> Option<String> {
        self.lock_state()
            .credential
            .as_ref()
            .map(|c| c.access.clone())
    }

    /// Is the access token expired, or within `skew_secs` of expiring?
    ///
    /// `false` when signed out. A token that can't be decoded counts as
    /// expired.
    pub fn access_token_expired(&self, skew_secs: i64) -> bool {
        self.access_token()
            .is_some_and(|token| rallypoint_token::is_expired(&token, skew_secs))
    }

    pub fn refresh_token(&self) -> Option<String> {
        self.lock_state()
            .credential
            .as_ref()
            .and_then(|c| c.refresh.clone())
    }

    pub fn device_id(&self) -> Option<String> {
        self.lock_state().device_id.clone()
    }

    pub fn last_activity(&self) -> Option<Instant> {
        self.lock_state().last_activity
    }

    pub fn last_logout_reason(&self) -> Option<LogoutReason> {
        self.lock_state().last_logout_reason
    }

    pub fn error(&self) -> Option<String> {
        self.lock_state().error.clone()
    }

    pub fn is_loading(&self) -> bool {
        self.lock_state().is_loading
    }

    /// An owned copy of every field.
    pub fn snapshot(&self) -> SessionSnapshot {
        let state = self.lock_state();
        SessionSnapshot {
            user: state.user.clone(),
            credential: state.credential.clone(),
            is_authenticated: state.is_authenticated(),
            last_activity: state.last_activity,
            device_id: state.device_id.clone(),
            is_loading: state.is_loading,
            error: state.error.clone(),
            last_logout_reason: state.last_logout_reason,
            generation: state.generation,
        }
    }

    /// The record that would be written to storage right now.
    pub fn persisted(&self) -> PersistedSession {
        self.lock_state().to_persisted()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    // -- Subscriptions ----------------------------------------------------

    /// Registers `listener` to be called after every broadcast mutation.
    ///
    /// Listeners run synchronously on the thread that made the change,
    /// after it has been committed and persisted, so by the time
    /// `set_auth` returns every listener has seen `Authenticated`.
    pub fn subscribe<F>(&self, listener: F) -> SubscriptionId
    where
        F: Fn(&SessionEvent) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_subscription.fetch_add(1, Ordering::Relaxed));
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, Arc::new(listener)));
        id
    }

    /// Removes a listener. Returns `false` if it was already gone.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut listeners = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);
        let before = listeners.len();
        listeners.retain(|(sid, _)| *sid != id);
        listeners.len() != before
    }

    // -- Internals --------------------------------------------------------

    fn lock_state(&self) -> MutexGuard<'_, SessionState> {
        // A panic while holding the lock can only come from a listener-free
        // section of field assignments; the data is still consistent.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_writer(&self) -> MutexGuard<'_, ()> {
        self.writer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Best-effort write of the current state. The in-memory session stays
    /// authoritative for this tab when storage fails.
    ///
    /// Writes are serialized and each one reads the state only once it
    /// holds the writer lock, so the last write always carries the last
    /// committed change, whatever order the mutating threads get here in.
    fn persist(&self) {
        let _writer = self.lock_writer();
        match self.write_current() {
            Ok(()) => tracing::debug!(key = %self.config.storage_key, "session persisted"),
            Err(e) => tracing::warn!(error = %e, "failed to persist session"),
        }
    }

    /// Caller holds the writer lock.
    fn write_current(&self) -> Result<(), SessionError> {
        let record = self.lock_state().to_persisted();
        let raw = serde_json::to_string(&record)?;
        self.storage.set(&self.config.storage_key, &raw)?;
        Ok(())
    }

    fn replace_token(&self, generation: Option<u64>, access: String) -> Result<bool, SessionError> {
        if access.trim().is_empty() {
            return Err(SessionError::EmptyAccessToken);
        }

        {
            let mut state = self.lock_state();
            if generation.is_some_and(|g| g != state.generation) {
                tracing::debug!("token refresh dropped, session changed");
                return Ok(false);
            }
            let Some(credential) = state.credential.as_mut() else {
                tracing::debug!("token refresh ignored, no active session");
                return Ok(false);
            };
            credential.access = access;
            state.is_loading = false;
            state.error = None;
        }

        tracing::debug!("access token replaced");
        self.persist();
        self.notify(&SessionEvent::TokenRefreshed);
        Ok(true)
    }

    fn finish_clear(&self, reason: LogoutReason, was_authenticated: bool) {
        if was_authenticated {
            tracing::info!(?reason, "session cleared");
        } else {
            tracing::debug!(?reason, "clear requested on a signed-out session");
        }
        self.persist();
        self.notify(&SessionEvent::Cleared { reason });
    }

    fn notify(&self, event: &SessionEvent) {
        // Clone the list so listeners can (un)subscribe from inside a
        // callback without deadlocking on `listeners`.
        let listeners: Vec<Listener> = self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();
        for listener in listeners {
            listener(event);
        }
    }
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore")
            .field("state", &*self.lock_state())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Generates a device id: 128 random bits as 32 lowercase hex characters.
fn generate_device_id() -> String {
    let bytes: [u8; 16] = rand::rng().random();
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    //! Unit tests for `SessionStore`.
    //!
    //! Naming: `test_{function}_{scenario}_{expected}`.
    //!
    //! Reminder: `has_permission` / `has_role` are client-side UX checks
    //! against an unverified token's claims. They decide what to SHOW,
    //! never what is ALLOWED. The tests here check the bookkeeping, not a
    //! security property.

    use std::sync::Mutex as StdMutex;

    use super::*;
    use crate::{MemoryStorage, StorageError, UnavailableStorage};

    // -- Helpers ----------------------------------------------------------

    fn empty_store() -> (SessionStore, Arc<MemoryStorage>) {
        let storage = Arc::new(MemoryStorage::new());
        let store = SessionStore::open(storage.clone(), SessionConfig::default());
        (store, storage)
    }

    fn writer() -> UserProfile {
        UserProfile::new(1).with_permissions(["events.write"])
    }

    /// Authenticated iff user and credential; signed out means no `last_activity`.
    fn assert_invariants(store: &SessionStore) {
        let snap = store.snapshot();
        assert_eq!(
            snap.is_authenticated,
            snap.user.is_some() && snap.credential.is_some(),
            "is_authenticated must equal user && credential"
        );
        if !snap.is_authenticated {
            assert!(snap.last_activity.is_none(), "no activity while signed out");
        }
    }

    /// Storage whose writes fail but reads succeed.
    struct ReadOnlyStorage;

    impl KeyValueStorage for ReadOnlyStorage {
        fn get(&self, _key: &str) -> Result<Option<String>, StorageError> {
            Ok(None)
        }
        fn set(&self, _key: &str, _value: &str) -> Result<(), StorageError> {
            Err(StorageError::Unavailable("quota exceeded".into()))
        }
        fn remove(&self, _key: &str) -> Result<(), StorageError> {
            Ok(())
        }
    }

    // =====================================================================
    // set_auth()
    // =====================================================================

    #[test]
    fn test_set_auth_fresh_login_grants_token_permissions() {
        let (store, _) = empty_store();

        store.set_auth(writer(), "tok123", None).unwrap();

        assert!(store.is_authenticated());
        assert!(store.has_permission("events.write"));
        assert!(!store.has_permission("events.delete"));
        assert_invariants(&store);
    }

    #[test]
    fn test_set_auth_stamps_activity_and_assigns_device_id() {
        let (store, _) = empty_store();

        store.set_auth(writer(), "tok", None).unwrap();

        let snap = store.snapshot();
        assert!(snap.last_activity.is_some());
        let device_id = snap.device_id.expect("first login assigns a device id");
        assert_eq!(device_id.len(), 32);
        assert!(device_id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_set_auth_relogin_keeps_device_id() {
        let (store, _) = empty_store();
        store.set_auth(writer(), "tok", None).unwrap();
        let first = store.device_id();

        store.clear_auth();
        store.set_auth(UserProfile::new(2), "tok2", None).unwrap();

        assert_eq!(store.device_id(), first);
    }

    #[test]
    fn test_set_auth_empty_token_returns_error_and_changes_nothing() {
        let (store, _) = empty_store();

        let result = store.set_auth(writer(), "   ", None);

        assert!(matches!(result, Err(SessionError::EmptyAccessToken)));
        assert!(!store.is_authenticated());
        assert!(store.user().is_none());
        assert_invariants(&store);
    }

    #[test]
    fn test_set_auth_empty_refresh_token_is_dropped() {
        let (store, _) = empty_store();
        store
            .set_auth(writer(), "tok", Some(String::new()))
            .unwrap();
        assert_eq!(store.refresh_token(), None);
    }

    #[test]
    fn test_set_auth_resets_transient_fields() {
        let (store, _) = empty_store();
        store.set_loading(true);
        store.set_error(Some("bad password".into()));
        store.clear_auth_with(LogoutReason::IdleTimeout);

        store.set_auth(writer(), "tok", None).unwrap();

        let snap = store.snapshot();
        assert!(!snap.is_loading);
        assert!(snap.error.is_none());
        assert!(snap.last_logout_reason.is_none());
    }

    // =====================================================================
    // clear_auth()
    // =====================================================================

    #[test]
    fn test_clear_auth_keeps_only_device_id() {
        let (store, _) = empty_store();
        store.set_auth(writer(), "tok", Some("ref".into())).unwrap();
        let device_id = store.device_id();

        store.clear_auth();

        let snap = store.snapshot();
        assert!(snap.user.is_none());
        assert!(snap.credential.is_none());
        assert!(!snap.is_authenticated);
        assert!(snap.last_activity.is_none());
        assert_eq!(snap.device_id, device_id);
        assert_eq!(snap.last_logout_reason, Some(LogoutReason::UserInitiated));
    }

    #[test]
    fn test_clear_auth_twice_is_harmless() {
        let (store, _) = empty_store();
        store.clear_auth();
        store.clear_auth();
        assert!(!store.is_authenticated());
        assert_invariants(&store);
    }

    #[test]
    fn test_clear_auth_with_records_reason() {
        let (store, _) = empty_store();
        store.set_auth(writer(), "tok", None).unwrap();

        store.clear_auth_with(LogoutReason::IdleTimeout);

        assert_eq!(store.last_logout_reason(), Some(LogoutReason::IdleTimeout));
    }

    // =====================================================================
    // update_user() / update_token() / update_last_activity()
    // =====================================================================

    #[test]
    fn test_update_user_signed_out_is_noop() {
        let (store, _) = empty_store();

        let applied = store.update_user(UserPatch {
            email: Some("x@example.org".into()),
            ..UserPatch::default()
        });

        assert!(!applied);
        assert!(store.user().is_none());
        assert_invariants(&store);
    }

    #[test]
    fn test_update_user_merges_and_keeps_authentication() {
        let (store, _) = empty_store();
        store.set_auth(writer(), "tok", None).unwrap();

        let applied = store.update_user(UserPatch {
            first_name: Some("Rosa".into()),
            ..UserPatch::default()
        });

        assert!(applied);
        let user = store.user().unwrap();
        assert_eq!(user.first_name, "Rosa");
        assert!(user.permissions.contains("events.write"));
        assert!(store.is_authenticated());
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_token_replaces_access_only() {
        let (store, _) = empty_store();
        store.set_auth(writer(), "old", Some("ref".into())).unwrap();
        let stamped = store.last_activity();
        tokio::time::advance(std::time::Duration::from_secs(5)).await;

        assert!(store.update_token("new").unwrap());

        assert_eq!(store.access_token().as_deref(), Some("new"));
        assert_eq!(store.refresh_token().as_deref(), Some("ref"));
        assert_eq!(store.last_activity(), stamped, "refresh is not activity");
    }

    #[test]
    fn test_update_token_signed_out_returns_false() {
        let (store, _) = empty_store();
        assert!(!store.update_token("new").unwrap());
        assert!(store.access_token().is_none());
        assert_invariants(&store);
    }

    #[test]
    fn test_update_token_empty_returns_error() {
        let (store, _) = empty_store();
        store.set_auth(writer(), "old", None).unwrap();
        assert!(matches!(
            store.update_token(""),
            Err(SessionError::EmptyAccessToken)
        ));
        assert_eq!(store.access_token().as_deref(), Some("old"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_last_activity_advances_timestamp() {
        let (store, _) = empty_store();
        store.set_auth(writer(), "tok", None).unwrap();
        let before = store.last_activity().unwrap();

        tokio::time::advance(std::time::Duration::from_secs(10)).await;
        store.update_last_activity();

        assert!(store.last_activity().unwrap() > before);
    }

    #[test]
    fn test_update_last_activity_signed_out_stays_none() {
        let (store, _) = empty_store();
        store.update_last_activity();
        assert!(store.last_activity().is_none());
    }

    // =====================================================================
    // has_permission() / has_role()
    // =====================================================================

    #[test]
    fn test_has_role_signed_out_returns_false() {
        let (store, _) = empty_store();
        assert!(!store.has_role("admin"));
        assert!(!store.has_permission("events.write"));
    }

    #[test]
    fn test_has_role_checks_user_roles() {
        let (store, _) = empty_store();
        store
            .set_auth(UserProfile::new(4).with_roles(["volunteer"]), "tok", None)
            .unwrap();
        assert!(store.has_role("volunteer"));
        assert!(!store.has_role("admin"));
    }

    // =====================================================================
    // Persistence
    // =====================================================================

    #[test]
    fn test_persist_round_trip_restores_identity() {
        let (store, storage) = empty_store();
        store.set_auth(writer(), "tok123", None).unwrap();

        let restored = SessionStore::open(storage, SessionConfig::default());

        assert!(restored.is_authenticated());
        assert_eq!(restored.user().unwrap().id, crate::UserId(1));
        assert_eq!(restored.access_token().as_deref(), Some("tok123"));
        assert_eq!(restored.device_id(), store.device_id());
        assert!(restored.last_activity().is_some(), "idle window restarts");
    }

    #[test]
    fn test_persist_excludes_transient_fields() {
        let (store, storage) = empty_store();
        store.set_auth(writer(), "tok", None).unwrap();
        store.set_error(Some("oops".into()));

        let raw = storage.get("auth-storage").unwrap().unwrap();
        let json: serde_json::Value = serde_json::from_str(&raw).unwrap();

        let keys: Vec<&str> = json.as_object().unwrap().keys().map(String::as_str).collect();
        assert_eq!(keys.len(), 4);
        for key in ["user", "credential", "isAuthenticated", "deviceId"] {
            assert!(keys.contains(&key), "missing {key}");
        }
    }

    #[test]
    fn test_open_malformed_storage_starts_empty() {
        let storage = Arc::new(MemoryStorage::new());
        storage.set("auth-storage", "{not json").unwrap();

        let store = SessionStore::open(storage, SessionConfig::default());

        assert!(!store.is_authenticated());
        assert_invariants(&store);
    }

    #[test]
    fn test_open_unavailable_storage_starts_empty_and_still_works() {
        let store = SessionStore::open(Arc::new(UnavailableStorage), SessionConfig::default());
        assert!(!store.is_authenticated());

        store.set_auth(writer(), "tok", None).unwrap();

        assert!(store.is_authenticated(), "in-memory session is authoritative");
        assert!(store.flush().is_err());
    }

    #[test]
    fn test_set_auth_write_failure_is_swallowed() {
        let store = SessionStore::open(Arc::new(ReadOnlyStorage), SessionConfig::default());
        store.set_auth(writer(), "tok", None).expect("write failure is not a login failure");
        assert!(store.is_authenticated());
    }

    #[test]
    fn test_open_inconsistent_record_restores_signed_out() {
        let storage = Arc::new(MemoryStorage::new());
        storage
            .set(
                "auth-storage",
                r#"{"user":{"id":1},"credential":null,"isAuthenticated":true,"deviceId":"abc"}"#,
            )
            .unwrap();

        let store = SessionStore::open(storage, SessionConfig::default());

        assert!(!store.is_authenticated());
        assert!(store.user().is_none());
        assert_eq!(store.device_id().as_deref(), Some("abc"));
        assert_invariants(&store);
    }

    #[test]
    fn test_clear_auth_persists_device_id() {
        let (store, storage) = empty_store();
        store.set_auth(writer(), "tok", None).unwrap();
        let device_id = store.device_id();
        store.clear_auth();

        let restored = SessionStore::open(storage, SessionConfig::default());

        assert!(!restored.is_authenticated());
        assert_eq!(restored.device_id(), device_id);
    }

    #[test]
    fn test_open_respects_custom_storage_key() {
        let storage = Arc::new(MemoryStorage::new());
        let config = SessionConfig {
            storage_key: "other-app".into(),
        };
        let store = SessionStore::open(storage.clone(), config);
        store.set_auth(writer(), "tok", None).unwrap();

        assert!(storage.get("other-app").unwrap().is_some());
        assert!(storage.get("auth-storage").unwrap().is_none());
    }

    // =====================================================================
    // reset_device_id()
    // =====================================================================

    #[test]
    fn test_reset_device_id_generates_new_id() {
        let (store, _) = empty_store();
        store.set_auth(writer(), "tok", None).unwrap();
        let old = store.device_id().unwrap();

        let new = store.reset_device_id();

        assert_ne!(old, new);
        assert_eq!(store.device_id(), Some(new));
        assert!(store.is_authenticated(), "reset does not sign out");
    }

    // =====================================================================
    // subscribe() / unsubscribe()
    // =====================================================================

    #[test]
    fn test_subscribe_receives_events_in_order() {
        let (store, _) = empty_store();
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        store.subscribe(move |event| sink.lock().unwrap().push(event.clone()));

        store.set_auth(writer(), "tok", None).unwrap();
        store.update_token("tok2").unwrap();
        store.clear_auth();

        let seen = seen.lock().unwrap();
        assert_eq!(
            *seen,
            vec![
                SessionEvent::Authenticated {
                    user_id: crate::UserId(1)
                },
                SessionEvent::TokenRefreshed,
                SessionEvent::Cleared {
                    reason: LogoutReason::UserInitiated
                },
            ]
        );
    }

    #[test]
    fn test_subscribe_listener_can_read_store_without_deadlock() {
        let store = Arc::new(empty_store().0);
        let observed = Arc::new(StdMutex::new(None));
        let (weak, sink) = (Arc::downgrade(&store), Arc::clone(&observed));
        store.subscribe(move |_| {
            if let Some(store) = weak.upgrade() {
                *sink.lock().unwrap() = Some(store.is_authenticated());
            }
        });

        store.set_auth(writer(), "tok", None).unwrap();

        assert_eq!(*observed.lock().unwrap(), Some(true));
    }

    #[test]
    fn test_unsubscribe_stops_delivery() {
        let (store, _) = empty_store();
        let count = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&count);
        let id = store.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        store.clear_auth();
        assert!(store.unsubscribe(id));
        assert!(!store.unsubscribe(id));
        store.clear_auth();

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_update_last_activity_is_not_broadcast() {
        let (store, _) = empty_store();
        store.set_auth(writer(), "tok", None).unwrap();
        let count = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&count);
        store.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        store.update_last_activity();

        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_access_token_expired_reads_token_claims() {
        let (store, _) = empty_store();
        assert!(!store.access_token_expired(0), "signed out is never expired");

        let fresh = rallypoint_token::encode_unsigned(&rallypoint_token::Claims {
            exp: Some(chrono::Utc::now().timestamp() + 3600),
            ..Default::default()
        })
        .unwrap();
        store.set_auth(writer(), fresh, None).unwrap();
        assert!(!store.access_token_expired(300));
        assert!(store.access_token_expired(7200));
    }

    #[test]
    fn test_access_token_expired_opaque_token_counts_as_expired() {
        let (store, _) = empty_store();
        store.set_auth(writer(), "not-a-token", None).unwrap();
        assert!(store.access_token_expired(0));
    }

    // -- Session generation -----------------------------------------------

    #[test]
    fn test_generation_bumps_on_login_and_logout_only() {
        let (store, _) = empty_store();
        let start = store.generation();

        store.set_auth(writer(), "tok", Some("ref".into())).unwrap();
        let signed_in = store.generation();
        store.update_token("tok-2").unwrap();
        store.update_user(UserPatch {
            first_name: Some("Rosa".into()),
            ..UserPatch::default()
        });
        assert_eq!(store.generation(), signed_in);
        assert!(signed_in > start);

        store.clear_auth();
        assert!(store.generation() > signed_in);
        assert_eq!(store.snapshot().generation, store.generation());
    }

    #[test]
    fn test_update_token_for_stale_generation_changes_nothing() {
        let (store, _) = empty_store();
        store.set_auth(writer(), "user1", Some("ref1".into())).unwrap();
        let first = store.generation();
        store.clear_auth();
        store.set_auth(UserProfile::new(2), "user2", Some("ref2".into())).unwrap();

        assert!(!store.update_token_for(first, "user1-refreshed").unwrap());
        assert_eq!(store.access_token().as_deref(), Some("user2"));

        assert!(store.update_token_for(store.generation(), "user2-refreshed").unwrap());
        assert_eq!(store.access_token().as_deref(), Some("user2-refreshed"));
    }

    #[test]
    fn test_clear_auth_for_stale_generation_keeps_new_session() {
        let (store, _) = empty_store();
        store.set_auth(writer(), "user1", None).unwrap();
        let first = store.generation();
        store.clear_auth();
        store.set_auth(UserProfile::new(2), "user2", None).unwrap();

        assert!(!store.clear_auth_for(first, LogoutReason::TokenExpired));
        assert!(store.is_authenticated());

        assert!(store.clear_auth_for(store.generation(), LogoutReason::TokenExpired));
        assert!(!store.is_authenticated());
        assert_eq!(store.last_logout_reason(), Some(LogoutReason::TokenExpired));
    }

    #[tokio::test(start_paused = true)]
    async fn test_expire_idle_only_clears_stale_sessions() {
        let (store, _) = empty_store();
        let timeout = Duration::from_secs(60);
        assert!(!store.expire_idle(timeout), "signed out");

        store.set_auth(writer(), "tok", None).unwrap();
        tokio::time::advance(Duration::from_secs(61)).await;
        // A login landing after the deadline starts a fresh window.
        store.set_auth(writer(), "tok-2", None).unwrap();
        assert!(!store.expire_idle(timeout));
        assert!(store.is_authenticated());

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(store.expire_idle(timeout));
        assert!(!store.is_authenticated());
        assert_eq!(store.last_logout_reason(), Some(LogoutReason::IdleTimeout));
        assert_invariants(&store);
    }
}
