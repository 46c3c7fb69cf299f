//! The session facade: the surface UI code talks to.
//!
//! [`AuthFacade`] is a thin layer over the [`SessionStore`]. It adds the
//! things a login screen and a request layer need on top of raw state
//! changes: a loading flag around login, a member-facing error message,
//! and refreshing an access token before it expires.
//!
//! ```text
//! UI ── login / logout / check_permission ──→ AuthFacade
//!                                                 │
//!                                 sign_in / ensure_fresh_token (AuthApi)
//!                                                 │
//!                                                 ▼
//!                                           SessionStore
//! ```

use std::sync::Arc;

use tracing::{debug, info, warn};

use rallypoint_session::{LogoutReason, SessionStore, UserProfile};
use rallypoint_token::Claims;

use crate::api::{AuthApi, LoginRequest};
use crate::EngineError;

/// Login, logout, and permission checks over a shared [`SessionStore`].
///
/// Cheap to clone; clones share the same store.
#[derive(Clone)]
pub struct AuthFacade {
    store: Arc<SessionStore>,
    expiry_skew_secs: i64,
}

impl AuthFacade {
    pub fn new(store: Arc<SessionStore>, expiry_skew_secs: i64) -> Self {
        Self {
            store,
            expiry_skew_secs,
        }
    }

    // -- Session lifecycle ------------------------------------------------

    /// Establishes a session from an API login response.
    ///
    /// On success the member is signed in, `is_loading` is `false` and
    /// `error` is cleared. On failure the member ends up signed out with
    /// the reason in `error`.
    ///
    /// # Errors
    /// [`EngineError::LoginFailed`] if the session could not be
    /// established (for example an empty access token).
    pub fn login(
        &self,
        user: UserProfile,
        access_token: impl Into<String>,
        refresh_token: Option<String>,
    ) -> Result<(), EngineError> {
        self.store.set_loading(true);
        let user_id = user.id;
        match self.store.set_auth(user, access_token, refresh_token) {
            Ok(()) => {
                info!(user_id = %user_id, "login complete");
                Ok(())
            }
            Err(e) => Err(self.fail_login(format!("Login failed: {e}"))),
        }
    }

    /// Asks the API for a session and establishes it.
    ///
    /// Sends the device id along when one exists. The API's message is
    /// passed through to the member unchanged. Never retries.
    ///
    /// # Errors
    /// [`EngineError::LoginFailed`] carrying the API's message, or the
    /// reason the response could not be used.
    pub async fn sign_in<A: AuthApi>(
        &self,
        api: &A,
        email: &str,
        password: &str,
    ) -> Result<(), EngineError> {
        self.store.set_error(None);
        self.store.set_loading(true);
        let request = LoginRequest {
            email: email.to_string(),
            password: password.to_string(),
            device_id: self.store.device_id(),
        };
        match api.login(&request).await {
            Ok(response) => self.login(response.user, response.token, response.refresh_token),
            Err(e) => {
                warn!(status = ?e.status, error = %e, "login rejected by API");
                Err(self.fail_login(e.message))
            }
        }
    }

    /// Signs the member out.
    pub fn logout(&self) {
        self.store.clear_auth_with(LogoutReason::UserInitiated);
    }

    /// Replaces the access token. Returns `false` (and changes nothing)
    /// when signed out.
    ///
    /// # Errors
    /// [`EngineError::Session`] if `new_token` is empty.
    pub fn refresh_user_token(&self, new_token: impl Into<String>) -> Result<bool, EngineError> {
        Ok(self.store.update_token(new_token)?)
    }

    /// Returns an access token that is good for at least the configured
    /// skew, refreshing it through `api` if needed.
    ///
    /// Returns `None` when signed out. If the token is stale and cannot be
    /// refreshed (no refresh token, or the API refuses) the session is
    /// cleared with [`LogoutReason::TokenExpired`] and `None` is returned.
    ///
    /// The result of the refresh is only applied to the session it was
    /// started for. If the member signs out, or someone else signs in,
    /// while the call is in flight, the new session is left alone and
    /// `None` is returned.
    pub async fn ensure_fresh_token<A: AuthApi>(&self, api: &A) -> Option<String> {
        let snapshot = self.store.snapshot();
        let credential = snapshot.credential?;
        if !rallypoint_token::is_expired(&credential.access, self.expiry_skew_secs) {
            return Some(credential.access);
        }

        let Some(refresh) = credential.refresh else {
            info!("access token expired and no refresh token, signing out");
            self.store
                .clear_auth_for(snapshot.generation, LogoutReason::TokenExpired);
            return None;
        };

        match api.refresh(&refresh).await {
            Ok(token) => match self.store.update_token_for(snapshot.generation, token.clone()) {
                Ok(true) => {
                    info!("access token refreshed");
                    Some(token)
                }
                Ok(false) => {
                    debug!("session changed during refresh, result dropped");
                    None
                }
                Err(e) => {
                    warn!(error = %e, "refresh returned an unusable token, signing out");
                    self.expire_refreshed_session(snapshot.generation);
                    None
                }
            },
            Err(e) => {
                warn!(status = ?e.status, error = %e, "token refresh failed, signing out");
                self.expire_refreshed_session(snapshot.generation);
                None
            }
        }
    }

    // -- Queries ----------------------------------------------------------

    pub fn is_authenticated(&self) -> bool {
        self.store.is_authenticated()
    }

    pub fn user(&self) -> Option<UserProfile> {
        self.store.user()
    }

    pub fn is_loading(&self) -> bool {
        self.store.is_loading()
    }

    /// The message from the last failed login, if any.
    pub fn error(&self) -> Option<String> {
        self.store.error()
    }

    pub fn last_logout_reason(&self) -> Option<LogoutReason> {
        self.store.last_logout_reason()
    }

    /// `false` when signed out.
    pub fn check_permission(&self, permission: &str) -> bool {
        self.store.has_permission(permission)
    }

    /// `false` when signed out.
    pub fn check_role(&self, role: &str) -> bool {
        self.store.has_role(role)
    }

    /// Claims of the current access token. `Ok(None)` when signed out.
    ///
    /// # Errors
    /// [`EngineError::Token`] if the access token can't be decoded.
    pub fn access_claims(&self) -> Result<Option<Claims>, EngineError> {
        match self.store.access_token() {
            Some(token) => Ok(Some(rallypoint_token::decode(&token)?)),
            None => Ok(None),
        }
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    // -- Internal ---------------------------------------------------------

    fn expire_refreshed_session(&self, generation: u64) {
        if !self.store.clear_auth_for(generation, LogoutReason::TokenExpired) {
            debug!("session changed during refresh, keeping it");
        }
    }

    /// Leaves the member signed out with `message` in `error`.
    fn fail_login(&self, message: String) -> EngineError {
        if self.store.is_authenticated() {
            self.store.clear_auth_with(LogoutReason::UserInitiated);
        }
        // After the clear, which resets `error`.
        self.store.set_error(Some(message.clone()));
        self.store.set_loading(false);
        EngineError::LoginFailed(message)
    }
}
