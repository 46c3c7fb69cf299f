//! Route guards: may the current member see this page?
//!
//! A guard only answers the question. Navigating is the router's job.
//!
//! Like everything on the client, the answer is a UX decision. The API
//! enforces the real rules on every request.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use rallypoint_session::SessionStore;

/// Members holding this role pass every permission and role check.
pub const ADMIN_ROLE: &str = "admin";

/// What a route needs from the member.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "name")]
pub enum Requirement {
    /// Any signed-in member.
    Authenticated,
    /// A signed-in member with this permission.
    Permission(String),
    /// A signed-in member with this role.
    Role(String),
}

/// The guard's verdict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardDecision {
    Allow,
    /// Signed out: send the member to the login page, then back to
    /// `return_to` once they sign in.
    RedirectToLogin { login_path: String, return_to: String },
    /// Signed in, but missing the permission or role.
    Forbidden,
}

impl GuardDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow)
    }
}

/// Checks [`Requirement`]s against the current session.
#[derive(Clone)]
pub struct RouteGuard {
    store: Arc<SessionStore>,
    login_path: String,
}

impl RouteGuard {
    pub fn new(store: Arc<SessionStore>, login_path: impl Into<String>) -> Self {
        Self {
            store,
            login_path: login_path.into(),
        }
    }

    pub fn login_path(&self) -> &str {
        &self.login_path
    }

    /// Decides whether the member may visit `requested_location`.
    ///
    /// Signed-out members are always redirected, whatever the
    /// requirement. The [`ADMIN_ROLE`] satisfies any permission or role.
    pub fn check(&self, requirement: &Requirement, requested_location: &str) -> GuardDecision {
        if !self.store.is_authenticated() {
            tracing::debug!(location = requested_location, "guard: signed out, redirecting");
            return GuardDecision::RedirectToLogin {
                login_path: self.login_path.clone(),
                return_to: requested_location.to_string(),
            };
        }

        let granted = match requirement {
            Requirement::Authenticated => true,
            Requirement::Permission(name) => {
                self.store.has_permission(name) || self.store.has_role(ADMIN_ROLE)
            }
            Requirement::Role(name) => {
                self.store.has_role(name) || self.store.has_role(ADMIN_ROLE)
            }
        };

        if granted {
            GuardDecision::Allow
        } else {
            tracing::debug!(?requirement, location = requested_location, "guard: forbidden");
            GuardDecision::Forbidden
        }
    }
}
