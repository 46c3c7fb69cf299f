//! Session types: the data structures that describe who is signed in.
//!
//! A "session" is this device's record of the signed-in member. It tracks:
//! - WHO is signed in (`UserProfile`)
//! - WITH WHAT they prove it (`Credential`)
//! - WHEN they last did something (`last_activity`, in-memory only)
//! - ON WHAT device (`device_id`, survives logout)

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// The storage key the session record is persisted under.
pub const AUTH_STORAGE_KEY: &str = "auth-storage";

// ---------------------------------------------------------------------------
// SessionConfig
// ---------------------------------------------------------------------------

/// Configuration for the session store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Key the persisted record is written under in [`KeyValueStorage`].
    ///
    /// Default: `"auth-storage"`. Two apps sharing one storage backend
    /// need different keys.
    ///
    /// [`KeyValueStorage`]: crate::KeyValueStorage
    pub storage_key: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            storage_key: AUTH_STORAGE_KEY.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// A member's id as issued by the Rallypoint API.
///
/// Serialized as a bare number (`42`, not `{"0": 42}`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub u64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The signed-in member, as returned by the login endpoint.
///
/// Replaced wholesale on login, merged field-by-field by
/// [`UserPatch`], dropped on logout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: UserId,

    #[serde(default)]
    pub email: String,

    #[serde(default)]
    pub first_name: String,

    #[serde(default)]
    pub last_name: String,

    /// Named permissions, e.g. `"events.write"`.
    #[serde(default)]
    pub permissions: BTreeSet<String>,

    /// Named roles, e.g. `"admin"`, `"volunteer"`.
    #[serde(default)]
    pub roles: BTreeSet<String>,

    #[serde(default)]
    pub last_login: Option<DateTime<Utc>>,
}

impl UserProfile {
    /// A profile with only an id; everything else empty.
    pub fn new(id: u64) -> Self {
        Self {
            id: UserId(id),
            email: String::new(),
            first_name: String::new(),
            last_name: String::new(),
            permissions: BTreeSet::new(),
            roles: BTreeSet::new(),
            last_login: None,
        }
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = email.into();
        self
    }

    pub fn with_name(mut self, first: impl Into<String>, last: impl Into<String>) -> Self {
        self.first_name = first.into();
        self.last_name = last.into();
        self
    }

    pub fn with_permissions<I, S>(mut self, permissions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.permissions = permissions.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_roles<I, S>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.roles = roles.into_iter().map(Into::into).collect();
        self
    }

    /// "First Last", falling back to the email when no name is set.
    pub fn display_name(&self) -> String {
        let full = format!("{} {}", self.first_name, self.last_name);
        let full = full.trim();
        if full.is_empty() {
            self.email.clone()
        } else {
            full.to_string()
        }
    }
}

/// A partial update to a [`UserProfile`].
///
/// `None` fields are left alone. This is a shallow merge: passing
/// `permissions: Some(..)` replaces the whole set, it does not add to it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct UserPatch {
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub permissions: Option<BTreeSet<String>>,
    pub roles: Option<BTreeSet<String>>,
    pub last_login: Option<DateTime<Utc>>,
}

impl UserPatch {
    /// Applies every `Some` field onto `user`.
    pub fn apply_to(self, user: &mut UserProfile) {
        if let Some(email) = self.email {
            user.email = email;
        }
        if let Some(first_name) = self.first_name {
            user.first_name = first_name;
        }
        if let Some(last_name) = self.last_name {
            user.last_name = last_name;
        }
        if let Some(permissions) = self.permissions {
            user.permissions = permissions;
        }
        if let Some(roles) = self.roles {
            user.roles = roles;
        }
        if let Some(last_login) = self.last_login {
            user.last_login = Some(last_login);
        }
    }

    /// Returns `true` if applying this patch would change nothing.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// The access/refresh token pair for the signed-in member.
///
/// Access tokens are short-lived and sent on every API call. The refresh
/// token, when the API issued one, is traded for a new access token once
/// the old one is close to expiry.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub access: String,
    #[serde(default)]
    pub refresh: Option<String>,
}

// Tokens are bearer secrets: never let them reach a log line.
impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("access", &"<redacted>")
            .field("refresh", &self.refresh.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

// ---------------------------------------------------------------------------
// LogoutReason
// ---------------------------------------------------------------------------

/// Why the last session ended.
///
/// Kept in memory only, so the login screen can say "you were signed out
/// after 30 minutes of inactivity" instead of nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogoutReason {
    /// The member pressed "sign out" (or code called `clear_auth`).
    UserInitiated,
    /// The activity tracker saw no interaction for longer than the idle
    /// timeout.
    IdleTimeout,
    /// The access token expired and could not be refreshed.
    TokenExpired,
}

impl fmt::Display for LogoutReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UserInitiated => write!(f, "signed out"),
            Self::IdleTimeout => write!(f, "signed out after inactivity"),
            Self::TokenExpired => write!(f, "session expired"),
        }
    }
}

// ---------------------------------------------------------------------------
// SessionEvent
// ---------------------------------------------------------------------------

/// A change notification delivered to store subscribers.
///
/// Events from different threads may arrive out of order. Subscribers that
/// act on session state (the activity tracker re-reads it on `Authenticated`
/// and `Cleared`) should read the store rather than trust the variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// `set_auth` succeeded. Sent on every login, including a re-login
    /// while already authenticated.
    Authenticated { user_id: UserId },

    /// The session was cleared.
    Cleared { reason: LogoutReason },

    /// `update_user` merged a patch into the current user.
    UserUpdated,

    /// `update_token` swapped in a new access token.
    TokenRefreshed,

    /// `reset_device_id` generated a new device id.
    DeviceReset,
}

// ---------------------------------------------------------------------------
// SessionSnapshot
// ---------------------------------------------------------------------------

/// An owned copy of every session field, for rendering.
///
/// Taking a snapshot locks the store briefly; holding one does not.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub user: Option<UserProfile>,
    pub credential: Option<Credential>,
    /// Always `user.is_some() && credential.is_some()`.
    pub is_authenticated: bool,
    pub last_activity: Option<Instant>,
    pub device_id: Option<String>,
    pub is_loading: bool,
    pub error: Option<String>,
    pub last_logout_reason: Option<LogoutReason>,
    /// See [`SessionStore::generation`](crate::SessionStore::generation).
    pub generation: u64,
}

// ---------------------------------------------------------------------------
// PersistedSession
// ---------------------------------------------------------------------------

/// The subset of the session written to durable storage.
///
/// On disk this looks like:
///
/// ```json
/// { "user": {...} | null,
///   "credential": { "access": "...", "refresh": "..." } | null,
///   "isAuthenticated": true,
///   "deviceId": "9f86d081884c7d659a2feaa0c55ad015" | null }
/// ```
///
/// `last_activity`, `is_loading`, `error` and `last_logout_reason` are
/// left out. A restored `last_activity` from hours ago would log the
/// member out on the first idle check after a reload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedSession {
    #[serde(default)]
    pub user: Option<UserProfile>,
    #[serde(default)]
    pub credential: Option<Credential>,
    #[serde(default)]
    pub is_authenticated: bool,
    #[serde(default)]
    pub device_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_patch_apply_merges_only_set_fields() {
        let mut user = UserProfile::new(1)
            .with_email("old@example.org")
            .with_name("Ada", "Lovelace")
            .with_permissions(["events.read"]);

        UserPatch {
            email: Some("new@example.org".into()),
            ..UserPatch::default()
        }
        .apply_to(&mut user);

        assert_eq!(user.email, "new@example.org");
        assert_eq!(user.first_name, "Ada", "untouched field is kept");
        assert!(user.permissions.contains("events.read"));
    }

    #[test]
    fn test_user_patch_permissions_replace_not_extend() {
        let mut user = UserProfile::new(1).with_permissions(["a", "b"]);

        UserPatch {
            permissions: Some(["c".to_string()].into()),
            ..UserPatch::default()
        }
        .apply_to(&mut user);

        assert_eq!(user.permissions.len(), 1);
        assert!(user.permissions.contains("c"));
    }

    #[test]
    fn test_user_patch_is_empty() {
        assert!(UserPatch::default().is_empty());
        assert!(!UserPatch {
            first_name: Some("x".into()),
            ..UserPatch::default()
        }
        .is_empty());
    }

    #[test]
    fn test_display_name_falls_back_to_email() {
        let user = UserProfile::new(3).with_email("scout@example.org");
        assert_eq!(user.display_name(), "scout@example.org");
        let user = user.with_name("Grace", "");
        assert_eq!(user.display_name(), "Grace");
    }

    #[test]
    fn test_credential_debug_redacts_tokens() {
        let cred = Credential {
            access: "secret-access".into(),
            refresh: Some("secret-refresh".into()),
        };
        let printed = format!("{cred:?}");
        assert!(!printed.contains("secret"));
    }

    #[test]
    fn test_user_profile_deserializes_camel_case_with_defaults() {
        let user: UserProfile = serde_json::from_str(
            r#"{"id": 5, "firstName": "Sam", "permissions": ["forms.submit"]}"#,
        )
        .unwrap();
        assert_eq!(user.id, UserId(5));
        assert_eq!(user.first_name, "Sam");
        assert!(user.roles.is_empty());
        assert_eq!(user.last_login, None);
    }

    #[test]
    fn test_persisted_session_uses_storage_layout_field_names() {
        let record = PersistedSession {
            device_id: Some("abc".into()),
            ..PersistedSession::default()
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["deviceId"], "abc");
        assert_eq!(json["isAuthenticated"], false);
        assert!(json["user"].is_null());
        assert!(json["credential"].is_null());
    }

    #[test]
    fn test_session_config_default_key() {
        assert_eq!(SessionConfig::default().storage_key, "auth-storage");
    }
}
