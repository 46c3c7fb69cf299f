//! The decoded payload of an access token.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Claims carried in the payload segment of an access token.
///
/// Every field is optional on the wire. A token without `permissions`
/// simply grants nothing; a token without `exp` is treated as already
/// expired by [`is_expired`](crate::is_expired).
///
/// `BTreeSet` keeps permissions and roles sorted, so two tokens with the
/// same grants serialize identically.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Expiry as seconds since the Unix epoch.
    #[serde(default, deserialize_with = "numeric_date")]
    pub exp: Option<i64>,

    /// Issued-at as seconds since the Unix epoch.
    #[serde(default, deserialize_with = "numeric_date")]
    pub iat: Option<i64>,

    /// The subject (user id). Issuers disagree on whether this is a
    /// string or a number, so both are accepted and stored as a string.
    #[serde(default, deserialize_with = "string_or_number")]
    pub sub: Option<String>,

    /// Named permissions, e.g. `"events.write"`.
    #[serde(default)]
    pub permissions: BTreeSet<String>,

    /// Named roles, e.g. `"admin"`, `"volunteer"`.
    #[serde(default)]
    pub roles: BTreeSet<String>,
}

impl Claims {
    /// The expiry as a UTC timestamp, if the token carries one.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.exp.and_then(|secs| DateTime::from_timestamp(secs, 0))
    }

    /// Returns `true` if the token should be considered expired at `now`.
    ///
    /// `skew_secs` moves the deadline earlier: with a skew of 300 a token
    /// that expires in four minutes already counts as expired, which gives
    /// the caller time to refresh before the server starts rejecting it.
    /// Missing `exp` counts as expired.
    pub fn is_expired_at(&self, skew_secs: i64, now: DateTime<Utc>) -> bool {
        match self.exp {
            Some(exp) => exp.saturating_sub(skew_secs) <= now.timestamp(),
            None => true,
        }
    }
}

/// Accepts `1700000000`, `1700000000.5`, or `null`.
fn numeric_date<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Number>::deserialize(deserializer)?;
    Ok(value.and_then(|n| {
        n.as_i64()
            // Fractional seconds are legal in JWT NumericDate; drop them.
            .or_else(|| n.as_f64().map(|f| f as i64))
    }))
}

fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(s)) => Some(s),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}
