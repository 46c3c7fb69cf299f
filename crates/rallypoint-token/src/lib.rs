//! Access-token decoding for Rallypoint.
//!
//! This crate reads the claims out of the compact signed tokens the
//! Rallypoint API issues:
//!
//! - **Claims** ([`Claims`]): the decoded payload: expiry, subject,
//!   permissions, roles.
//! - **Codec** ([`decode`], [`is_expired`], [`extract_permissions`],
//!   [`extract_roles`]): pure functions that turn a token string into
//!   claims, or into a safe default when the string is garbage.
//! - **Errors** ([`TokenError`]): what can go wrong while decoding.
//!
//! # Signatures are NOT verified here
//!
//! The client reads claims optimistically to drive UX (show or hide a
//! button, redirect to login a little early). The server re-checks every
//! request, so nothing in this crate is a security boundary.
//!
//! ```text
//! Session Store (above)  ← asks "is this token still fresh?"
//!     ↕
//! Token Codec (this crate)  ← header.payload.signature → Claims
//! ```

mod claims;
mod codec;
mod error;

pub use claims::Claims;
pub use codec::{
    DEFAULT_EXPIRY_SKEW_SECS, decode, encode_unsigned, extract_permissions,
    extract_roles, is_expired, is_expired_at,
};
pub use error::TokenError;
