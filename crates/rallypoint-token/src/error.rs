//! Error types for the token layer.

/// Errors that can occur while decoding a token.
///
/// There is deliberately only one failure mode visible to callers: the
/// string is not a token we can read. Whether it failed on the segment
/// split, the base64 step or the JSON step is carried in the message for
/// logs, but callers treat all of them the same way (as "no usable
/// claims").
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TokenError {
    /// The string is not a three-segment token, its payload is not valid
    /// base64url, or the decoded payload is not a JSON object.
    #[error("malformed token: {0}")]
    Malformed(String),
}
