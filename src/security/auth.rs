//! Bearer-token gate for the control-plane API.

use std::borrow::Cow;

use subtle::ConstantTimeEq;

/// The single unauthenticated route.
pub const HEALTH_PATH: &str = "/api/health";

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("Missing or malformed Authorization header. Expected: Bearer <token>")]
    MissingHeader,
    #[error("Missing or malformed Authorization header. Expected: Bearer <token>")]
    MalformedHeader,
    #[error("Invalid API key")]
    InvalidToken,
}

/// Shared-secret gate. With no secret configured every request passes.
#[derive(Clone)]
pub struct AuthGate {
    secret: Option<Vec<u8>>,
}

impl std::fmt::Debug for AuthGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthGate")
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

impl AuthGate {
    /// A missing or blank secret disables the gate.
    pub fn new(secret: Option<String>) -> Self {
        let secret = secret
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .map(String::into_bytes);
        Self { secret }
    }

    pub fn disabled() -> Self {
        Self { secret: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.secret.is_some()
    }

    pub fn is_exempt(method: &axum::http::Method, path: &str) -> bool {
        method == axum::http::Method::GET && path == HEALTH_PATH
    }

    /// Check the raw `Authorization` header value.
    pub fn check(&self, header: Option<&str>) -> Result<(), AuthError> {
        let Some(secret) = &self.secret else {
            return Ok(());
        };
        let header = header.ok_or(AuthError::MissingHeader)?;
        let token = bearer_token(header).ok_or(AuthError::MalformedHeader)?;
        if constant_time_eq(token.as_bytes(), secret) {
            Ok(())
        } else {
            Err(AuthError::InvalidToken)
        }
    }
}

/// Extract the credential from `Bearer <token>`. The scheme is matched
/// case-insensitively; the token itself must be non-empty.
fn bearer_token(header: &str) -> Option<&str> {
    let (scheme, token) = header.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim_start();
    if token.is_empty() { None } else { Some(token) }
}

/// Compare `provided` against `secret` in time that depends only on the
/// secret's length.
///
/// A length mismatch still runs a full comparison of the secret against a
/// zeroed buffer of the secret's length before rejecting.
pub fn constant_time_eq(provided: &[u8], secret: &[u8]) -> bool {
    let same_len = provided.len() == secret.len();
    let candidate = comparison_candidate(provided, secret.len());
    let matches: bool = candidate.ct_eq(secret).into();
    // Non-short-circuiting so both operands are always evaluated.
    matches & same_len
}

/// The buffer actually compared against the secret. Always the secret's length.
fn comparison_candidate(provided: &[u8], len: usize) -> Cow<'_, [u8]> {
    if provided.len() == len {
        Cow::Borrowed(provided)
    } else {
        Cow::Owned(vec![0u8; len])
    }
}
