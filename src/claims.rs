use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::Deserialize;
use serde_json::{Map, Value};
use time::OffsetDateTime;

use crate::error::Error;
use crate::types::{Session, User, UserId};

/// Claims read from an access token without verifying its signature.
///
/// Good enough to rebuild a [`Session`] from cookies and decide whether it needs
/// a refresh. Never an authorization decision on its own: only the backend's
/// `get_user` answer is authoritative.
#[derive(Debug, Clone, Deserialize)]
pub struct UnverifiedClaims {
    pub sub: UserId,
    #[serde(default)]
    pub email: Option<String>,
    pub exp: i64,
    #[serde(default)]
    pub user_metadata: Map<String, Value>,
}

impl UnverifiedClaims {
    /// Token expiry as a timestamp.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidCredential` if `exp` is out of range.
    pub fn expires_at(&self) -> Result<OffsetDateTime, Error> {
        OffsetDateTime::from_unix_timestamp(self.exp)
            .map_err(|e| Error::InvalidCredential(format!("exp: {e}")))
    }

    #[must_use]
    pub fn user(&self) -> User {
        User {
            id: self.sub,
            email: self.email.clone(),
            identity_metadata: self.user_metadata.clone(),
        }
    }
}

/// Decodes the payload segment of a JWT access token.
///
/// # Errors
///
/// Returns `Error::InvalidCredential` if the token is not three dot-separated
/// segments or the payload is not base64url JSON with `sub` and `exp`.
pub fn decode_unverified(access_token: &str) -> Result<UnverifiedClaims, Error> {
    let parts: Vec<&str> = access_token.split('.').collect();
    if parts.len() != 3 {
        return Err(Error::InvalidCredential("malformed access token".into()));
    }

    let payload = URL_SAFE_NO_PAD
        .decode(parts[1].trim_end_matches('='))
        .map_err(|_| Error::InvalidCredential("malformed access token payload".into()))?;

    serde_json::from_slice(&payload)
        .map_err(|e| Error::InvalidCredential(format!("access token claims: {e}")))
}

/// Rebuilds a session from the cookie pair.
///
/// # Errors
///
/// Propagates [`decode_unverified`] failures.
pub fn session_from_tokens(access_token: &str, refresh_token: &str) -> Result<Session, Error> {
    let claims = decode_unverified(access_token)?;
    Ok(Session {
        access_token: access_token.to_owned(),
        refresh_token: refresh_token.to_owned(),
        expires_at: claims.expires_at()?,
        user: claims.user(),
    })
}
