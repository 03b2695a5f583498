use derive_more::{Display, From, FromStr, Into};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

/// Sessions this close to `expires_at` are already treated as expired, so a
/// token never lapses between being read and being used.
pub const EXPIRY_MARGIN: Duration = Duration::seconds(10);

/// Identity provider user identifier (the access token's `sub` claim).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, FromStr, From, Into,
)]
#[serde(transparent)]
pub struct UserId(pub Uuid);

/// Signed-in identity, as confirmed by the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    #[serde(default)]
    pub email: Option<String>,
    /// Provider-supplied profile data (`user_metadata` on the wire).
    #[serde(default, alias = "user_metadata")]
    pub identity_metadata: Map<String, Value>,
}

impl User {
    #[must_use]
    pub fn new(id: UserId) -> Self {
        Self {
            id,
            email: None,
            identity_metadata: Map::new(),
        }
    }

    #[must_use]
    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.identity_metadata.insert(key.into(), value);
        self
    }
}

/// Proof of identity issued by the backend.
///
/// This crate never edits a session; it only asks the backend to create, refresh
/// or destroy one. A session past [`expires_at`](Self::expires_at) is absent, not
/// an error.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(with = "time::serde::timestamp")]
    pub expires_at: OffsetDateTime,
    pub user: User,
}

impl Session {
    #[must_use]
    pub fn is_expired_at(&self, now: OffsetDateTime) -> bool {
        self.expires_at <= now + EXPIRY_MARGIN
    }

    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(OffsetDateTime::now_utc())
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("access_token", &"[redacted]")
            .field("refresh_token", &"[redacted]")
            .field("expires_at", &self.expires_at)
            .field("user", &self.user)
            .finish()
    }
}

/// What an emailed one-time token is meant to prove.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OtpType {
    /// Email confirmation after sign-up.
    Signup,
    /// Password recovery.
    Recovery,
}

impl OtpType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Signup => "signup",
            Self::Recovery => "recovery",
        }
    }
}
