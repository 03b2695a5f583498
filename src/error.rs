/// Failures of the session protocol, classified by how callers must react.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// Backend unreachable or temporarily failing. Retried on the next natural
    /// trigger (navigation, mount, event), never in a loop.
    #[error("Authentication backend unavailable: {0}")]
    TransientBackend(String),

    /// Wrong password, used or expired one-time token, rejected authorization code,
    /// revoked refresh token.
    #[error("Invalid credential: {0}")]
    InvalidCredential(String),

    /// Treated exactly like "no session" by every context.
    #[error("Session expired")]
    SessionExpired,

    /// Missing or invalid environment configuration. Fatal at startup.
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[cfg(feature = "supabase")]
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl Error {
    /// Whether the failure says nothing about the credential itself.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::TransientBackend(_) => true,
            #[cfg(feature = "supabase")]
            Self::Http(_) => true,
            _ => false,
        }
    }

    /// Whether the backend definitively rejected the credential or session.
    #[must_use]
    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::InvalidCredential(_) | Self::SessionExpired)
    }

    /// Message safe to show to the person signing in.
    ///
    /// Backend wording is never passed through verbatim except for the handful of
    /// messages that are already phrased for end users.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::InvalidCredential(detail) => {
                let detail = detail.to_ascii_lowercase();
                if detail.contains("invalid login credentials") {
                    "Invalid email or password".into()
                } else if detail.contains("email not confirmed") {
                    "Please confirm your email address".into()
                } else if detail.contains("expired") || detail.contains("invalid") {
                    "This sign-in link is invalid or has expired".into()
                } else {
                    "An error occurred during sign in".into()
                }
            }
            Self::SessionExpired => "Your session has expired, please sign in again".into(),
            _ if self.is_transient() => {
                "The authentication service is unavailable, please try again".into()
            }
            _ => "An unexpected error occurred during authentication.".into(),
        }
    }
}
