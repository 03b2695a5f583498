use std::future::Future;
use std::sync::Arc;

use url::Url;

use crate::error::Error;
use crate::types::{OtpType, Session, User};

/// Email + password login.
#[derive(Clone)]
pub struct PasswordCredentials {
    pub email: String,
    pub password: String,
}

impl PasswordCredentials {
    #[must_use]
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
        }
    }
}

impl std::fmt::Debug for PasswordCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PasswordCredentials")
            .field("email", &self.email)
            .field("password", &"[redacted]")
            .finish()
    }
}

/// External identity providers offered on the sign-in form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OAuthProvider {
    Google,
    Github,
}

impl OAuthProvider {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Google => "google",
            Self::Github => "github",
        }
    }
}

/// Parameters of an OAuth authorization redirect.
#[derive(Debug, Clone)]
pub struct OAuthRequest {
    pub provider: OAuthProvider,
    /// Where the provider sends the browser back (the callback route).
    pub redirect_to: Url,
    /// S256 PKCE challenge; the verifier never leaves the cookie jar.
    pub code_challenge: String,
    /// Extra provider parameters (`access_type=offline`, `prompt=consent`).
    pub query_params: Vec<(String, String)>,
}

/// The identity provider this crate orchestrates.
///
/// Every write operation is a black box that returns a [`Session`] or a typed
/// [`Error`]; this crate does not know how the provider hashes passwords, issues
/// OAuth tokens or generates one-time codes.
///
/// Implementations classify failures: network and 5xx problems are
/// [`Error::TransientBackend`], definitive rejections are
/// [`Error::InvalidCredential`].
pub trait AuthBackend: Send + Sync + 'static {
    fn sign_in_with_password(
        &self,
        credentials: &PasswordCredentials,
    ) -> impl Future<Output = Result<Session, Error>> + Send;

    /// URL to send the browser to for an OAuth login.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if the URL cannot be built.
    fn sign_in_with_oauth(&self, request: &OAuthRequest) -> Result<Url, Error>;

    fn exchange_code_for_session(
        &self,
        code: &str,
        code_verifier: &str,
    ) -> impl Future<Output = Result<Session, Error>> + Send;

    fn verify_otp(
        &self,
        token_hash: &str,
        otp_type: OtpType,
    ) -> impl Future<Output = Result<Session, Error>> + Send;

    /// Trades a refresh token for a new session (refresh tokens rotate).
    fn refresh_session(
        &self,
        refresh_token: &str,
    ) -> impl Future<Output = Result<Session, Error>> + Send;

    /// Authoritative identity behind an access token.
    fn get_user(&self, access_token: &str) -> impl Future<Output = Result<User, Error>> + Send;

    /// Revokes the session server-side.
    fn sign_out(&self, access_token: &str) -> impl Future<Output = Result<(), Error>> + Send;
}

/// Lets one backend instance be shared by several contexts.
impl<B: AuthBackend> AuthBackend for Arc<B> {
    fn sign_in_with_password(
        &self,
        credentials: &PasswordCredentials,
    ) -> impl Future<Output = Result<Session, Error>> + Send {
        (**self).sign_in_with_password(credentials)
    }

    fn sign_in_with_oauth(&self, request: &OAuthRequest) -> Result<Url, Error> {
        (**self).sign_in_with_oauth(request)
    }

    fn exchange_code_for_session(
        &self,
        code: &str,
        code_verifier: &str,
    ) -> impl Future<Output = Result<Session, Error>> + Send {
        (**self).exchange_code_for_session(code, code_verifier)
    }

    fn verify_otp(
        &self,
        token_hash: &str,
        otp_type: OtpType,
    ) -> impl Future<Output = Result<Session, Error>> + Send {
        (**self).verify_otp(token_hash, otp_type)
    }

    fn refresh_session(
        &self,
        refresh_token: &str,
    ) -> impl Future<Output = Result<Session, Error>> + Send {
        (**self).refresh_session(refresh_token)
    }

    fn get_user(&self, access_token: &str) -> impl Future<Output = Result<User, Error>> + Send {
        (**self).get_user(access_token)
    }

    fn sign_out(&self, access_token: &str) -> impl Future<Output = Result<(), Error>> + Send {
        (**self).sign_out(access_token)
    }
}
