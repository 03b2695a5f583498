//! The authentication backend client, one per execution context.
//!
//! An [`AuthClient`] pairs the identity backend with one context's cookie storage:
//! a browser tab's jar ([`BrowserCookies`]) or a single request's cookies
//! ([`RequestCookies`](crate::middleware::RequestCookies)). Sessions are always
//! derived from those cookies the same way, so the edge refresher and the server
//! reader reach the same answer for the same request.

mod cookies;
mod events;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use url::Url;

pub use cookies::{BrowserCookies, CookieAdapter};
pub(crate) use cookies::is_removal;
pub use events::{AuthEvent, EventChannel, Subscription};

use crate::backend::{AuthBackend, OAuthProvider, OAuthRequest, PasswordCredentials};
use crate::claims;
use crate::error::Error;
use crate::pkce::PkcePair;
use crate::policy::{CookiePolicy, Environment, policy_for};
use crate::types::{OtpType, Session, User};

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Default prefix of every cookie this crate writes.
pub const DEFAULT_COOKIE_PREFIX: &str = "sb-auth";

/// Names of the session cookie pair and the PKCE verifier cookie.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CookieNames {
    pub access_token: String,
    pub refresh_token: String,
    pub code_verifier: String,
}

impl CookieNames {
    #[must_use]
    pub fn with_prefix(prefix: &str) -> Self {
        Self {
            access_token: format!("{prefix}-access-token"),
            refresh_token: format!("{prefix}-refresh-token"),
            code_verifier: format!("{prefix}-code-verifier"),
        }
    }
}

impl Default for CookieNames {
    fn default() -> Self {
        Self::with_prefix(DEFAULT_COOKIE_PREFIX)
    }
}

/// Backend client bound to one context's cookies.
pub struct AuthClient<B> {
    backend: Arc<B>,
    cookies: Arc<dyn CookieAdapter>,
    policy: CookiePolicy,
    names: CookieNames,
    events: EventChannel<AuthEvent>,
}

impl<B: AuthBackend> AuthClient<B> {
    /// The cookie policy is derived here from `environment` and nowhere else.
    #[must_use]
    pub fn new(
        backend: Arc<B>,
        cookies: Arc<dyn CookieAdapter>,
        environment: &Environment,
        names: CookieNames,
    ) -> Self {
        Self {
            backend,
            cookies,
            policy: policy_for(environment),
            names,
            events: EventChannel::new(),
        }
    }

    /// Client for a browser tab.
    #[must_use]
    pub fn browser(
        backend: Arc<B>,
        jar: Arc<BrowserCookies>,
        environment: &Environment,
        names: CookieNames,
    ) -> Self {
        Self::new(backend, jar, environment, names)
    }

    #[must_use]
    pub fn policy(&self) -> &CookiePolicy {
        &self.policy
    }

    #[must_use]
    pub fn cookie_names(&self) -> &CookieNames {
        &self.names
    }

    /// Auth Event Channel of this client.
    pub fn on_auth_state_change<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&AuthEvent) + Send + Sync + 'static,
    {
        self.events.subscribe(listener)
    }

    #[must_use]
    pub fn events(&self) -> &EventChannel<AuthEvent> {
        &self.events
    }

    /// Session held in cookies, without any network call or expiry check.
    ///
    /// `None` when either cookie is missing or the access token is unreadable.
    #[must_use]
    pub fn stored_session(&self) -> Option<Session> {
        let access = self.cookies.get(&self.names.access_token)?;
        let refresh = self.cookies.get(&self.names.refresh_token)?;
        match claims::session_from_tokens(&access, &refresh) {
            Ok(session) => Some(session),
            Err(e) => {
                tracing::debug!(error = %e, "Ignoring unreadable session cookie");
                None
            }
        }
    }

    /// Current session, refreshed silently if it has expired.
    ///
    /// Returns `Ok(None)` when there is no session or the backend rejects the
    /// refresh token (cookies are cleared and [`AuthEvent::SignedOut`] fires).
    ///
    /// # Errors
    ///
    /// Transient backend failures during a refresh are returned as-is; the
    /// cookies are left untouched so the next trigger can retry.
    pub async fn get_session(&self) -> Result<Option<Session>, Error> {
        if let Some(session) = self.stored_session() {
            if !session.is_expired() {
                return Ok(Some(session));
            }
        }

        let Some(refresh_token) = self.cookies.get(&self.names.refresh_token) else {
            return Ok(None);
        };

        tracing::debug!("Session expired or unreadable, attempting silent refresh");
        match self.backend.refresh_session(&refresh_token).await {
            Ok(session) => {
                self.persist(&session);
                self.events.emit(&AuthEvent::TokenRefreshed(session.clone()));
                Ok(Some(session))
            }
            Err(e) if e.is_rejection() => {
                tracing::info!(error = %e, "Refresh token rejected, clearing session");
                self.clear();
                self.events.emit(&AuthEvent::SignedOut);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Authoritative user for the current session.
    ///
    /// # Errors
    ///
    /// Transient backend failures. Rejections resolve to `Ok(None)`.
    pub async fn get_user(&self) -> Result<Option<User>, Error> {
        match self.get_session().await? {
            Some(session) => self.confirm_user(&session).await,
            None => Ok(None),
        }
    }

    /// Asks the backend who `session` belongs to.
    ///
    /// `None` if the backend rejects the token or names a different user than
    /// the session claims: a locally well-formed session is not proof.
    pub(crate) async fn confirm_user(&self, session: &Session) -> Result<Option<User>, Error> {
        match self.backend.get_user(&session.access_token).await {
            Ok(user) if user.id == session.user.id => Ok(Some(user)),
            Ok(user) => {
                tracing::warn!(
                    session_user = %session.user.id,
                    backend_user = %user.id,
                    "Session user does not match backend user"
                );
                Ok(None)
            }
            Err(e) if e.is_rejection() => {
                tracing::debug!(error = %e, "Backend rejected access token");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Password login.
    ///
    /// # Errors
    ///
    /// Backend errors; use [`Error::user_message`] for display.
    pub async fn sign_in_with_password(
        &self,
        credentials: &PasswordCredentials,
    ) -> Result<Session, Error> {
        let session = self.backend.sign_in_with_password(credentials).await?;
        self.adopt(session.clone(), AuthEvent::SignedIn(session.clone()));
        tracing::info!(user_id = %session.user.id, "Password sign-in successful");
        Ok(session)
    }

    /// Starts an OAuth login and returns the provider URL to navigate to.
    ///
    /// The PKCE verifier is stored in a policy-governed cookie so the callback
    /// can complete on any subdomain.
    ///
    /// # Errors
    ///
    /// [`Error::Configuration`] if the backend cannot build the URL.
    pub fn sign_in_with_oauth(
        &self,
        provider: OAuthProvider,
        redirect_to: Url,
    ) -> Result<Url, Error> {
        let pkce = PkcePair::generate();
        let request = OAuthRequest {
            provider,
            redirect_to,
            code_challenge: pkce.challenge,
            query_params: vec![
                ("access_type".into(), "offline".into()),
                ("prompt".into(), "consent".into()),
            ],
        };
        let url = self.backend.sign_in_with_oauth(&request)?;
        self.cookies
            .set(self.policy.cookie(&self.names.code_verifier, &pkce.verifier));
        Ok(url)
    }

    /// Completes an OAuth login.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidCredential`] without a stored verifier or when the
    /// backend rejects the code; transient errors as-is.
    pub async fn exchange_code_for_session(&self, code: &str) -> Result<Session, Error> {
        let verifier = self
            .cookies
            .get(&self.names.code_verifier)
            .ok_or_else(|| Error::InvalidCredential("missing code verifier".into()))?;

        let session = self.backend.exchange_code_for_session(code, &verifier).await?;
        self.cookies.set(self.policy.removal(&self.names.code_verifier));
        self.adopt(session.clone(), AuthEvent::SignedIn(session.clone()));
        tracing::info!(user_id = %session.user.id, "OAuth code exchanged for session");
        Ok(session)
    }

    /// Verifies an emailed one-time token.
    ///
    /// # Errors
    ///
    /// Backend errors.
    pub async fn verify_otp(&self, token_hash: &str, otp_type: OtpType) -> Result<Session, Error> {
        let session = self.backend.verify_otp(token_hash, otp_type).await?;
        let event = match otp_type {
            OtpType::Signup => AuthEvent::SignedIn(session.clone()),
            OtpType::Recovery => AuthEvent::PasswordRecovery(session.clone()),
        };
        self.adopt(session.clone(), event);
        tracing::info!(user_id = %session.user.id, otp_type = otp_type.as_str(), "One-time token verified");
        Ok(session)
    }

    /// Revokes the session at the backend (best effort) and clears the cookies.
    ///
    /// Always ends signed out locally, even if the revocation call fails.
    pub async fn sign_out(&self) {
        if let Some(session) = self.stored_session() {
            if let Err(e) = self.backend.sign_out(&session.access_token).await {
                tracing::warn!(error = %e, "Backend sign-out failed, clearing cookies anyway");
            }
        }
        self.clear();
        self.events.emit(&AuthEvent::SignedOut);
    }

    fn adopt(&self, session: Session, event: AuthEvent) {
        self.persist(&session);
        self.events.emit(&event);
    }

    fn persist(&self, session: &Session) {
        self.cookies
            .set(self.policy.cookie(&self.names.access_token, &session.access_token));
        self.cookies
            .set(self.policy.cookie(&self.names.refresh_token, &session.refresh_token));
    }

    fn clear(&self) {
        self.cookies.set(self.policy.removal(&self.names.access_token));
        self.cookies.set(self.policy.removal(&self.names.refresh_token));
    }
}
