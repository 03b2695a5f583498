//! Auth callback state machine.
//!
//! One entry point for every way the browser comes back from the identity
//! provider: OAuth `?code=`, emailed `?token=&type=` links, or nothing at all.
//! Every outcome is a redirect; nothing here fails towards the browser.

use std::time::Duration;

use serde::Deserialize;
use url::Url;

use crate::backend::AuthBackend;
use crate::client::AuthClient;
use crate::error::Error;
use crate::store::SessionStore;
use crate::types::{OtpType, Session, UserId};

/// Raw callback query string.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CallbackQuery {
    pub code: Option<String>,
    pub token: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    /// Set by the provider when the user denied consent.
    pub error: Option<String>,
    pub error_description: Option<String>,
}

/// What the callback was asked to do. Exactly one per request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackRequest {
    OAuthCode { code: String },
    Otp { token: String, kind: OtpType },
    /// Nothing recognizable: just look for an existing session.
    Bare,
}

impl CallbackRequest {
    #[must_use]
    pub fn from_query(query: &CallbackQuery) -> Self {
        if let Some(error) = &query.error {
            tracing::warn!(
                error = %error,
                description = query.error_description.as_deref().unwrap_or_default(),
                "Identity provider returned an error to the callback"
            );
        }

        let non_empty = |v: &Option<String>| v.as_deref().filter(|s| !s.is_empty()).map(str::to_owned);

        if let Some(code) = non_empty(&query.code) {
            return Self::OAuthCode { code };
        }
        if let Some(token) = non_empty(&query.token) {
            let kind = match query.kind.as_deref() {
                Some("recovery") => OtpType::Recovery,
                _ => OtpType::Signup,
            };
            return Self::Otp { token, kind };
        }
        Self::Bare
    }

    /// Classifies the query of a full callback URL.
    #[must_use]
    pub fn from_url(url: &Url) -> Self {
        let mut query = CallbackQuery::default();
        for (key, value) in url.query_pairs() {
            let value = Some(value.into_owned());
            match key.as_ref() {
                "code" => query.code = value,
                "token" => query.token = value,
                "type" => query.kind = value,
                "error" => query.error = value,
                "error_description" => query.error_description = value,
                _ => {}
            }
        }
        Self::from_query(&query)
    }
}

/// Where the callback sends the browser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackOutcome {
    /// Signed in (landing page) or holding a recovery session (reset page).
    Success(String),
    /// Try again from the sign-in page.
    Recoverable(String),
    /// Error page with a human-readable reason.
    Fatal(String),
}

impl CallbackOutcome {
    #[must_use]
    pub fn location(&self) -> &str {
        match self {
            Self::Success(location) | Self::Recoverable(location) | Self::Fatal(location) => {
                location
            }
        }
    }
}

/// Redirect targets and readiness poll bounds of the callback.
#[derive(Debug, Clone)]
pub struct CallbackRoutes {
    pub landing: String,
    pub sign_in: String,
    pub reset_password: String,
    pub error_page: String,
    pub readiness_timeout: Duration,
    pub readiness_interval: Duration,
}

impl Default for CallbackRoutes {
    fn default() -> Self {
        Self {
            landing: "/docs/introduction/what-is-lomi".into(),
            sign_in: "/sign-in".into(),
            reset_password: "/reset-password".into(),
            error_page: "/error".into(),
            readiness_timeout: Duration::from_secs(2),
            readiness_interval: Duration::from_millis(50),
        }
    }
}

impl CallbackRoutes {
    #[must_use]
    pub fn with_landing(mut self, path: impl Into<String>) -> Self {
        self.landing = path.into();
        self
    }

    #[must_use]
    pub fn with_sign_in(mut self, path: impl Into<String>) -> Self {
        self.sign_in = path.into();
        self
    }

    #[must_use]
    pub fn with_reset_password(mut self, path: impl Into<String>) -> Self {
        self.reset_password = path.into();
        self
    }

    #[must_use]
    pub fn with_error_page(mut self, path: impl Into<String>) -> Self {
        self.error_page = path.into();
        self
    }

    #[must_use]
    pub fn with_readiness(mut self, timeout: Duration, interval: Duration) -> Self {
        self.readiness_timeout = timeout;
        self.readiness_interval = interval;
        self
    }

    fn error_location(&self, error: &Error) -> String {
        let message = format!("Authentication failed: {}", error.user_message());
        format!(
            "{}?message={}",
            self.error_page,
            urlencoding::encode(&message)
        )
    }
}

/// Runs one callback against a client, and a session store when the callback
/// runs in the same tab as one.
pub struct CallbackMachine<'a, B> {
    client: &'a AuthClient<B>,
    routes: &'a CallbackRoutes,
    store: Option<&'a SessionStore<B>>,
}

impl<'a, B: AuthBackend> CallbackMachine<'a, B> {
    #[must_use]
    pub fn new(client: &'a AuthClient<B>, routes: &'a CallbackRoutes) -> Self {
        Self {
            client,
            routes,
            store: None,
        }
    }

    #[must_use]
    pub fn with_store(mut self, store: &'a SessionStore<B>) -> Self {
        self.store = Some(store);
        self
    }

    pub async fn run(&self, request: CallbackRequest) -> CallbackOutcome {
        match request {
            CallbackRequest::OAuthCode { code } => self.oauth_code(&code).await,
            CallbackRequest::Otp {
                token,
                kind: OtpType::Recovery,
            } => self.recovery(&token).await,
            CallbackRequest::Otp {
                token,
                kind: OtpType::Signup,
            } => self.signup(&token).await,
            CallbackRequest::Bare => self.bare().await,
        }
    }

    async fn oauth_code(&self, code: &str) -> CallbackOutcome {
        match self.client.exchange_code_for_session(code).await {
            Ok(session) => {
                let user_id = session.user.id;
                if let Some(store) = self.store {
                    store.adopt(session);
                }
                if self.wait_until_readable(user_id).await {
                    CallbackOutcome::Success(self.routes.landing.clone())
                } else {
                    tracing::warn!(user_id = %user_id, "Exchanged session never became readable");
                    CallbackOutcome::Recoverable(self.routes.sign_in.clone())
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to exchange authorization code");
                CallbackOutcome::Fatal(self.routes.error_location(&e))
            }
        }
    }

    async fn recovery(&self, token: &str) -> CallbackOutcome {
        match self.client.verify_otp(token, OtpType::Recovery).await {
            Ok(_) => CallbackOutcome::Success(self.routes.reset_password.clone()),
            Err(e) => {
                tracing::warn!(error = %e, "Recovery token verification failed");
                CallbackOutcome::Recoverable(self.routes.sign_in.clone())
            }
        }
    }

    async fn signup(&self, token: &str) -> CallbackOutcome {
        match self.client.verify_otp(token, OtpType::Signup).await {
            Ok(session) => {
                if !self.wait_until_readable(session.user.id).await {
                    tracing::warn!(user_id = %session.user.id, "Confirmed session never became readable");
                    return CallbackOutcome::Recoverable(self.routes.sign_in.clone());
                }
                self.bare().await
            }
            Err(e) => {
                tracing::warn!(error = %e, "Signup token verification failed");
                CallbackOutcome::Recoverable(self.routes.sign_in.clone())
            }
        }
    }

    async fn bare(&self) -> CallbackOutcome {
        match self.confirmed_session().await {
            Ok(Some(session)) => {
                let user_id = session.user.id;
                if let Some(store) = self.store {
                    store.adopt(session);
                }
                if self.wait_until_readable(user_id).await {
                    tracing::info!(user_id = %user_id, "Callback completed with session");
                    CallbackOutcome::Success(self.routes.landing.clone())
                } else {
                    tracing::warn!(user_id = %user_id, "Session never became readable");
                    CallbackOutcome::Recoverable(self.routes.sign_in.clone())
                }
            }
            Ok(None) => {
                tracing::debug!("No session on callback");
                CallbackOutcome::Recoverable(self.routes.sign_in.clone())
            }
            Err(e) => {
                tracing::warn!(error = %e, "Session lookup failed on callback");
                CallbackOutcome::Recoverable(self.routes.sign_in.clone())
            }
        }
    }

    async fn confirmed_session(&self) -> Result<Option<Session>, Error> {
        let Some(session) = self.client.get_session().await? else {
            return Ok(None);
        };
        Ok(self
            .client
            .confirm_user(&session)
            .await?
            .map(|user| Session { user, ..session }))
    }

    /// Polls the cookie storage until it yields a session for `user_id`.
    async fn wait_until_readable(&self, user_id: UserId) -> bool {
        let readable = || {
            self.client
                .stored_session()
                .is_some_and(|s| s.user.id == user_id)
        };
        let poll = async {
            while !readable() {
                tokio::time::sleep(self.routes.readiness_interval).await;
            }
        };
        tokio::time::timeout(self.routes.readiness_timeout, poll)
            .await
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use axum_extra::extract::cookie::Cookie;

    use super::*;
    use crate::client::{BrowserCookies, CookieAdapter, CookieNames};
    use crate::policy::Environment;
    use crate::store::{AuthState, MemoryCache};
    use crate::testing::{MockBackend, alice, session_for};

    fn query(pairs: &[(&str, &str)]) -> CallbackRequest {
        let mut url: Url = "https://docs.example.test/auth/callback".parse().unwrap();
        for (k, v) in pairs {
            url.query_pairs_mut().append_pair(k, v);
        }
        CallbackRequest::from_url(&url)
    }

    fn routes() -> CallbackRoutes {
        CallbackRoutes::default()
            .with_readiness(Duration::from_millis(200), Duration::from_millis(1))
    }

    struct Tab {
        backend: Arc<MockBackend>,
        store: SessionStore<MockBackend>,
    }

    async fn mounted_tab(jar: Arc<dyn CookieAdapter>) -> Tab {
        let backend = Arc::new(MockBackend::new());
        let client = Arc::new(AuthClient::new(
            backend.clone(),
            jar,
            &Environment::Development,
            CookieNames::default(),
        ));
        let store = SessionStore::new(client, Arc::new(MemoryCache::new()));
        store.mount().await;
        Tab { backend, store }
    }

    impl Tab {
        async fn run(&self, request: CallbackRequest) -> CallbackOutcome {
            let routes = routes();
            CallbackMachine::new(self.store.client(), &routes)
                .with_store(&self.store)
                .run(request)
                .await
        }
    }

    /// Writes become visible only after a number of reads.
    struct LaggingJar {
        inner: BrowserCookies,
        lag: usize,
        pending: AtomicUsize,
    }

    impl CookieAdapter for LaggingJar {
        fn get(&self, name: &str) -> Option<String> {
            let pending = self.pending.load(Ordering::SeqCst);
            if pending > 0 {
                self.pending.store(pending - 1, Ordering::SeqCst);
                return None;
            }
            self.inner.get(name)
        }

        fn set(&self, cookie: Cookie<'static>) {
            self.inner.set(cookie);
            self.pending.store(self.lag, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_classifies_queries() {
        assert_eq!(
            query(&[("code", "abc")]),
            CallbackRequest::OAuthCode { code: "abc".into() }
        );
        assert_eq!(
            query(&[("token", "t"), ("type", "recovery")]),
            CallbackRequest::Otp {
                token: "t".into(),
                kind: OtpType::Recovery
            }
        );
        assert_eq!(
            query(&[("token", "t"), ("type", "signup")]),
            CallbackRequest::Otp {
                token: "t".into(),
                kind: OtpType::Signup
            }
        );
        assert_eq!(
            query(&[("token", "t")]),
            CallbackRequest::Otp {
                token: "t".into(),
                kind: OtpType::Signup
            }
        );
        assert_eq!(query(&[]), CallbackRequest::Bare);
        assert_eq!(query(&[("code", "")]), CallbackRequest::Bare);
        assert_eq!(query(&[("error", "access_denied")]), CallbackRequest::Bare);
    }

    #[test]
    fn test_code_wins_over_token() {
        assert_eq!(
            query(&[("token", "t"), ("code", "c")]),
            CallbackRequest::OAuthCode { code: "c".into() }
        );
    }

    #[tokio::test]
    async fn test_oauth_exchange_error_goes_to_error_page() {
        let tab = mounted_tab(Arc::new(BrowserCookies::new())).await;

        let outcome = tab
            .run(CallbackRequest::OAuthCode {
                code: "unknown".into(),
            })
            .await;

        let CallbackOutcome::Fatal(location) = outcome else {
            panic!("expected fatal outcome, got {outcome:?}");
        };
        assert!(location.starts_with("/error?message=Authentication%20failed%3A%20"));
        assert_eq!(tab.store.state(), AuthState::Unauthenticated);
    }

    #[tokio::test]
    async fn test_oauth_exchange_success_lands_authenticated() {
        let jar = Arc::new(BrowserCookies::new());
        let tab = mounted_tab(jar.clone()).await;
        tab.backend.allow_code("good", session_for(&alice()));
        jar.set(tab.store.client().policy().cookie("sb-auth-code-verifier", "v"));

        let outcome = tab
            .run(CallbackRequest::OAuthCode { code: "good".into() })
            .await;

        assert_eq!(
            outcome,
            CallbackOutcome::Success("/docs/introduction/what-is-lomi".into())
        );
        assert_eq!(tab.store.state(), AuthState::Authenticated);
    }

    #[tokio::test]
    async fn test_recovery_goes_to_reset_page_without_signing_in() {
        let tab = mounted_tab(Arc::new(BrowserCookies::new())).await;
        tab.backend
            .allow_otp("rec", OtpType::Recovery, session_for(&alice()));

        let states = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = states.clone();
        let _sub = tab
            .store
            .on_change(move |change| sink.lock().unwrap().push(change.state));

        let outcome = tab
            .run(CallbackRequest::Otp {
                token: "rec".into(),
                kind: OtpType::Recovery,
            })
            .await;

        assert_eq!(outcome, CallbackOutcome::Success("/reset-password".into()));
        assert_eq!(tab.store.state(), AuthState::Unauthenticated);
        assert!(!states.lock().unwrap().contains(&AuthState::Authenticated));
    }

    #[tokio::test]
    async fn test_bad_recovery_token_goes_to_sign_in() {
        let tab = mounted_tab(Arc::new(BrowserCookies::new())).await;

        let outcome = tab
            .run(CallbackRequest::Otp {
                token: "stale".into(),
                kind: OtpType::Recovery,
            })
            .await;

        assert_eq!(outcome, CallbackOutcome::Recoverable("/sign-in".into()));
    }

    #[tokio::test]
    async fn test_bare_with_session_lands_authenticated() {
        let jar = Arc::new(BrowserCookies::new());
        let tab = mounted_tab(jar.clone()).await;
        let session = session_for(&alice());
        tab.backend.register_session(&session);
        let policy = tab.store.client().policy();
        jar.set(policy.cookie("sb-auth-access-token", &session.access_token));
        jar.set(policy.cookie("sb-auth-refresh-token", &session.refresh_token));

        let outcome = tab.run(CallbackRequest::Bare).await;

        assert_eq!(
            outcome,
            CallbackOutcome::Success("/docs/introduction/what-is-lomi".into())
        );
        assert_eq!(tab.store.state(), AuthState::Authenticated);
    }

    #[tokio::test]
    async fn test_bare_without_session_goes_to_sign_in() {
        let tab = mounted_tab(Arc::new(BrowserCookies::new())).await;
        let outcome = tab.run(CallbackRequest::Bare).await;
        assert_eq!(outcome, CallbackOutcome::Recoverable("/sign-in".into()));
    }

    #[tokio::test]
    async fn test_bare_with_backend_outage_goes_to_sign_in() {
        let jar = Arc::new(BrowserCookies::new());
        let tab = mounted_tab(jar.clone()).await;
        let session = session_for(&alice());
        let policy = tab.store.client().policy();
        jar.set(policy.cookie("sb-auth-access-token", &session.access_token));
        jar.set(policy.cookie("sb-auth-refresh-token", &session.refresh_token));
        tab.backend.set_unavailable(true);

        let outcome = tab.run(CallbackRequest::Bare).await;
        assert_eq!(outcome, CallbackOutcome::Recoverable("/sign-in".into()));
    }

    #[tokio::test]
    async fn test_signup_waits_for_session_to_become_readable() {
        let jar = Arc::new(LaggingJar {
            inner: BrowserCookies::new(),
            lag: 3,
            pending: AtomicUsize::new(0),
        });
        let tab = mounted_tab(jar).await;
        tab.backend
            .allow_otp("confirm", OtpType::Signup, session_for(&alice()));

        let outcome = tab
            .run(CallbackRequest::Otp {
                token: "confirm".into(),
                kind: OtpType::Signup,
            })
            .await;

        assert_eq!(
            outcome,
            CallbackOutcome::Success("/docs/introduction/what-is-lomi".into())
        );
        assert_eq!(tab.store.state(), AuthState::Authenticated);
    }

    #[tokio::test]
    async fn test_unreadable_session_times_out_to_sign_in() {
        let jar = Arc::new(LaggingJar {
            inner: BrowserCookies::new(),
            lag: usize::MAX,
            pending: AtomicUsize::new(0),
        });
        let tab = mounted_tab(jar).await;
        tab.backend
            .allow_otp("confirm", OtpType::Signup, session_for(&alice()));

        let outcome = tab
            .run(CallbackRequest::Otp {
                token: "confirm".into(),
                kind: OtpType::Signup,
            })
            .await;

        assert_eq!(outcome, CallbackOutcome::Recoverable("/sign-in".into()));
    }

    async fn lagging_oauth_tab(lag: usize) -> Tab {
        let jar = Arc::new(LaggingJar {
            inner: BrowserCookies::new(),
            lag,
            pending: AtomicUsize::new(0),
        });
        let tab = mounted_tab(jar.clone()).await;
        tab.backend.allow_code("good", session_for(&alice()));
        jar.inner
            .set(tab.store.client().policy().cookie("sb-auth-code-verifier", "v"));
        tab
    }

    #[tokio::test]
    async fn test_oauth_waits_for_session_to_become_readable() {
        let tab = lagging_oauth_tab(3).await;

        let outcome = tab
            .run(CallbackRequest::OAuthCode { code: "good".into() })
            .await;

        assert_eq!(
            outcome,
            CallbackOutcome::Success("/docs/introduction/what-is-lomi".into())
        );
    }

    #[tokio::test]
    async fn test_unreadable_oauth_session_times_out_to_sign_in() {
        let tab = lagging_oauth_tab(usize::MAX).await;

        let outcome = tab
            .run(CallbackRequest::OAuthCode { code: "good".into() })
            .await;

        assert_eq!(outcome, CallbackOutcome::Recoverable("/sign-in".into()));
    }

    #[test]
    fn test_error_location_is_url_encoded() {
        let routes = CallbackRoutes::default();
        let location =
            routes.error_location(&Error::InvalidCredential("Invalid login credentials".into()));
        assert_eq!(
            location,
            "/error?message=Authentication%20failed%3A%20Invalid%20email%20or%20password"
        );
    }
}
