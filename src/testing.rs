//! In-memory identity backend for unit tests.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration as StdDuration;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use time::{Duration, OffsetDateTime};
use url::Url;
use uuid::Uuid;

use crate::backend::{AuthBackend, OAuthRequest, PasswordCredentials};
use crate::claims;
use crate::client::lock;
use crate::error::Error;
use crate::types::{OtpType, Session, User, UserId};

static TOKEN_SEQ: AtomicU64 = AtomicU64::new(1);

pub(crate) fn alice() -> User {
    User::new(UserId(Uuid::from_u128(0xa11ce))).with_email("alice@example.com")
}

pub(crate) fn bob() -> User {
    User::new(UserId(Uuid::from_u128(0xb0b))).with_email("bob@example.com")
}

pub(crate) fn fake_jwt(user: &User, expires_at: OffsetDateTime) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let payload = serde_json::json!({
        "sub": user.id,
        "email": user.email,
        "exp": expires_at.unix_timestamp(),
        "user_metadata": user.identity_metadata,
        "jti": TOKEN_SEQ.fetch_add(1, Ordering::Relaxed),
    });
    let payload = URL_SAFE_NO_PAD.encode(payload.to_string());
    format!("{header}.{payload}.c2lnbmF0dXJl")
}

fn session_expiring(user: &User, expires_at: OffsetDateTime) -> Session {
    // Whole seconds, as they come back out of the JWT.
    let expires_at = OffsetDateTime::from_unix_timestamp(expires_at.unix_timestamp())
        .unwrap_or(OffsetDateTime::UNIX_EPOCH);
    Session {
        access_token: fake_jwt(user, expires_at),
        refresh_token: format!("refresh-{}", TOKEN_SEQ.fetch_add(1, Ordering::Relaxed)),
        expires_at,
        user: user.clone(),
    }
}

pub(crate) fn session_for(user: &User) -> Session {
    session_expiring(user, OffsetDateTime::now_utc() + Duration::hours(1))
}

pub(crate) fn expired_session(user: &User) -> Session {
    session_expiring(user, OffsetDateTime::now_utc() - Duration::minutes(5))
}

#[derive(Default)]
struct MockState {
    passwords: HashMap<String, (String, User)>,
    codes: HashMap<String, Session>,
    otps: HashMap<String, (OtpType, Session)>,
    refreshes: HashMap<String, Session>,
    valid_access: HashSet<String>,
    users: HashMap<UserId, User>,
    unavailable: bool,
    delay: Option<StdDuration>,
    last_verifier: Option<String>,
    get_user_calls: usize,
    refresh_calls: usize,
}

/// Scriptable [`AuthBackend`]. Every session it hands out is registered as valid
/// for `get_user`.
#[derive(Default)]
pub(crate) struct MockBackend {
    state: Mutex<MockState>,
}

impl MockBackend {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_password_user(self, password: &str, user: User) -> Self {
        {
            let mut state = lock(&self.state);
            let email = user.email.clone().unwrap_or_default();
            state.users.insert(user.id, user.clone());
            state.passwords.insert(email, (password.to_string(), user));
        }
        self
    }

    pub(crate) fn register_session(&self, session: &Session) {
        let mut state = lock(&self.state);
        state.valid_access.insert(session.access_token.clone());
        state.users.insert(session.user.id, session.user.clone());
    }

    pub(crate) fn revoke(&self, access_token: &str) {
        lock(&self.state).valid_access.remove(access_token);
    }

    /// Makes `get_user` answer with `user` for every valid token whose subject
    /// is `subject`.
    pub(crate) fn answer_as(&self, subject: UserId, user: User) {
        lock(&self.state).users.insert(subject, user);
    }

    pub(crate) fn allow_refresh(&self, refresh_token: &str, session: Session) {
        lock(&self.state)
            .refreshes
            .insert(refresh_token.to_string(), session);
    }

    pub(crate) fn allow_code(&self, code: &str, session: Session) {
        lock(&self.state).codes.insert(code.to_string(), session);
    }

    pub(crate) fn allow_otp(&self, token: &str, otp_type: OtpType, session: Session) {
        lock(&self.state)
            .otps
            .insert(token.to_string(), (otp_type, session));
    }

    pub(crate) fn set_unavailable(&self, unavailable: bool) {
        lock(&self.state).unavailable = unavailable;
    }

    pub(crate) fn set_delay(&self, delay: StdDuration) {
        lock(&self.state).delay = Some(delay);
    }

    pub(crate) fn last_verifier(&self) -> Option<String> {
        lock(&self.state).last_verifier.clone()
    }

    pub(crate) fn get_user_calls(&self) -> usize {
        lock(&self.state).get_user_calls
    }

    pub(crate) fn refresh_calls(&self) -> usize {
        lock(&self.state).refresh_calls
    }

    async fn enter(&self) -> Result<(), Error> {
        let (unavailable, delay) = {
            let state = lock(&self.state);
            (state.unavailable, state.delay)
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if unavailable {
            return Err(Error::TransientBackend("mock backend unavailable".into()));
        }
        Ok(())
    }

    fn issue(&self, session: &Session) -> Session {
        self.register_session(session);
        session.clone()
    }
}

impl AuthBackend for MockBackend {
    async fn sign_in_with_password(
        &self,
        credentials: &PasswordCredentials,
    ) -> Result<Session, Error> {
        self.enter().await?;
        let user = {
            let state = lock(&self.state);
            match state.passwords.get(&credentials.email) {
                Some((password, user)) if *password == credentials.password => user.clone(),
                _ => return Err(Error::InvalidCredential("Invalid login credentials".into())),
            }
        };
        Ok(self.issue(&session_for(&user)))
    }

    fn sign_in_with_oauth(&self, request: &OAuthRequest) -> Result<Url, Error> {
        let mut url: Url = "https://auth.example.test/authorize"
            .parse()
            .map_err(|e| Error::Configuration(format!("{e}")))?;
        url.query_pairs_mut()
            .append_pair("provider", request.provider.as_str())
            .append_pair("redirect_to", request.redirect_to.as_str())
            .append_pair("code_challenge", &request.code_challenge)
            .append_pair("code_challenge_method", "s256");
        for (key, value) in &request.query_params {
            url.query_pairs_mut().append_pair(key, value);
        }
        Ok(url)
    }

    async fn exchange_code_for_session(
        &self,
        code: &str,
        code_verifier: &str,
    ) -> Result<Session, Error> {
        lock(&self.state).last_verifier = Some(code_verifier.to_string());
        self.enter().await?;
        let session = lock(&self.state).codes.get(code).cloned();
        match session {
            Some(session) => Ok(self.issue(&session)),
            None => Err(Error::InvalidCredential(
                "invalid flow state, no valid flow state found".into(),
            )),
        }
    }

    async fn verify_otp(&self, token_hash: &str, otp_type: OtpType) -> Result<Session, Error> {
        self.enter().await?;
        let found = lock(&self.state).otps.get(token_hash).cloned();
        match found {
            Some((kind, session)) if kind == otp_type => Ok(self.issue(&session)),
            _ => Err(Error::InvalidCredential(
                "Token has expired or is invalid".into(),
            )),
        }
    }

    async fn refresh_session(&self, refresh_token: &str) -> Result<Session, Error> {
        lock(&self.state).refresh_calls += 1;
        self.enter().await?;
        let found = lock(&self.state).refreshes.get(refresh_token).cloned();
        match found {
            Some(session) => Ok(self.issue(&session)),
            None => Err(Error::InvalidCredential(
                "Invalid Refresh Token: Refresh Token Not Found".into(),
            )),
        }
    }

    async fn get_user(&self, access_token: &str) -> Result<User, Error> {
        lock(&self.state).get_user_calls += 1;
        self.enter().await?;
        let claims = claims::decode_unverified(access_token)?;
        let state = lock(&self.state);
        if !state.valid_access.contains(access_token) {
            return Err(Error::InvalidCredential("invalid JWT".into()));
        }
        Ok(state
            .users
            .get(&claims.sub)
            .cloned()
            .unwrap_or_else(|| claims.user()))
    }

    async fn sign_out(&self, access_token: &str) -> Result<(), Error> {
        self.enter().await?;
        self.revoke(access_token);
        Ok(())
    }
}
