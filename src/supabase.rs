//! Supabase implementation of [`AuthBackend`] and
//! [`DeveloperDirectory`](crate::middleware::DeveloperDirectory).
//!
//! Talks to GoTrue (`/auth/v1/*`) for sessions and to PostgREST
//! (`/rest/v1/rpc/*`) for the developer lookup.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};
use url::Url;

use crate::backend::{AuthBackend, OAuthRequest, PasswordCredentials};
use crate::claims;
use crate::error::Error;
use crate::middleware::{DeveloperDirectory, DeveloperIds};
use crate::types::{OtpType, Session, User, UserId};

fn summarize_response_body(body: &str) -> String {
    let mut hasher = DefaultHasher::new();
    body.hash(&mut hasher);
    format!("len={},digest={:016x}", body.len(), hasher.finish())
}

/// Session payload returned by the GoTrue token and verify endpoints.
#[derive(Debug, Deserialize)]
struct SessionResponse {
    access_token: String,
    refresh_token: String,
    #[serde(default)]
    expires_at: Option<i64>,
    #[serde(default)]
    expires_in: Option<i64>,
    user: User,
}

impl SessionResponse {
    fn into_session(self) -> Result<Session, Error> {
        let expires_at = match (self.expires_at, self.expires_in) {
            (Some(at), _) => OffsetDateTime::from_unix_timestamp(at)
                .map_err(|e| Error::InvalidCredential(format!("expires_at: {e}")))?,
            (None, Some(secs)) => OffsetDateTime::now_utc() + Duration::seconds(secs),
            (None, None) => claims::decode_unverified(&self.access_token)?.expires_at()?,
        };
        Ok(Session {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            expires_at,
            user: self.user,
        })
    }
}

/// GoTrue and PostgREST error bodies use different field names.
#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    error_description: Option<String>,
    #[serde(default)]
    msg: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

impl ErrorBody {
    fn detail(self) -> Option<String> {
        self.error_description
            .or(self.msg)
            .or(self.message)
            .or(self.error)
    }
}

/// Maps a failed response to the crate's error taxonomy.
fn classify(status: StatusCode, body: &str, operation: &'static str) -> Error {
    if status.is_server_error()
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
    {
        return Error::TransientBackend(format!("{operation}: {status}"));
    }
    let detail = serde_json::from_str::<ErrorBody>(body)
        .ok()
        .and_then(ErrorBody::detail)
        .unwrap_or_else(|| status.to_string());
    Error::InvalidCredential(detail)
}

#[derive(Serialize)]
struct PkceGrant<'a> {
    auth_code: &'a str,
    code_verifier: &'a str,
}

#[derive(Serialize)]
struct RefreshGrant<'a> {
    refresh_token: &'a str,
}

#[derive(Serialize)]
struct VerifyRequest<'a> {
    #[serde(rename = "type")]
    kind: OtpType,
    token_hash: &'a str,
}

#[derive(Serialize)]
struct PasswordGrant<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Serialize)]
struct DeveloperIdsParams {
    p_user_id: UserId,
}

/// Supabase project client.
#[derive(Clone)]
pub struct SupabaseClient {
    http: reqwest::Client,
    api_url: Url,
    anon_key: String,
}

impl SupabaseClient {
    /// # Errors
    ///
    /// [`Error::Configuration`] if `api_url` cannot carry a path (e.g. `data:`).
    pub fn new(api_url: Url, anon_key: impl Into<String>) -> Result<Self, Error> {
        if api_url.cannot_be_a_base() {
            return Err(Error::Configuration(format!(
                "SUPABASE_URL is not a base URL: {api_url}"
            )));
        }
        Ok(Self {
            http: reqwest::Client::new(),
            api_url,
            anon_key: anon_key.into(),
        })
    }

    /// Use a custom HTTP client (for connection pool reuse or testing).
    #[must_use]
    pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
        self.http = client;
        self
    }

    #[must_use]
    pub fn api_url(&self) -> &Url {
        &self.api_url
    }

    fn endpoint(&self, path: &str) -> Url {
        let mut url = self.api_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().extend(path.split('/'));
        }
        url
    }

    fn token_url(&self, grant_type: &str) -> Url {
        let mut url = self.endpoint("auth/v1/token");
        url.query_pairs_mut().append_pair("grant_type", grant_type);
        url
    }

    async fn ensure_success(
        response: reqwest::Response,
        operation: &'static str,
    ) -> Result<reqwest::Response, Error> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        let error = classify(status, &body, operation);
        if error.is_transient() {
            tracing::error!(
                operation,
                status = %status,
                body_summary = %summarize_response_body(&body),
                "Supabase request failed"
            );
        } else {
            tracing::warn!(operation, status = %status, "Supabase rejected request");
        }
        Err(error)
    }

    async fn post_session<T: Serialize + Sync>(
        &self,
        url: Url,
        body: &T,
        operation: &'static str,
    ) -> Result<Session, Error> {
        let response = self
            .http
            .post(url)
            .header("apikey", &self.anon_key)
            .json(body)
            .send()
            .await?;
        let response = Self::ensure_success(response, operation).await?;
        response.json::<SessionResponse>().await?.into_session()
    }
}

impl AuthBackend for SupabaseClient {
    async fn sign_in_with_password(
        &self,
        credentials: &PasswordCredentials,
    ) -> Result<Session, Error> {
        let grant = PasswordGrant {
            email: &credentials.email,
            password: &credentials.password,
        };
        self.post_session(self.token_url("password"), &grant, "password sign-in")
            .await
    }

    fn sign_in_with_oauth(&self, request: &OAuthRequest) -> Result<Url, Error> {
        let mut url = self.endpoint("auth/v1/authorize");
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
        let grant = PkceGrant {
            auth_code: code,
            code_verifier,
        };
        self.post_session(self.token_url("pkce"), &grant, "code exchange")
            .await
    }

    async fn verify_otp(&self, token_hash: &str, otp_type: OtpType) -> Result<Session, Error> {
        let request = VerifyRequest {
            kind: otp_type,
            token_hash,
        };
        self.post_session(self.endpoint("auth/v1/verify"), &request, "otp verification")
            .await
    }

    async fn refresh_session(&self, refresh_token: &str) -> Result<Session, Error> {
        let grant = RefreshGrant { refresh_token };
        self.post_session(self.token_url("refresh_token"), &grant, "token refresh")
            .await
    }

    async fn get_user(&self, access_token: &str) -> Result<User, Error> {
        let response = self
            .http
            .get(self.endpoint("auth/v1/user"))
            .header("apikey", &self.anon_key)
            .bearer_auth(access_token)
            .send()
            .await?;
        let response = Self::ensure_success(response, "get user").await?;
        response.json::<User>().await.map_err(Into::into)
    }

    async fn sign_out(&self, access_token: &str) -> Result<(), Error> {
        let response = self
            .http
            .post(self.endpoint("auth/v1/logout"))
            .header("apikey", &self.anon_key)
            .bearer_auth(access_token)
            .send()
            .await?;
        Self::ensure_success(response, "sign out").await?;
        Ok(())
    }
}

impl DeveloperDirectory for SupabaseClient {
    async fn fetch_developer_ids(
        &self,
        access_token: &str,
        user_id: UserId,
    ) -> Result<Option<DeveloperIds>, Box<dyn std::error::Error + Send + Sync>> {
        let response = self
            .http
            .post(self.endpoint("rest/v1/rpc/fetch_developer_ids"))
            .header("apikey", &self.anon_key)
            .header("Accept", "application/json")
            .bearer_auth(access_token)
            .json(&DeveloperIdsParams { p_user_id: user_id })
            .send()
            .await
            .map_err(Error::from)?;
        let response = Self::ensure_success(response, "fetch_developer_ids").await?;
        let rows: Vec<DeveloperIds> = response.json().await.map_err(Error::from)?;
        tracing::debug!(user_id = %user_id, rows = rows.len(), "Fetched developer ids");
        Ok(rows.into_iter().next())
    }
}
