use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{FromRef, FromRequestParts};
use axum::http::request::Parts;
use axum_extra::extract::CookieJar;

use super::cookies::RequestCookies;
use super::error::AuthError;
use super::state::SessionContext;
use crate::backend::AuthBackend;
use crate::client::AuthClient;
use crate::types::{Session, User};

/// Session of the current request, read the same way the edge reads it.
///
/// Never rejects: an unreadable, rejected or timed-out session is simply
/// absent. Handlers that need an identity call
/// [`require_user`](Self::require_user), which turns absence into `401`.
///
/// # Example
///
/// ```rust,ignore
/// async fn profile(session: ServerSession<SupabaseClient>) -> Result<Json<User>, AuthError> {
///     Ok(Json(session.require_user().await?))
/// }
///
/// async fn page(session: ServerSession<SupabaseClient>) -> impl IntoResponse {
///     match session.session() {
///         Some(s) => format!("Hello, {}", s.user.id),
///         None => "Hello, guest".to_string(),
///     }
/// }
/// ```
pub struct ServerSession<B> {
    client: AuthClient<B>,
    cookies: Arc<RequestCookies>,
    session: Option<Session>,
}

impl<B, S> FromRequestParts<S> for ServerSession<B>
where
    B: AuthBackend,
    SessionContext<B>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let context = SessionContext::<B>::from_ref(state);
        let cookies = Arc::new(RequestCookies::from_headers(&parts.headers));
        let client = context.client_for(cookies.clone());

        let session =
            match tokio::time::timeout(context.settings.edge_timeout, client.get_session()).await
            {
                Ok(Ok(session)) => session,
                Ok(Err(e)) => {
                    tracing::warn!(error = %e, "Server session lookup failed");
                    None
                }
                Err(_) => {
                    tracing::warn!("Server session lookup timed out");
                    None
                }
            };

        Ok(Self {
            client,
            cookies,
            session,
        })
    }
}

impl<B: AuthBackend> ServerSession<B> {
    #[must_use]
    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    #[must_use]
    pub fn client(&self) -> &AuthClient<B> {
        &self.client
    }

    /// Backend-confirmed user of this request.
    ///
    /// # Errors
    ///
    /// [`AuthError::Unauthenticated`] without a session or when the backend
    /// cannot be reached, [`AuthError::SessionExpired`] when the backend rejects
    /// the session.
    pub async fn require_user(&self) -> Result<User, AuthError> {
        let session = self.session.as_ref().ok_or(AuthError::Unauthenticated)?;
        self.client
            .confirm_user(session)
            .await
            .inspect_err(|e| tracing::warn!(error = %e, "Could not confirm session user"))?
            .ok_or(AuthError::SessionExpired)
    }

    /// Cookies written while handling this request (refresh or sign-out), to
    /// be returned with the response.
    #[must_use]
    pub fn pending_cookies(&self) -> CookieJar {
        self.cookies.response_jar()
    }
}
