use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::header::COOKIE;
use axum::middleware::Next;
use axum::response::{IntoResponse, Redirect, Response};

use super::cookies::{RequestCookies, append_set_cookies};
use super::state::SessionContext;
use crate::backend::AuthBackend;

/// Edge session refresher.
///
/// Runs before the rest of the request: validates the session cookies, refreshes
/// them when expired, forwards the refreshed values to downstream handlers and
/// writes them back on the response. A slow or failing backend only makes this
/// request anonymous.
///
/// ```rust,ignore
/// let context = SessionContext::new(SessionConfig::from_env()?);
/// let app = Router::new()
///     .merge(auth_routes(context.clone(), directory))
///     .layer(axum::middleware::from_fn_with_state(context, refresh_session::<SupabaseClient>));
/// ```
pub async fn refresh_session<B: AuthBackend>(
    State(context): State<SessionContext<B>>,
    mut request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path();
    if context.settings.is_static_asset(path) {
        return next.run(request).await;
    }
    if let Some(target) = context.settings.legacy_redirect(path) {
        tracing::debug!(from = %path, to = %target, "Legacy path redirect");
        return Redirect::temporary(target).into_response();
    }

    let cookies = Arc::new(RequestCookies::from_headers(request.headers()));
    let client = context.client_for(cookies.clone());

    match tokio::time::timeout(context.settings.edge_timeout, client.get_session()).await {
        Ok(Ok(Some(session))) => {
            tracing::debug!(user_id = %session.user.id, "Edge session valid");
        }
        Ok(Ok(None)) => {}
        Ok(Err(e)) => {
            tracing::warn!(error = %e, "Edge session refresh failed, continuing anonymously");
        }
        Err(_) => {
            tracing::warn!(
                timeout_ms = context.settings.edge_timeout.as_millis() as u64,
                "Edge session refresh timed out, continuing anonymously"
            );
        }
    }

    let forwarded = cookies.cookie_header();
    let writes = cookies.take_writes();
    if !writes.is_empty() {
        match forwarded {
            Some(header) => {
                request.headers_mut().insert(COOKIE, header);
            }
            None => {
                request.headers_mut().remove(COOKIE);
            }
        }
    }

    let mut response = next.run(request).await;
    append_set_cookies(response.headers_mut(), &writes);
    response
}
