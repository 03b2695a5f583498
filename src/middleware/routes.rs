use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::get;

use super::cookies::RequestCookies;
use super::error::AuthError;
use super::extractor::ServerSession;
use super::state::{RouteState, SessionContext};
use super::traits::DeveloperDirectory;
use super::types::DeveloperInfo;
use crate::backend::AuthBackend;
use crate::callback::{CallbackMachine, CallbackOutcome, CallbackQuery, CallbackRequest};

/// Create the session protocol router.
///
/// - `GET {auth_path}/callback`: completes OAuth, email confirmation and
///   password recovery links, always answering with a redirect.
/// - `GET|POST {auth_path}/sign-out`: revokes the session and clears cookies.
/// - `GET {developer_info_path}`: `{ userId, merchantId, organizationId }` or `401`.
pub fn auth_routes<B, D>(context: SessionContext<B>, directory: D) -> Router
where
    B: AuthBackend,
    D: DeveloperDirectory,
{
    let auth_path = context.settings.auth_path.clone();
    let developer_info_path = context.settings.developer_info_path.clone();

    let state = RouteState {
        context,
        directory: Arc::new(directory),
    };

    Router::new()
        .route(&format!("{auth_path}/callback"), get(callback::<B, D>))
        .route(
            &format!("{auth_path}/sign-out"),
            get(sign_out::<B, D>).post(sign_out::<B, D>),
        )
        .route(&developer_info_path, get(developer_info::<B, D>))
        .with_state(state)
}

// ── Callback ───────────────────────────────────────────────────────

async fn callback<B: AuthBackend, D: DeveloperDirectory>(
    State(state): State<RouteState<B, D>>,
    Query(query): Query<CallbackQuery>,
    headers: HeaderMap,
) -> Response {
    let cookies = Arc::new(RequestCookies::from_headers(&headers));
    let client = state.context.client_for(cookies.clone());
    let routes = &state.context.settings.callback;

    let request = CallbackRequest::from_query(&query);
    let outcome = CallbackMachine::new(&client, routes).run(request).await;
    let jar = cookies.response_jar();

    match outcome {
        CallbackOutcome::Fatal(location) => (jar, AuthError::Callback(location)).into_response(),
        CallbackOutcome::Success(location) | CallbackOutcome::Recoverable(location) => {
            (jar, Redirect::to(&location)).into_response()
        }
    }
}

// ── Sign-out ───────────────────────────────────────────────────────

async fn sign_out<B: AuthBackend, D: DeveloperDirectory>(
    State(state): State<RouteState<B, D>>,
    session: ServerSession<B>,
) -> Response {
    if let Some(user_id) = session.session().map(|s| s.user.id) {
        tracing::info!(user_id = %user_id, "Signing out");
    }
    session.client().sign_out().await;
    (
        session.pending_cookies(),
        Redirect::to(&state.context.settings.sign_out_redirect),
    )
        .into_response()
}

// ── Developer info ─────────────────────────────────────────────────

async fn developer_info<B: AuthBackend, D: DeveloperDirectory>(
    State(state): State<RouteState<B, D>>,
    session: ServerSession<B>,
) -> Response {
    let result = lookup_developer(&state, &session).await;
    (session.pending_cookies(), result).into_response()
}

async fn lookup_developer<B: AuthBackend, D: DeveloperDirectory>(
    state: &RouteState<B, D>,
    session: &ServerSession<B>,
) -> Result<Json<DeveloperInfo>, AuthError> {
    let user = session.require_user().await.inspect_err(|e| {
        tracing::warn!(error = %e, "Developer info requested without a valid session");
    })?;
    let access_token = session
        .session()
        .map(|s| s.access_token.as_str())
        .ok_or(AuthError::Unauthenticated)?;

    let ids = state
        .directory
        .fetch_developer_ids(access_token, user.id)
        .await
        .map_err(|e| AuthError::Directory(e.to_string()))?;
    if ids.is_none() {
        tracing::warn!(user_id = %user.id, "No developer record, using user id as merchant id");
    }

    Ok(Json(DeveloperInfo::resolve(user.id, ids)))
}
