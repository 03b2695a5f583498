use std::sync::Arc;

use axum::extract::FromRef;

use super::config::{AuthSettings, SessionConfig};
use super::cookies::RequestCookies;
use super::traits::DeveloperDirectory;
use crate::backend::AuthBackend;
use crate::client::AuthClient;

/// Shared state of the edge refresher and the server extractor.
///
/// Holds no per-request data: every request gets its own [`RequestCookies`]
/// and its own [`AuthClient`].
pub struct SessionContext<B> {
    backend: Arc<B>,
    pub(super) settings: Arc<AuthSettings>,
}

// Manual Clone: avoid derive adding a `B: Clone` bound.
impl<B> Clone for SessionContext<B> {
    fn clone(&self) -> Self {
        Self {
            backend: self.backend.clone(),
            settings: self.settings.clone(),
        }
    }
}

impl<B: AuthBackend> SessionContext<B> {
    #[must_use]
    pub fn new(config: SessionConfig<B>) -> Self {
        Self {
            backend: Arc::new(config.backend),
            settings: Arc::new(config.settings),
        }
    }

    #[must_use]
    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    /// Client bound to one request's cookies.
    pub(super) fn client_for(&self, cookies: Arc<RequestCookies>) -> AuthClient<B> {
        AuthClient::new(
            self.backend.clone(),
            cookies,
            &self.settings.environment,
            self.settings.cookie_names.clone(),
        )
    }
}

/// State of the auth routes.
pub(super) struct RouteState<B, D> {
    pub(super) context: SessionContext<B>,
    pub(super) directory: Arc<D>,
}

impl<B, D> Clone for RouteState<B, D> {
    fn clone(&self) -> Self {
        Self {
            context: self.context.clone(),
            directory: self.directory.clone(),
        }
    }
}

impl<B: AuthBackend, D: DeveloperDirectory> FromRef<RouteState<B, D>> for SessionContext<B> {
    fn from_ref(state: &RouteState<B, D>) -> Self {
        state.context.clone()
    }
}
