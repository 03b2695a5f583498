use std::time::Duration;

use crate::backend::AuthBackend;
use crate::callback::CallbackRoutes;
use crate::client::{CookieNames, DEFAULT_COOKIE_PREFIX};
use crate::error::Error;
use crate::policy::Environment;

/// Settings shared by the edge refresher, the server extractor and the routes.
#[derive(Debug, Clone)]
pub(crate) struct AuthSettings {
    pub(crate) environment: Environment,
    pub(crate) cookie_names: CookieNames,
    pub(crate) auth_path: String,
    pub(crate) callback: CallbackRoutes,
    pub(crate) sign_out_redirect: String,
    pub(crate) developer_info_path: String,
    pub(crate) edge_timeout: Duration,
    pub(crate) static_prefixes: Vec<String>,
    pub(crate) static_extensions: Vec<String>,
    pub(crate) legacy_redirects: Vec<(String, String)>,
}

impl AuthSettings {
    fn defaults(environment: Environment) -> Self {
        Self {
            environment,
            cookie_names: CookieNames::default(),
            auth_path: "/auth".into(),
            callback: CallbackRoutes::default(),
            sign_out_redirect: "/".into(),
            developer_info_path: "/api/developer-info".into(),
            edge_timeout: Duration::from_secs(5),
            static_prefixes: ["/_next/static", "/_next/image", "/favicon.ico", "/public"]
                .map(String::from)
                .to_vec(),
            static_extensions: ["svg", "png", "jpg", "jpeg", "gif", "webp", "ico"]
                .map(String::from)
                .to_vec(),
            legacy_redirects: vec![
                (
                    "/introduction/getting-started".into(),
                    "/introduction/what-is-lomi".into(),
                ),
                (
                    "/license-management/license-management".into(),
                    "/license-management/overview".into(),
                ),
            ],
        }
    }

    /// Paths the edge refresher never touches.
    pub(crate) fn is_static_asset(&self, path: &str) -> bool {
        if self.static_prefixes.iter().any(|p| path.starts_with(p.as_str())) {
            return true;
        }
        path.rsplit_once('.').is_some_and(|(_, ext)| {
            self.static_extensions
                .iter()
                .any(|e| e.eq_ignore_ascii_case(ext))
        })
    }

    pub(crate) fn legacy_redirect(&self, path: &str) -> Option<&str> {
        self.legacy_redirects
            .iter()
            .find(|(from, _)| from == path)
            .map(|(_, to)| to.as_str())
    }
}

/// Session protocol configuration for an axum application.
///
/// The backend is a constructor parameter. Use
/// [`from_env()`](SessionConfig::from_env) for convention-based setup, or
/// [`new()`](SessionConfig::new) with `with_*` methods for full control.
pub struct SessionConfig<B> {
    pub(super) backend: B,
    pub(super) settings: AuthSettings,
}

impl<B: AuthBackend> SessionConfig<B> {
    /// All optional fields use defaults. Override with `with_*` methods.
    #[must_use]
    pub fn new(backend: B, environment: Environment) -> Self {
        Self {
            backend,
            settings: AuthSettings::defaults(environment),
        }
    }

    #[must_use]
    pub fn environment(&self) -> &Environment {
        &self.settings.environment
    }

    #[must_use]
    pub fn with_cookie_names(mut self, names: CookieNames) -> Self {
        self.settings.cookie_names = names;
        self
    }

    /// Mount point of the callback and sign-out routes (default `/auth`).
    #[must_use]
    pub fn with_auth_path(mut self, path: impl Into<String>) -> Self {
        self.settings.auth_path = path.into();
        self
    }

    #[must_use]
    pub fn with_callback_routes(mut self, routes: CallbackRoutes) -> Self {
        self.settings.callback = routes;
        self
    }

    #[must_use]
    pub fn with_sign_out_redirect(mut self, path: impl Into<String>) -> Self {
        self.settings.sign_out_redirect = path.into();
        self
    }

    #[must_use]
    pub fn with_developer_info_path(mut self, path: impl Into<String>) -> Self {
        self.settings.developer_info_path = path.into();
        self
    }

    /// Upper bound on the backend round-trip made for each request.
    #[must_use]
    pub fn with_edge_timeout(mut self, timeout: Duration) -> Self {
        self.settings.edge_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_static_prefixes(mut self, prefixes: Vec<String>) -> Self {
        self.settings.static_prefixes = prefixes;
        self
    }

    #[must_use]
    pub fn with_legacy_redirects(mut self, redirects: Vec<(String, String)>) -> Self {
        self.settings.legacy_redirects = redirects;
        self
    }
}

/// Environment-derived part of the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(not(feature = "supabase"), allow(dead_code))]
pub(crate) struct EnvSettings {
    pub(crate) supabase_url: url::Url,
    pub(crate) anon_key: String,
    pub(crate) environment: Environment,
    pub(crate) cookie_names: CookieNames,
}

impl EnvSettings {
    /// Reads settings through `var`, so tests need not touch the process
    /// environment.
    pub(crate) fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Result<Self, Error> {
        let required = |name: &str| {
            var(name)
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| Error::Configuration(format!("{name} is required")))
        };

        let supabase_url = required("SUPABASE_URL")?
            .parse()
            .map_err(|e| Error::Configuration(format!("SUPABASE_URL: {e}")))?;
        let anon_key = required("SUPABASE_ANON_KEY")?;

        let env_name = var("APP_ENV").unwrap_or_else(|| "development".into());
        let environment = Environment::from_parts(&env_name, var("SSO_COOKIE_DOMAIN"))?;

        let prefix = var("AUTH_COOKIE_PREFIX")
            .filter(|p| !p.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_COOKIE_PREFIX.into());

        Ok(Self {
            supabase_url,
            anon_key,
            environment,
            cookie_names: CookieNames::with_prefix(prefix.trim()),
        })
    }
}

#[cfg(feature = "supabase")]
impl SessionConfig<crate::supabase::SupabaseClient> {
    /// Create config from environment variables.
    ///
    /// # Required env vars
    /// - `SUPABASE_URL`: project URL
    /// - `SUPABASE_ANON_KEY`: public API key
    /// - `SSO_COOKIE_DOMAIN`: parent domain, required when `APP_ENV=production`
    ///
    /// # Optional env vars
    /// - `APP_ENV`: `production`, `preview` or `development` (default)
    /// - `AUTH_COOKIE_PREFIX`: cookie name prefix (default `sb-auth`)
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if required env vars are missing or invalid.
    pub fn from_env() -> Result<Self, Error> {
        let env = EnvSettings::from_lookup(|name| std::env::var(name).ok())?;
        let backend = crate::supabase::SupabaseClient::new(env.supabase_url, env.anon_key)?;
        tracing::info!(
            production = env.environment.is_production(),
            "Session protocol configured from environment"
        );
        Ok(Self::new(backend, env.environment).with_cookie_names(env.cookie_names))
    }
}
