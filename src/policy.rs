//! The one cookie attribute set every context writes with.
//!
//! Client, edge and server contexts never build session cookies themselves; they
//! go through [`policy_for`]. A host-only cookie written by one context while
//! another expects a parent-domain cookie breaks SSO across subdomains while
//! everything keeps working on a single host, so there is exactly one place that
//! decides.

use std::str::FromStr;

use axum_extra::extract::cookie::{Cookie, SameSite};
use time::Duration;

use crate::error::Error;

/// Lifetime of session cookies: long enough not to refresh on every request,
/// short enough to force periodic refresh.
pub const SESSION_MAX_AGE: Duration = Duration::minutes(50);

/// Deployment environment, as far as cookies are concerned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Environment {
    /// Live product. Cookies are scoped to the parent domain shared by the
    /// marketing, docs and portal subdomains.
    Production { parent_domain: String },
    /// Staging and preview deployments. Host-only, like development, so they can
    /// never read or clobber production sessions.
    Preview,
    /// Local development over plain HTTP.
    Development,
}

impl Environment {
    /// Builds the environment from its name and the configured SSO domain.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] for an unknown name, or for production
    /// without a parent domain.
    pub fn from_parts(name: &str, parent_domain: Option<String>) -> Result<Self, Error> {
        match EnvironmentName::from_str(name)? {
            EnvironmentName::Production => {
                let parent_domain = parent_domain
                    .map(|d| d.trim().to_string())
                    .filter(|d| !d.is_empty())
                    .ok_or_else(|| {
                        Error::Configuration(
                            "SSO_COOKIE_DOMAIN is required in production".into(),
                        )
                    })?;
                Ok(Self::Production { parent_domain })
            }
            EnvironmentName::Preview => Ok(Self::Preview),
            EnvironmentName::Development => Ok(Self::Development),
        }
    }

    #[must_use]
    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production { .. })
    }
}

enum EnvironmentName {
    Production,
    Preview,
    Development,
}

impl FromStr for EnvironmentName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "production" | "prod" => Ok(Self::Production),
            "preview" | "staging" => Ok(Self::Preview),
            "development" | "dev" | "local" | "test" => Ok(Self::Development),
            other => Err(Error::Configuration(format!(
                "APP_ENV: unknown environment '{other}'"
            ))),
        }
    }
}

/// Attributes applied to every session cookie.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CookiePolicy {
    pub domain: Option<String>,
    pub path: String,
    pub secure: bool,
    pub same_site: SameSite,
    pub max_age: Duration,
}

/// Maps an environment to its cookie attributes.
#[must_use]
pub fn policy_for(env: &Environment) -> CookiePolicy {
    let (domain, secure) = match env {
        Environment::Production { parent_domain } => (Some(parent_domain.clone()), true),
        Environment::Preview | Environment::Development => (None, false),
    };

    CookiePolicy {
        domain,
        path: "/".into(),
        secure,
        same_site: SameSite::Lax,
        max_age: SESSION_MAX_AGE,
    }
}

impl CookiePolicy {
    /// Session cookie carrying `value`.
    ///
    /// Not `HttpOnly`: the browser context reads the same cookies.
    #[must_use]
    pub fn cookie(&self, name: &str, value: &str) -> Cookie<'static> {
        self.build(name, value, self.max_age)
    }

    /// Deletion cookie. Carries the same domain and path as the cookie it
    /// deletes, otherwise browsers keep the parent-domain copy.
    #[must_use]
    pub fn removal(&self, name: &str) -> Cookie<'static> {
        self.build(name, "", Duration::ZERO)
    }

    fn build(&self, name: &str, value: &str, max_age: Duration) -> Cookie<'static> {
        let mut builder = Cookie::build((name.to_string(), value.to_string()))
            .path(self.path.clone())
            .secure(self.secure)
            .same_site(self.same_site)
            .max_age(max_age);
        if let Some(domain) = &self.domain {
            builder = builder.domain(domain.clone());
        }
        builder.build()
    }
}
