use std::collections::BTreeMap;
use std::sync::Mutex;

use axum_extra::extract::cookie::Cookie;
use time::Duration;

use super::lock;

/// Read/write access to whatever cookie storage a context has.
///
/// The browser has `document.cookie`; the edge and the server have the request's
/// `Cookie` header plus the response's `Set-Cookie` headers. Adapters only store
/// and return what they are given: attributes always come from the
/// [`CookiePolicy`](crate::policy::CookiePolicy) held by the
/// [`AuthClient`](super::AuthClient).
pub trait CookieAdapter: Send + Sync {
    fn get(&self, name: &str) -> Option<String>;

    /// Stores a cookie. A cookie with `Max-Age=0` deletes `name`.
    fn set(&self, cookie: Cookie<'static>);
}

pub(crate) fn is_removal(cookie: &Cookie<'_>) -> bool {
    cookie.max_age().is_some_and(|age| age <= Duration::ZERO)
}

/// Cookie storage of a browser tab.
pub struct BrowserCookies {
    values: Mutex<BTreeMap<String, Cookie<'static>>>,
    written: Mutex<Vec<Cookie<'static>>>,
}

impl BrowserCookies {
    #[must_use]
    pub fn new() -> Self {
        Self {
            values: Mutex::new(BTreeMap::new()),
            written: Mutex::new(Vec::new()),
        }
    }

    /// Seeds the jar from a `document.cookie`-style string. Pairs that do not
    /// parse as cookies are skipped.
    #[must_use]
    pub fn from_cookie_string(cookies: &str) -> Self {
        let jar = Self::new();
        lock(&jar.values).extend(
            Cookie::split_parse(cookies.to_owned())
                .filter_map(Result::ok)
                .map(|cookie| (cookie.name().to_owned(), cookie)),
        );
        jar
    }

    /// `name=value; ...` as the browser would send it with the next request.
    #[must_use]
    pub fn cookie_string(&self) -> String {
        lock(&self.values)
            .values()
            .map(|cookie| cookie.stripped().to_string())
            .collect::<Vec<_>>()
            .join("; ")
    }

    /// Every cookie written so far, attributes included, oldest first.
    #[must_use]
    pub fn written(&self) -> Vec<Cookie<'static>> {
        lock(&self.written).clone()
    }
}

impl Default for BrowserCookies {
    fn default() -> Self {
        Self::new()
    }
}

impl CookieAdapter for BrowserCookies {
    fn get(&self, name: &str) -> Option<String> {
        lock(&self.values)
            .get(name)
            .map(|cookie| cookie.value().to_owned())
    }

    fn set(&self, cookie: Cookie<'static>) {
        {
            let mut values = lock(&self.values);
            if is_removal(&cookie) {
                values.remove(cookie.name());
            } else {
                values.insert(cookie.name().to_owned(), cookie.clone());
            }
        }
        lock(&self.written).push(cookie);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::{Environment, policy_for};

    #[test]
    fn test_seeding_skips_malformed_pairs() {
        let jar = BrowserCookies::from_cookie_string("a=1; b = two ;c=x=y; =skip; junk");
        assert_eq!(jar.get("a").as_deref(), Some("1"));
        assert_eq!(jar.get("b").as_deref(), Some("two"));
        assert_eq!(jar.get("c").as_deref(), Some("x=y"));
        assert_eq!(jar.get("junk"), None);
        assert_eq!(jar.cookie_string(), "a=1; b=two; c=x=y");
    }

    #[test]
    fn test_browser_jar_set_get_remove() {
        let policy = policy_for(&Environment::Development);
        let jar = BrowserCookies::new();

        jar.set(policy.cookie("sb-auth-access-token", "abc"));
        assert_eq!(jar.get("sb-auth-access-token").as_deref(), Some("abc"));

        jar.set(policy.removal("sb-auth-access-token"));
        assert_eq!(jar.get("sb-auth-access-token"), None);
        assert_eq!(jar.written().len(), 2);
    }

    #[test]
    fn test_browser_jar_seeded_from_string() {
        let jar = BrowserCookies::from_cookie_string("x=1; y=2");
        assert_eq!(jar.get("y").as_deref(), Some("2"));
        assert_eq!(jar.cookie_string(), "x=1; y=2");
        assert!(jar.written().is_empty());
    }

    #[test]
    fn test_cookie_string_drops_attributes() {
        let policy = policy_for(&Environment::Production {
            parent_domain: "example.com".into(),
        });
        let jar = BrowserCookies::from_cookie_string("theme=dark");
        jar.set(policy.cookie("sb-auth-access-token", "abc"));
        assert_eq!(jar.cookie_string(), "sb-auth-access-token=abc; theme=dark");
    }
}
