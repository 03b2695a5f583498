use std::sync::Mutex;

use axum::http::{HeaderMap, HeaderValue, header::SET_COOKIE};
use axum_extra::extract::CookieJar;
use axum_extra::extract::cookie::Cookie;

use crate::client::{CookieAdapter, is_removal, lock};

/// Cookie adapter for one request, at the edge or in a server handler.
///
/// Reads the request's `Cookie` header and records writes for the response.
/// Later reads see earlier writes, so a refresh performed while handling the
/// request is visible to the rest of it.
pub struct RequestCookies {
    incoming: CookieJar,
    writes: Mutex<Vec<Cookie<'static>>>,
}

impl RequestCookies {
    #[must_use]
    pub fn from_headers(headers: &HeaderMap) -> Self {
        Self {
            incoming: CookieJar::from_headers(headers),
            writes: Mutex::new(Vec::new()),
        }
    }

    /// Cookies written so far, in order, one per name.
    #[cfg(test)]
    pub(crate) fn pending(&self) -> Vec<Cookie<'static>> {
        lock(&self.writes).clone()
    }

    /// Drains the recorded writes.
    pub fn take_writes(&self) -> Vec<Cookie<'static>> {
        std::mem::take(&mut *lock(&self.writes))
    }

    /// Pending writes as a jar, for returning from a handler.
    #[must_use]
    pub fn response_jar(&self) -> CookieJar {
        self.take_writes()
            .into_iter()
            .fold(CookieJar::new(), |jar, cookie| jar.add(cookie))
    }

    /// `Cookie` request header reflecting the writes, or `None` once no cookie
    /// is left.
    #[must_use]
    pub fn cookie_header(&self) -> Option<HeaderValue> {
        let jar = lock(&self.writes)
            .iter()
            .fold(self.incoming.clone(), |jar, cookie| {
                if is_removal(cookie) {
                    jar.remove(Cookie::from(cookie.name().to_owned()))
                } else {
                    jar.add(cookie.clone())
                }
            });
        let mut cookies: Vec<_> = jar.iter().collect();
        if cookies.is_empty() {
            return None;
        }
        cookies.sort_by(|a, b| a.name().cmp(b.name()));
        let header = cookies
            .iter()
            .map(|cookie| cookie.stripped().to_string())
            .collect::<Vec<_>>()
            .join("; ");
        HeaderValue::from_str(&header).ok()
    }
}

impl CookieAdapter for RequestCookies {
    fn get(&self, name: &str) -> Option<String> {
        if let Some(written) = lock(&self.writes).iter().find(|c| c.name() == name) {
            return (!is_removal(written)).then(|| written.value().to_string());
        }
        self.incoming.get(name).map(|c| c.value().to_string())
    }

    fn set(&self, cookie: Cookie<'static>) {
        let mut writes = lock(&self.writes);
        writes.retain(|c| c.name() != cookie.name());
        writes.push(cookie);
    }
}

/// Appends one `Set-Cookie` header per cookie.
pub(super) fn append_set_cookies(headers: &mut HeaderMap, cookies: &[Cookie<'static>]) {
    for cookie in cookies {
        match HeaderValue::from_str(&cookie.to_string()) {
            Ok(value) => {
                headers.append(SET_COOKIE, value);
            }
            Err(e) => {
                tracing::warn!(cookie = cookie.name(), error = %e, "Dropping unencodable cookie");
            }
        }
    }
}
