//! Browser access control for the submission endpoint.
//!
//! Every response, including errors and preflights, carries the full set of
//! CORS headers. A caller whose origin is not listed still gets an answer; the
//! browser simply refuses to hand it to the page because the echoed origin is
//! the default one.

use axum::extract::{Request, State};
use axum::http::header::{
    ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_ALLOW_ORIGIN,
    ACCESS_CONTROL_MAX_AGE, ORIGIN, REFERER, VARY,
};
use axum::http::{HeaderMap, HeaderName, HeaderValue};
use axum::middleware::Next;
use axum::response::Response;
use std::sync::Arc;

/// Origins of the sites that embed the partner form.
pub const DEFAULT_ALLOWED_ORIGINS: [&str; 7] = [
    "https://karenavedikyan.github.io",
    "https://rem-navy.vercel.app",
    "https://rem.vercel.app",
    "https://remcard.ru",
    "http://localhost:3000",
    "http://127.0.0.1:5500",
    "http://localhost:5500",
];

const ALLOW_METHODS: &str = "OPTIONS, POST";
const ALLOW_HEADERS: &str = "Content-Type";
const MAX_AGE_SECS: &str = "86400";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorsPolicy {
    /// Never empty. The first entry is the default origin.
    allowed: Vec<String>,
}

impl CorsPolicy {
    /// Builds a policy from an allow-list. Trailing `/` is ignored; an empty
    /// list falls back to [`DEFAULT_ALLOWED_ORIGINS`].
    pub fn new<I, S>(origins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut allowed: Vec<String> = origins
            .into_iter()
            .map(|o| o.as_ref().trim().trim_end_matches('/').to_string())
            .filter(|o| !o.is_empty())
            .collect();
        if allowed.is_empty() {
            allowed = DEFAULT_ALLOWED_ORIGINS.map(String::from).to_vec();
        }
        Self { allowed }
    }

    pub fn default_origin(&self) -> &str {
        &self.allowed[0]
    }

    /// Origin to send back in `Access-Control-Allow-Origin`.
    ///
    /// Matching is by prefix, so `https://remcard.ru` also admits
    /// `https://remcard.ru:8443`.
    pub fn allow_origin<'a>(&'a self, origin: Option<&'a str>) -> &'a str {
        match origin {
            Some(origin) if self.allowed.iter().any(|a| origin.starts_with(a.as_str())) => origin,
            _ => self.default_origin(),
        }
    }

    fn apply(&self, origin: Option<&str>, headers: &mut HeaderMap) {
        let allow = HeaderValue::from_str(self.allow_origin(origin))
            .or_else(|_| HeaderValue::from_str(self.default_origin()));
        if let Ok(allow) = allow {
            headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, allow);
        }
        headers.insert(
            ACCESS_CONTROL_ALLOW_METHODS,
            HeaderValue::from_static(ALLOW_METHODS),
        );
        headers.insert(
            ACCESS_CONTROL_ALLOW_HEADERS,
            HeaderValue::from_static(ALLOW_HEADERS),
        );
        headers.insert(ACCESS_CONTROL_MAX_AGE, HeaderValue::from_static(MAX_AGE_SECS));
        headers.append(VARY, HeaderValue::from_static("Origin"));
    }
}

impl Default for CorsPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_ALLOWED_ORIGINS)
    }
}

/// The caller's origin: the `Origin` header, else the origin part of
/// `Referer`.
pub fn request_origin(headers: &HeaderMap) -> Option<String> {
    let header = |name: HeaderName| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    };

    match header(ORIGIN) {
        Some(origin) => Some(origin.to_string()),
        None => header(REFERER).and_then(origin_of_url),
    }
}

/// Serialized origin of an absolute http(s) URL: lowercase scheme and host,
/// with the scheme's default port dropped.
fn origin_of_url(url: &str) -> Option<String> {
    let (scheme, rest) = url.split_once("://")?;
    let scheme = scheme.to_ascii_lowercase();
    let default_port = match scheme.as_str() {
        "http" => "80",
        "https" => "443",
        _ => return None,
    };
    let authority = rest.split(['/', '?', '#']).next().unwrap_or_default();
    // Credentials are never part of an origin.
    let host_port = authority.rsplit_once('@').map_or(authority, |(_, host)| host);

    // IPv6 literals contain colons too; only an all-digit tail is a port.
    let (host, port) = match host_port.rsplit_once(':') {
        Some((host, port)) if !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit()) => {
            (host, Some(port))
        }
        _ => (host_port, None),
    };
    if host.is_empty() {
        return None;
    }

    let host = host.to_ascii_lowercase();
    Some(match port {
        Some(port) if port != default_port => format!("{scheme}://{host}:{port}"),
        _ => format!("{scheme}://{host}"),
    })
}

pub async fn cors_middleware(
    State(policy): State<Arc<CorsPolicy>>,
    request: Request,
    next: Next,
) -> Response {
    let origin = request_origin(request.headers());
    let mut response = next.run(request).await;
    policy.apply(origin.as_deref(), response.headers_mut());
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(HeaderName, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(name.clone(), HeaderValue::from_str(value).unwrap());
        }
        map
    }

    #[test]
    fn echoes_listed_origins_and_defaults_the_rest() {
        let policy = CorsPolicy::new(["https://remcard.ru/", "http://localhost:5500"]);

        assert_eq!(
            policy.allow_origin(Some("https://remcard.ru")),
            "https://remcard.ru"
        );
        assert_eq!(
            policy.allow_origin(Some("http://localhost:5500")),
            "http://localhost:5500"
        );
        assert_eq!(
            policy.allow_origin(Some("https://evil.example")),
            "https://remcard.ru"
        );
        assert_eq!(policy.allow_origin(None), "https://remcard.ru");
    }

    #[test]
    fn empty_list_uses_the_built_in_origins() {
        let policy = CorsPolicy::new(Vec::<String>::new());
        assert_eq!(policy.default_origin(), DEFAULT_ALLOWED_ORIGINS[0]);
    }

    #[test]
    fn origin_header_wins_over_referer() {
        let map = headers(&[
            (ORIGIN, "https://rem.vercel.app"),
            (REFERER, "https://remcard.ru/partners/new"),
        ]);
        assert_eq!(request_origin(&map).as_deref(), Some("https://rem.vercel.app"));
    }

    #[test]
    fn referer_is_reduced_to_its_origin() {
        let map = headers(&[(REFERER, "https://user:pw@remcard.ru:8443/a/b?c=d#e")]);
        assert_eq!(
            request_origin(&map).as_deref(),
            Some("https://remcard.ru:8443")
        );

        let map = headers(&[(REFERER, "not a url")]);
        assert_eq!(request_origin(&map), None);
    }

    #[test]
    fn referer_origin_is_normalized() {
        let cases = [
            ("https://REMCARD.ru:443/partners/add/", "https://remcard.ru"),
            ("HTTP://LocalHost:80/form.html", "http://localhost"),
            ("http://localhost:5500/form.html", "http://localhost:5500"),
            ("https://remcard.ru:80/", "https://remcard.ru:80"),
            ("http://[::1]:8080/x", "http://[::1]:8080"),
            ("http://[::1]/x", "http://[::1]"),
        ];
        for (referer, origin) in cases {
            let map = headers(&[(REFERER, referer)]);
            assert_eq!(request_origin(&map).as_deref(), Some(origin), "{referer}");
        }

        let policy = CorsPolicy::default();
        let map = headers(&[(REFERER, "https://REMCARD.ru:443/partners/add/")]);
        assert_eq!(
            policy.allow_origin(request_origin(&map).as_deref()),
            "https://remcard.ru"
        );
    }

    #[test]
    fn every_header_is_set() {
        let policy = CorsPolicy::default();
        let mut map = HeaderMap::new();
        policy.apply(Some("https://elsewhere.example"), &mut map);

        assert_eq!(
            map[ACCESS_CONTROL_ALLOW_ORIGIN],
            "https://karenavedikyan.github.io"
        );
        assert_eq!(map[ACCESS_CONTROL_ALLOW_METHODS], "OPTIONS, POST");
        assert_eq!(map[ACCESS_CONTROL_ALLOW_HEADERS], "Content-Type");
        assert_eq!(map[ACCESS_CONTROL_MAX_AGE], "86400");
    }
}
