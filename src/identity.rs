use axum::http::HeaderMap;
use axum_extra::extract::cookie::CookieJar;

pub const SESSION_COOKIE: &str = "auth_session";

/// What the external identity service resolves a caller to: a stable subject
/// id plus whatever profile fields it exposes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerIdentity {
    pub subject: String,
    pub name: Option<String>,
    pub email: Option<String>,
}

/// Seam for the external identity provider. `None` means "not
/// authenticated" and maps to 401 at the request boundary.
pub trait IdentityProvider: Send + Sync {
    fn resolve(&self, headers: &HeaderMap, jar: &CookieJar) -> Option<CallerIdentity>;
}

/// Trusts the identity the fronting auth layer attaches to each request: a
/// bearer token (or session cookie) carrying the opaque subject id, with
/// optional profile headers used only when a user record is first created.
#[derive(Clone, Default)]
pub struct HeaderIdentity;

impl IdentityProvider for HeaderIdentity {
    fn resolve(&self, headers: &HeaderMap, jar: &CookieJar) -> Option<CallerIdentity> {
        let subject = bearer_token(headers)
            .or_else(|| jar.get(SESSION_COOKIE).map(|c| c.value().to_string()))
            .filter(|s| !s.is_empty())?;

        Some(CallerIdentity {
            subject,
            name: header_value(headers, "x-auth-name"),
            email: header_value(headers, "x-auth-email"),
        })
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|v| v.trim().to_string())
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
