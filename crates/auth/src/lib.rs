use std::time::Duration;

use cookie::CookieBuilder;
pub use cookie::{Cookie, SameSite};
use hex::ToHex;
use http::HeaderMap;
use http::header;
use sha2::{Digest, Sha256};
use ulid::Ulid;

pub const SESSION_COOKIE: &str = "session";

#[derive(Debug, Clone)]
pub struct AuthError {
    pub code: &'static str,
    pub message: String,
}

impl std::fmt::Display for AuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for AuthError {}

/// Opaque session token handed to the client. Only its hash is persisted.
pub fn issue_session_token() -> String {
    format!("{}{}", Ulid::new(), Ulid::new())
}

pub fn hash_session_token(token: &str) -> String {
    Sha256::digest(token.as_bytes()).encode_hex::<String>()
}

/// Reads the session token from the `Cookie` headers. The first non-empty
/// `session` cookie wins; malformed pairs are skipped.
pub fn session_token(headers: &HeaderMap) -> Result<String, AuthError> {
    let mut saw_cookie = false;
    let mut saw_empty = false;
    for value in headers.get_all(header::COOKIE) {
        saw_cookie = true;
        let raw = String::from_utf8_lossy(value.as_bytes());

        for cookie in Cookie::split_parse(raw.as_ref()).flatten() {
            if cookie.name() != SESSION_COOKIE {
                continue;
            }
            let token = cookie.value_trimmed();
            if token.is_empty() {
                saw_empty = true;
                continue;
            }
            return Ok(token.to_string());
        }
    }

    if saw_empty {
        return Err(AuthError {
            code: "ERR_AUTH_INVALID",
            message: "session cookie is empty".to_string(),
        });
    }
    Err(AuthError {
        code: "ERR_AUTH_REQUIRED",
        message: if saw_cookie {
            "session cookie is missing".to_string()
        } else {
            "missing Cookie header".to_string()
        },
    })
}

fn base_cookie(value: String, secure: bool) -> CookieBuilder<'static> {
    Cookie::build((SESSION_COOKIE, value))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(secure)
}

pub fn session_cookie(token: &str, ttl: Duration, secure: bool) -> Cookie<'static> {
    let max_age = i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX);
    base_cookie(token.to_string(), secure)
        .max_age(cookie::time::Duration::seconds(max_age))
        .build()
}

pub fn cleared_session_cookie(secure: bool) -> Cookie<'static> {
    let mut cookie = base_cookie(String::new(), secure).build();
    cookie.make_removal();
    cookie
}

/// Compares a stored plaintext password with the supplied one without
/// short-circuiting on the first differing byte.
pub fn password_matches(stored: &str, supplied: &str) -> bool {
    let stored = Sha256::digest(stored.as_bytes());
    let supplied = Sha256::digest(supplied.as_bytes());
    stored
        .iter()
        .zip(supplied.iter())
        .fold(0u8, |acc, (a, b)| acc | (a ^ b))
        == 0
}
