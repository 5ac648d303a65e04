use axum::Json;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::Response;
use collegecm_auth::{
    Cookie, cleared_session_cookie, hash_session_token, issue_session_token, password_matches,
    session_cookie, session_token,
};
use collegecm_store::StoreError;
use serde::Deserialize;

use super::{
    ApiError, AppState, bad_request, json_body, json_error, not_found, observed, store_error,
};

#[derive(Debug, Deserialize)]
pub(crate) struct LoginRequest {
    #[serde(default)]
    username: String,
    #[serde(default)]
    password: String,
}

fn cookie_header(cookie: Cookie<'_>) -> Result<HeaderMap, ApiError> {
    let value = HeaderValue::from_str(&cookie.to_string()).map_err(|_| {
        json_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "ERR_INTERNAL",
            "failed to issue session cookie",
            false,
        )
    })?;
    let mut headers = HeaderMap::new();
    headers.insert(header::SET_COOKIE, value);
    Ok(headers)
}

pub(crate) async fn login(
    State(state): State<AppState>,
    headers: HeaderMap,
    req: Result<Json<LoginRequest>, JsonRejection>,
) -> Response {
    observed("/v1/login", "POST", &headers, async {
        let req = json_body(req)?;
        let username = req.username.trim();
        if username.is_empty() || req.password.is_empty() {
            return Err(bad_request("invalid username or password"));
        }

        if !state.login_limiter.allow(username) {
            tracing::warn!(username, "api.login_rate_limited");
            return Err(json_error(
                StatusCode::TOO_MANY_REQUESTS,
                "ERR_RATE_LIMITED",
                "too many login attempts, try again later",
                true,
            ));
        }

        let (user, stored_password) = state
            .store
            .user_credentials(username)
            .await
            .map_err(store_error)?;
        if !password_matches(&stored_password, &req.password) {
            tracing::info!(user_id = user.id, "api.login_rejected");
            return Err(bad_request("invalid username or password"));
        }

        let token = issue_session_token();
        state
            .store
            .create_session(&hash_session_token(&token), user.id, state.config.session_ttl())
            .await
            .map_err(store_error)?;
        state.login_limiter.reset(username);
        tracing::Span::current().record("user_id", user.id);
        tracing::info!(user_id = user.id, "api.login");

        let cookie = cookie_header(session_cookie(
            &token,
            state.config.session_ttl(),
            state.config.session_cookie_secure,
        ))?;
        Ok((cookie, Json(serde_json::json!({ "user": user }))))
    })
    .await
}

pub(crate) async fn logout(State(state): State<AppState>, headers: HeaderMap) -> Response {
    observed("/v1/logout", "POST", &headers, async {
        if let Ok(token) = session_token(&headers) {
            match state.store.delete_session(&hash_session_token(&token)).await {
                Ok(()) | Err(StoreError::NotFound) => {}
                Err(err) => return Err(store_error(err)),
            }
        }

        let cookie = cookie_header(cleared_session_cookie(state.config.session_cookie_secure))?;
        Ok((cookie, Json(serde_json::json!({ "message": "logged out" }))))
    })
    .await
}

/// The signed-in user. Without a live session this answers not found.
pub(crate) async fn status(State(state): State<AppState>, headers: HeaderMap) -> Response {
    observed("/v1/auth/status", "GET", &headers, async {
        let token = session_token(&headers).map_err(|_| not_found())?;
        let user = state
            .store
            .session_user(&hash_session_token(&token))
            .await
            .map_err(store_error)?;
        tracing::Span::current().record("user_id", user.id);
        Ok(Json(serde_json::json!({ "user": user })))
    })
    .await
}
