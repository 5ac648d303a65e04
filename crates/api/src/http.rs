use std::collections::BTreeMap;
use std::future::Future;
use std::time::{Duration, Instant};

use axum::extract::rejection::JsonRejection;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use collegecm_contracts::validation::{FieldErrors, messages};
use collegecm_contracts::{AcademicYear, StageScope};
use collegecm_store::{GrantError, Store, StoreError};
use serde::Serialize;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::Instrument;
use ulid::Ulid;

use crate::config::{ApiConfig, StartupError};
use crate::rate_limit::LoginLimiter;

mod auth;
mod custom;
mod links;
mod marks;
mod privileges;
mod scope;
mod students;
mod subjects;
mod users;
mod years;

const DELETED_MESSAGE: &str = "تم الحذف بنجاح";

#[derive(Clone)]
pub struct AppState {
    pub config: ApiConfig,
    store: Store,
    login_limiter: LoginLimiter,
}

pub(crate) type ApiError = (StatusCode, Json<ErrorResponse>);

pub async fn router(config: ApiConfig) -> Result<Router, StartupError> {
    let store = connect_store(&config).await?;
    Ok(app(config, store))
}

/// Connects and migrates the store, provisions the bootstrap admin and drops
/// expired sessions.
pub async fn connect_store(config: &ApiConfig) -> Result<Store, StartupError> {
    let store = Store::connect_and_migrate(
        &config.db_url,
        config.db_max_connections,
        config.store_timeouts(),
    )
    .await
    .map_err(|err| StartupError {
        code: "ERR_DB_UNAVAILABLE",
        message: format!("failed to initialize database: {}", err),
    })?;

    if let Some(admin) = &config.bootstrap_admin {
        let user = store.ensure_admin(admin).await.map_err(|err| StartupError {
            code: "ERR_BOOTSTRAP_FAILED",
            message: format!("failed to provision bootstrap admin: {}", err),
        })?;
        tracing::info!(user_id = user.id, username = %user.username, "api.bootstrap_admin");
    }

    match store.purge_expired_sessions().await {
        Ok(purged) => tracing::info!(purged, "api.sessions_purged"),
        Err(err) => tracing::warn!(error = %err, "api.sessions_purge_failed"),
    }

    Ok(store)
}

/// Routes over an already connected store.
pub fn app(config: ApiConfig, store: Store) -> Router {
    let login_limiter = LoginLimiter::new(
        Duration::from_secs(config.rate_limit_window_secs.max(1)),
        config.login_rate_limit_per_window,
        16_384,
    );
    let max_body_bytes = config.max_body_bytes;
    let cors = cors_layer(&config.allowed_origins);

    let state = AppState {
        config,
        store,
        login_limiter,
    };

    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .route("/v1/login", post(auth::login))
        .route("/v1/logout", post(auth::logout))
        .route("/v1/auth/status", get(auth::status))
        .route("/v1/years", get(years::list_years).post(years::open_year))
        .route("/v1/years/{year}", axum::routing::delete(years::close_year))
        .route("/v1/tables", get(privileges::list_tables))
        .route("/v1/users", get(users::list_users).post(users::create_user))
        .route(
            "/v1/privileges",
            post(privileges::upsert_grant).delete(privileges::delete_grant),
        )
        .route("/v1/privileges/dangling", get(privileges::dangling_grants))
        .route("/v1/privileges/{user_id}", get(privileges::user_grants))
        .route("/v1/students/{year}", post(students::create_student))
        .route(
            "/v1/students/{year}/{key}",
            get(students::list_students)
                .patch(students::update_student)
                .delete(students::delete_student),
        )
        .route("/v1/subjects/{year}", post(subjects::create_subject))
        .route(
            "/v1/subjects/{year}/{key}",
            get(subjects::list_subjects)
                .patch(subjects::update_subject)
                .delete(subjects::delete_subject),
        )
        .route("/v1/carryovers/{year}", post(links::create_carryover))
        .route(
            "/v1/carryovers/{year}/{key}",
            get(links::list_carryovers).delete(links::delete_carryover),
        )
        .route("/v1/exempted/{year}", post(links::create_exempted))
        .route(
            "/v1/exempted/{year}/{key}",
            get(links::list_exempted).delete(links::delete_exempted),
        )
        .route("/v1/marks/{year}", post(marks::create_mark))
        .route(
            "/v1/marks/{year}/{key}",
            get(marks::list_marks)
                .patch(marks::update_mark)
                .delete(marks::delete_mark),
        )
        .route("/v1/custom/{year}/{id}", get(custom::student_view))
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(cors)
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

#[derive(Debug, Serialize)]
struct ReadyzResponse {
    status: &'static str,
    checks: BTreeMap<&'static str, bool>,
}

async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    let mut checks = BTreeMap::new();
    checks.insert("postgres", state.store.ping().await.is_ok());

    let all_ready = checks.values().all(|ok| *ok);
    let status = if all_ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(ReadyzResponse {
            status: if all_ready { "ready" } else { "not_ready" },
            checks,
        }),
    )
}

async fn metrics() -> impl IntoResponse {
    match crate::metrics::render() {
        Ok((body, content_type)) => {
            let mut headers = HeaderMap::new();
            if let Ok(value) = HeaderValue::from_str(content_type.as_str()) {
                headers.insert(header::CONTENT_TYPE, value);
            }
            (headers, body).into_response()
        }
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}

/// Credentialed CORS for the configured browser origins. Origins that do not
/// parse as header values are skipped.
fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| HeaderValue::from_str(origin).ok())
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_credentials(true)
        .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE, HeaderName::from_static("x-request-id")])
}

#[derive(Debug, Serialize)]
pub(crate) struct ErrorResponse {
    error: serde_json::Value,
    code: &'static str,
    retryable: bool,
}

pub(crate) fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
    retryable: bool,
) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: serde_json::Value::String(message.into()),
            code,
            retryable,
        }),
    )
}

pub(crate) fn validation_error(errors: FieldErrors) -> ApiError {
    let error = serde_json::to_value(&errors)
        .unwrap_or_else(|_| serde_json::Value::String(errors.to_string()));
    (
        StatusCode::UNPROCESSABLE_ENTITY,
        Json(ErrorResponse {
            error,
            code: "ERR_VALIDATION",
            retryable: false,
        }),
    )
}

pub(crate) fn not_found() -> ApiError {
    json_error(
        StatusCode::NOT_FOUND,
        "ERR_NOT_FOUND",
        "the requested resource could not be found",
        false,
    )
}

pub(crate) fn unauthorized(message: impl Into<String>) -> ApiError {
    json_error(StatusCode::UNAUTHORIZED, "ERR_UNAUTHORIZED", message, false)
}

pub(crate) fn bad_request(message: impl Into<String>) -> ApiError {
    json_error(StatusCode::BAD_REQUEST, "ERR_BAD_REQUEST", message, false)
}

pub(crate) fn store_error(err: StoreError) -> ApiError {
    match err {
        StoreError::NotFound => not_found(),
        StoreError::Timeout => json_error(
            StatusCode::SERVICE_UNAVAILABLE,
            "ERR_STORE_TIMEOUT",
            "storage did not answer in time",
            true,
        ),
        StoreError::Conflict => json_error(
            StatusCode::CONFLICT,
            "ERR_CONFLICT",
            "a record with this key already exists",
            false,
        ),
        StoreError::MissingReference => json_error(
            StatusCode::UNPROCESSABLE_ENTITY,
            "ERR_VALIDATION",
            "the referenced record does not exist",
            false,
        ),
        err @ (StoreError::Invalid(_) | StoreError::Sqlx(_)) => {
            tracing::error!(error = %err, "api.store_error");
            json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "ERR_INTERNAL",
                "the server encountered a problem and could not process your request",
                false,
            )
        }
    }
}

/// A referenced record that does not exist is a field error of the request,
/// not a missing resource.
pub(crate) fn reference_error(field: &str, err: StoreError) -> ApiError {
    match err {
        StoreError::NotFound | StoreError::MissingReference => {
            let mut errors = FieldErrors::new();
            errors.add(field, messages::NOT_FOUND);
            validation_error(errors)
        }
        err => store_error(err),
    }
}

pub(crate) fn grant_error(err: GrantError) -> ApiError {
    match err {
        GrantError::Invalid(errors) => validation_error(errors),
        GrantError::Store(err) => store_error(err),
    }
}

/// Unwraps a JSON body, mapping every extractor rejection to a client error.
pub(crate) fn json_body<T>(body: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    match body {
        Ok(Json(value)) => Ok(value),
        Err(rejection) if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE => Err(json_error(
            StatusCode::PAYLOAD_TOO_LARGE,
            "ERR_BODY_TOO_LARGE",
            "request body too large",
            false,
        )),
        Err(_) => Err(bad_request("invalid JSON body")),
    }
}

/// A malformed year in the path addresses no partition.
pub(crate) fn path_year(raw: &str) -> Result<AcademicYear, ApiError> {
    AcademicYear::parse(raw).map_err(|_| not_found())
}

pub(crate) fn path_stage(raw: &str) -> Result<StageScope, ApiError> {
    StageScope::from_path_code(raw.trim()).ok_or_else(not_found)
}

pub(crate) fn path_id(raw: &str) -> Result<i64, ApiError> {
    raw.trim()
        .parse::<i64>()
        .ok()
        .filter(|id| *id > 0)
        .ok_or_else(not_found)
}

pub(crate) fn deleted() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "message": DELETED_MESSAGE }))
}

fn request_id(headers: &HeaderMap) -> String {
    headers
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .and_then(sanitize_request_id)
        .unwrap_or_else(|| Ulid::new().to_string())
}

fn sanitize_request_id(raw: &str) -> Option<String> {
    const MAX_LEN: usize = 64;
    let out = raw
        .trim()
        .chars()
        .filter(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.'))
        .take(MAX_LEN)
        .collect::<String>();
    (!out.is_empty()).then_some(out)
}

fn outcome(status: StatusCode) -> &'static str {
    match status {
        s if s.is_success() => "allow",
        StatusCode::UNAUTHORIZED => "deny",
        StatusCode::NOT_FOUND => "not_found",
        s if s.is_server_error() => "error",
        _ => "rejected",
    }
}

/// Runs one handler body inside its request span and records latency,
/// outcome and the request metrics once it completes.
pub(crate) async fn observed<T, F>(
    route: &'static str,
    method: &'static str,
    headers: &HeaderMap,
    handler: F,
) -> Response
where
    T: IntoResponse,
    F: Future<Output = Result<T, ApiError>>,
{
    let span = tracing::info_span!(
        "http.request",
        route,
        method,
        request_id = %request_id(headers),
        user_id = tracing::field::Empty,
        latency_ms = tracing::field::Empty,
        outcome = tracing::field::Empty,
    );
    let started = Instant::now();

    let response = handler.instrument(span.clone()).await.into_response();

    let status = response.status();
    span.record("latency_ms", started.elapsed().as_millis() as u64);
    span.record("outcome", outcome(status));
    crate::metrics::observe_http_request(route, method, status.as_u16(), started.elapsed());
    response
}
