use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::Response;
use collegecm_contracts::validation::{FieldErrors, labels, messages};
use collegecm_contracts::{AcademicYear, GlobalTable, SchemaError};
use collegecm_policy::Operation;
use collegecm_store::StoreError;
use serde::Deserialize;

use super::scope::{admin_scope, require_user};
use super::{
    AppState, DELETED_MESSAGE, json_body, json_error, observed, path_year, store_error,
    validation_error,
};

#[derive(Debug, Deserialize)]
pub(crate) struct OpenYearRequest {
    #[serde(default)]
    year: String,
}

pub(crate) async fn list_years(State(state): State<AppState>, headers: HeaderMap) -> Response {
    observed("/v1/years", "GET", &headers, async {
        require_user(&state, &headers).await?;
        let years = state.store.list_years().await.map_err(store_error)?;
        Ok(Json(serde_json::json!({ "years": years })))
    })
    .await
}

pub(crate) async fn open_year(
    State(state): State<AppState>,
    headers: HeaderMap,
    req: Result<Json<OpenYearRequest>, JsonRejection>,
) -> Response {
    observed("/v1/years", "POST", &headers, async {
        let scope = admin_scope(&state, &headers, GlobalTable::Years, Operation::Write).await?;
        let req = json_body(req)?;
        let year = AcademicYear::parse(&req.year).map_err(|err| {
            let mut errors = FieldErrors::new();
            let message = match err {
                SchemaError::EmptyYear => messages::REQUIRED,
                _ => messages::INVALID_YEAR,
            };
            errors.add(labels::ACADEMIC_YEAR, message);
            validation_error(errors)
        })?;

        match state.store.open_year(&year).await {
            Ok(opened) => {
                crate::metrics::observe_year_lifecycle("open", "ok");
                tracing::info!(user_id = scope.user.id, year = %year, "api.year_opened");
                Ok((
                    StatusCode::CREATED,
                    Json(serde_json::json!({ "year": opened })),
                ))
            }
            Err(StoreError::Conflict) => {
                crate::metrics::observe_year_lifecycle("open", "conflict");
                Err(json_error(
                    StatusCode::CONFLICT,
                    "ERR_CONFLICT",
                    messages::YEAR_EXISTS,
                    false,
                ))
            }
            Err(err) => {
                crate::metrics::observe_year_lifecycle("open", "error");
                tracing::warn!(year = %year, error = %err, "api.year_open_rolled_back");
                Err(store_error(err))
            }
        }
    })
    .await
}

/// Drops the year partition. Grants on its tables are kept and show up in
/// the dangling grant listing afterwards.
pub(crate) async fn close_year(
    State(state): State<AppState>,
    Path(year): Path<String>,
    headers: HeaderMap,
) -> Response {
    observed("/v1/years/{year}", "DELETE", &headers, async {
        let year = path_year(&year)?;
        let scope = admin_scope(&state, &headers, GlobalTable::Years, Operation::Write).await?;

        match state.store.close_year(&year).await {
            Ok(closed) => {
                crate::metrics::observe_year_lifecycle("close", "ok");
                tracing::info!(
                    user_id = scope.user.id,
                    year = %year,
                    dropped = closed.dropped_tables.len(),
                    catalog_rows_removed = closed.catalog_rows_removed,
                    "api.year_closed"
                );
                Ok(Json(serde_json::json!({
                    "message": DELETED_MESSAGE,
                    "year": closed,
                })))
            }
            Err(StoreError::NotFound) => {
                crate::metrics::observe_year_lifecycle("close", "not_found");
                Err(store_error(StoreError::NotFound))
            }
            Err(err) => {
                crate::metrics::observe_year_lifecycle("close", "error");
                tracing::warn!(year = %year, error = %err, "api.year_close_rolled_back");
                Err(store_error(err))
            }
        }
    })
    .await
}
