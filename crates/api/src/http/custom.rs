use axum::Json;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::response::Response;

use super::scope::custom_scope;
use super::{AppState, observed, path_id, path_year, store_error};

/// Composite view of one student. Sections the caller may not read are
/// omitted; `access` reports which ones were included.
pub(crate) async fn student_view(
    State(state): State<AppState>,
    Path((year, id)): Path<(String, String)>,
    headers: HeaderMap,
) -> Response {
    observed("/v1/custom/{year}/{id}", "GET", &headers, async {
        let year = path_year(&year)?;
        let id = path_id(&id)?;
        let scope = custom_scope(&state, &headers, &year, id).await?;

        let view = state
            .store
            .student_view(&year, scope.student, scope.access)
            .await
            .map_err(store_error)?;
        Ok(Json(serde_json::json!({
            "student_data": view,
            "access": scope.access,
        })))
    })
    .await
}
