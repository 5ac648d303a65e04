use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::Response;
use collegecm_contracts::ResourceKind;
use collegecm_contracts::validation::labels;
use collegecm_store::MarkInput;

use super::scope::{create_scope, read_scope, record_write_scope, require_stage_write};
use super::{
    AppState, deleted, json_body, observed, path_id, path_stage, path_year, reference_error,
    store_error, validation_error,
};

pub(crate) async fn list_marks(
    State(state): State<AppState>,
    Path((year, stage)): Path<(String, String)>,
    headers: HeaderMap,
) -> Response {
    observed("/v1/marks/{year}/{stage}", "GET", &headers, async {
        let year = path_year(&year)?;
        let stage = path_stage(&stage)?;
        let scope = read_scope(&state, &headers, ResourceKind::Marks, &year, stage).await?;

        let marks = state
            .store
            .list_marks(&year, scope.stage)
            .await
            .map_err(store_error)?;
        tracing::debug!(user_id = scope.user.id, table = %scope.table, count = marks.len(), "api.marks_listed");
        Ok(Json(serde_json::json!({ "marks": marks })))
    })
    .await
}

/// A new mark is governed by its student's stage and bounded by its
/// subject's maximum marks.
pub(crate) async fn create_mark(
    State(state): State<AppState>,
    Path(year): Path<String>,
    headers: HeaderMap,
    req: Result<Json<MarkInput>, JsonRejection>,
) -> Response {
    observed("/v1/marks/{year}", "POST", &headers, async {
        let year = path_year(&year)?;
        let scope = create_scope(&state, &headers, ResourceKind::Marks, &year).await?;
        let input = json_body(req)?;
        let (student_id, subject_id) = input.key().map_err(validation_error)?;

        let stage = state
            .store
            .student_stage(&year, student_id)
            .await
            .map_err(|err| reference_error(labels::STUDENT_ID, err))?;
        require_stage_write(&state, &scope.user, &scope.table, stage).await?;

        let limits = state
            .store
            .subject_limits(&year, subject_id)
            .await
            .map_err(|err| reference_error(labels::SUBJECT_ID, err))?;
        let mark = input.validate(None, limits).map_err(validation_error)?;

        let created = state
            .store
            .insert_mark(&year, mark)
            .await
            .map_err(store_error)?;
        tracing::info!(
            user_id = scope.user.id,
            table = %scope.table,
            id = created.id,
            "api.mark_created"
        );
        Ok((
            StatusCode::CREATED,
            Json(serde_json::json!({ "mark": created })),
        ))
    })
    .await
}

pub(crate) async fn update_mark(
    State(state): State<AppState>,
    Path((year, id)): Path<(String, String)>,
    headers: HeaderMap,
    req: Result<Json<MarkInput>, JsonRejection>,
) -> Response {
    observed("/v1/marks/{year}/{id}", "PATCH", &headers, async {
        let year = path_year(&year)?;
        let id = path_id(&id)?;
        let scope = record_write_scope(&state, &headers, ResourceKind::Marks, &year, id).await?;

        let current = state.store.mark(&year, id).await.map_err(store_error)?;
        let mark = json_body(req)?
            .validate(Some(&current), current.limits())
            .map_err(validation_error)?;

        let updated = state
            .store
            .update_mark(&year, id, mark)
            .await
            .map_err(store_error)?;
        tracing::info!(
            user_id = scope.user.id,
            table = %scope.table,
            stage = scope.stage.as_str(),
            id,
            "api.mark_updated"
        );
        Ok(Json(serde_json::json!({ "mark": updated })))
    })
    .await
}

pub(crate) async fn delete_mark(
    State(state): State<AppState>,
    Path((year, id)): Path<(String, String)>,
    headers: HeaderMap,
) -> Response {
    observed("/v1/marks/{year}/{id}", "DELETE", &headers, async {
        let year = path_year(&year)?;
        let id = path_id(&id)?;
        let scope = record_write_scope(&state, &headers, ResourceKind::Marks, &year, id).await?;

        state
            .store
            .delete_mark(&year, id)
            .await
            .map_err(store_error)?;
        tracing::info!(
            user_id = scope.user.id,
            table = %scope.table,
            stage = scope.stage.as_str(),
            id,
            "api.mark_deleted"
        );
        Ok(deleted())
    })
    .await
}
