use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::Response;
use collegecm_contracts::ResourceKind;
use collegecm_store::StudentInput;

use super::scope::{create_scope, read_scope, record_write_scope, require_stage_write};
use super::{
    AppState, deleted, json_body, observed, path_id, path_stage, path_year, store_error,
    validation_error,
};

pub(crate) async fn list_students(
    State(state): State<AppState>,
    Path((year, stage)): Path<(String, String)>,
    headers: HeaderMap,
) -> Response {
    observed("/v1/students/{year}/{stage}", "GET", &headers, async {
        let year = path_year(&year)?;
        let stage = path_stage(&stage)?;
        let scope = read_scope(&state, &headers, ResourceKind::Students, &year, stage).await?;

        let students = state
            .store
            .list_students(&year, scope.stage)
            .await
            .map_err(store_error)?;
        tracing::debug!(user_id = scope.user.id, table = %scope.table, count = students.len(), "api.students_listed");
        Ok(Json(serde_json::json!({ "students": students })))
    })
    .await
}

pub(crate) async fn create_student(
    State(state): State<AppState>,
    Path(year): Path<String>,
    headers: HeaderMap,
    req: Result<Json<StudentInput>, JsonRejection>,
) -> Response {
    observed("/v1/students/{year}", "POST", &headers, async {
        let year = path_year(&year)?;
        let scope = create_scope(&state, &headers, ResourceKind::Students, &year).await?;
        let student = json_body(req)?.validate(None).map_err(validation_error)?;
        require_stage_write(&state, &scope.user, &scope.table, student.stage).await?;

        let created = state
            .store
            .insert_student(&year, &student)
            .await
            .map_err(store_error)?;
        tracing::info!(
            user_id = scope.user.id,
            table = %scope.table,
            student_id = created.student_id,
            "api.student_created"
        );
        Ok((
            StatusCode::CREATED,
            Json(serde_json::json!({ "student": created })),
        ))
    })
    .await
}

/// Partial update. Moving a student to another stage also needs write
/// access on the target stage.
pub(crate) async fn update_student(
    State(state): State<AppState>,
    Path((year, id)): Path<(String, String)>,
    headers: HeaderMap,
    req: Result<Json<StudentInput>, JsonRejection>,
) -> Response {
    observed("/v1/students/{year}/{id}", "PATCH", &headers, async {
        let year = path_year(&year)?;
        let id = path_id(&id)?;
        let scope = record_write_scope(&state, &headers, ResourceKind::Students, &year, id).await?;

        let current = state.store.student(&year, id).await.map_err(store_error)?;
        let student = json_body(req)?
            .validate(Some(&current))
            .map_err(validation_error)?;
        if student.stage != scope.stage {
            require_stage_write(&state, &scope.user, &scope.table, student.stage).await?;
        }

        let updated = state
            .store
            .update_student(&year, &student)
            .await
            .map_err(store_error)?;
        tracing::info!(
            user_id = scope.user.id,
            table = %scope.table,
            student_id = id,
            "api.student_updated"
        );
        Ok(Json(serde_json::json!({ "student": updated })))
    })
    .await
}

pub(crate) async fn delete_student(
    State(state): State<AppState>,
    Path((year, id)): Path<(String, String)>,
    headers: HeaderMap,
) -> Response {
    observed("/v1/students/{year}/{id}", "DELETE", &headers, async {
        let year = path_year(&year)?;
        let id = path_id(&id)?;
        let scope = record_write_scope(&state, &headers, ResourceKind::Students, &year, id).await?;

        state
            .store
            .delete_student(&year, id)
            .await
            .map_err(store_error)?;
        tracing::info!(
            user_id = scope.user.id,
            table = %scope.table,
            student_id = id,
            "api.student_deleted"
        );
        Ok(deleted())
    })
    .await
}
