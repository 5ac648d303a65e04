use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::Response;
use collegecm_contracts::ResourceKind;
use collegecm_store::SubjectInput;

use super::scope::{create_scope, read_scope, record_write_scope, require_stage_write};
use super::{
    AppState, deleted, json_body, observed, path_id, path_stage, path_year, store_error,
    validation_error,
};

pub(crate) async fn list_subjects(
    State(state): State<AppState>,
    Path((year, stage)): Path<(String, String)>,
    headers: HeaderMap,
) -> Response {
    observed("/v1/subjects/{year}/{stage}", "GET", &headers, async {
        let year = path_year(&year)?;
        let stage = path_stage(&stage)?;
        let scope = read_scope(&state, &headers, ResourceKind::Subjects, &year, stage).await?;

        let subjects = state
            .store
            .list_subjects(&year, scope.stage)
            .await
            .map_err(store_error)?;
        tracing::debug!(user_id = scope.user.id, table = %scope.table, count = subjects.len(), "api.subjects_listed");
        Ok(Json(serde_json::json!({ "subjects": subjects })))
    })
    .await
}

pub(crate) async fn create_subject(
    State(state): State<AppState>,
    Path(year): Path<String>,
    headers: HeaderMap,
    req: Result<Json<SubjectInput>, JsonRejection>,
) -> Response {
    observed("/v1/subjects/{year}", "POST", &headers, async {
        let year = path_year(&year)?;
        let scope = create_scope(&state, &headers, ResourceKind::Subjects, &year).await?;
        let subject = json_body(req)?.validate(None).map_err(validation_error)?;
        require_stage_write(&state, &scope.user, &scope.table, subject.stage).await?;

        let created = state
            .store
            .insert_subject(&year, &subject)
            .await
            .map_err(store_error)?;
        tracing::info!(
            user_id = scope.user.id,
            table = %scope.table,
            subject_id = created.subject_id,
            "api.subject_created"
        );
        Ok((
            StatusCode::CREATED,
            Json(serde_json::json!({ "subject": created })),
        ))
    })
    .await
}

/// Partial update. Moving a subject to another stage also needs write
/// access on the target stage.
pub(crate) async fn update_subject(
    State(state): State<AppState>,
    Path((year, id)): Path<(String, String)>,
    headers: HeaderMap,
    req: Result<Json<SubjectInput>, JsonRejection>,
) -> Response {
    observed("/v1/subjects/{year}/{id}", "PATCH", &headers, async {
        let year = path_year(&year)?;
        let id = path_id(&id)?;
        let scope = record_write_scope(&state, &headers, ResourceKind::Subjects, &year, id).await?;

        let current = state.store.subject(&year, id).await.map_err(store_error)?;
        let subject = json_body(req)?
            .validate(Some(&current))
            .map_err(validation_error)?;
        if subject.stage != scope.stage {
            require_stage_write(&state, &scope.user, &scope.table, subject.stage).await?;
        }

        let updated = state
            .store
            .update_subject(&year, &subject)
            .await
            .map_err(store_error)?;
        tracing::info!(
            user_id = scope.user.id,
            table = %scope.table,
            subject_id = id,
            "api.subject_updated"
        );
        Ok(Json(serde_json::json!({ "subject": updated })))
    })
    .await
}

pub(crate) async fn delete_subject(
    State(state): State<AppState>,
    Path((year, id)): Path<(String, String)>,
    headers: HeaderMap,
) -> Response {
    observed("/v1/subjects/{year}/{id}", "DELETE", &headers, async {
        let year = path_year(&year)?;
        let id = path_id(&id)?;
        let scope = record_write_scope(&state, &headers, ResourceKind::Subjects, &year, id).await?;

        state
            .store
            .delete_subject(&year, id)
            .await
            .map_err(store_error)?;
        tracing::info!(
            user_id = scope.user.id,
            table = %scope.table,
            subject_id = id,
            "api.subject_deleted"
        );
        Ok(deleted())
    })
    .await
}
