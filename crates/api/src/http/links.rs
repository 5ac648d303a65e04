//! Carryovers and exempted share one shape: a (student, subject) pair whose
//! writes are governed by the student's current stage.

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::Response;
use collegecm_contracts::ResourceKind;
use collegecm_contracts::validation::labels;
use collegecm_store::{LinkInput, StoreError};

use super::scope::{create_scope, read_scope, record_write_scope, require_stage_write};
use super::{
    ApiError, AppState, deleted, json_body, observed, path_id, path_stage, path_year,
    reference_error, store_error, validation_error,
};

struct LinkRoutes {
    kind: ResourceKind,
    collection: &'static str,
    record: &'static str,
    list_route: &'static str,
    create_route: &'static str,
    record_route: &'static str,
}

const CARRYOVERS: LinkRoutes = LinkRoutes {
    kind: ResourceKind::Carryovers,
    collection: "carryovers",
    record: "carryover",
    list_route: "/v1/carryovers/{year}/{stage}",
    create_route: "/v1/carryovers/{year}",
    record_route: "/v1/carryovers/{year}/{id}",
};

const EXEMPTED: LinkRoutes = LinkRoutes {
    kind: ResourceKind::Exempted,
    collection: "exempted",
    record: "exempted",
    list_route: "/v1/exempted/{year}/{stage}",
    create_route: "/v1/exempted/{year}",
    record_route: "/v1/exempted/{year}/{id}",
};

pub(crate) async fn list_carryovers(
    state: State<AppState>,
    path: Path<(String, String)>,
    headers: HeaderMap,
) -> Response {
    list(&CARRYOVERS, state, path, headers).await
}

pub(crate) async fn create_carryover(
    state: State<AppState>,
    path: Path<String>,
    headers: HeaderMap,
    req: Result<Json<LinkInput>, JsonRejection>,
) -> Response {
    create(&CARRYOVERS, state, path, headers, req).await
}

pub(crate) async fn delete_carryover(
    state: State<AppState>,
    path: Path<(String, String)>,
    headers: HeaderMap,
) -> Response {
    delete(&CARRYOVERS, state, path, headers).await
}

pub(crate) async fn list_exempted(
    state: State<AppState>,
    path: Path<(String, String)>,
    headers: HeaderMap,
) -> Response {
    list(&EXEMPTED, state, path, headers).await
}

pub(crate) async fn create_exempted(
    state: State<AppState>,
    path: Path<String>,
    headers: HeaderMap,
    req: Result<Json<LinkInput>, JsonRejection>,
) -> Response {
    create(&EXEMPTED, state, path, headers, req).await
}

pub(crate) async fn delete_exempted(
    state: State<AppState>,
    path: Path<(String, String)>,
    headers: HeaderMap,
) -> Response {
    delete(&EXEMPTED, state, path, headers).await
}

async fn list(
    routes: &LinkRoutes,
    State(state): State<AppState>,
    Path((year, stage)): Path<(String, String)>,
    headers: HeaderMap,
) -> Response {
    observed(routes.list_route, "GET", &headers, async {
        let year = path_year(&year)?;
        let stage = path_stage(&stage)?;
        let scope = read_scope(&state, &headers, routes.kind, &year, stage).await?;

        let links = state
            .store
            .list_links(routes.kind, &year, scope.stage)
            .await
            .map_err(store_error)?;
        tracing::debug!(user_id = scope.user.id, table = %scope.table, count = links.len(), "api.links_listed");
        Ok(Json(serde_json::json!({ routes.collection: links })))
    })
    .await
}

async fn create(
    routes: &LinkRoutes,
    State(state): State<AppState>,
    Path(year): Path<String>,
    headers: HeaderMap,
    req: Result<Json<LinkInput>, JsonRejection>,
) -> Response {
    observed(routes.create_route, "POST", &headers, async {
        let year = path_year(&year)?;
        let scope = create_scope(&state, &headers, routes.kind, &year).await?;
        let link = json_body(req)?.validate().map_err(validation_error)?;

        let stage = state
            .store
            .student_stage(&year, link.student_id)
            .await
            .map_err(|err| reference_error(labels::STUDENT_ID, err))?;
        require_stage_write(&state, &scope.user, &scope.table, stage).await?;

        let created = state
            .store
            .insert_link(routes.kind, &year, link)
            .await
            .map_err(insert_error)?;
        tracing::info!(
            user_id = scope.user.id,
            table = %scope.table,
            id = created.id,
            "api.link_created"
        );
        Ok((
            StatusCode::CREATED,
            Json(serde_json::json!({ routes.record: created })),
        ))
    })
    .await
}

/// The student was checked above, so a dangling reference here is the
/// subject.
fn insert_error(err: StoreError) -> ApiError {
    match err {
        StoreError::MissingReference => reference_error(labels::SUBJECT_ID, err),
        err => store_error(err),
    }
}

async fn delete(
    routes: &LinkRoutes,
    State(state): State<AppState>,
    Path((year, id)): Path<(String, String)>,
    headers: HeaderMap,
) -> Response {
    observed(routes.record_route, "DELETE", &headers, async {
        let year = path_year(&year)?;
        let id = path_id(&id)?;
        let scope = record_write_scope(&state, &headers, routes.kind, &year, id).await?;

        state
            .store
            .delete_link(routes.kind, &year, id)
            .await
            .map_err(store_error)?;
        tracing::info!(
            user_id = scope.user.id,
            table = %scope.table,
            stage = scope.stage.as_str(),
            id,
            "api.link_deleted"
        );
        Ok(deleted())
    })
    .await
}
