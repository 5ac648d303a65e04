use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::Response;
use collegecm_contracts::GlobalTable;
use collegecm_contracts::validation::labels;
use collegecm_policy::{GrantKeyRequest, GrantRequest, Operation, parse_grant_key};
use collegecm_store::{GrantError, StoreError};

use super::scope::admin_scope;
use super::{
    AppState, deleted, grant_error, json_body, observed, path_id, reference_error, store_error,
    validation_error,
};

pub(crate) async fn user_grants(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    headers: HeaderMap,
) -> Response {
    observed("/v1/privileges/{user_id}", "GET", &headers, async {
        let user_id = path_id(&user_id)?;
        admin_scope(&state, &headers, GlobalTable::Privileges, Operation::Read).await?;

        let user = state.store.user_by_id(user_id).await.map_err(store_error)?;
        let grants = state
            .store
            .grants_for_user(user.id)
            .await
            .map_err(store_error)?;
        Ok(Json(serde_json::json!({ "user": user, "privileges": grants })))
    })
    .await
}

/// Inserts or replaces the flags of one grant.
pub(crate) async fn upsert_grant(
    State(state): State<AppState>,
    headers: HeaderMap,
    req: Result<Json<GrantRequest>, JsonRejection>,
) -> Response {
    observed("/v1/privileges", "POST", &headers, async {
        let scope =
            admin_scope(&state, &headers, GlobalTable::Privileges, Operation::Write).await?;
        let req = json_body(req)?;

        let grant = match state.store.upsert_grant(&req).await {
            Ok(grant) => grant,
            Err(GrantError::Store(StoreError::MissingReference)) => {
                return Err(reference_error(labels::USER, StoreError::MissingReference));
            }
            Err(err) => return Err(grant_error(err)),
        };
        tracing::info!(
            admin_id = scope.user.id,
            user_id = grant.user_id,
            table_id = grant.table_id,
            year = %grant.year,
            stage = grant.stage.as_str(),
            can_read = grant.can_read,
            can_write = grant.can_write,
            "api.grant_upserted"
        );
        Ok((
            StatusCode::CREATED,
            Json(serde_json::json!({ "privilege": grant })),
        ))
    })
    .await
}

pub(crate) async fn delete_grant(
    State(state): State<AppState>,
    headers: HeaderMap,
    req: Result<Json<GrantKeyRequest>, JsonRejection>,
) -> Response {
    observed("/v1/privileges", "DELETE", &headers, async {
        let scope =
            admin_scope(&state, &headers, GlobalTable::Privileges, Operation::Write).await?;
        let key = parse_grant_key(&json_body(req)?).map_err(validation_error)?;

        let removed = state.store.delete_grant(&key).await.map_err(store_error)?;
        tracing::info!(
            admin_id = scope.user.id,
            user_id = key.user_id,
            table_id = key.table_id,
            stage = key.stage.as_str(),
            removed,
            "api.grant_deleted"
        );
        Ok(deleted())
    })
    .await
}

/// Grants whose table is no longer in the catalog, typically left behind by
/// a closed year.
pub(crate) async fn dangling_grants(State(state): State<AppState>, headers: HeaderMap) -> Response {
    observed("/v1/privileges/dangling", "GET", &headers, async {
        admin_scope(&state, &headers, GlobalTable::Privileges, Operation::Read).await?;
        let grants = state.store.dangling_grants().await.map_err(store_error)?;
        Ok(Json(serde_json::json!({ "privileges": grants })))
    })
    .await
}

pub(crate) async fn list_tables(State(state): State<AppState>, headers: HeaderMap) -> Response {
    observed("/v1/tables", "GET", &headers, async {
        admin_scope(&state, &headers, GlobalTable::Privileges, Operation::Read).await?;
        let tables = state.store.list_tables().await.map_err(store_error)?;
        Ok(Json(serde_json::json!({ "tables": tables })))
    })
    .await
}
