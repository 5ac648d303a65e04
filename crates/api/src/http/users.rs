use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::Response;
use collegecm_contracts::GlobalTable;
use collegecm_policy::Operation;
use collegecm_store::UserInput;

use super::scope::admin_scope;
use super::{AppState, json_body, observed, store_error, validation_error};

pub(crate) async fn list_users(State(state): State<AppState>, headers: HeaderMap) -> Response {
    observed("/v1/users", "GET", &headers, async {
        admin_scope(&state, &headers, GlobalTable::Users, Operation::Read).await?;
        let users = state.store.list_users().await.map_err(store_error)?;
        Ok(Json(serde_json::json!({ "users": users })))
    })
    .await
}

pub(crate) async fn create_user(
    State(state): State<AppState>,
    headers: HeaderMap,
    req: Result<Json<UserInput>, JsonRejection>,
) -> Response {
    observed("/v1/users", "POST", &headers, async {
        let scope = admin_scope(&state, &headers, GlobalTable::Users, Operation::Write).await?;
        let user = json_body(req)?.validate().map_err(validation_error)?;

        let created = state.store.create_user(&user).await.map_err(store_error)?;
        tracing::info!(
            admin_id = scope.user.id,
            user_id = created.id,
            "api.user_created"
        );
        Ok((
            StatusCode::CREATED,
            Json(serde_json::json!({ "user": created })),
        ))
    })
    .await
}
