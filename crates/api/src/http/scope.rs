use axum::http::{HeaderMap, StatusCode};
use collegecm_auth::{hash_session_token, session_token};
use collegecm_contracts::{AcademicYear, GlobalTable, ResourceKind, Stage, StageScope, TableRef};
use collegecm_policy::{CustomAccess, Operation};
use collegecm_store::{StoreError, Student, User};

use super::{ApiError, AppState, json_error, store_error, unauthorized};

/// Caller allowed to read `table` at `stage`.
pub(crate) struct ReadScope {
    pub user: User,
    pub table: TableRef,
    pub stage: StageScope,
}

/// Caller that passed the coarse write gate on `table`.
pub(crate) struct WriteScope {
    pub user: User,
    pub table: TableRef,
}

/// Caller allowed to write one existing record whose governing stage is
/// `stage`.
pub(crate) struct RecordWriteScope {
    pub user: User,
    pub table: TableRef,
    pub stage: Stage,
}

pub(crate) struct CustomScope {
    pub student: Student,
    pub access: CustomAccess,
}

pub(crate) struct AdminScope {
    pub user: User,
}

pub(crate) fn denied() -> ApiError {
    json_error(
        StatusCode::UNAUTHORIZED,
        "ERR_ACCESS_DENIED",
        "you do not have permission to access this resource",
        false,
    )
}

pub(crate) async fn require_user(state: &AppState, headers: &HeaderMap) -> Result<User, ApiError> {
    let token = session_token(headers).map_err(|err| unauthorized(err.message))?;
    let user = match state.store.session_user(&hash_session_token(&token)).await {
        Ok(user) => user,
        Err(StoreError::NotFound) => return Err(unauthorized("session expired or unknown")),
        Err(err) => return Err(store_error(err)),
    };
    tracing::Span::current().record("user_id", user.id);
    Ok(user)
}

async fn gate(
    state: &AppState,
    user: &User,
    table: &TableRef,
    stage: Option<StageScope>,
    operation: Operation,
    check: &'static str,
) -> Result<(), ApiError> {
    let decision = state
        .store
        .access_decision(user.id, table, stage, operation)
        .await
        .map_err(store_error)?;
    crate::metrics::observe_access_decision(check, decision.as_str());

    if decision.is_allowed() {
        return Ok(());
    }
    tracing::info!(
        user_id = user.id,
        table = %table,
        stage = stage.map(StageScope::as_str).unwrap_or("-"),
        operation = operation.as_str(),
        decision = decision.as_str(),
        "api.access_denied"
    );
    Err(denied())
}

pub(crate) async fn read_scope(
    state: &AppState,
    headers: &HeaderMap,
    kind: ResourceKind,
    year: &AcademicYear,
    stage: StageScope,
) -> Result<ReadScope, ApiError> {
    let user = require_user(state, headers).await?;
    let table = TableRef::partitioned(kind, year);
    gate(state, &user, &table, Some(stage), Operation::Read, "read").await?;
    Ok(ReadScope { user, table, stage })
}

pub(crate) async fn create_scope(
    state: &AppState,
    headers: &HeaderMap,
    kind: ResourceKind,
    year: &AcademicYear,
) -> Result<WriteScope, ApiError> {
    let user = require_user(state, headers).await?;
    let table = TableRef::partitioned(kind, year);
    gate(state, &user, &table, None, Operation::Write, "write").await?;
    Ok(WriteScope { user, table })
}

/// Fine write check for a concrete stage on a table the caller already
/// holds a scope for.
pub(crate) async fn require_stage_write(
    state: &AppState,
    user: &User,
    table: &TableRef,
    stage: Stage,
) -> Result<(), ApiError> {
    gate(
        state,
        user,
        table,
        Some(StageScope::Only(stage)),
        Operation::Write,
        "stage_write",
    )
    .await
}

/// Fetches the governing stage of record `id`, then checks write access at
/// that stage. A missing record is reported as not found before any
/// authorization decision is made.
pub(crate) async fn record_write_scope(
    state: &AppState,
    headers: &HeaderMap,
    kind: ResourceKind,
    year: &AcademicYear,
    id: i64,
) -> Result<RecordWriteScope, ApiError> {
    let user = require_user(state, headers).await?;
    let table = TableRef::partitioned(kind, year);
    let stage = state
        .store
        .record_stage(kind, year, id)
        .await
        .map_err(store_error)?;
    require_stage_write(state, &user, &table, stage).await?;
    Ok(RecordWriteScope { user, table, stage })
}

pub(crate) async fn custom_scope(
    state: &AppState,
    headers: &HeaderMap,
    year: &AcademicYear,
    student_id: i64,
) -> Result<CustomScope, ApiError> {
    let user = require_user(state, headers).await?;
    let student = state
        .store
        .student(year, student_id)
        .await
        .map_err(store_error)?;
    let access = state
        .store
        .check_custom_access(user.id, year, StageScope::Only(student.stage))
        .await
        .map_err(store_error)?;

    let any = ResourceKind::CREATION_ORDER
        .into_iter()
        .any(|kind| access.get(kind));
    crate::metrics::observe_access_decision("custom", if any { "allowed" } else { "absent" });
    if !any {
        tracing::info!(
            user_id = user.id,
            year = %year,
            stage = student.stage.as_str(),
            "api.custom_access_denied"
        );
        return Err(denied());
    }

    Ok(CustomScope { student, access })
}

pub(crate) async fn admin_scope(
    state: &AppState,
    headers: &HeaderMap,
    table: GlobalTable,
    operation: Operation,
) -> Result<AdminScope, ApiError> {
    let user = require_user(state, headers).await?;
    gate(
        state,
        &user,
        &TableRef::Global(table),
        Some(StageScope::All),
        operation,
        operation.as_str(),
    )
    .await?;
    Ok(AdminScope { user })
}
