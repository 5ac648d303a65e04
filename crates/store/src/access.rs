use collegecm_contracts::{AcademicYear, ResourceKind, Stage, StageScope, TableRef};
use collegecm_policy::{
    AccessDecision, CustomAccess, Grant, Operation, custom_access, decide, select_grant,
};
use sqlx::Row;

use crate::{Store, StoreError, relation};

impl Store {
    /// The single grant answering `(user_id, table, stage)`, if any.
    pub async fn check_access(
        &self,
        user_id: i64,
        table: &TableRef,
        stage: StageScope,
    ) -> Result<Option<Grant>, StoreError> {
        let grants = self.grants_for_table(user_id, table).await?;
        Ok(select_grant(&grants, table, stage).cloned())
    }

    /// Evaluates `operation` on `table`. `stage = None` is the coarse gate that
    /// ignores stage.
    pub async fn access_decision(
        &self,
        user_id: i64,
        table: &TableRef,
        stage: Option<StageScope>,
        operation: Operation,
    ) -> Result<AccessDecision, StoreError> {
        let grants = self.grants_for_table(user_id, table).await?;
        let decision = decide(&grants, table, stage, operation);
        tracing::debug!(
            user_id,
            table = %table,
            stage = stage.map(StageScope::as_str).unwrap_or("-"),
            operation = operation.as_str(),
            decision = decision.as_str(),
            "store.access_decision"
        );
        Ok(decision)
    }

    pub async fn check_write_access(&self, user_id: i64, table: &TableRef) -> Result<bool, StoreError> {
        Ok(self
            .access_decision(user_id, table, None, Operation::Write)
            .await?
            .is_allowed())
    }

    pub async fn check_stage_write_access(
        &self,
        user_id: i64,
        table: &TableRef,
        stage: StageScope,
    ) -> Result<bool, StoreError> {
        Ok(self
            .access_decision(user_id, table, Some(stage), Operation::Write)
            .await?
            .is_allowed())
    }

    /// Five independent read checks, one per relation of `year`, answered
    /// from a single load of the user's grants.
    pub async fn check_custom_access(
        &self,
        user_id: i64,
        year: &AcademicYear,
        stage: StageScope,
    ) -> Result<CustomAccess, StoreError> {
        let grants = self.grants_for_user(user_id).await?;
        let access = custom_access(&grants, year, stage);
        tracing::debug!(
            user_id,
            year = %year,
            stage = stage.as_str(),
            students = access.students,
            subjects = access.subjects,
            carryovers = access.carryovers,
            exempted = access.exempted,
            marks = access.marks,
            "store.custom_access"
        );
        Ok(access)
    }

    /// Stage that governs writes to record `id` of `kind`. Students and
    /// subjects carry their own stage; carryovers, exempted and marks use the
    /// referenced student's current stage.
    pub async fn record_stage(
        &self,
        kind: ResourceKind,
        year: &AcademicYear,
        id: i64,
    ) -> Result<Stage, StoreError> {
        let table = relation(kind, year);
        let sql = match kind {
            ResourceKind::Students => format!("SELECT stage FROM {table} WHERE student_id = $1"),
            ResourceKind::Subjects => format!("SELECT stage FROM {table} WHERE subject_id = $1"),
            ResourceKind::Carryovers | ResourceKind::Exempted | ResourceKind::Marks => {
                let students = relation(ResourceKind::Students, year);
                format!(
                    "SELECT s.stage FROM {table} r JOIN {students} s ON s.student_id = r.student_id WHERE r.id = $1"
                )
            }
        };

        let row = self
            .point(sqlx::query(&sql).bind(id).fetch_one(&self.pool))
            .await?;
        let stage: String = row.try_get("stage")?;
        Stage::from_name(&stage).ok_or_else(|| StoreError::Invalid(format!("record stage `{stage}`")))
    }

    pub async fn student_stage(&self, year: &AcademicYear, student_id: i64) -> Result<Stage, StoreError> {
        self.record_stage(ResourceKind::Students, year, student_id)
            .await
    }
}
