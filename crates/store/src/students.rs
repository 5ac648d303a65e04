use collegecm_contracts::validation::{FieldErrors, labels, messages};
use collegecm_contracts::{AcademicYear, ResourceKind, Stage, StageScope};
use serde::{Deserialize, Serialize};
use sqlx::Row;

use crate::{Store, StoreError, relation, timestamp};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Student {
    pub seq_in_college: i64,
    pub student_name: String,
    pub stage: Stage,
    pub student_id: i64,
    pub state: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StudentInput {
    #[serde(default)]
    pub student_id: Option<i64>,
    #[serde(default)]
    pub student_name: Option<String>,
    #[serde(default)]
    pub stage: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewStudent {
    pub student_id: i64,
    pub student_name: String,
    pub stage: Stage,
    pub state: String,
}

impl StudentInput {
    /// Validates a create (`current = None`) or a partial update layered over
    /// `current`. The key of an existing student never changes.
    pub fn validate(self, current: Option<&Student>) -> Result<NewStudent, FieldErrors> {
        let mut errors = FieldErrors::new();

        let student_id = match current {
            Some(current) => current.student_id,
            None => {
                let id = self.student_id.unwrap_or_default();
                errors.check(self.student_id.is_some(), labels::STUDENT_ID, messages::REQUIRED);
                errors.check(id > 0, labels::STUDENT_ID, messages::NOT_POSITIVE);
                id
            }
        };

        let student_name = self
            .student_name
            .map(|name| name.trim().to_string())
            .or_else(|| current.map(|current| current.student_name.clone()))
            .unwrap_or_default();
        errors.require_text(&student_name, labels::STUDENT_NAME);
        errors.check(student_name.chars().count() <= 255, labels::STUDENT_NAME, messages::TOO_LONG);

        let stage = match self.stage {
            Some(raw) if raw.trim().is_empty() => {
                errors.add(labels::STAGE, messages::REQUIRED);
                None
            }
            Some(raw) => {
                let stage = Stage::from_name(&raw);
                errors.check(stage.is_some(), labels::STAGE, messages::INVALID_STAGE);
                stage
            }
            None => {
                let stage = current.map(|current| current.stage);
                errors.check(stage.is_some(), labels::STAGE, messages::REQUIRED);
                stage
            }
        };

        let state = self
            .state
            .map(|state| state.trim().to_string())
            .or_else(|| current.map(|current| current.state.clone()))
            .unwrap_or_default();
        errors.require_text(&state, labels::STATE);
        errors.check(state.chars().count() <= 100, labels::STATE, messages::TOO_LONG);

        match stage {
            Some(stage) if errors.is_empty() => Ok(NewStudent {
                student_id,
                student_name,
                stage,
                state,
            }),
            _ => Err(errors),
        }
    }
}

pub(crate) fn student_from_row(row: &sqlx::postgres::PgRow) -> Result<Student, StoreError> {
    let stage: String = row.try_get("stage")?;
    Ok(Student {
        seq_in_college: row.try_get("seq_in_college")?,
        student_name: row.try_get("student_name")?,
        stage: Stage::from_name(&stage)
            .ok_or_else(|| StoreError::Invalid(format!("student stage `{stage}`")))?,
        student_id: row.try_get("student_id")?,
        state: row.try_get("state")?,
        created_at: row.try_get("created_at")?,
    })
}

fn student_columns() -> String {
    format!(
        "seq_in_college, student_name, stage, student_id, state, {} AS created_at",
        timestamp("created_at")
    )
}

impl Store {
    pub async fn list_students(
        &self,
        year: &AcademicYear,
        stage: StageScope,
    ) -> Result<Vec<Student>, StoreError> {
        let sql = format!(
            "SELECT {} FROM {} WHERE ($1::text IS NULL OR stage = $1) ORDER BY seq_in_college",
            student_columns(),
            relation(ResourceKind::Students, year)
        );
        let rows = self
            .list(
                sqlx::query(&sql)
                    .bind(stage.stage().map(Stage::as_str))
                    .fetch_all(&self.pool),
            )
            .await?;
        rows.iter().map(student_from_row).collect()
    }

    pub async fn student(&self, year: &AcademicYear, student_id: i64) -> Result<Student, StoreError> {
        let sql = format!(
            "SELECT {} FROM {} WHERE student_id = $1",
            student_columns(),
            relation(ResourceKind::Students, year)
        );
        let row = self
            .point(sqlx::query(&sql).bind(student_id).fetch_one(&self.pool))
            .await?;
        student_from_row(&row)
    }

    pub async fn insert_student(
        &self,
        year: &AcademicYear,
        student: &NewStudent,
    ) -> Result<Student, StoreError> {
        let sql = format!(
            "INSERT INTO {} (student_name, stage, student_id, state) VALUES ($1, $2, $3, $4) RETURNING {}",
            relation(ResourceKind::Students, year),
            student_columns()
        );
        let row = self
            .point(
                sqlx::query(&sql)
                    .bind(&student.student_name)
                    .bind(student.stage.as_str())
                    .bind(student.student_id)
                    .bind(&student.state)
                    .fetch_one(&self.pool),
            )
            .await?;
        student_from_row(&row)
    }

    pub async fn update_student(
        &self,
        year: &AcademicYear,
        student: &NewStudent,
    ) -> Result<Student, StoreError> {
        let sql = format!(
            "UPDATE {} SET student_name = $1, stage = $2, state = $3 WHERE student_id = $4 RETURNING {}",
            relation(ResourceKind::Students, year),
            student_columns()
        );
        let row = self
            .point(
                sqlx::query(&sql)
                    .bind(&student.student_name)
                    .bind(student.stage.as_str())
                    .bind(&student.state)
                    .bind(student.student_id)
                    .fetch_one(&self.pool),
            )
            .await?;
        student_from_row(&row)
    }

    pub async fn delete_student(&self, year: &AcademicYear, student_id: i64) -> Result<(), StoreError> {
        let sql = format!(
            "DELETE FROM {} WHERE student_id = $1",
            relation(ResourceKind::Students, year)
        );
        let result = self
            .point(sqlx::query(&sql).bind(student_id).execute(&self.pool))
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }
}
