use collegecm_contracts::validation::{FieldErrors, labels, messages};
use collegecm_contracts::{AcademicYear, ResourceKind, Stage, StageScope};
use serde::{Deserialize, Serialize};
use sqlx::Row;

use crate::{Store, StoreError, relation, timestamp};

const YES: &str = "نعم";
const NO: &str = "لا";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Subject {
    pub subject_id: i64,
    pub subject_name: String,
    pub subject_name_english: String,
    pub stage: Stage,
    pub semester: String,
    pub department: String,
    pub max_theory_mark: i32,
    pub max_lab_mark: i32,
    pub max_semester_mark: i32,
    pub max_final_exam: i32,
    pub credits: i32,
    pub active: String,
    pub ministerial: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SubjectInput {
    #[serde(default)]
    pub subject_id: Option<i64>,
    #[serde(default)]
    pub subject_name: Option<String>,
    #[serde(default)]
    pub subject_name_english: Option<String>,
    #[serde(default)]
    pub stage: Option<String>,
    #[serde(default)]
    pub semester: Option<String>,
    #[serde(default)]
    pub department: Option<String>,
    #[serde(default)]
    pub max_theory_mark: Option<i32>,
    #[serde(default)]
    pub max_lab_mark: Option<i32>,
    #[serde(default)]
    pub max_semester_mark: Option<i32>,
    #[serde(default)]
    pub max_final_exam: Option<i32>,
    #[serde(default)]
    pub credits: Option<i32>,
    #[serde(default)]
    pub active: Option<String>,
    #[serde(default)]
    pub ministerial: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSubject {
    pub subject_id: i64,
    pub subject_name: String,
    pub subject_name_english: String,
    pub stage: Stage,
    pub semester: String,
    pub department: String,
    pub max_theory_mark: i32,
    pub max_lab_mark: i32,
    pub max_semester_mark: i32,
    pub max_final_exam: i32,
    pub credits: i32,
    pub active: String,
    pub ministerial: String,
}

fn text(
    input: Option<String>,
    current: Option<&String>,
    field: &str,
    max_chars: usize,
    errors: &mut FieldErrors,
) -> String {
    let value = input
        .map(|value| value.trim().to_string())
        .or_else(|| current.cloned())
        .unwrap_or_default();
    errors.require_text(&value, field);
    errors.check(value.chars().count() <= max_chars, field, messages::TOO_LONG);
    value
}

fn non_negative(input: Option<i32>, current: Option<i32>, field: &str, errors: &mut FieldErrors) -> i32 {
    match input.or(current) {
        None => {
            errors.add(field, messages::REQUIRED);
            0
        }
        Some(value) => {
            errors.check(value >= 0, field, messages::NEGATIVE);
            value
        }
    }
}

fn yes_no(input: Option<String>, current: Option<&String>, field: &str, errors: &mut FieldErrors) -> String {
    let value = text(input, current, field, 10, errors);
    if !value.is_empty() {
        errors.check(value == YES || value == NO, field, messages::YES_NO);
    }
    value
}

impl SubjectInput {
    /// Validates a create (`current = None`) or a partial update layered over
    /// `current`. The key of an existing subject never changes.
    pub fn validate(self, current: Option<&Subject>) -> Result<NewSubject, FieldErrors> {
        let mut errors = FieldErrors::new();

        let subject_id = match current {
            Some(current) => current.subject_id,
            None => {
                let id = self.subject_id.unwrap_or_default();
                errors.check(self.subject_id.is_some(), labels::SUBJECT_ID, messages::REQUIRED);
                errors.check(id > 0, labels::SUBJECT_ID, messages::NOT_POSITIVE);
                id
            }
        };

        let subject_name = text(
            self.subject_name,
            current.map(|c| &c.subject_name),
            labels::SUBJECT_NAME,
            100,
            &mut errors,
        );
        let subject_name_english = text(
            self.subject_name_english,
            current.map(|c| &c.subject_name_english),
            labels::SUBJECT_NAME_ENGLISH,
            100,
            &mut errors,
        );

        let stage = match self.stage {
            Some(raw) => {
                let stage = Stage::from_name(&raw);
                if raw.trim().is_empty() {
                    errors.add(labels::STAGE, messages::REQUIRED);
                }
                errors.check(stage.is_some(), labels::STAGE, messages::INVALID_STAGE);
                stage
            }
            None => {
                let stage = current.map(|c| c.stage);
                errors.check(stage.is_some(), labels::STAGE, messages::REQUIRED);
                stage
            }
        };

        let semester = text(self.semester, current.map(|c| &c.semester), labels::SEMESTER, 30, &mut errors);
        let department = text(
            self.department,
            current.map(|c| &c.department),
            labels::DEPARTMENT,
            100,
            &mut errors,
        );

        let max_theory_mark = non_negative(
            self.max_theory_mark,
            current.map(|c| c.max_theory_mark),
            labels::MAX_THEORY_MARK,
            &mut errors,
        );
        let max_lab_mark = non_negative(
            self.max_lab_mark,
            current.map(|c| c.max_lab_mark),
            labels::MAX_LAB_MARK,
            &mut errors,
        );
        let max_semester_mark = non_negative(
            self.max_semester_mark,
            current.map(|c| c.max_semester_mark),
            labels::MAX_SEMESTER_MARK,
            &mut errors,
        );
        let max_final_exam = non_negative(
            self.max_final_exam,
            current.map(|c| c.max_final_exam),
            labels::MAX_FINAL_EXAM,
            &mut errors,
        );
        let credits = non_negative(self.credits, current.map(|c| c.credits), labels::CREDITS, &mut errors);

        let active = yes_no(self.active, current.map(|c| &c.active), labels::ACTIVE, &mut errors);
        let ministerial = yes_no(
            self.ministerial,
            current.map(|c| &c.ministerial),
            labels::MINISTERIAL,
            &mut errors,
        );

        match stage {
            Some(stage) if errors.is_empty() => Ok(NewSubject {
                subject_id,
                subject_name,
                subject_name_english,
                stage,
                semester,
                department,
                max_theory_mark,
                max_lab_mark,
                max_semester_mark,
                max_final_exam,
                credits,
                active,
                ministerial,
            }),
            _ => Err(errors),
        }
    }
}

fn subject_from_row(row: &sqlx::postgres::PgRow) -> Result<Subject, StoreError> {
    let stage: String = row.try_get("stage")?;
    Ok(Subject {
        subject_id: row.try_get("subject_id")?,
        subject_name: row.try_get("subject_name")?,
        subject_name_english: row.try_get("subject_name_english")?,
        stage: Stage::from_name(&stage)
            .ok_or_else(|| StoreError::Invalid(format!("subject stage `{stage}`")))?,
        semester: row.try_get("semester")?,
        department: row.try_get("department")?,
        max_theory_mark: row.try_get("max_theory_mark")?,
        max_lab_mark: row.try_get("max_lab_mark")?,
        max_semester_mark: row.try_get("max_semester_mark")?,
        max_final_exam: row.try_get("max_final_exam")?,
        credits: row.try_get("credits")?,
        active: row.try_get("active")?,
        ministerial: row.try_get("ministerial")?,
        created_at: row.try_get("created_at")?,
    })
}

fn subject_columns() -> String {
    format!(
        "subject_id, subject_name, subject_name_english, stage, semester, department, max_theory_mark, max_lab_mark, max_semester_mark, max_final_exam, credits, active, ministerial, {} AS created_at",
        timestamp("created_at")
    )
}

fn bind_subject<'q>(
    query: sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments>,
    subject: &'q NewSubject,
) -> sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments> {
    query
        .bind(subject.subject_id)
        .bind(&subject.subject_name)
        .bind(&subject.subject_name_english)
        .bind(subject.stage.as_str())
        .bind(&subject.semester)
        .bind(&subject.department)
        .bind(subject.max_theory_mark)
        .bind(subject.max_lab_mark)
        .bind(subject.max_semester_mark)
        .bind(subject.max_final_exam)
        .bind(subject.credits)
        .bind(&subject.active)
        .bind(&subject.ministerial)
}

impl Store {
    pub async fn list_subjects(
        &self,
        year: &AcademicYear,
        stage: StageScope,
    ) -> Result<Vec<Subject>, StoreError> {
        let sql = format!(
            "SELECT {} FROM {} WHERE ($1::text IS NULL OR stage = $1) ORDER BY subject_id",
            subject_columns(),
            relation(ResourceKind::Subjects, year)
        );
        let rows = self
            .scan(
                sqlx::query(&sql)
                    .bind(stage.stage().map(Stage::as_str))
                    .fetch_all(&self.pool),
            )
            .await?;
        rows.iter().map(subject_from_row).collect()
    }

    pub async fn subject(&self, year: &AcademicYear, subject_id: i64) -> Result<Subject, StoreError> {
        let sql = format!(
            "SELECT {} FROM {} WHERE subject_id = $1",
            subject_columns(),
            relation(ResourceKind::Subjects, year)
        );
        let row = self
            .point(sqlx::query(&sql).bind(subject_id).fetch_one(&self.pool))
            .await?;
        subject_from_row(&row)
    }

    pub async fn insert_subject(
        &self,
        year: &AcademicYear,
        subject: &NewSubject,
    ) -> Result<Subject, StoreError> {
        let sql = format!(
            "INSERT INTO {} (subject_id, subject_name, subject_name_english, stage, semester, department, max_theory_mark, max_lab_mark, max_semester_mark, max_final_exam, credits, active, ministerial) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13) RETURNING {}",
            relation(ResourceKind::Subjects, year),
            subject_columns()
        );
        let row = self
            .point(bind_subject(sqlx::query(&sql), subject).fetch_one(&self.pool))
            .await?;
        subject_from_row(&row)
    }

    pub async fn update_subject(
        &self,
        year: &AcademicYear,
        subject: &NewSubject,
    ) -> Result<Subject, StoreError> {
        let sql = format!(
            "UPDATE {} SET subject_name = $2, subject_name_english = $3, stage = $4, semester = $5, department = $6, max_theory_mark = $7, max_lab_mark = $8, max_semester_mark = $9, max_final_exam = $10, credits = $11, active = $12, ministerial = $13 WHERE subject_id = $1 RETURNING {}",
            relation(ResourceKind::Subjects, year),
            subject_columns()
        );
        let row = self
            .point(bind_subject(sqlx::query(&sql), subject).fetch_one(&self.pool))
            .await?;
        subject_from_row(&row)
    }

    pub async fn delete_subject(&self, year: &AcademicYear, subject_id: i64) -> Result<(), StoreError> {
        let sql = format!(
            "DELETE FROM {} WHERE subject_id = $1",
            relation(ResourceKind::Subjects, year)
        );
        let result = self
            .point(sqlx::query(&sql).bind(subject_id).execute(&self.pool))
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }
}
