use collegecm_contracts::validation::{FieldErrors, labels, messages};
use collegecm_contracts::{AcademicYear, ResourceKind, Stage, StageScope};
use serde::{Deserialize, Serialize};
use sqlx::Row;

use crate::links::required_id;
use crate::{Store, StoreError, relation, timestamp};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Mark {
    pub id: i64,
    pub student_id: i64,
    pub subject_id: i64,
    pub student_name: String,
    pub subject_name: String,
    pub semester_mark: i32,
    pub max_semester_mark: i32,
    pub final_mark: i32,
    pub max_final_exam: i32,
    pub created_at: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MarkInput {
    #[serde(default)]
    pub student_id: Option<i64>,
    #[serde(default)]
    pub subject_id: Option<i64>,
    #[serde(default)]
    pub semester_mark: Option<i32>,
    #[serde(default)]
    pub final_mark: Option<i32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NewMark {
    pub student_id: i64,
    pub subject_id: i64,
    pub semester_mark: i32,
    pub final_mark: i32,
}

/// Upper bounds a mark is checked against, taken from its subject.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubjectLimits {
    pub max_semester_mark: i32,
    pub max_final_exam: i32,
}

impl MarkInput {
    /// `(student_id, subject_id)` of a new mark.
    pub fn key(&self) -> Result<(i64, i64), FieldErrors> {
        let mut errors = FieldErrors::new();
        let student_id = required_id(self.student_id, labels::STUDENT_ID, &mut errors);
        let subject_id = required_id(self.subject_id, labels::SUBJECT_ID, &mut errors);
        errors.into_result()?;
        Ok((student_id, subject_id))
    }

    /// Validates a create (`current = None`) or an update of the two mark
    /// values of `current`. Student and subject of an existing mark are fixed.
    pub fn validate(self, current: Option<&Mark>, limits: SubjectLimits) -> Result<NewMark, FieldErrors> {
        let (student_id, subject_id) = match current {
            Some(current) => (current.student_id, current.subject_id),
            None => self.key()?,
        };

        let mut errors = FieldErrors::new();
        let semester_mark = self
            .semester_mark
            .or(current.map(|c| c.semester_mark))
            .unwrap_or_default();
        let final_mark = self
            .final_mark
            .or(current.map(|c| c.final_mark))
            .unwrap_or_default();

        errors.check(semester_mark >= 0, labels::SEMESTER_MARK, messages::NEGATIVE);
        errors.check(
            semester_mark <= limits.max_semester_mark,
            labels::SEMESTER_MARK,
            messages::ABOVE_MAX,
        );
        errors.check(final_mark >= 0, labels::FINAL_MARK, messages::NEGATIVE);
        errors.check(
            final_mark <= limits.max_final_exam,
            labels::FINAL_MARK,
            messages::ABOVE_MAX,
        );
        errors.into_result()?;

        Ok(NewMark {
            student_id,
            subject_id,
            semester_mark,
            final_mark,
        })
    }
}

impl Mark {
    pub fn limits(&self) -> SubjectLimits {
        SubjectLimits {
            max_semester_mark: self.max_semester_mark,
            max_final_exam: self.max_final_exam,
        }
    }
}

pub(crate) fn mark_select(year: &AcademicYear, source: &str) -> String {
    format!(
        "SELECT m.id, m.student_id, m.subject_id, s.student_name, sub.subject_name, m.semester_mark, sub.max_semester_mark, m.final_mark, sub.max_final_exam, {} AS created_at FROM {source} m JOIN {} s ON m.student_id = s.student_id JOIN {} sub ON m.subject_id = sub.subject_id",
        timestamp("m.created_at"),
        relation(ResourceKind::Students, year),
        relation(ResourceKind::Subjects, year)
    )
}

pub(crate) fn mark_from_row(row: &sqlx::postgres::PgRow) -> Result<Mark, StoreError> {
    Ok(Mark {
        id: row.try_get("id")?,
        student_id: row.try_get("student_id")?,
        subject_id: row.try_get("subject_id")?,
        student_name: row.try_get("student_name")?,
        subject_name: row.try_get("subject_name")?,
        semester_mark: row.try_get("semester_mark")?,
        max_semester_mark: row.try_get("max_semester_mark")?,
        final_mark: row.try_get("final_mark")?,
        max_final_exam: row.try_get("max_final_exam")?,
        created_at: row.try_get("created_at")?,
    })
}

impl Store {
    pub async fn subject_limits(
        &self,
        year: &AcademicYear,
        subject_id: i64,
    ) -> Result<SubjectLimits, StoreError> {
        let sql = format!(
            "SELECT max_semester_mark, max_final_exam FROM {} WHERE subject_id = $1",
            relation(ResourceKind::Subjects, year)
        );
        let row = self
            .point(sqlx::query(&sql).bind(subject_id).fetch_one(&self.pool))
            .await?;
        Ok(SubjectLimits {
            max_semester_mark: row.try_get("max_semester_mark")?,
            max_final_exam: row.try_get("max_final_exam")?,
        })
    }

    pub async fn list_marks(&self, year: &AcademicYear, stage: StageScope) -> Result<Vec<Mark>, StoreError> {
        let sql = format!(
            "{} WHERE ($1::text IS NULL OR s.stage = $1) ORDER BY m.id",
            mark_select(year, &relation(ResourceKind::Marks, year))
        );
        let rows = self
            .scan(
                sqlx::query(&sql)
                    .bind(stage.stage().map(Stage::as_str))
                    .fetch_all(&self.pool),
            )
            .await?;
        rows.iter().map(mark_from_row).collect()
    }

    pub async fn mark(&self, year: &AcademicYear, id: i64) -> Result<Mark, StoreError> {
        let sql = format!(
            "{} WHERE m.id = $1",
            mark_select(year, &relation(ResourceKind::Marks, year))
        );
        let row = self
            .point(sqlx::query(&sql).bind(id).fetch_one(&self.pool))
            .await?;
        mark_from_row(&row)
    }

    pub async fn insert_mark(&self, year: &AcademicYear, mark: NewMark) -> Result<Mark, StoreError> {
        let sql = format!(
            "WITH inserted AS (INSERT INTO {} (student_id, subject_id, semester_mark, final_mark) VALUES ($1, $2, $3, $4) RETURNING id, student_id, subject_id, semester_mark, final_mark, created_at) {}",
            relation(ResourceKind::Marks, year),
            mark_select(year, "inserted")
        );
        let row = self
            .point(
                sqlx::query(&sql)
                    .bind(mark.student_id)
                    .bind(mark.subject_id)
                    .bind(mark.semester_mark)
                    .bind(mark.final_mark)
                    .fetch_one(&self.pool),
            )
            .await?;
        mark_from_row(&row)
    }

    pub async fn update_mark(&self, year: &AcademicYear, id: i64, mark: NewMark) -> Result<Mark, StoreError> {
        let sql = format!(
            "WITH updated AS (UPDATE {} SET semester_mark = $2, final_mark = $3 WHERE id = $1 RETURNING id, student_id, subject_id, semester_mark, final_mark, created_at) {}",
            relation(ResourceKind::Marks, year),
            mark_select(year, "updated")
        );
        let row = self
            .point(
                sqlx::query(&sql)
                    .bind(id)
                    .bind(mark.semester_mark)
                    .bind(mark.final_mark)
                    .fetch_one(&self.pool),
            )
            .await?;
        mark_from_row(&row)
    }

    pub async fn delete_mark(&self, year: &AcademicYear, id: i64) -> Result<(), StoreError> {
        let sql = format!("DELETE FROM {} WHERE id = $1", relation(ResourceKind::Marks, year));
        let result = self
            .point(sqlx::query(&sql).bind(id).execute(&self.pool))
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }
}
