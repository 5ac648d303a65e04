use collegecm_contracts::validation::{FieldErrors, labels, messages};
use collegecm_contracts::{AcademicYear, ResourceKind, Stage, StageScope};
use serde::{Deserialize, Serialize};
use sqlx::Row;

use crate::{Store, StoreError, relation, timestamp};

/// A carryover or exempted row, joined with the student and subject names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Link {
    pub id: i64,
    pub student_id: i64,
    pub subject_id: i64,
    pub student_name: String,
    pub subject_name: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LinkInput {
    #[serde(default)]
    pub student_id: Option<i64>,
    #[serde(default)]
    pub subject_id: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NewLink {
    pub student_id: i64,
    pub subject_id: i64,
}

impl LinkInput {
    pub fn validate(self) -> Result<NewLink, FieldErrors> {
        let mut errors = FieldErrors::new();
        let student_id = required_id(self.student_id, labels::STUDENT_ID, &mut errors);
        let subject_id = required_id(self.subject_id, labels::SUBJECT_ID, &mut errors);
        errors.into_result()?;
        Ok(NewLink {
            student_id,
            subject_id,
        })
    }
}

pub(crate) fn required_id(value: Option<i64>, field: &str, errors: &mut FieldErrors) -> i64 {
    match value {
        None => {
            errors.add(field, messages::REQUIRED);
            0
        }
        Some(id) => {
            errors.check(id > 0, field, messages::NOT_POSITIVE);
            id
        }
    }
}

fn link_relation(kind: ResourceKind, year: &AcademicYear) -> Result<String, StoreError> {
    match kind {
        ResourceKind::Carryovers | ResourceKind::Exempted => Ok(relation(kind, year)),
        other => Err(StoreError::Invalid(format!("`{other}` is not a student/subject link"))),
    }
}

fn link_select(year: &AcademicYear, source: &str) -> String {
    format!(
        "SELECT l.id, l.student_id, l.subject_id, s.student_name, sub.subject_name, {} AS created_at FROM {source} l JOIN {} s ON l.student_id = s.student_id JOIN {} sub ON l.subject_id = sub.subject_id",
        timestamp("l.created_at"),
        relation(ResourceKind::Students, year),
        relation(ResourceKind::Subjects, year)
    )
}

fn link_from_row(row: &sqlx::postgres::PgRow) -> Result<Link, StoreError> {
    Ok(Link {
        id: row.try_get("id")?,
        student_id: row.try_get("student_id")?,
        subject_id: row.try_get("subject_id")?,
        student_name: row.try_get("student_name")?,
        subject_name: row.try_get("subject_name")?,
        created_at: row.try_get("created_at")?,
    })
}

impl Store {
    pub async fn list_links(
        &self,
        kind: ResourceKind,
        year: &AcademicYear,
        stage: StageScope,
    ) -> Result<Vec<Link>, StoreError> {
        let table = link_relation(kind, year)?;
        let sql = format!(
            "{} WHERE ($1::text IS NULL OR s.stage = $1) ORDER BY l.id",
            link_select(year, &table)
        );
        let rows = self
            .scan(
                sqlx::query(&sql)
                    .bind(stage.stage().map(Stage::as_str))
                    .fetch_all(&self.pool),
            )
            .await?;
        rows.iter().map(link_from_row).collect()
    }

    pub async fn link(&self, kind: ResourceKind, year: &AcademicYear, id: i64) -> Result<Link, StoreError> {
        let table = link_relation(kind, year)?;
        let sql = format!("{} WHERE l.id = $1", link_select(year, &table));
        let row = self
            .point(sqlx::query(&sql).bind(id).fetch_one(&self.pool))
            .await?;
        link_from_row(&row)
    }

    /// Inserts a link. An unknown student or subject is a missing reference; a
    /// repeated `(student_id, subject_id)` pair is a conflict.
    pub async fn insert_link(
        &self,
        kind: ResourceKind,
        year: &AcademicYear,
        link: NewLink,
    ) -> Result<Link, StoreError> {
        let table = link_relation(kind, year)?;
        let sql = format!(
            "WITH inserted AS (INSERT INTO {table} (student_id, subject_id) VALUES ($1, $2) RETURNING id, student_id, subject_id, created_at) {}",
            link_select(year, "inserted")
        );
        let row = self
            .point(
                sqlx::query(&sql)
                    .bind(link.student_id)
                    .bind(link.subject_id)
                    .fetch_one(&self.pool),
            )
            .await?;
        link_from_row(&row)
    }

    pub async fn delete_link(&self, kind: ResourceKind, year: &AcademicYear, id: i64) -> Result<(), StoreError> {
        let table = link_relation(kind, year)?;
        let sql = format!("DELETE FROM {table} WHERE id = $1");
        let result = self
            .point(sqlx::query(&sql).bind(id).execute(&self.pool))
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }
}
