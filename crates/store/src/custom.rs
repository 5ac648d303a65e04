use collegecm_contracts::{AcademicYear, ResourceKind};
use collegecm_policy::CustomAccess;
use serde::Serialize;
use sqlx::Row;

use crate::marks::{mark_from_row, mark_select};
use crate::{Mark, Store, StoreError, Student, relation};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubjectSummary {
    pub subject_id: i64,
    pub subject_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LinkedSubject {
    pub id: i64,
    pub subject_id: i64,
    pub subject_name: String,
}

/// Composite view of one student. Each section is present only when the
/// caller may read the relation behind it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StudentView {
    pub student: Student,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subjects: Option<Vec<SubjectSummary>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub carryovers: Option<Vec<LinkedSubject>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exempted: Option<Vec<LinkedSubject>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub marks: Option<Vec<Mark>>,
}

impl Store {
    pub async fn student_view(
        &self,
        year: &AcademicYear,
        student: Student,
        access: CustomAccess,
    ) -> Result<StudentView, StoreError> {
        let student_id = student.student_id;

        let subjects = async {
            if !access.subjects {
                return Ok(None);
            }
            self.subjects_of_stage(year, &student).await.map(Some)
        };
        let carryovers = async {
            if !access.carryovers {
                return Ok(None);
            }
            self.linked_subjects(ResourceKind::Carryovers, year, student_id)
                .await
                .map(Some)
        };
        let exempted = async {
            if !access.exempted {
                return Ok(None);
            }
            self.linked_subjects(ResourceKind::Exempted, year, student_id)
                .await
                .map(Some)
        };
        let marks = async {
            if !access.marks {
                return Ok(None);
            }
            self.marks_of_student(year, student_id).await.map(Some)
        };

        let (subjects, carryovers, exempted, marks) =
            tokio::try_join!(subjects, carryovers, exempted, marks)?;

        Ok(StudentView {
            student,
            subjects,
            carryovers,
            exempted,
            marks,
        })
    }

    async fn subjects_of_stage(
        &self,
        year: &AcademicYear,
        student: &Student,
    ) -> Result<Vec<SubjectSummary>, StoreError> {
        let sql = format!(
            "SELECT subject_id, subject_name FROM {} WHERE stage = $1 ORDER BY subject_id",
            relation(ResourceKind::Subjects, year)
        );
        let rows = self
            .scan(
                sqlx::query(&sql)
                    .bind(student.stage.as_str())
                    .fetch_all(&self.pool),
            )
            .await?;
        rows.iter()
            .map(|row| -> Result<SubjectSummary, StoreError> {
                Ok(SubjectSummary {
                    subject_id: row.try_get("subject_id")?,
                    subject_name: row.try_get("subject_name")?,
                })
            })
            .collect()
    }

    async fn linked_subjects(
        &self,
        kind: ResourceKind,
        year: &AcademicYear,
        student_id: i64,
    ) -> Result<Vec<LinkedSubject>, StoreError> {
        let sql = format!(
            "SELECT l.id, l.subject_id, sub.subject_name FROM {} l JOIN {} sub ON l.subject_id = sub.subject_id WHERE l.student_id = $1 ORDER BY l.id",
            relation(kind, year),
            relation(ResourceKind::Subjects, year)
        );
        let rows = self
            .scan(sqlx::query(&sql).bind(student_id).fetch_all(&self.pool))
            .await?;
        rows.iter()
            .map(|row| -> Result<LinkedSubject, StoreError> {
                Ok(LinkedSubject {
                    id: row.try_get("id")?,
                    subject_id: row.try_get("subject_id")?,
                    subject_name: row.try_get("subject_name")?,
                })
            })
            .collect()
    }

    async fn marks_of_student(&self, year: &AcademicYear, student_id: i64) -> Result<Vec<Mark>, StoreError> {
        let sql = format!(
            "{} WHERE m.student_id = $1 ORDER BY m.id",
            mark_select(year, &relation(ResourceKind::Marks, year))
        );
        let rows = self
            .scan(sqlx::query(&sql).bind(student_id).fetch_all(&self.pool))
            .await?;
        rows.iter().map(mark_from_row).collect()
    }
}
