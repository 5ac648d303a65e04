use collegecm_contracts::schema::{quote_ident, relation_name, year_relations, year_suffix_pattern};
use collegecm_contracts::{AcademicYear, ResourceKind};
use serde::Serialize;
use sqlx::Row;

use crate::{Store, StoreError, relation, timestamp};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Year {
    pub year: AcademicYear,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClosedYear {
    pub year: AcademicYear,
    pub dropped_tables: Vec<String>,
    pub catalog_rows_removed: u64,
}

fn year_lock_key(year: &AcademicYear) -> String {
    format!("collegecm:year:{}", year.as_str())
}

fn create_table_sql(kind: ResourceKind, year: &AcademicYear) -> String {
    let table = relation(kind, year);
    let students = relation(ResourceKind::Students, year);
    let subjects = relation(ResourceKind::Subjects, year);

    match kind {
        ResourceKind::Students => format!(
            "CREATE TABLE IF NOT EXISTS {table} (
                seq_in_college BIGSERIAL,
                student_name VARCHAR(255) NOT NULL,
                stage VARCHAR(100) NOT NULL,
                student_id BIGINT NOT NULL PRIMARY KEY,
                state VARCHAR(100) NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )"
        ),
        ResourceKind::Subjects => format!(
            "CREATE TABLE IF NOT EXISTS {table} (
                subject_id BIGINT NOT NULL PRIMARY KEY,
                subject_name VARCHAR(100) NOT NULL,
                subject_name_english VARCHAR(100) NOT NULL,
                stage VARCHAR(30) NOT NULL,
                semester VARCHAR(30) NOT NULL,
                department VARCHAR(100) NOT NULL,
                max_theory_mark INTEGER NOT NULL,
                max_lab_mark INTEGER NOT NULL,
                max_semester_mark INTEGER NOT NULL,
                max_final_exam INTEGER NOT NULL,
                credits INTEGER NOT NULL,
                active VARCHAR(10) NOT NULL,
                ministerial VARCHAR(10) NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )"
        ),
        ResourceKind::Carryovers | ResourceKind::Exempted => format!(
            "CREATE TABLE IF NOT EXISTS {table} (
                id BIGSERIAL PRIMARY KEY,
                student_id BIGINT NOT NULL REFERENCES {students} (student_id) ON DELETE CASCADE,
                subject_id BIGINT NOT NULL REFERENCES {subjects} (subject_id) ON DELETE CASCADE,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                UNIQUE (student_id, subject_id)
            )"
        ),
        ResourceKind::Marks => format!(
            "CREATE TABLE IF NOT EXISTS {table} (
                id BIGSERIAL PRIMARY KEY,
                student_id BIGINT NOT NULL REFERENCES {students} (student_id) ON DELETE CASCADE,
                subject_id BIGINT NOT NULL REFERENCES {subjects} (subject_id) ON DELETE CASCADE,
                semester_mark INTEGER NOT NULL DEFAULT 0,
                final_mark INTEGER NOT NULL DEFAULT 0,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                UNIQUE (student_id, subject_id)
            )"
        ),
    }
}

impl Store {
    pub async fn list_years(&self) -> Result<Vec<Year>, StoreError> {
        let sql = format!(
            "SELECT year, {} AS created_at FROM years ORDER BY year",
            timestamp("created_at")
        );
        let rows = self.scan(sqlx::query(&sql).fetch_all(&self.pool)).await?;

        rows.iter()
            .map(|row| -> Result<Year, StoreError> {
                let year: String = row.try_get("year")?;
                Ok(Year {
                    year: AcademicYear::parse(&year)?,
                    created_at: row.try_get("created_at")?,
                })
            })
            .collect()
    }

    pub async fn year_exists(&self, year: &AcademicYear) -> Result<bool, StoreError> {
        let found = self
            .point(
                sqlx::query("SELECT 1 FROM years WHERE year = $1")
                    .bind(year.as_str())
                    .fetch_optional(&self.pool),
            )
            .await?;
        Ok(found.is_some())
    }

    /// Creates the five relations of `year`, registers them in the catalog and
    /// records the year, all in one transaction. An already registered year
    /// is a conflict and leaves nothing behind.
    pub async fn open_year(&self, year: &AcademicYear) -> Result<Year, StoreError> {
        let sql = format!(
            "INSERT INTO years (year) VALUES ($1) RETURNING {} AS created_at",
            timestamp("created_at")
        );

        let created_at = self
            .scan(async {
                let mut tx = self.pool.begin().await?;

                sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))")
                    .bind(year_lock_key(year))
                    .execute(&mut *tx)
                    .await?;

                let existing = sqlx::query("SELECT 1 FROM years WHERE year = $1")
                    .bind(year.as_str())
                    .fetch_optional(&mut *tx)
                    .await?;
                if existing.is_some() {
                    return Err(StoreError::Conflict);
                }

                for (kind, table_name) in year_relations(year) {
                    sqlx::query(&create_table_sql(kind, year))
                        .execute(&mut *tx)
                        .await?;
                    sqlx::query(
                        "INSERT INTO tables (table_name) VALUES ($1) ON CONFLICT (table_name) DO NOTHING",
                    )
                    .bind(&table_name)
                    .execute(&mut *tx)
                    .await?;
                }

                let row = sqlx::query(&sql)
                    .bind(year.as_str())
                    .fetch_one(&mut *tx)
                    .await?;
                let created_at: String = row.try_get("created_at")?;

                tx.commit().await?;
                Ok::<String, StoreError>(created_at)
            })
            .await?;

        Ok(Year {
            year: year.clone(),
            created_at,
        })
    }

    /// Drops the five relations of `year`, removes their catalog rows and the
    /// year itself in one transaction. Grants referencing the removed catalog
    /// rows are left in place.
    pub async fn close_year(&self, year: &AcademicYear) -> Result<ClosedYear, StoreError> {
        let pattern = year_suffix_pattern(year);

        self.scan(async {
            let mut tx = self.pool.begin().await?;

            sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))")
                .bind(year_lock_key(year))
                .execute(&mut *tx)
                .await?;

            let deleted = sqlx::query("DELETE FROM years WHERE year = $1")
                .bind(year.as_str())
                .execute(&mut *tx)
                .await?;
            if deleted.rows_affected() == 0 {
                return Err(StoreError::NotFound);
            }

            let mut dropped_tables = Vec::with_capacity(ResourceKind::DROP_ORDER.len());
            for kind in ResourceKind::DROP_ORDER {
                let table_name = relation_name(kind, year);
                sqlx::query(&format!("DROP TABLE IF EXISTS {}", quote_ident(&table_name)))
                    .execute(&mut *tx)
                    .await?;
                dropped_tables.push(table_name);
            }

            let removed = sqlx::query("DELETE FROM tables WHERE table_name LIKE $1 ESCAPE '\\'")
                .bind(&pattern)
                .execute(&mut *tx)
                .await?;

            tx.commit().await?;
            Ok::<ClosedYear, StoreError>(ClosedYear {
                year: year.clone(),
                dropped_tables,
                catalog_rows_removed: removed.rows_affected(),
            })
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dependent_tables_reference_same_year_partitions() {
        let year = AcademicYear::parse("2023_2024").expect("year should parse");
        let marks = create_table_sql(ResourceKind::Marks, &year);

        assert!(marks.contains("\"marks_2023_2024\""));
        assert!(marks.contains("REFERENCES \"students_2023_2024\" (student_id) ON DELETE CASCADE"));
        assert!(marks.contains("REFERENCES \"subjects_2023_2024\" (subject_id) ON DELETE CASCADE"));
        assert!(marks.contains("UNIQUE (student_id, subject_id)"));

        let exempted = create_table_sql(ResourceKind::Exempted, &year);
        assert!(exempted.contains("\"exempted_2023_2024\""));
    }
}
