use collegecm_contracts::validation::FieldErrors;
use collegecm_contracts::{ALL_TABLES_ID, StageScope, TableRef, YearScope};
use collegecm_policy::{
    Grant, GrantKey, GrantRequest, NormalizedGrant, TableLookup, normalize_grant,
};
use sqlx::Row;

use crate::{Store, StoreError};

const GRANT_COLUMNS: &str = "p.user_id, p.year, p.table_id, t.table_name, p.stage, p.subject_id, p.can_read, p.can_write";

#[derive(Debug)]
pub enum GrantError {
    Invalid(FieldErrors),
    Store(StoreError),
}

impl std::fmt::Display for GrantError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GrantError::Invalid(errors) => write!(f, "invalid grant: {}", errors),
            GrantError::Store(err) => write!(f, "{}", err),
        }
    }
}

impl std::error::Error for GrantError {}

impl From<StoreError> for GrantError {
    fn from(value: StoreError) -> Self {
        GrantError::Store(value)
    }
}

fn grant_from_row(row: &sqlx::postgres::PgRow) -> Result<Grant, StoreError> {
    let year: String = row.try_get("year")?;
    let stage: String = row.try_get("stage")?;

    Ok(Grant {
        user_id: row.try_get("user_id")?,
        year: YearScope::parse(&year)?,
        table_id: row.try_get("table_id")?,
        table_name: row.try_get("table_name")?,
        stage: StageScope::parse(&stage)
            .ok_or_else(|| StoreError::Invalid(format!("grant stage `{stage}`")))?,
        subject_id: row.try_get("subject_id")?,
        can_read: row.try_get("can_read")?,
        can_write: row.try_get("can_write")?,
    })
}

impl Store {
    /// Validates `request` against the catalog and upserts it. Re-inserting
    /// the same `(user, year, table, stage, subject)` key replaces the flags.
    pub async fn upsert_grant(&self, request: &GrantRequest) -> Result<Grant, GrantError> {
        let entry = match request.table_id {
            Some(id) if id > 0 => self.table_by_id(id).await?,
            _ => None,
        };
        let table = entry
            .as_ref()
            .and_then(|entry| TableRef::parse(&entry.table_name));
        let lookup = match (request.table_id, table.as_ref()) {
            (Some(ALL_TABLES_ID), _) => TableLookup::Wildcard,
            (_, Some(table)) => TableLookup::Registered(table),
            _ => TableLookup::Unknown,
        };

        let grant = normalize_grant(request, lookup).map_err(GrantError::Invalid)?;
        self.insert_grant(&grant).await?;

        Ok(Grant {
            user_id: grant.user_id,
            year: grant.year,
            table_id: grant.table_id,
            table_name: entry.map(|entry| entry.table_name),
            stage: grant.stage,
            subject_id: grant.subject_id,
            can_read: grant.can_read,
            can_write: grant.can_write,
        })
    }

    pub async fn insert_grant(&self, grant: &NormalizedGrant) -> Result<(), StoreError> {
        self.point(
            sqlx::query(
                "INSERT INTO privileges (user_id, year, table_id, stage, subject_id, can_read, can_write) VALUES ($1, $2, $3, $4, $5, $6, $7) ON CONFLICT (user_id, year, table_id, stage, subject_id) DO UPDATE SET can_read = EXCLUDED.can_read, can_write = EXCLUDED.can_write",
            )
            .bind(grant.user_id)
            .bind(grant.year.as_str())
            .bind(grant.table_id)
            .bind(grant.stage.as_str())
            .bind(grant.subject_id)
            .bind(grant.can_read)
            .bind(grant.can_write)
            .execute(&self.pool),
        )
        .await?;
        Ok(())
    }

    pub async fn grants_for_user(&self, user_id: i64) -> Result<Vec<Grant>, StoreError> {
        let sql = format!(
            "SELECT {GRANT_COLUMNS} FROM privileges p LEFT JOIN tables t ON t.id = p.table_id WHERE p.user_id = $1 ORDER BY p.table_id, p.year, p.stage, p.subject_id"
        );
        let rows = self
            .scan(sqlx::query(&sql).bind(user_id).fetch_all(&self.pool))
            .await?;
        rows.iter().map(grant_from_row).collect()
    }

    /// Grants of `user_id` that can answer a check on `table`: the exact table
    /// plus every wildcard-table grant.
    pub async fn grants_for_table(
        &self,
        user_id: i64,
        table: &TableRef,
    ) -> Result<Vec<Grant>, StoreError> {
        let sql = format!(
            "SELECT {GRANT_COLUMNS} FROM privileges p LEFT JOIN tables t ON t.id = p.table_id WHERE p.user_id = $1 AND (p.table_id = $2 OR t.table_name = $3)"
        );
        let rows = self
            .point(
                sqlx::query(&sql)
                    .bind(user_id)
                    .bind(ALL_TABLES_ID)
                    .bind(table.table_name())
                    .fetch_all(&self.pool),
            )
            .await?;
        rows.iter().map(grant_from_row).collect()
    }

    /// Exact-match revoke. Zero affected rows is not-found.
    pub async fn delete_grant(&self, key: &GrantKey) -> Result<u64, StoreError> {
        let result = self
            .point(
                sqlx::query(
                    "DELETE FROM privileges WHERE user_id = $1 AND table_id = $2 AND stage = $3 AND subject_id = $4 AND ($5::text IS NULL OR year = $5)",
                )
                .bind(key.user_id)
                .bind(key.table_id)
                .bind(key.stage.as_str())
                .bind(key.subject_id)
                .bind(key.year.as_ref().map(YearScope::as_str))
                .execute(&self.pool),
            )
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(result.rows_affected())
    }

    /// Grants whose table id is neither the wildcard nor a catalog row, as left
    /// behind by closing a year.
    pub async fn dangling_grants(&self) -> Result<Vec<Grant>, StoreError> {
        let sql = format!(
            "SELECT {GRANT_COLUMNS} FROM privileges p LEFT JOIN tables t ON t.id = p.table_id WHERE p.table_id <> $1 AND t.id IS NULL ORDER BY p.user_id, p.table_id"
        );
        let rows = self
            .scan(sqlx::query(&sql).bind(ALL_TABLES_ID).fetch_all(&self.pool))
            .await?;
        rows.iter().map(grant_from_row).collect()
    }
}
