use serde::Serialize;
use sqlx::Row;

use crate::{Store, StoreError};

/// A relation registered in the `tables` catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CatalogEntry {
    pub id: i64,
    pub table_name: String,
}

impl CatalogEntry {
    fn from_row(row: &sqlx::postgres::PgRow) -> Result<Self, StoreError> {
        Ok(Self {
            id: row.try_get("id")?,
            table_name: row.try_get("table_name")?,
        })
    }
}

impl Store {
    pub async fn list_tables(&self) -> Result<Vec<CatalogEntry>, StoreError> {
        let rows = self
            .scan(sqlx::query("SELECT id, table_name FROM tables ORDER BY id").fetch_all(&self.pool))
            .await?;
        rows.iter().map(CatalogEntry::from_row).collect()
    }

    pub async fn table_by_id(&self, id: i64) -> Result<Option<CatalogEntry>, StoreError> {
        let row = self
            .point(
                sqlx::query("SELECT id, table_name FROM tables WHERE id = $1")
                    .bind(id)
                    .fetch_optional(&self.pool),
            )
            .await?;
        row.as_ref().map(CatalogEntry::from_row).transpose()
    }

    pub async fn table_by_name(&self, table_name: &str) -> Result<Option<CatalogEntry>, StoreError> {
        let row = self
            .point(
                sqlx::query("SELECT id, table_name FROM tables WHERE table_name = $1")
                    .bind(table_name)
                    .fetch_optional(&self.pool),
            )
            .await?;
        row.as_ref().map(CatalogEntry::from_row).transpose()
    }
}
