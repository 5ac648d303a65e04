use std::future::Future;
use std::time::Duration;

use collegecm_contracts::schema::{quote_ident, relation_name};
use collegecm_contracts::{AcademicYear, ResourceKind, SchemaError};
use sqlx::postgres::PgPoolOptions;

mod access;
mod catalog;
mod custom;
mod links;
mod marks;
mod privileges;
mod sessions;
mod students;
mod subjects;
mod users;
mod years;

pub use catalog::CatalogEntry;
pub use custom::{LinkedSubject, StudentView, SubjectSummary};
pub use links::{Link, LinkInput, NewLink};
pub use marks::{Mark, MarkInput, NewMark, SubjectLimits};
pub use privileges::GrantError;
pub use students::{NewStudent, Student, StudentInput};
pub use subjects::{NewSubject, Subject, SubjectInput};
pub use users::{NewUser, User, UserInput};
pub use years::{ClosedYear, Year};

#[derive(Debug)]
pub enum StoreError {
    Timeout,
    NotFound,
    Conflict,
    MissingReference,
    Invalid(String),
    Sqlx(sqlx::Error),
}

impl StoreError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Timeout)
    }
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Timeout => write!(f, "store operation timed out"),
            StoreError::NotFound => write!(f, "record not found"),
            StoreError::Conflict => write!(f, "record already exists"),
            StoreError::MissingReference => write!(f, "referenced record does not exist"),
            StoreError::Invalid(message) => write!(f, "invalid stored value: {}", message),
            StoreError::Sqlx(err) => write!(f, "store sql error: {}", err),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<sqlx::Error> for StoreError {
    fn from(value: sqlx::Error) -> Self {
        if matches!(value, sqlx::Error::RowNotFound) {
            return StoreError::NotFound;
        }

        let code = value
            .as_database_error()
            .and_then(|db| db.code())
            .map(|code| code.into_owned());
        match code.as_deref() {
            // undefined_table: the year partition was never opened or was closed.
            Some("42P01") => StoreError::NotFound,
            Some("23505") => StoreError::Conflict,
            Some("23503") => StoreError::MissingReference,
            _ => StoreError::Sqlx(value),
        }
    }
}

impl From<SchemaError> for StoreError {
    fn from(value: SchemaError) -> Self {
        StoreError::Invalid(value.to_string())
    }
}

/// Per-call deadlines for the three classes of storage work.
#[derive(Debug, Clone, Copy)]
pub struct StoreTimeouts {
    pub point: Duration,
    pub scan: Duration,
    pub list: Duration,
}

impl Default for StoreTimeouts {
    fn default() -> Self {
        Self {
            point: Duration::from_millis(3_000),
            scan: Duration::from_millis(5_000),
            list: Duration::from_millis(10_000),
        }
    }
}

#[derive(Clone)]
pub struct Store {
    pool: sqlx::PgPool,
    timeouts: StoreTimeouts,
}

impl Store {
    pub async fn connect(
        db_url: &str,
        max_connections: u32,
        timeouts: StoreTimeouts,
    ) -> Result<Self, StoreError> {
        let pool = tokio::time::timeout(
            Duration::from_secs(2),
            PgPoolOptions::new()
                .max_connections(max_connections)
                .connect(db_url),
        )
        .await
        .map_err(|_| StoreError::Timeout)??;

        Ok(Self { pool, timeouts })
    }

    pub async fn connect_and_migrate(
        db_url: &str,
        max_connections: u32,
        timeouts: StoreTimeouts,
    ) -> Result<Self, StoreError> {
        let store = Self::connect(db_url, max_connections, timeouts).await?;
        store.migrate().await?;
        Ok(store)
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        tokio::time::timeout(Duration::from_secs(10), migrate(&self.pool))
            .await
            .map_err(|_| StoreError::Timeout)??;
        Ok(())
    }

    pub async fn ping(&self) -> Result<(), StoreError> {
        self.point(sqlx::query("SELECT 1").execute(&self.pool)).await?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    pub(crate) async fn point<T, E>(
        &self,
        fut: impl Future<Output = Result<T, E>>,
    ) -> Result<T, StoreError>
    where
        E: Into<StoreError>,
    {
        deadline(self.timeouts.point, fut).await
    }

    pub(crate) async fn scan<T, E>(
        &self,
        fut: impl Future<Output = Result<T, E>>,
    ) -> Result<T, StoreError>
    where
        E: Into<StoreError>,
    {
        deadline(self.timeouts.scan, fut).await
    }

    pub(crate) async fn list<T, E>(
        &self,
        fut: impl Future<Output = Result<T, E>>,
    ) -> Result<T, StoreError>
    where
        E: Into<StoreError>,
    {
        deadline(self.timeouts.list, fut).await
    }
}

async fn deadline<T, E>(
    limit: Duration,
    fut: impl Future<Output = Result<T, E>>,
) -> Result<T, StoreError>
where
    E: Into<StoreError>,
{
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| StoreError::Timeout)?
        .map_err(Into::into)
}

pub async fn migrate(pool: &sqlx::PgPool) -> Result<(), sqlx::Error> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Quoted physical relation for `kind` in `year`.
pub(crate) fn relation(kind: ResourceKind, year: &AcademicYear) -> String {
    quote_ident(&relation_name(kind, year))
}

/// UTC RFC 3339 rendering of a timestamptz column.
pub(crate) fn timestamp(column: &str) -> String {
    format!("to_char({column} AT TIME ZONE 'UTC', 'YYYY-MM-DD\"T\"HH24:MI:SS\"Z\"')")
}
