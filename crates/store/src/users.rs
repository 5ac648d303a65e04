use collegecm_contracts::validation::{FieldErrors, labels, messages};
use collegecm_contracts::{ALL_SUBJECTS_ID, ALL_TABLES_ID, StageScope, YearScope};
use collegecm_policy::NormalizedGrant;
use serde::{Deserialize, Serialize};
use sqlx::Row;

use crate::{Store, StoreError, timestamp};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UserInput {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewUser {
    pub username: String,
    pub password: String,
}

impl UserInput {
    pub fn validate(self) -> Result<NewUser, FieldErrors> {
        let mut errors = FieldErrors::new();
        let username = self.username.unwrap_or_default().trim().to_string();
        let password = self.password.unwrap_or_default();

        errors.require_text(&username, labels::USERNAME);
        errors.check(username.chars().count() <= 255, labels::USERNAME, messages::TOO_LONG);
        errors.require_text(&password, labels::PASSWORD);
        errors.into_result()?;

        Ok(NewUser { username, password })
    }
}

fn user_from_row(row: &sqlx::postgres::PgRow) -> Result<User, StoreError> {
    Ok(User {
        id: row.try_get("id")?,
        username: row.try_get("username")?,
        created_at: row.try_get("created_at")?,
    })
}

fn user_select() -> String {
    format!("SELECT id, username, {} AS created_at FROM users", timestamp("created_at"))
}

impl Store {
    pub async fn create_user(&self, user: &NewUser) -> Result<User, StoreError> {
        let sql = format!(
            "INSERT INTO users (username, password) VALUES ($1, $2) RETURNING id, username, {} AS created_at",
            timestamp("created_at")
        );
        let row = self
            .point(
                sqlx::query(&sql)
                    .bind(&user.username)
                    .bind(&user.password)
                    .fetch_one(&self.pool),
            )
            .await?;
        user_from_row(&row)
    }

    pub async fn list_users(&self) -> Result<Vec<User>, StoreError> {
        let sql = format!("{} ORDER BY id", user_select());
        let rows = self.scan(sqlx::query(&sql).fetch_all(&self.pool)).await?;
        rows.iter().map(user_from_row).collect()
    }

    pub async fn user_by_id(&self, id: i64) -> Result<User, StoreError> {
        let sql = format!("{} WHERE id = $1", user_select());
        let row = self
            .point(sqlx::query(&sql).bind(id).fetch_one(&self.pool))
            .await?;
        user_from_row(&row)
    }

    /// The user and stored password for `username`.
    pub async fn user_credentials(&self, username: &str) -> Result<(User, String), StoreError> {
        let sql = format!(
            "SELECT id, username, password, {} AS created_at FROM users WHERE username = $1",
            timestamp("created_at")
        );
        let row = self
            .point(sqlx::query(&sql).bind(username).fetch_one(&self.pool))
            .await?;
        let password: String = row.try_get("password")?;
        Ok((user_from_row(&row)?, password))
    }

    /// Creates `user` when absent and gives it read and write on every table.
    /// Used once at startup so a fresh database has an administrator.
    pub async fn ensure_admin(&self, user: &NewUser) -> Result<User, StoreError> {
        let existing = match self.user_credentials(&user.username).await {
            Ok((existing, _)) => Some(existing),
            Err(StoreError::NotFound) => None,
            Err(err) => return Err(err),
        };
        let admin = match existing {
            Some(admin) => admin,
            None => self.create_user(user).await?,
        };

        self.insert_grant(&NormalizedGrant {
            user_id: admin.id,
            year: YearScope::All,
            table_id: ALL_TABLES_ID,
            stage: StageScope::All,
            subject_id: ALL_SUBJECTS_ID,
            can_read: true,
            can_write: true,
        })
        .await?;

        Ok(admin)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_input_requires_username_and_password() {
        let errors = UserInput {
            username: Some("   ".to_string()),
            password: None,
        }
        .validate()
        .expect_err("blank input should fail");

        assert_eq!(errors.get(labels::USERNAME), Some(messages::REQUIRED));
        assert_eq!(errors.get(labels::PASSWORD), Some(messages::REQUIRED));

        let user = UserInput {
            username: Some(" registrar ".to_string()),
            password: Some("secret".to_string()),
        }
        .validate()
        .expect("valid input should pass");
        assert_eq!(user.username, "registrar");
    }
}
