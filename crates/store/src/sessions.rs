use std::time::Duration;

use crate::{Store, StoreError, User};

impl Store {
    /// Stores a session keyed by the hash of its token.
    pub async fn create_session(
        &self,
        token_hash: &str,
        user_id: i64,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        self.point(
            sqlx::query(
                "INSERT INTO sessions (token_hash, user_id, expires_at) VALUES ($1, $2, now() + make_interval(secs => $3))",
            )
            .bind(token_hash)
            .bind(user_id)
            .bind(ttl.as_secs_f64())
            .execute(&self.pool),
        )
        .await?;
        Ok(())
    }

    /// Resolves an unexpired session to its user. Unknown or expired sessions
    /// are not-found.
    pub async fn session_user(&self, token_hash: &str) -> Result<User, StoreError> {
        let user_id: i64 = self
            .point(
                sqlx::query_scalar(
                    "SELECT user_id FROM sessions WHERE token_hash = $1 AND expires_at > now()",
                )
                .bind(token_hash)
                .fetch_one(&self.pool),
            )
            .await?;
        self.user_by_id(user_id).await
    }

    pub async fn delete_session(&self, token_hash: &str) -> Result<(), StoreError> {
        self.point(
            sqlx::query("DELETE FROM sessions WHERE token_hash = $1")
                .bind(token_hash)
                .execute(&self.pool),
        )
        .await?;
        Ok(())
    }

    pub async fn purge_expired_sessions(&self) -> Result<u64, StoreError> {
        let result = self
            .scan(sqlx::query("DELETE FROM sessions WHERE expires_at <= now()").execute(&self.pool))
            .await?;
        Ok(result.rows_affected())
    }
}
