use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};

use crate::common::UserId;

/// Encrypted OAuth tokens stored on a `users` row.
///
/// Tokens stay in their `hex(iv)||hex(tag)||hex(ct)` form here; decryption
/// happens in the token manager and the plaintext is never written back.
#[derive(Debug, Clone, FromRow)]
pub struct Credential {
    pub user_id: UserId,
    pub access_token_encrypted: Option<String>,
    pub refresh_token_encrypted: Option<String>,
    pub token_expires_at: Option<DateTime<Utc>>,
}

impl Credential {
    pub async fn find_by_user(user_id: UserId, pool: &PgPool) -> Result<Option<Self>> {
        sqlx::query_as::<_, Self>(
            "SELECT id AS user_id, access_token_encrypted, refresh_token_encrypted, token_expires_at
             FROM users WHERE id = $1",
        )
        .bind(user_id)
        .fetch_optional(pool)
        .await
        .map_err(Into::into)
    }

    /// Write encrypted tokens, creating the user row if needed.
    ///
    /// A `None` refresh token keeps whatever refresh token is already stored.
    pub async fn store_tokens(
        user_id: UserId,
        access_token_encrypted: &str,
        refresh_token_encrypted: Option<&str>,
        expires_at: Option<DateTime<Utc>>,
        pool: &PgPool,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO users (id, access_token_encrypted, refresh_token_encrypted, token_expires_at)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (id) DO UPDATE SET
                 access_token_encrypted = EXCLUDED.access_token_encrypted,
                 refresh_token_encrypted = COALESCE(EXCLUDED.refresh_token_encrypted, users.refresh_token_encrypted),
                 token_expires_at = EXCLUDED.token_expires_at,
                 updated_at = NOW()",
        )
        .bind(user_id)
        .bind(access_token_encrypted)
        .bind(refresh_token_encrypted)
        .bind(expires_at)
        .execute(pool)
        .await?;
        Ok(())
    }
}
