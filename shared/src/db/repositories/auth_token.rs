use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{db::error::DatabaseError, models::AuthToken};

/// 1:1 with `accounts`, so this repository is keyed by `account_id` rather
/// than implementing the generic `Repository` trait.
pub struct AuthTokenRepository {
    pool: PgPool,
}

impl AuthTokenRepository {
    pub fn new(pool: &PgPool) -> Self {
        Self { pool: pool.clone() }
    }

    /// `GetAuthTokens(user_id, account_id)`. Tokens are always stored as
    /// ciphertext-hex; callers decrypt via the vault immediately before use.
    /// Scoped through `accounts` so a caller can never read another user's
    /// tokens by guessing an account_id.
    pub async fn get_auth_tokens(
        &self,
        user_id: &str,
        account_id: Uuid,
    ) -> Result<Option<AuthToken>, DatabaseError> {
        let token = sqlx::query_as::<_, AuthToken>(
            r#"
            SELECT auth_tokens.account_id, auth_tokens.access_token, auth_tokens.refresh_token,
                   auth_tokens.token_type, auth_tokens.expiry
            FROM auth_tokens
            JOIN accounts ON accounts.account_id = auth_tokens.account_id
            WHERE auth_tokens.account_id = $1 AND accounts.user_id = $2
            "#,
        )
        .bind(account_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(token)
    }

    /// `UpdateAuthTokens`: stores the full OAuth exchange result, used once
    /// right after the authorization-code exchange.
    pub async fn upsert_auth_tokens(&self, token: &AuthToken) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            INSERT INTO auth_tokens (account_id, access_token, refresh_token, token_type, expiry)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (account_id) DO UPDATE SET
                access_token = EXCLUDED.access_token,
                refresh_token = EXCLUDED.refresh_token,
                token_type = EXCLUDED.token_type,
                expiry = EXCLUDED.expiry
            "#,
        )
        .bind(token.account_id)
        .bind(&token.access_token)
        .bind(&token.refresh_token)
        .bind(&token.token_type)
        .bind(token.expiry)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// `UpdateRenewedAuthToken`: a provider token refresh only ever rotates
    /// the access token and expiry; the refresh token is left untouched
    /// unless the provider issued a new one.
    pub async fn update_renewed_auth_token(
        &self,
        account_id: Uuid,
        access_token: &str,
        expiry: OffsetDateTime,
        new_refresh_token: Option<&str>,
    ) -> Result<(), DatabaseError> {
        let result = sqlx::query(
            r#"
            UPDATE auth_tokens
            SET access_token = $2,
                expiry = $3,
                refresh_token = COALESCE($4, refresh_token)
            WHERE account_id = $1
            "#,
        )
        .bind(account_id)
        .bind(access_token)
        .bind(expiry)
        .bind(new_refresh_token)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::NotFound);
        }

        Ok(())
    }
}
