use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::{db::error::DatabaseError, models::{Account, Provider}, traits::Repository};

pub struct AccountRepository {
    pool: PgPool,
}

impl AccountRepository {
    pub fn new(pool: &PgPool) -> Self {
        Self { pool: pool.clone() }
    }

    /// `GetAccountByProviderID`: looks a linked account up by the provider's
    /// own user id, the identifier OAuth callbacks carry.
    pub async fn find_by_provider_user_id(
        &self,
        provider: Provider,
        provider_user_id: &str,
    ) -> Result<Option<Account>, DatabaseError> {
        let account = sqlx::query_as::<_, Account>(
            r#"
            SELECT account_id, user_id, provider, provider_user_id, email, name, avatar_url, created_at
            FROM accounts
            WHERE provider = $1 AND provider_user_id = $2
            "#,
        )
        .bind(provider)
        .bind(provider_user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(account)
    }

    pub async fn find_by_user_id(&self, user_id: &str) -> Result<Vec<Account>, DatabaseError> {
        let accounts = sqlx::query_as::<_, Account>(
            r#"
            SELECT account_id, user_id, provider, provider_user_id, email, name, avatar_url, created_at
            FROM accounts
            WHERE user_id = $1
            ORDER BY created_at
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(accounts)
    }

    /// `AddAccountDetails`: links a freshly-authorized provider account to a
    /// user, seeding empty `sync_state` in the same transaction.
    pub async fn add_account_details(&self, account: Account) -> Result<Account, DatabaseError> {
        let mut tx = self.pool.begin().await?;

        let created = sqlx::query_as::<_, Account>(
            r#"
            INSERT INTO accounts (account_id, user_id, provider, provider_user_id, email, name, avatar_url)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING account_id, user_id, provider, provider_user_id, email, name, avatar_url, created_at
            "#,
        )
        .bind(account.account_id)
        .bind(&account.user_id)
        .bind(account.provider)
        .bind(&account.provider_user_id)
        .bind(&account.email)
        .bind(&account.name)
        .bind(&account.avatar_url)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                DatabaseError::ConstraintViolation(
                    "account already linked for this user and provider".to_string(),
                )
            }
            _ => DatabaseError::from(e),
        })?;

        sqlx::query("INSERT INTO sync_state (account_id) VALUES ($1)")
            .bind(created.account_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(created)
    }
}

#[async_trait]
impl Repository<Account, Uuid> for AccountRepository {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Account>, DatabaseError> {
        let account = sqlx::query_as::<_, Account>(
            r#"
            SELECT account_id, user_id, provider, provider_user_id, email, name, avatar_url, created_at
            FROM accounts
            WHERE account_id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(account)
    }

    async fn find_all(&self, limit: i64, offset: i64) -> Result<Vec<Account>, DatabaseError> {
        let accounts = sqlx::query_as::<_, Account>(
            r#"
            SELECT account_id, user_id, provider, provider_user_id, email, name, avatar_url, created_at
            FROM accounts
            ORDER BY created_at DESC
            LIMIT $1 OFFSET $2
            "#,
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        Ok(accounts)
    }

    async fn create(&self, account: Account) -> Result<Account, DatabaseError> {
        self.add_account_details(account).await
    }

    async fn update(&self, id: Uuid, account: Account) -> Result<Option<Account>, DatabaseError> {
        let updated = sqlx::query_as::<_, Account>(
            r#"
            UPDATE accounts
            SET email = $2, name = $3, avatar_url = $4
            WHERE account_id = $1
            RETURNING account_id, user_id, provider, provider_user_id, email, name, avatar_url, created_at
            "#,
        )
        .bind(id)
        .bind(&account.email)
        .bind(&account.name)
        .bind(&account.avatar_url)
        .fetch_optional(&self.pool)
        .await?;

        Ok(updated)
    }

    async fn delete(&self, id: Uuid) -> Result<bool, DatabaseError> {
        let result = sqlx::query("DELETE FROM accounts WHERE account_id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}
