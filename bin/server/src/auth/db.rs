//! Postgres-backed account and session stores.

use argon2::{
    Argon2,
    password_hash::{PasswordHasher, SaltString, rand_core::OsRng},
};
use async_trait::async_trait;
use casdoor_sso_core::{AccountId, StoreError};
use casdoor_sso_relying_party::{
    AccountStore, GeneratedPassword, HostSession, LocalAccount, NewAccount, Role, SessionStore,
};
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use std::str::FromStr;
use tracing::instrument;
use ulid::Ulid;

/// Row type for account queries.
#[derive(FromRow)]
struct AccountRow {
    id: String,
    username: String,
    email: Option<String>,
    display_name: String,
    roles: serde_json::Value,
    created_at: DateTime<Utc>,
}

impl AccountRow {
    fn try_into_account(self) -> Result<LocalAccount, StoreError> {
        let id = AccountId::from_str(&self.id).map_err(|e| StoreError::Backend {
            details: format!("invalid account id '{}': {}", self.id, e),
        })?;
        let roles: Vec<String> =
            serde_json::from_value(self.roles).map_err(|e| StoreError::Backend {
                details: format!("invalid roles for account '{}': {}", self.id, e),
            })?;
        Ok(LocalAccount::with_all_fields(
            id,
            self.username,
            self.email,
            self.display_name,
            roles.iter().filter_map(|r| Role::parse(r)).collect(),
            self.created_at,
        ))
    }
}

/// Row type for session queries.
#[derive(FromRow)]
struct SessionRow {
    id: String,
    account_id: String,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

impl SessionRow {
    fn try_into_session(self) -> Result<HostSession, StoreError> {
        let account_id = AccountId::from_str(&self.account_id).map_err(|e| StoreError::Backend {
            details: format!("invalid account id '{}': {}", self.account_id, e),
        })?;
        Ok(HostSession::with_all_fields(
            self.id,
            account_id,
            self.created_at,
            self.expires_at,
        ))
    }
}

fn backend(e: sqlx::Error) -> StoreError {
    StoreError::Backend {
        details: e.to_string(),
    }
}

fn hash_password(password: &GeneratedPassword) -> Result<String, StoreError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.expose().as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| StoreError::Backend {
            details: format!("password hashing failed: {e}"),
        })
}

/// Account store over the `accounts` table.
#[derive(Clone)]
pub struct PgAccountStore {
    pool: PgPool,
}

impl PgAccountStore {
    /// Creates a new account store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn find_one(
        &self,
        query: &'static str,
        value: String,
    ) -> casdoor_sso_core::Result<Option<LocalAccount>, StoreError> {
        let row: Option<AccountRow> = sqlx::query_as(query)
            .bind(value)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;

        match row {
            Some(r) => Ok(Some(r.try_into_account()?)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl AccountStore for PgAccountStore {
    async fn find_by_id(
        &self,
        id: AccountId,
    ) -> casdoor_sso_core::Result<Option<LocalAccount>, StoreError> {
        self.find_one(
            r#"
            SELECT id, username, email, display_name, roles, created_at
            FROM accounts
            WHERE id = $1
            "#,
            id.to_string(),
        )
        .await
    }

    #[instrument(skip(self))]
    async fn find_by_username(
        &self,
        username: &str,
    ) -> casdoor_sso_core::Result<Option<LocalAccount>, StoreError> {
        self.find_one(
            r#"
            SELECT id, username, email, display_name, roles, created_at
            FROM accounts
            WHERE LOWER(username) = LOWER($1)
            "#,
            username.to_string(),
        )
        .await
    }

    #[instrument(skip(self))]
    async fn find_by_email(
        &self,
        email: &str,
    ) -> casdoor_sso_core::Result<Option<LocalAccount>, StoreError> {
        self.find_one(
            r#"
            SELECT id, username, email, display_name, roles, created_at
            FROM accounts
            WHERE LOWER(email) = LOWER($1)
            "#,
            email.to_string(),
        )
        .await
    }

    #[instrument(skip(self, account), fields(username = %account.username))]
    async fn create(
        &self,
        account: NewAccount,
    ) -> casdoor_sso_core::Result<LocalAccount, StoreError> {
        let password_hash = hash_password(&account.password)?;
        let created = LocalAccount::with_all_fields(
            AccountId::new(),
            account.username,
            account.email,
            account.display_name,
            vec![account.role],
            Utc::now(),
        );
        let roles = serde_json::json!([account.role.as_str()]);

        sqlx::query(
            r#"
            INSERT INTO accounts (id, username, email, display_name, password_hash, roles, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(created.id().to_string())
        .bind(created.username())
        .bind(created.email())
        .bind(created.display_name())
        .bind(password_hash)
        .bind(roles)
        .bind(created.created_at())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(db) = &e
                && db.is_unique_violation()
            {
                return if db.constraint() == Some("accounts_email_key") {
                    StoreError::Conflict {
                        field: "email".to_string(),
                        value: created.email().unwrap_or_default().to_string(),
                    }
                } else {
                    StoreError::Conflict {
                        field: "username".to_string(),
                        value: created.username().to_string(),
                    }
                };
            }
            backend(e)
        })?;

        Ok(created)
    }
}

/// Session store over the `sessions` table.
#[derive(Clone)]
pub struct PgSessionStore {
    pool: PgPool,
}

impl PgSessionStore {
    /// Creates a new session store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Deletes expired sessions.
    pub async fn delete_expired(&self) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            r#"
            DELETE FROM sessions
            WHERE expires_at < NOW()
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}

#[async_trait]
impl SessionStore for PgSessionStore {
    async fn start(
        &self,
        account_id: AccountId,
        expires_at: DateTime<Utc>,
    ) -> casdoor_sso_core::Result<HostSession, StoreError> {
        let session = HostSession::with_all_fields(
            Ulid::new().to_string(),
            account_id,
            Utc::now(),
            expires_at,
        );

        sqlx::query(
            r#"
            INSERT INTO sessions (id, account_id, created_at, expires_at)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(session.token())
        .bind(account_id.to_string())
        .bind(session.created_at())
        .bind(session.expires_at())
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        Ok(session)
    }

    async fn resolve(
        &self,
        token: &str,
    ) -> casdoor_sso_core::Result<Option<HostSession>, StoreError> {
        let row: Option<SessionRow> = sqlx::query_as(
            r#"
            SELECT id, account_id, created_at, expires_at
            FROM sessions
            WHERE id = $1
            "#,
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        match row {
            Some(r) => Ok(Some(r.try_into_session()?)),
            None => Ok(None),
        }
    }

    async fn end(&self, token: &str) -> casdoor_sso_core::Result<(), StoreError> {
        sqlx::query(
            r#"
            DELETE FROM sessions
            WHERE id = $1
            "#,
        )
        .bind(token)
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        Ok(())
    }
}
