//! In-memory account and session stores for tests and local development.

use crate::account::{AccountStore, LocalAccount, NewAccount};
use crate::session::{HostSession, SessionStore};
use async_trait::async_trait;
use casdoor_sso_core::{AccountId, StoreError};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use ulid::Ulid;

/// Account store backed by a map. Usernames and emails are unique,
/// compared case-insensitively.
#[derive(Debug, Default)]
pub struct MemoryAccountStore {
    accounts: RwLock<HashMap<AccountId, LocalAccount>>,
}

impl MemoryAccountStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.accounts.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.accounts.read().await.is_empty()
    }
}

fn same(a: &str, b: &str) -> bool {
    a.eq_ignore_ascii_case(b)
}

#[async_trait]
impl AccountStore for MemoryAccountStore {
    async fn find_by_id(
        &self,
        id: AccountId,
    ) -> casdoor_sso_core::Result<Option<LocalAccount>, StoreError> {
        Ok(self.accounts.read().await.get(&id).cloned())
    }

    async fn find_by_username(
        &self,
        username: &str,
    ) -> casdoor_sso_core::Result<Option<LocalAccount>, StoreError> {
        let accounts = self.accounts.read().await;
        Ok(accounts
            .values()
            .find(|a| same(a.username(), username))
            .cloned())
    }

    async fn find_by_email(
        &self,
        email: &str,
    ) -> casdoor_sso_core::Result<Option<LocalAccount>, StoreError> {
        let accounts = self.accounts.read().await;
        Ok(accounts
            .values()
            .find(|a| a.email().is_some_and(|e| same(e, email)))
            .cloned())
    }

    async fn create(
        &self,
        account: NewAccount,
    ) -> casdoor_sso_core::Result<LocalAccount, StoreError> {
        let mut accounts = self.accounts.write().await;

        if accounts.values().any(|a| same(a.username(), &account.username)) {
            return Err(StoreError::Conflict {
                field: "username".to_string(),
                value: account.username,
            }
            .into());
        }
        if let Some(email) = account.email.as_deref()
            && accounts
                .values()
                .any(|a| a.email().is_some_and(|e| same(e, email)))
        {
            return Err(StoreError::Conflict {
                field: "email".to_string(),
                value: email.to_string(),
            }
            .into());
        }

        let created = LocalAccount::with_all_fields(
            AccountId::new(),
            account.username,
            account.email,
            account.display_name,
            vec![account.role],
            Utc::now(),
        );
        accounts.insert(created.id(), created.clone());
        Ok(created)
    }
}

/// Session store backed by a map keyed by session token.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    sessions: RwLock<HashMap<String, HostSession>>,
}

impl MemorySessionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn start(
        &self,
        account_id: AccountId,
        expires_at: DateTime<Utc>,
    ) -> casdoor_sso_core::Result<HostSession, StoreError> {
        let session =
            HostSession::with_all_fields(Ulid::new().to_string(), account_id, Utc::now(), expires_at);
        self.sessions
            .write()
            .await
            .insert(session.token().to_string(), session.clone());
        Ok(session)
    }

    async fn resolve(
        &self,
        token: &str,
    ) -> casdoor_sso_core::Result<Option<HostSession>, StoreError> {
        Ok(self.sessions.read().await.get(token).cloned())
    }

    async fn end(&self, token: &str) -> casdoor_sso_core::Result<(), StoreError> {
        self.sessions.write().await.remove(token);
        Ok(())
    }
}
