//! Local account resolution.
//!
//! Maps Casdoor identities onto host accounts: by username, then by email,
//! and finally by creating a new account unless the login-only policy
//! forbids it.

use crate::claims::IdentityClaims;
use crate::error::AuthFlowError;
use async_trait::async_trait;
use casdoor_sso_core::{AccountId, StoreError};
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{error, info, instrument};

/// Length of the random password given to provisioned accounts.
pub const GENERATED_PASSWORD_LEN: usize = 24;

const PASSWORD_ALPHABET: &[u8] =
    b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789!@#$%^&*()";

/// Role granted to a local account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Default role for provisioned accounts.
    Subscriber,
    /// Elevated role for Casdoor global administrators.
    Administrator,
}

impl Role {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Subscriber => "subscriber",
            Self::Administrator => "administrator",
        }
    }

    /// Parses a stored role name. Unknown names yield `None`.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "subscriber" => Some(Self::Subscriber),
            "administrator" => Some(Self::Administrator),
            _ => None,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A host user account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalAccount {
    id: AccountId,
    username: String,
    email: Option<String>,
    display_name: String,
    roles: Vec<Role>,
    created_at: DateTime<Utc>,
}

impl LocalAccount {
    /// Reconstitutes an account from storage.
    #[must_use]
    pub fn with_all_fields(
        id: AccountId,
        username: String,
        email: Option<String>,
        display_name: String,
        roles: Vec<Role>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            username,
            email,
            display_name,
            roles,
            created_at,
        }
    }

    #[must_use]
    pub fn id(&self) -> AccountId {
        self.id
    }

    #[must_use]
    pub fn username(&self) -> &str {
        &self.username
    }

    #[must_use]
    pub fn email(&self) -> Option<&str> {
        self.email.as_deref()
    }

    #[must_use]
    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    #[must_use]
    pub fn roles(&self) -> &[Role] {
        &self.roles
    }

    #[must_use]
    pub fn has_role(&self, role: Role) -> bool {
        self.roles.contains(&role)
    }

    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

/// A random password for a provisioned account.
///
/// The value never appears in `Debug` output; stores are expected to hash it.
#[derive(Clone, PartialEq, Eq)]
pub struct GeneratedPassword(String);

impl GeneratedPassword {
    /// Generates a new password from a cryptographically secure RNG.
    #[must_use]
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        let password = (0..GENERATED_PASSWORD_LEN)
            .map(|_| char::from(PASSWORD_ALPHABET[rng.gen_range(0..PASSWORD_ALPHABET.len())]))
            .collect();
        Self(password)
    }

    /// Returns the plaintext, for hashing only.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for GeneratedPassword {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("GeneratedPassword(<redacted>)")
    }
}

/// Fields for an account about to be created.
#[derive(Debug, Clone)]
pub struct NewAccount {
    pub username: String,
    pub email: Option<String>,
    pub display_name: String,
    pub password: GeneratedPassword,
    pub role: Role,
}

impl NewAccount {
    /// Builds the account fields for a Casdoor identity.
    ///
    /// The display name falls back to the username and global
    /// administrators receive the administrator role.
    #[must_use]
    pub fn from_claims(claims: &IdentityClaims) -> Self {
        Self {
            username: claims.subject().to_string(),
            email: claims.email().map(str::to_string),
            display_name: claims
                .display_name()
                .unwrap_or(claims.subject())
                .to_string(),
            password: GeneratedPassword::generate(),
            role: if claims.is_global_admin() {
                Role::Administrator
            } else {
                Role::Subscriber
            },
        }
    }
}

/// Host-owned account storage.
#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn find_by_id(
        &self,
        id: AccountId,
    ) -> casdoor_sso_core::Result<Option<LocalAccount>, StoreError>;

    async fn find_by_username(
        &self,
        username: &str,
    ) -> casdoor_sso_core::Result<Option<LocalAccount>, StoreError>;

    async fn find_by_email(
        &self,
        email: &str,
    ) -> casdoor_sso_core::Result<Option<LocalAccount>, StoreError>;

    /// Creates an account. Fails with `StoreError::Conflict` when the
    /// username or email is taken.
    async fn create(
        &self,
        account: NewAccount,
    ) -> casdoor_sso_core::Result<LocalAccount, StoreError>;
}

/// Result of resolving an identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// An existing account matched by username or email.
    Existing(LocalAccount),
    /// A new account was provisioned.
    Created(LocalAccount),
}

impl Resolution {
    #[must_use]
    pub fn account(&self) -> &LocalAccount {
        match self {
            Self::Existing(account) | Self::Created(account) => account,
        }
    }

    #[must_use]
    pub fn into_account(self) -> LocalAccount {
        match self {
            Self::Existing(account) | Self::Created(account) => account,
        }
    }

    #[must_use]
    pub fn was_created(&self) -> bool {
        matches!(self, Self::Created(_))
    }
}

/// Maps identity claims to a local account.
#[derive(Clone)]
pub struct AccountResolver {
    store: Arc<dyn AccountStore>,
}

impl AccountResolver {
    #[must_use]
    pub fn new(store: Arc<dyn AccountStore>) -> Self {
        Self { store }
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn AccountStore> {
        &self.store
    }

    /// Finds or provisions the account for `claims`.
    ///
    /// # Errors
    ///
    /// - `AccessDenied` when nothing matches and `login_only` is set
    /// - `AccountLookup` when the store fails during lookup
    /// - `AccountCreation` when the store rejects the new account
    #[instrument(skip(self, claims), fields(subject = %claims.subject()))]
    pub async fn resolve(
        &self,
        claims: &IdentityClaims,
        login_only: bool,
    ) -> Result<Resolution, AuthFlowError> {
        if let Some(account) = self.lookup(claims).await? {
            return Ok(Resolution::Existing(account));
        }

        if login_only {
            info!("No linked account and login-only is enabled");
            return Err(AuthFlowError::AccessDenied {
                subject: claims.subject().to_string(),
            });
        }

        let new_account = NewAccount::from_claims(claims);
        let role = new_account.role;
        let account = self.store.create(new_account).await.map_err(|report| {
            error!(error = %report, "Failed to create local account");
            AuthFlowError::AccountCreation {
                username: claims.subject().to_string(),
                reason: report.to_string(),
            }
        })?;

        info!(account_id = %account.id(), %role, "Provisioned local account");
        Ok(Resolution::Created(account))
    }

    async fn lookup(&self, claims: &IdentityClaims) -> Result<Option<LocalAccount>, AuthFlowError> {
        let by_username = self
            .store
            .find_by_username(claims.subject())
            .await
            .map_err(lookup_failed)?;
        if by_username.is_some() {
            return Ok(by_username);
        }

        match claims.email() {
            Some(email) => self.store.find_by_email(email).await.map_err(lookup_failed),
            None => Ok(None),
        }
    }
}

fn lookup_failed(report: rootcause::Report<StoreError>) -> AuthFlowError {
    error!(error = %report, "Account lookup failed");
    AuthFlowError::AccountLookup {
        reason: report.to_string(),
    }
}
