//! Admin User Management
//!
//! Account operations behind the `admin.*` procedures. Role checks happen in
//! the RPC layer; this service only enforces the self-action guard and input
//! rules, and always checks the guard before touching the store.

use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

use crate::auth::{hash_password, validate_email, validate_password};
use crate::gate::{ensure_not_self, AdminAction, Principal, SelfActionForbidden};
use crate::identity::{
    IdentityProvider, ListUsersQuery, NewUser, SortBy, SortOrder, StoreError, User, UserPage,
};
use crate::role::Role;

/// Largest page `list_users` returns
pub const MAX_PAGE_SIZE: usize = 100;

/// Shortest accepted ban reason
pub const MIN_BAN_REASON_LEN: usize = 5;

/// Longest timed ban, in seconds (100 years)
pub const MAX_BAN_SECS: i64 = 100 * 365 * 24 * 60 * 60;

#[derive(Debug, Error)]
pub enum AdminError {
    #[error(transparent)]
    SelfAction(#[from] SelfActionForbidden),

    #[error("{0}")]
    Validation(String),

    #[error("User not found: {0}")]
    NotFound(String),

    #[error("Email already registered: {0}")]
    Conflict(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for AdminError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::UserNotFound(id) => AdminError::NotFound(id),
            StoreError::EmailTaken(email) => AdminError::Conflict(email),
            other => AdminError::Store(other),
        }
    }
}

/// Ban length presets offered by the user table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BanDuration {
    #[serde(rename = "1hour")]
    OneHour,
    #[serde(rename = "1day")]
    OneDay,
    #[serde(rename = "1week")]
    OneWeek,
    #[serde(rename = "1month")]
    OneMonth,
    #[serde(rename = "permanent")]
    Permanent,
}

impl BanDuration {
    /// Seconds until expiry, `None` for permanent
    pub fn seconds(self) -> Option<i64> {
        match self {
            BanDuration::OneHour => Some(60 * 60),
            BanDuration::OneDay => Some(24 * 60 * 60),
            BanDuration::OneWeek => Some(7 * 24 * 60 * 60),
            BanDuration::OneMonth => Some(30 * 24 * 60 * 60),
            BanDuration::Permanent => None,
        }
    }
}

/// `admin.getUsers` input as sent by clients
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ListUsersInput {
    pub limit: Option<usize>,
    pub offset: Option<usize>,
    pub search_value: Option<String>,
    pub role_filter: Option<String>,
    pub banned_filter: Option<bool>,
    pub sort_by: Option<SortBy>,
    pub sort_order: Option<SortOrder>,
}

impl ListUsersInput {
    /// Apply defaults and validate filters
    pub fn into_query(self) -> Result<ListUsersQuery, AdminError> {
        let defaults = ListUsersQuery::default();

        let role = match self.role_filter.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(raw) => Some(
                raw.parse::<Role>()
                    .map_err(|e| AdminError::Validation(e.to_string()))?,
            ),
        };

        let search = self
            .search_value
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        Ok(ListUsersQuery {
            limit: self.limit.unwrap_or(defaults.limit).min(MAX_PAGE_SIZE),
            offset: self.offset.unwrap_or(defaults.offset),
            search,
            role,
            banned: self.banned_filter,
            sort_by: self.sort_by.unwrap_or_default(),
            sort_order: self.sort_order.unwrap_or_default(),
        })
    }
}

/// `admin.createUser` input
#[derive(Debug, Clone, Deserialize)]
pub struct CreateUserInput {
    pub name: String,
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub role: Role,
}

/// `admin.banUser` input
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BanInput {
    pub user_id: String,
    #[serde(default)]
    pub ban_reason: Option<String>,
    /// Seconds until the ban lifts; absent means permanent
    #[serde(default)]
    pub ban_expires_in: Option<i64>,
    /// Preset, used when `ban_expires_in` is absent
    #[serde(default)]
    pub duration: Option<BanDuration>,
}

impl BanInput {
    pub fn expires_in(&self) -> Option<i64> {
        self.ban_expires_in
            .or_else(|| self.duration.and_then(BanDuration::seconds))
    }
}

/// User management over the identity store
pub struct AdminService {
    provider: Arc<dyn IdentityProvider>,
}

impl AdminService {
    pub fn new(provider: Arc<dyn IdentityProvider>) -> Self {
        Self { provider }
    }

    pub async fn list_users(&self, input: ListUsersInput) -> Result<UserPage, AdminError> {
        let query = input.into_query()?;
        Ok(self.provider.list_users(&query).await?)
    }

    pub async fn create_user(&self, input: CreateUserInput) -> Result<User, AdminError> {
        let name = input.name.trim();
        if name.is_empty() {
            return Err(AdminError::Validation("Name is required".to_string()));
        }
        validate_email(&input.email).map_err(AdminError::Validation)?;
        validate_password(&input.password).map_err(AdminError::Validation)?;

        let password_hash =
            hash_password(&input.password).map_err(|e| AdminError::Internal(e.to_string()))?;

        let user = self
            .provider
            .create_user(NewUser {
                name: name.to_string(),
                email: input.email.trim().to_string(),
                password_hash,
                role: input.role,
                email_verified: false,
            })
            .await?;

        info!("Created user {} with role {}", user.id, user.role);
        Ok(user)
    }

    /// Create the startup admin account unless the email is already taken
    pub async fn bootstrap_admin(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Option<User>, AdminError> {
        if self.provider.find_user_by_email(email.trim()).await?.is_some() {
            return Ok(None);
        }

        let user = self
            .create_user(CreateUserInput {
                name: "Administrator".to_string(),
                email: email.to_string(),
                password: password.to_string(),
                role: Role::Admin,
            })
            .await?;
        Ok(Some(user))
    }

    pub async fn set_role<P: Principal + ?Sized>(
        &self,
        actor: &P,
        target_id: &str,
        role: Role,
    ) -> Result<User, AdminError> {
        ensure_not_self(actor, target_id, AdminAction::SetRole)?;

        let user = self.provider.update_user_role(target_id, role).await?;
        info!("{} set role of {} to {}", actor.user_id(), target_id, role);
        Ok(user)
    }

    pub async fn update_name<P: Principal + ?Sized>(
        &self,
        actor: &P,
        target_id: &str,
        name: &str,
    ) -> Result<User, AdminError> {
        ensure_not_self(actor, target_id, AdminAction::UpdateName)?;

        let name = name.trim();
        if name.is_empty() {
            return Err(AdminError::Validation("Name is required".to_string()));
        }

        Ok(self.provider.update_user_name(target_id, name).await?)
    }

    pub async fn set_password<P: Principal + ?Sized>(
        &self,
        actor: &P,
        target_id: &str,
        password: &str,
    ) -> Result<(), AdminError> {
        ensure_not_self(actor, target_id, AdminAction::SetPassword)?;
        validate_password(password).map_err(AdminError::Validation)?;

        let hash = hash_password(password).map_err(|e| AdminError::Internal(e.to_string()))?;
        self.provider.set_user_password(target_id, &hash).await?;
        info!("{} reset the password of {}", actor.user_id(), target_id);
        Ok(())
    }

    /// Ban `target_id`; `expires_in_secs = None` is permanent. Revokes the
    /// target's sessions.
    pub async fn ban<P: Principal + ?Sized>(
        &self,
        actor: &P,
        target_id: &str,
        reason: Option<&str>,
        expires_in_secs: Option<i64>,
    ) -> Result<User, AdminError> {
        ensure_not_self(actor, target_id, AdminAction::Ban)?;

        let reason = reason.map(str::trim).filter(|r| !r.is_empty());
        if let Some(reason) = reason {
            if reason.chars().count() < MIN_BAN_REASON_LEN {
                return Err(AdminError::Validation(format!(
                    "Ban reason must be at least {} characters",
                    MIN_BAN_REASON_LEN
                )));
            }
        }

        let expires_at = match expires_in_secs {
            None => None,
            Some(secs) if secs <= 0 => {
                return Err(AdminError::Validation(
                    "Ban duration must be positive".to_string(),
                ))
            }
            Some(secs) if secs > MAX_BAN_SECS => {
                return Err(AdminError::Validation("Ban duration too large".to_string()))
            }
            Some(secs) => Some(
                Duration::try_seconds(secs)
                    .and_then(|d| Utc::now().checked_add_signed(d))
                    .ok_or_else(|| AdminError::Validation("Ban duration too large".to_string()))?,
            ),
        };

        let user = self.provider.ban_user(target_id, reason, expires_at).await?;
        match expires_at {
            Some(at) => info!("{} banned {} until {}", actor.user_id(), target_id, at),
            None => info!("{} banned {} permanently", actor.user_id(), target_id),
        }
        Ok(user)
    }

    pub async fn unban<P: Principal + ?Sized>(
        &self,
        actor: &P,
        target_id: &str,
    ) -> Result<User, AdminError> {
        ensure_not_self(actor, target_id, AdminAction::Unban)?;

        let user = self.provider.unban_user(target_id).await?;
        info!("{} unbanned {}", actor.user_id(), target_id);
        Ok(user)
    }

    /// Returns how many sessions were revoked
    pub async fn revoke_sessions<P: Principal + ?Sized>(
        &self,
        actor: &P,
        target_id: &str,
    ) -> Result<usize, AdminError> {
        ensure_not_self(actor, target_id, AdminAction::RevokeSessions)?;

        let revoked = self.provider.revoke_user_sessions(target_id).await?;
        info!("{} revoked {} session(s) of {}", actor.user_id(), revoked, target_id);
        Ok(revoked)
    }

    pub async fn remove_user<P: Principal + ?Sized>(
        &self,
        actor: &P,
        target_id: &str,
    ) -> Result<(), AdminError> {
        ensure_not_self(actor, target_id, AdminAction::Remove)?;

        self.provider.remove_user(target_id).await?;
        info!("{} removed user {}", actor.user_id(), target_id);
        Ok(())
    }
}
