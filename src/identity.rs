//! Identity Provider Contract
//!
//! Users and sessions are owned by the identity store. The access core only
//! talks to it through [`IdentityProvider`], so the store can be swapped (or
//! faked in tests) without touching authorization logic.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::role::Role;

/// Identity store errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("User not found: {0}")]
    UserNotFound(String),

    #[error("Email already registered: {0}")]
    EmailTaken(String),

    #[error("Corrupt record: {0}")]
    Corrupt(String),

    #[error("Identity store unavailable: {0}")]
    Unavailable(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
}

/// User record as seen by the portal (never carries the password hash)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub name: String,
    pub email: String,
    pub email_verified: bool,
    pub image: Option<String>,
    pub role: Role,
    pub banned: bool,
    pub ban_reason: Option<String>,
    /// `None` on a banned user means the ban is permanent
    pub ban_expires: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    /// Logical ban state at `now`.
    ///
    /// Storage may still say `banned` after the expiry passed; the sweeper
    /// catches up later, so callers must use this instead of `self.banned`.
    pub fn is_actively_banned(&self, now: DateTime<Utc>) -> bool {
        if !self.banned {
            return false;
        }
        match self.ban_expires {
            None => true,
            Some(expires) => expires > now,
        }
    }
}

/// Server-side session joined with its user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub user_id: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub user: User,
}

/// Session metadata without the joined user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub id: String,
    pub user_id: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

impl From<&Session> for SessionInfo {
    fn from(session: &Session) -> Self {
        Self {
            id: session.id.clone(),
            user_id: session.user_id.clone(),
            expires_at: session.expires_at,
            created_at: session.created_at,
            ip_address: session.ip_address.clone(),
            user_agent: session.user_agent.clone(),
        }
    }
}

/// A freshly created session and the opaque token handed to the client
#[derive(Debug, Clone)]
pub struct IssuedSession {
    pub token: String,
    pub session: Session,
}

/// Input for account creation
#[derive(Debug, Clone)]
pub struct NewUser {
    pub name: String,
    pub email: String,
    pub password_hash: String,
    pub role: Role,
    pub email_verified: bool,
}

/// Sortable columns of the user table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SortBy {
    Name,
    #[default]
    CreatedAt,
    UpdatedAt,
}

/// Sort direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

/// Resolved listing query (defaults already applied)
#[derive(Debug, Clone, PartialEq)]
pub struct ListUsersQuery {
    pub limit: usize,
    pub offset: usize,
    /// Case-insensitive substring of name or email
    pub search: Option<String>,
    pub role: Option<Role>,
    pub banned: Option<bool>,
    pub sort_by: SortBy,
    pub sort_order: SortOrder,
}

impl Default for ListUsersQuery {
    fn default() -> Self {
        Self {
            limit: 10,
            offset: 0,
            search: None,
            role: None,
            banned: None,
            sort_by: SortBy::default(),
            sort_order: SortOrder::default(),
        }
    }
}

/// One page of users plus the match count before pagination
#[derive(Debug, Clone, Serialize)]
pub struct UserPage {
    pub users: Vec<User>,
    pub total: usize,
}

/// Trusted identity store
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Look up a live session by its opaque token. Expired sessions are `None`.
    async fn get_session(&self, token: &str) -> Result<Option<Session>, StoreError>;

    async fn get_user(&self, user_id: &str) -> Result<Option<User>, StoreError>;

    /// User plus stored password hash, for sign-in
    async fn find_credentials(&self, email: &str) -> Result<Option<(User, String)>, StoreError>;

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError>;

    async fn create_user(&self, new_user: NewUser) -> Result<User, StoreError>;

    async fn update_user_role(&self, user_id: &str, role: Role) -> Result<User, StoreError>;

    async fn update_user_name(&self, user_id: &str, name: &str) -> Result<User, StoreError>;

    /// Set or clear (`None`) the avatar URL
    async fn update_user_image(&self, user_id: &str, image: Option<&str>) -> Result<User, StoreError>;

    async fn set_user_password(&self, user_id: &str, password_hash: &str) -> Result<(), StoreError>;

    /// Ban a user and revoke all their sessions. `expires_at = None` is permanent.
    async fn ban_user(
        &self,
        user_id: &str,
        reason: Option<&str>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<User, StoreError>;

    async fn unban_user(&self, user_id: &str) -> Result<User, StoreError>;

    /// Delete every session of a user, returning how many were removed
    async fn revoke_user_sessions(&self, user_id: &str) -> Result<usize, StoreError>;

    async fn remove_user(&self, user_id: &str) -> Result<(), StoreError>;

    async fn list_users(&self, query: &ListUsersQuery) -> Result<UserPage, StoreError>;

    /// Clear every ban whose expiry is before `now` in one update.
    /// Returns the number of users unbanned.
    async fn clear_expired_bans(&self, now: DateTime<Utc>) -> Result<usize, StoreError>;

    async fn create_session(
        &self,
        user_id: &str,
        expires_at: DateTime<Utc>,
        ip_address: Option<&str>,
        user_agent: Option<&str>,
    ) -> Result<IssuedSession, StoreError>;

    async fn delete_session(&self, token: &str) -> Result<(), StoreError>;

    /// Live sessions of one user, newest first
    async fn list_user_sessions(&self, user_id: &str) -> Result<Vec<SessionInfo>, StoreError>;

    /// Delete one session by id if it belongs to `user_id`.
    /// Returns whether a session was removed.
    async fn delete_user_session(&self, user_id: &str, session_id: &str) -> Result<bool, StoreError>;
}
