//! Test doubles for the identity provider

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::identity::{
    IdentityProvider, IssuedSession, ListUsersQuery, NewUser, Session, SessionInfo, StoreError,
    User, UserPage,
};
use crate::role::Role;

fn down() -> StoreError {
    StoreError::Unavailable("connection refused".to_string())
}

/// Provider whose every call fails, as if the store were unreachable
pub struct FailingProvider;

#[async_trait]
impl IdentityProvider for FailingProvider {
    async fn get_session(&self, _token: &str) -> Result<Option<Session>, StoreError> {
        Err(down())
    }

    async fn get_user(&self, _user_id: &str) -> Result<Option<User>, StoreError> {
        Err(down())
    }

    async fn find_credentials(&self, _email: &str) -> Result<Option<(User, String)>, StoreError> {
        Err(down())
    }

    async fn find_user_by_email(&self, _email: &str) -> Result<Option<User>, StoreError> {
        Err(down())
    }

    async fn create_user(&self, _new_user: NewUser) -> Result<User, StoreError> {
        Err(down())
    }

    async fn update_user_role(&self, _user_id: &str, _role: Role) -> Result<User, StoreError> {
        Err(down())
    }

    async fn update_user_name(&self, _user_id: &str, _name: &str) -> Result<User, StoreError> {
        Err(down())
    }

    async fn update_user_image(&self, _user_id: &str, _image: Option<&str>) -> Result<User, StoreError> {
        Err(down())
    }

    async fn set_user_password(&self, _user_id: &str, _hash: &str) -> Result<(), StoreError> {
        Err(down())
    }

    async fn ban_user(
        &self,
        _user_id: &str,
        _reason: Option<&str>,
        _expires_at: Option<DateTime<Utc>>,
    ) -> Result<User, StoreError> {
        Err(down())
    }

    async fn unban_user(&self, _user_id: &str) -> Result<User, StoreError> {
        Err(down())
    }

    async fn revoke_user_sessions(&self, _user_id: &str) -> Result<usize, StoreError> {
        Err(down())
    }

    async fn remove_user(&self, _user_id: &str) -> Result<(), StoreError> {
        Err(down())
    }

    async fn list_users(&self, _query: &ListUsersQuery) -> Result<UserPage, StoreError> {
        Err(down())
    }

    async fn clear_expired_bans(&self, _now: DateTime<Utc>) -> Result<usize, StoreError> {
        Err(down())
    }

    async fn create_session(
        &self,
        _user_id: &str,
        _expires_at: DateTime<Utc>,
        _ip_address: Option<&str>,
        _user_agent: Option<&str>,
    ) -> Result<IssuedSession, StoreError> {
        Err(down())
    }

    async fn delete_session(&self, _token: &str) -> Result<(), StoreError> {
        Err(down())
    }

    async fn list_user_sessions(&self, _user_id: &str) -> Result<Vec<SessionInfo>, StoreError> {
        Err(down())
    }

    async fn delete_user_session(&self, _user_id: &str, _session_id: &str) -> Result<bool, StoreError> {
        Err(down())
    }
}

/// Wraps a provider and counts session lookups
pub struct CountingProvider {
    inner: Arc<dyn IdentityProvider>,
    pub session_lookups: AtomicUsize,
}

impl CountingProvider {
    pub fn new(inner: Arc<dyn IdentityProvider>) -> Self {
        Self {
            inner,
            session_lookups: AtomicUsize::new(0),
        }
    }

    pub fn lookups(&self) -> usize {
        self.session_lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl IdentityProvider for CountingProvider {
    async fn get_session(&self, token: &str) -> Result<Option<Session>, StoreError> {
        self.session_lookups.fetch_add(1, Ordering::SeqCst);
        self.inner.get_session(token).await
    }

    async fn get_user(&self, user_id: &str) -> Result<Option<User>, StoreError> {
        self.inner.get_user(user_id).await
    }

    async fn find_credentials(&self, email: &str) -> Result<Option<(User, String)>, StoreError> {
        self.inner.find_credentials(email).await
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        self.inner.find_user_by_email(email).await
    }

    async fn create_user(&self, new_user: NewUser) -> Result<User, StoreError> {
        self.inner.create_user(new_user).await
    }

    async fn update_user_role(&self, user_id: &str, role: Role) -> Result<User, StoreError> {
        self.inner.update_user_role(user_id, role).await
    }

    async fn update_user_name(&self, user_id: &str, name: &str) -> Result<User, StoreError> {
        self.inner.update_user_name(user_id, name).await
    }

    async fn update_user_image(&self, user_id: &str, image: Option<&str>) -> Result<User, StoreError> {
        self.inner.update_user_image(user_id, image).await
    }

    async fn set_user_password(&self, user_id: &str, hash: &str) -> Result<(), StoreError> {
        self.inner.set_user_password(user_id, hash).await
    }

    async fn ban_user(
        &self,
        user_id: &str,
        reason: Option<&str>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<User, StoreError> {
        self.inner.ban_user(user_id, reason, expires_at).await
    }

    async fn unban_user(&self, user_id: &str) -> Result<User, StoreError> {
        self.inner.unban_user(user_id).await
    }

    async fn revoke_user_sessions(&self, user_id: &str) -> Result<usize, StoreError> {
        self.inner.revoke_user_sessions(user_id).await
    }

    async fn remove_user(&self, user_id: &str) -> Result<(), StoreError> {
        self.inner.remove_user(user_id).await
    }

    async fn list_users(&self, query: &ListUsersQuery) -> Result<UserPage, StoreError> {
        self.inner.list_users(query).await
    }

    async fn clear_expired_bans(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        self.inner.clear_expired_bans(now).await
    }

    async fn create_session(
        &self,
        user_id: &str,
        expires_at: DateTime<Utc>,
        ip_address: Option<&str>,
        user_agent: Option<&str>,
    ) -> Result<IssuedSession, StoreError> {
        self.inner
            .create_session(user_id, expires_at, ip_address, user_agent)
            .await
    }

    async fn delete_session(&self, token: &str) -> Result<(), StoreError> {
        self.inner.delete_session(token).await
    }

    async fn list_user_sessions(&self, user_id: &str) -> Result<Vec<SessionInfo>, StoreError> {
        self.inner.list_user_sessions(user_id).await
    }

    async fn delete_user_session(&self, user_id: &str, session_id: &str) -> Result<bool, StoreError> {
        self.inner.delete_user_session(user_id, session_id).await
    }
}
