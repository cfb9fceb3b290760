//! Self-Service Account
//!
//! Operations a signed-in user runs on their own account: display name,
//! avatar and session management. Everything is scoped to the acting
//! session's user, so there is no target id and no self-action guard.

use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

use crate::identity::{IdentityProvider, Session, SessionInfo, StoreError, User};

/// Shortest accepted display name
pub const MIN_NAME_LEN: usize = 2;

/// Longest accepted avatar URL
pub const MAX_IMAGE_URL_LEN: usize = 2048;

#[derive(Debug, Error)]
pub enum AccountError {
    #[error("{0}")]
    Validation(String),

    #[error("Cannot revoke current session")]
    CurrentSession,

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// One of the caller's live sessions
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnSession {
    #[serde(flatten)]
    pub session: SessionInfo,
    pub current: bool,
}

pub struct AccountService {
    provider: Arc<dyn IdentityProvider>,
}

impl AccountService {
    pub fn new(provider: Arc<dyn IdentityProvider>) -> Self {
        Self { provider }
    }

    pub async fn update_name(&self, actor: &Session, name: &str) -> Result<User, AccountError> {
        let name = name.trim();
        if name.chars().count() < MIN_NAME_LEN {
            return Err(AccountError::Validation(format!(
                "Name must be at least {} characters",
                MIN_NAME_LEN
            )));
        }

        Ok(self.provider.update_user_name(&actor.user.id, name).await?)
    }

    /// `None` or an empty string clears the avatar
    pub async fn update_image(
        &self,
        actor: &Session,
        image: Option<&str>,
    ) -> Result<User, AccountError> {
        let image = image.map(str::trim).filter(|url| !url.is_empty());
        if let Some(url) = image {
            validate_image_url(url).map_err(AccountError::Validation)?;
        }

        Ok(self.provider.update_user_image(&actor.user.id, image).await?)
    }

    /// Live sessions of the caller, newest first
    pub async fn list_sessions(&self, actor: &Session) -> Result<Vec<OwnSession>, AccountError> {
        let sessions = self.provider.list_user_sessions(&actor.user.id).await?;
        Ok(sessions
            .into_iter()
            .map(|session| OwnSession {
                current: session.id == actor.id,
                session,
            })
            .collect())
    }

    /// Sign out one of the caller's other sessions
    pub async fn revoke_session(
        &self,
        actor: &Session,
        session_id: &str,
    ) -> Result<(), AccountError> {
        if session_id == actor.id {
            return Err(AccountError::CurrentSession);
        }

        if !self
            .provider
            .delete_user_session(&actor.user.id, session_id)
            .await?
        {
            return Err(AccountError::SessionNotFound(session_id.to_string()));
        }

        info!("{} revoked own session {}", actor.user.id, session_id);
        Ok(())
    }
}

fn validate_image_url(url: &str) -> Result<(), String> {
    if url.len() > MAX_IMAGE_URL_LEN {
        return Err("Image URL is too long".to_string());
    }
    let rest = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))
        .ok_or_else(|| "Image must be an http(s) URL".to_string())?;
    if rest.is_empty() || rest.starts_with('/') || url.chars().any(char::is_whitespace) {
        return Err("Image must be an http(s) URL".to_string());
    }
    Ok(())
}
