//! Authorization Gate
//!
//! The single place where role comparisons happen. The edge page check and the
//! server procedure check are both callers of [`authorize`]; they only differ
//! in where their [`Principal`] comes from (signed cookie cache vs. the store).

use serde::Serialize;
use thiserror::Error;

use crate::identity::{Session, User};
use crate::role::Role;

/// Anything that carries an identity and a role
pub trait Principal {
    fn user_id(&self) -> &str;
    fn role(&self) -> Role;
}

impl Principal for User {
    fn user_id(&self) -> &str {
        &self.id
    }

    fn role(&self) -> Role {
        self.role
    }
}

impl Principal for Session {
    fn user_id(&self) -> &str {
        &self.user.id
    }

    fn role(&self) -> Role {
        self.user.role
    }
}

/// Why access was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DenyReason {
    /// No resolvable session
    Unauthenticated,
    /// Session present but role below the required minimum
    InsufficientRole,
}

/// Outcome of an authorization check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny(DenyReason),
}

impl Decision {
    pub fn is_allowed(self) -> bool {
        matches!(self, Decision::Allow)
    }
}

/// Exact role match
pub fn has_role<P: Principal + ?Sized>(principal: &P, role: Role) -> bool {
    principal.role() == role
}

/// `rank(principal.role) >= rank(min_role)`
pub fn has_minimum_role<P: Principal + ?Sized>(principal: &P, min_role: Role) -> bool {
    principal.role().satisfies(min_role)
}

/// Decide access for an optional principal
pub fn authorize<P: Principal + ?Sized>(principal: Option<&P>, required: Role) -> Decision {
    match principal {
        None => Decision::Deny(DenyReason::Unauthenticated),
        Some(p) if has_minimum_role(p, required) => Decision::Allow,
        Some(_) => Decision::Deny(DenyReason::InsufficientRole),
    }
}

/// Administrative actions an actor may never apply to their own account
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdminAction {
    SetRole,
    SetPassword,
    UpdateName,
    Ban,
    Unban,
    RevokeSessions,
    Remove,
}

impl AdminAction {
    /// User-facing rejection message
    pub fn self_action_message(self) -> &'static str {
        match self {
            AdminAction::SetRole => "You cannot change your own role",
            AdminAction::SetPassword => "You cannot set your own password here",
            AdminAction::UpdateName => "You cannot update your own name",
            AdminAction::Ban => "You cannot ban yourself",
            AdminAction::Unban => "You cannot unban yourself",
            AdminAction::RevokeSessions => "You cannot revoke your own sessions",
            AdminAction::Remove => "You cannot delete your own account",
        }
    }
}

/// Actor targeted their own account
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{}", .action.self_action_message())]
pub struct SelfActionForbidden {
    pub action: AdminAction,
}

/// Refuse `action` when actor and target are the same account
pub fn ensure_not_self<P: Principal + ?Sized>(
    actor: &P,
    target_id: &str,
    action: AdminAction,
) -> Result<(), SelfActionForbidden> {
    if actor.user_id() == target_id {
        return Err(SelfActionForbidden { action });
    }
    Ok(())
}

/// Identity view for server-rendered pages
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CurrentUser {
    pub user: Option<User>,
    pub role: Option<Role>,
}

impl CurrentUser {
    pub fn from_session(session: Option<&Session>) -> Self {
        match session {
            Some(s) => Self {
                user: Some(s.user.clone()),
                role: Some(s.user.role),
            },
            None => Self::default(),
        }
    }

    /// False when signed out
    pub fn has_minimum_role(&self, min_role: Role) -> bool {
        self.role.is_some_and(|r| r.satisfies(min_role))
    }

    pub fn has_role(&self, role: Role) -> bool {
        self.role == Some(role)
    }
}
