//! Route/Procedure Policy Table
//!
//! Static mapping from a protected surface (page route or RPC procedure) to
//! the minimum role it requires. Built once at startup, optionally adjusted by
//! configured overrides, then shared read-only.

use serde::Serialize;
use std::collections::HashMap;
use thiserror::Error;

use crate::role::{Role, UnknownRole};

/// Sign-in page
pub const SIGN_IN: &str = "/";
pub const DASHBOARD: &str = "/dashboard";
pub const ACCOUNT: &str = "/dashboard/account";
pub const MANAGE_PROJECTS: &str = "/dashboard/manage-projects";
pub const MANAGE_USERS: &str = "/dashboard/manage-users";
pub const MANAGE_PERMISSIONS: &str = "/dashboard/manage-permissions";

/// Routes only meant for signed-out callers
pub const AUTH_ROUTES: &[&str] = &[SIGN_IN];

pub const CLEANUP_EXPIRED_BANS: &str = "cleanupExpiredBans";
pub const AUTH_ME: &str = "auth.me";

/// Self-service procedures open to every signed-in user
pub const ACCOUNT_PROCEDURES: &[&str] = &[
    "auth.updateName",
    "auth.updateImage",
    "auth.listSessions",
    "auth.revokeSession",
];

/// Every `admin.*` procedure
pub const ADMIN_PROCEDURES: &[&str] = &[
    "admin.getUsers",
    "admin.createUser",
    "admin.setRole",
    "admin.updateUser",
    "admin.setUserPassword",
    "admin.banUser",
    "admin.unbanUser",
    "admin.revokeUserSessions",
    "admin.removeUser",
];

#[derive(Debug, Error)]
pub enum PolicyError {
    #[error(transparent)]
    UnknownRole(#[from] UnknownRole),

    #[error("unknown protected surface: {0}")]
    UnknownSurface(String),

    #[error("malformed policy override {0:?}, expected surface=role")]
    Malformed(String),
}

/// A protected surface
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Surface {
    Route(String),
    Procedure(String),
}

impl Surface {
    /// Paths start with `/`, anything else names a procedure
    pub fn parse(raw: &str) -> Self {
        if raw.starts_with('/') {
            Surface::Route(raw.to_string())
        } else {
            Surface::Procedure(raw.to_string())
        }
    }
}

/// Surface → minimum role
#[derive(Debug, Clone)]
pub struct PolicyTable {
    routes: HashMap<String, Role>,
    procedures: HashMap<String, Role>,
}

impl Default for PolicyTable {
    fn default() -> Self {
        let routes = [
            (DASHBOARD, Role::Visitor),
            (ACCOUNT, Role::Visitor),
            (MANAGE_PROJECTS, Role::Operator),
            (MANAGE_USERS, Role::Admin),
            (MANAGE_PERMISSIONS, Role::Admin),
        ]
        .into_iter()
        .map(|(path, role)| (path.to_string(), role))
        .collect();

        let mut procedures: HashMap<String, Role> = ADMIN_PROCEDURES
            .iter()
            .map(|name| (name.to_string(), Role::Admin))
            .collect();
        procedures.insert(CLEANUP_EXPIRED_BANS.to_string(), Role::Visitor);
        procedures.insert(AUTH_ME.to_string(), Role::Visitor);
        for name in ACCOUNT_PROCEDURES {
            procedures.insert(name.to_string(), Role::Visitor);
        }

        Self { routes, procedures }
    }
}

impl PolicyTable {
    /// Default table with `surface=role;…` overrides applied
    pub fn with_overrides(raw: &str) -> Result<Self, PolicyError> {
        let mut table = Self::default();
        for (surface, role) in parse_overrides(raw)? {
            table.set(surface, role)?;
        }
        Ok(table)
    }

    /// Change the minimum role of an existing surface
    pub fn set(&mut self, surface: Surface, role: Role) -> Result<(), PolicyError> {
        let (map, name) = match surface {
            Surface::Route(path) => (&mut self.routes, path),
            Surface::Procedure(name) => (&mut self.procedures, name),
        };
        match map.get_mut(&name) {
            Some(min) => {
                *min = role;
                Ok(())
            }
            None => Err(PolicyError::UnknownSurface(name)),
        }
    }

    pub fn min_role_for_route(&self, path: &str) -> Option<Role> {
        self.routes.get(path).copied()
    }

    pub fn min_role_for_procedure(&self, name: &str) -> Option<Role> {
        self.procedures.get(name).copied()
    }

    pub fn is_auth_route(&self, path: &str) -> bool {
        AUTH_ROUTES.contains(&path)
    }

    pub fn is_protected_route(&self, path: &str) -> bool {
        self.routes.contains_key(path)
    }

    /// Navigation entries visible to `role`
    ///
    /// Entries open to every role are always listed, even when signed out.
    pub fn routes_for_role(&self, role: Option<Role>) -> Vec<NavRoute> {
        NAVIGATION
            .iter()
            .filter(|nav| match self.min_role_for_route(nav.path) {
                Some(Role::Visitor) | None => true,
                Some(min) => role.is_some_and(|r| r.satisfies(min)),
            })
            .copied()
            .collect()
    }

    pub fn can_access_route(&self, role: Option<Role>, path: &str) -> bool {
        self.routes_for_role(role).iter().any(|nav| nav.path == path)
    }
}

/// Dashboard navigation entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct NavRoute {
    pub title: &'static str,
    pub path: &'static str,
}

const NAVIGATION: &[NavRoute] = &[
    NavRoute { title: "Home", path: DASHBOARD },
    NavRoute { title: "Account", path: ACCOUNT },
    NavRoute { title: "Manage Projects", path: MANAGE_PROJECTS },
    NavRoute { title: "Manage Users", path: MANAGE_USERS },
    NavRoute { title: "Manage Permissions", path: MANAGE_PERMISSIONS },
];

/// Parse `surface=role` pairs separated by `;`. Blank entries are skipped.
pub fn parse_overrides(raw: &str) -> Result<Vec<(Surface, Role)>, PolicyError> {
    raw.split(';')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let (surface, role) = entry
                .split_once('=')
                .ok_or_else(|| PolicyError::Malformed(entry.to_string()))?;
            let surface = surface.trim();
            if surface.is_empty() {
                return Err(PolicyError::Malformed(entry.to_string()));
            }
            let role: Role = role.trim().parse()?;
            Ok((Surface::parse(surface), role))
        })
        .collect()
}
