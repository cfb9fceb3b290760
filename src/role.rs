//! Role Model
//!
//! Closed set of portal roles with a total privilege order:
//!
//! ```text
//! visitor (0) < operator (1) < admin (2)
//! ```
//!
//! The order is a rank lookup, not a type hierarchy. Adding or removing a role
//! requires a redeploy.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// A role value outside the closed set
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown role: {0:?}")]
pub struct UnknownRole(pub String);

/// Portal role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Signed-in user with read access to results
    Visitor,
    /// Can manage projects and see all results
    Operator,
    /// Full access including user management
    Admin,
}

impl Default for Role {
    fn default() -> Self {
        Self::Visitor
    }
}

impl Role {
    /// Every role, lowest privilege first
    pub const ALL: [Role; 3] = [Role::Visitor, Role::Operator, Role::Admin];

    /// Privilege rank; higher means more permissions
    pub const fn rank(self) -> u8 {
        match self {
            Role::Visitor => 0,
            Role::Operator => 1,
            Role::Admin => 2,
        }
    }

    /// Wire name
    pub const fn as_str(self) -> &'static str {
        match self {
            Role::Visitor => "visitor",
            Role::Operator => "operator",
            Role::Admin => "admin",
        }
    }

    /// True if this role is authorized wherever `min` is
    pub const fn satisfies(self, min: Role) -> bool {
        self.rank() >= min.rank()
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = UnknownRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "visitor" => Ok(Role::Visitor),
            "operator" => Ok(Role::Operator),
            "admin" => Ok(Role::Admin),
            other => Err(UnknownRole(other.to_string())),
        }
    }
}
