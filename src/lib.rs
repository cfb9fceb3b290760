//! Admin Portal
//!
//! Role-gated internal portal: email sign-in, dashboard pages and an admin
//! user-management API over a SQLite identity store.
//!
//! # Features
//!
//! - **Role Model**: visitor < operator < admin, compared by rank
//! - **Session Resolver**: store-backed, memoized once per request
//! - **Authorization Gate**: one `authorize` shared by page and RPC checks
//! - **Ban Sweeper**: expired bans cleared before each entry point runs
//! - **Policy Table**: surface → minimum role, overridable at startup
//!
//! # Architecture
//!
//! ```text
//! request ──► Sweeper ──► RequestSession ──► Gate ──► handler
//!                              │              │
//!                              │              └── PolicyTable + Role
//!                              └── IdentityProvider (SQLite)
//! ```

pub mod account;
pub mod admin;
pub mod auth;
pub mod config;
pub mod gate;
pub mod identity;
pub mod policy;
pub mod portal;
pub mod role;
pub mod session;
pub mod store;
pub mod sweeper;

#[cfg(test)]
mod testing;

pub use account::{AccountError, AccountService};
pub use admin::{AdminError, AdminService, BanDuration, ListUsersInput};
pub use auth::{AuthConfig, AuthError, AuthService};
pub use config::{Config, ConfigError, LogFormat};
pub use gate::{authorize, has_minimum_role, has_role, CurrentUser, Decision, DenyReason, Principal};
pub use identity::{
    IdentityProvider, ListUsersQuery, Session, SessionInfo, StoreError, User, UserPage,
};
pub use policy::{PolicyError, PolicyTable, Surface};
pub use portal::{AppState, PortalServer, ServerConfig};
pub use role::{Role, UnknownRole};
pub use session::{CachedSession, CookieCache, CurrentSession, RequestSession};
pub use store::SqliteIdentityStore;
pub use sweeper::BanSweeper;
