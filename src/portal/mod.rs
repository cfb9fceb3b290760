//! Web Portal Module
//!
//! HTTP surface of the admin portal.
//!
//! # Security Model
//!
//! - **Edge check**: page requests are gated on the signed cookie cache
//! - **Layout check**: dashboard pages re-check the role from the store
//! - **Procedure check**: every RPC call resolves the session from the store
//! - **Ban sweep**: expired bans are cleared before each entry point runs
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────┐
//! │                  Portal Server                   │
//! ├──────────────────────────────────────────────────┤
//! │  GET  /                        → Sign-in page    │
//! │  GET  /dashboard[/...]         → Dashboard pages │
//! │  POST /api/auth/sign-in/email  → Authenticate    │
//! │  POST /api/auth/sign-out       → End session     │
//! │  GET  /api/auth/get-session    → Current session │
//! │  POST /api/rpc/{ns}/{proc}     → Procedures      │
//! │  GET  /api/health              → Health check    │
//! └──────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod edge;
pub mod pages;
pub mod rpc;
pub mod server;
pub mod state;

pub use config::ServerConfig;
pub use edge::edge_guard;
pub use pages::pages_router;
pub use rpc::{rpc_router, RpcCode, RpcContext, RpcError};
pub use server::PortalServer;
pub use state::AppState;
