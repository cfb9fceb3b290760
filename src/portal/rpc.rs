//! RPC procedures
//!
//! `POST /api/rpc/{namespace}/{procedure}` (or `/api/rpc/{procedure}` for
//! top-level procedures) with a JSON body. Every call resolves the session
//! from the store, so role changes apply on the very next call regardless of
//! what the cookie cache says.

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, error};

use crate::account::AccountError;
use crate::admin::{AdminError, BanInput, CreateUserInput, ListUsersInput};
use crate::gate::{authorize, CurrentUser, Decision, DenyReason};
use crate::identity::{Session, User};
use crate::policy::{AUTH_ME, CLEANUP_EXPIRED_BANS};
use crate::portal::state::AppState;
use crate::role::Role;
use crate::session::CurrentSession;

/// Wire error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RpcCode {
    Unauthorized,
    Forbidden,
    BadRequest,
    NotFound,
    Conflict,
    InternalServerError,
}

impl RpcCode {
    pub fn status(self) -> StatusCode {
        match self {
            RpcCode::Unauthorized => StatusCode::UNAUTHORIZED,
            RpcCode::Forbidden => StatusCode::FORBIDDEN,
            RpcCode::BadRequest => StatusCode::BAD_REQUEST,
            RpcCode::NotFound => StatusCode::NOT_FOUND,
            RpcCode::Conflict => StatusCode::CONFLICT,
            RpcCode::InternalServerError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Typed procedure failure
#[derive(Debug, Error)]
#[error("{code:?}: {message}")]
pub struct RpcError {
    pub code: RpcCode,
    pub message: String,
}

impl RpcError {
    pub fn new(code: RpcCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn unauthorized() -> Self {
        Self::new(RpcCode::Unauthorized, "Unauthorized")
    }

    pub fn forbidden() -> Self {
        Self::new(RpcCode::Forbidden, "Forbidden")
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(RpcCode::BadRequest, message)
    }

    pub fn internal() -> Self {
        Self::new(RpcCode::InternalServerError, "Internal server error")
    }
}

#[derive(Debug, Serialize)]
struct RpcErrorBody<'a> {
    code: RpcCode,
    status: u16,
    message: &'a str,
}

impl IntoResponse for RpcError {
    fn into_response(self) -> Response {
        let status = self.code.status();
        let body = Json(RpcErrorBody {
            code: self.code,
            status: status.as_u16(),
            message: &self.message,
        });
        (status, body).into_response()
    }
}

impl From<AdminError> for RpcError {
    fn from(err: AdminError) -> Self {
        match err {
            AdminError::SelfAction(e) => RpcError::bad_request(e.to_string()),
            AdminError::Validation(msg) => RpcError::bad_request(msg),
            AdminError::NotFound(_) => RpcError::new(RpcCode::NotFound, "User not found"),
            AdminError::Conflict(_) => {
                RpcError::new(RpcCode::Conflict, "A user with this email already exists")
            }
            AdminError::Internal(_) | AdminError::Store(_) => {
                error!("Admin procedure failed: {}", err);
                RpcError::internal()
            }
        }
    }
}

impl From<AccountError> for RpcError {
    fn from(err: AccountError) -> Self {
        match err {
            AccountError::Validation(msg) => RpcError::bad_request(msg),
            AccountError::CurrentSession => RpcError::bad_request(err.to_string()),
            AccountError::SessionNotFound(_) => {
                RpcError::new(RpcCode::NotFound, "Session not found")
            }
            AccountError::Store(_) => {
                error!("Account procedure failed: {}", err);
                RpcError::internal()
            }
        }
    }
}

/// Per-call context: the store-resolved session
pub struct RpcContext {
    pub session: Option<Session>,
}

impl RpcContext {
    /// Gate the call on `min_role`
    pub fn require(&self, min_role: Role) -> Result<&Session, RpcError> {
        match authorize(self.session.as_ref(), min_role) {
            Decision::Allow => self.session.as_ref().ok_or_else(RpcError::unauthorized),
            Decision::Deny(DenyReason::Unauthenticated) => Err(RpcError::unauthorized()),
            Decision::Deny(DenyReason::InsufficientRole) => Err(RpcError::forbidden()),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserIdInput {
    user_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SetRoleInput {
    user_id: String,
    role: Role,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateUserInput {
    user_id: String,
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SetPasswordInput {
    user_id: String,
    new_password: String,
}

#[derive(Debug, Deserialize)]
struct NameInput {
    name: String,
}

#[derive(Debug, Deserialize)]
struct ImageInput {
    #[serde(default)]
    image: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionIdInput {
    session_id: String,
}

#[derive(Debug, Serialize)]
struct UserOutput {
    user: User,
}

/// Parse a procedure input; an empty body counts as `{}`
fn input<T: DeserializeOwned>(body: &Bytes) -> Result<T, RpcError> {
    let raw: &[u8] = if body.iter().all(u8::is_ascii_whitespace) {
        b"{}"
    } else {
        body
    };
    serde_json::from_slice(raw).map_err(|e| RpcError::bad_request(format!("Invalid input: {}", e)))
}

fn user_output(user: User) -> Value {
    json!(UserOutput { user })
}

/// Run `procedure` after the policy check
pub async fn call(
    state: &AppState,
    ctx: &RpcContext,
    procedure: &str,
    body: &Bytes,
) -> Result<Value, RpcError> {
    let min_role = state
        .policy
        .min_role_for_procedure(procedure)
        .ok_or_else(|| RpcError::new(RpcCode::NotFound, format!("Unknown procedure: {}", procedure)))?;
    let actor = ctx.require(min_role)?;

    debug!("{} calling {}", actor.user.id, procedure);

    match procedure {
        CLEANUP_EXPIRED_BANS => {
            let unbanned = state.sweeper.sweep_expired_bans().await.map_err(|e| {
                error!("Expired ban cleanup failed: {}", e);
                RpcError::internal()
            })?;
            Ok(json!({ "success": true, "unbannedUsers": unbanned }))
        }
        AUTH_ME => Ok(json!(CurrentUser::from_session(Some(actor)))),
        "auth.updateName" => {
            let req: NameInput = input(body)?;
            let user = state.account.update_name(actor, &req.name).await?;
            Ok(user_output(user))
        }
        "auth.updateImage" => {
            let req: ImageInput = input(body)?;
            let user = state.account.update_image(actor, req.image.as_deref()).await?;
            Ok(user_output(user))
        }
        "auth.listSessions" => {
            let sessions = state.account.list_sessions(actor).await?;
            Ok(json!({ "sessions": sessions }))
        }
        "auth.revokeSession" => {
            let req: SessionIdInput = input(body)?;
            state.account.revoke_session(actor, &req.session_id).await?;
            Ok(json!({ "success": true }))
        }
        "admin.getUsers" => {
            let page = state.admin.list_users(input::<ListUsersInput>(body)?).await?;
            Ok(json!(page))
        }
        "admin.createUser" => {
            let user = state.admin.create_user(input::<CreateUserInput>(body)?).await?;
            Ok(user_output(user))
        }
        "admin.setRole" => {
            let req: SetRoleInput = input(body)?;
            let user = state.admin.set_role(actor, &req.user_id, req.role).await?;
            Ok(user_output(user))
        }
        "admin.updateUser" => {
            let req: UpdateUserInput = input(body)?;
            let user = state.admin.update_name(actor, &req.user_id, &req.name).await?;
            Ok(user_output(user))
        }
        "admin.setUserPassword" => {
            let req: SetPasswordInput = input(body)?;
            state
                .admin
                .set_password(actor, &req.user_id, &req.new_password)
                .await?;
            Ok(json!({ "success": true }))
        }
        "admin.banUser" => {
            let req: BanInput = input(body)?;
            let user = state
                .admin
                .ban(actor, &req.user_id, req.ban_reason.as_deref(), req.expires_in())
                .await?;
            Ok(user_output(user))
        }
        "admin.unbanUser" => {
            let req: UserIdInput = input(body)?;
            let user = state.admin.unban(actor, &req.user_id).await?;
            Ok(user_output(user))
        }
        "admin.revokeUserSessions" => {
            let req: UserIdInput = input(body)?;
            let revoked = state.admin.revoke_sessions(actor, &req.user_id).await?;
            Ok(json!({ "success": true, "revokedSessions": revoked }))
        }
        "admin.removeUser" => {
            let req: UserIdInput = input(body)?;
            state.admin.remove_user(actor, &req.user_id).await?;
            Ok(json!({ "success": true }))
        }
        other => {
            error!("Procedure {} is in the policy table but has no handler", other);
            Err(RpcError::new(RpcCode::NotFound, format!("Unknown procedure: {}", other)))
        }
    }
}

async fn namespaced_handler(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
    Path((namespace, procedure)): Path<(String, String)>,
    body: Bytes,
) -> Result<Json<Value>, RpcError> {
    let ctx = RpcContext { session };
    let name = format!("{}.{}", namespace, procedure);
    call(&state, &ctx, &name, &body).await.map(Json)
}

async fn top_level_handler(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
    Path(procedure): Path<String>,
    body: Bytes,
) -> Result<Json<Value>, RpcError> {
    let ctx = RpcContext { session };
    call(&state, &ctx, &procedure, &body).await.map(Json)
}

/// RPC routes; the server adds the request-session and sweep layers
pub fn rpc_router(state: AppState) -> Router {
    Router::new()
        .route("/{procedure}", post(top_level_handler))
        .route("/{namespace}/{procedure}", post(namespaced_handler))
        .with_state(state)
}
