//! Edge page check
//!
//! Runs before any page handler and decides from the signed cookie cache
//! alone, so it may act on a role snapshot up to one cache TTL old. The RPC
//! check is the authoritative one.
//!
//! - signed out on a protected page: redirect to sign-in
//! - signed in on the sign-in page: redirect to the dashboard
//! - signed in but under-role: redirect to the dashboard
//!
//! With a session token but no usable cache, the session is resolved from the
//! store once and the cache cookie re-issued.

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};
use axum_extra::extract::cookie::CookieJar;
use tracing::{debug, warn};

use crate::gate::{authorize, Decision, DenyReason};
use crate::policy::{DASHBOARD, SIGN_IN};
use crate::portal::state::AppState;
use crate::session::{resolve_session, session_token_from_headers, CachedSession, RequestSession};

/// Middleware: redirect page requests the cached role does not allow
pub async fn edge_guard(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let path = req.uri().path().to_string();
    let is_auth_route = state.policy.is_auth_route(&path);
    let required = state.policy.min_role_for_route(&path);

    if !is_auth_route && required.is_none() {
        return next.run(req).await;
    }

    let mut refreshed = None;
    let mut cached = state.auth.cookie_cache().read_headers(req.headers());

    if cached.is_none() {
        let request_session = req.extensions().get::<RequestSession>().cloned();
        let token = session_token_from_headers(req.headers());
        if let Some((claims, value)) = refresh_cache(&state, request_session, token).await {
            cached = Some(claims);
            refreshed = Some(value);
        }
    }

    let response = match (cached.as_ref(), required) {
        (None, _) if is_auth_route => next.run(req).await,
        (Some(_), _) if is_auth_route => Redirect::temporary(DASHBOARD).into_response(),
        (principal, Some(required)) => match authorize(principal, required) {
            Decision::Allow => next.run(req).await,
            Decision::Deny(DenyReason::Unauthenticated) => {
                debug!("Redirecting signed-out request for {} to sign-in", path);
                Redirect::temporary(SIGN_IN).into_response()
            }
            // The dashboard itself renders the denial instead of looping
            Decision::Deny(DenyReason::InsufficientRole) if path == DASHBOARD => {
                next.run(req).await
            }
            Decision::Deny(DenyReason::InsufficientRole) => {
                debug!("Cached role too low for {}, redirecting to dashboard", path);
                Redirect::temporary(DASHBOARD).into_response()
            }
        },
        (_, None) => next.run(req).await,
    };

    match refreshed {
        Some(value) => {
            let jar = CookieJar::new().add(state.auth.build_cache_cookie(&value));
            (jar, response).into_response()
        }
        None => response,
    }
}

/// Resolve from the store and sign a fresh cache value
async fn refresh_cache(
    state: &AppState,
    request_session: Option<RequestSession>,
    token: Option<String>,
) -> Option<(CachedSession, String)> {
    let token = token?;
    let session = match request_session {
        Some(request_session) => request_session.resolve().await,
        None => resolve_session(state.provider.as_ref(), &token).await,
    }?;

    let value = match state.auth.issue_cache(&session) {
        Ok(value) => value,
        Err(e) => {
            warn!("Could not re-issue session cache: {}", e);
            return None;
        }
    };
    let claims = state.auth.cookie_cache().read(&value)?;
    Some((claims, value))
}
