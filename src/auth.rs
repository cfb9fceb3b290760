//! Portal Authentication
//!
//! Email/password sign-in backed by the identity store.
//!
//! # Security Features
//!
//! - **Password hashing**: Argon2id
//! - **Sessions**: opaque token in an httpOnly cookie, stored hashed
//! - **Cookie cache**: short-lived HS256 JWT with a role snapshot for the edge check
//! - **Rate limiting**: 5 sign-in attempts per minute per client address.
//!   Proxy headers count only when `trust_proxy_headers` is on.
//! - **Bans**: actively banned users cannot sign in; an expired ban is lifted on the spot
//!
//! # Endpoints
//!
//! - `POST /api/auth/sign-in/email` - Authenticate with email/password
//! - `POST /api/auth/sign-out` - Delete the session and clear cookies
//! - `GET /api/auth/get-session` - Current session, refreshing the cookie cache

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use axum::{
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use chrono::{Duration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::identity::{IdentityProvider, IssuedSession, Session, SessionInfo, StoreError, User};
use crate::session::{
    session_token_from_headers, CookieCache, CurrentSession, SESSION_DATA_COOKIE,
    SESSION_TOKEN_COOKIE,
};

/// Rate limit window (60 seconds)
const RATE_LIMIT_WINDOW_SECS: i64 = 60;

/// Max sign-in attempts per window
const MAX_LOGIN_ATTEMPTS: u32 = 5;

/// Shortest accepted password
pub const MIN_PASSWORD_LEN: usize = 8;

/// Largest accepted sign-in body
const MAX_BODY_BYTES: usize = 64 * 1024;

/// Authentication errors
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Invalid email or password")]
    InvalidCredentials,

    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Banned(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AuthError::InvalidCredentials => (StatusCode::UNAUTHORIZED, self.to_string()),
            AuthError::RateLimitExceeded => {
                (StatusCode::TOO_MANY_REQUESTS, "Too many sign-in attempts".to_string())
            }
            AuthError::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AuthError::Banned(msg) => (StatusCode::FORBIDDEN, msg.clone()),
            AuthError::Internal(_) | AuthError::Store(_) => {
                warn!("Auth request failed: {}", self);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal error".to_string())
            }
        };

        let body = Json(ErrorResponse {
            error: status.canonical_reason().unwrap_or("Error").to_string(),
            message,
            details: None,
        });

        (status, body).into_response()
    }
}

/// Error response format
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// Hash a password using Argon2id
pub fn hash_password(password: &str) -> Result<String, AuthError> {
    let salt = SaltString::generate(&mut OsRng);

    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AuthError::Internal(format!("Password hashing failed: {}", e)))
}

/// Verify a password against a hash
pub fn verify_password(password: &str, hash: &str) -> Result<bool, AuthError> {
    let parsed_hash = PasswordHash::new(hash)
        .map_err(|e| AuthError::Internal(format!("Invalid password hash: {}", e)))?;

    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok())
}

/// Password policy shared by sign-in and admin password resets
pub fn validate_password(password: &str) -> Result<(), String> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LEN
        ));
    }
    Ok(())
}

/// Loose address check: non-empty local part and a dotted domain
pub fn validate_email(email: &str) -> Result<(), String> {
    let valid = email
        .trim()
        .split_once('@')
        .is_some_and(|(local, domain)| {
            !local.is_empty()
                && !domain.contains('@')
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
        });

    if valid {
        Ok(())
    } else {
        Err("Invalid email address".to_string())
    }
}

/// User-facing message for a refused sign-in
fn ban_message(user: &User) -> String {
    let mut message = "You have been banned from this application".to_string();
    if let Some(reason) = &user.ban_reason {
        message.push_str(&format!(": {}", reason));
    }
    if let Some(expires) = user.ban_expires {
        message.push_str(&format!(" (until {})", expires.format("%Y-%m-%d %H:%M UTC")));
    }
    message
}

/// Rate limit entry
#[derive(Debug, Clone)]
struct RateLimitEntry {
    attempts: u32,
    window_start: chrono::DateTime<Utc>,
}

/// Authentication configuration
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Cookie cache signing secret
    pub secret: String,
    /// Secure cookies (requires HTTPS)
    pub secure_cookies: bool,
    /// Store session lifetime
    pub session_ttl: Duration,
    /// Cookie cache lifetime
    pub cookie_cache_ttl: Duration,
    /// Take the client address from `X-Forwarded-For` / `X-Real-IP`
    pub trust_proxy_headers: bool,
}

/// Sign-in, sign-out and cookie issuance
pub struct AuthService {
    provider: Arc<dyn IdentityProvider>,
    cache: CookieCache,
    /// Rate limiting by client address
    rate_limits: Mutex<HashMap<String, RateLimitEntry>>,
    pub config: AuthConfig,
}

impl AuthService {
    pub fn new(provider: Arc<dyn IdentityProvider>, config: AuthConfig) -> Self {
        Self {
            provider,
            cache: CookieCache::new(&config.secret, config.cookie_cache_ttl),
            rate_limits: Mutex::new(HashMap::new()),
            config,
        }
    }

    pub fn cookie_cache(&self) -> &CookieCache {
        &self.cache
    }

    /// Check rate limit for IP
    fn check_rate_limit(&self, ip: &str) -> Result<(), AuthError> {
        let mut rate_limits = self.rate_limits.lock();
        let now = Utc::now();

        if let Some(entry) = rate_limits.get_mut(ip) {
            if (now - entry.window_start).num_seconds() > RATE_LIMIT_WINDOW_SECS {
                entry.attempts = 1;
                entry.window_start = now;
            } else if entry.attempts >= MAX_LOGIN_ATTEMPTS {
                return Err(AuthError::RateLimitExceeded);
            } else {
                entry.attempts += 1;
            }
        } else {
            rate_limits.retain(|_, entry| {
                (now - entry.window_start).num_seconds() <= RATE_LIMIT_WINDOW_SECS
            });
            rate_limits.insert(
                ip.to_string(),
                RateLimitEntry {
                    attempts: 1,
                    window_start: now,
                },
            );
        }

        Ok(())
    }

    /// Authenticate and open a store session
    pub async fn sign_in(
        &self,
        email: &str,
        password: &str,
        ip: &str,
        user_agent: Option<&str>,
    ) -> Result<IssuedSession, AuthError> {
        self.check_rate_limit(ip)?;
        validate_email(email).map_err(AuthError::Validation)?;
        validate_password(password).map_err(AuthError::Validation)?;

        let (user, password_hash) = self
            .provider
            .find_credentials(email.trim())
            .await?
            .ok_or(AuthError::InvalidCredentials)?;

        if !verify_password(password, &password_hash)? {
            debug!("Rejected sign-in for {}", user.id);
            return Err(AuthError::InvalidCredentials);
        }

        let now = Utc::now();
        if user.is_actively_banned(now) {
            info!("Refused sign-in for banned user {}", user.id);
            return Err(AuthError::Banned(ban_message(&user)));
        }
        if user.banned {
            self.provider.unban_user(&user.id).await?;
            info!("Lifted expired ban for {} at sign-in", user.id);
        }

        let ip_address = (ip != "unknown").then_some(ip);
        let issued = self
            .provider
            .create_session(&user.id, now + self.config.session_ttl, ip_address, user_agent)
            .await?;

        info!("User {} signed in", user.id);
        Ok(issued)
    }

    /// Delete the store session behind `token`
    pub async fn sign_out(&self, token: &str) -> Result<(), AuthError> {
        self.provider.delete_session(token).await?;
        Ok(())
    }

    /// Sign a cookie cache value for `session`
    pub fn issue_cache(&self, session: &Session) -> Result<String, AuthError> {
        self.cache
            .issue(session)
            .map_err(|e| AuthError::Internal(format!("Failed to sign session cache: {}", e)))
    }

    fn base_cookie(&self, name: &'static str, value: String) -> Cookie<'static> {
        Cookie::build((name, value))
            .path("/")
            .http_only(true)
            .same_site(SameSite::Strict)
            .secure(self.config.secure_cookies)
            .build()
    }

    /// Session token cookie
    pub fn build_session_cookie(&self, token: &str, session: &Session) -> Cookie<'static> {
        let mut cookie = self.base_cookie(SESSION_TOKEN_COOKIE, token.to_string());
        let remaining = (session.expires_at - Utc::now()).num_seconds().max(0);
        cookie.set_max_age(cookie::time::Duration::seconds(remaining));
        cookie
    }

    /// Cookie cache cookie
    pub fn build_cache_cookie(&self, value: &str) -> Cookie<'static> {
        let mut cookie = self.base_cookie(SESSION_DATA_COOKIE, value.to_string());
        cookie.set_max_age(cookie::time::Duration::seconds(
            self.config.cookie_cache_ttl.num_seconds().max(0),
        ));
        cookie
    }

    /// Build sign-out cookies (clear)
    pub fn build_logout_cookies(&self) -> (Cookie<'static>, Cookie<'static>) {
        let mut token_cookie = self.base_cookie(SESSION_TOKEN_COOKIE, String::new());
        token_cookie.set_max_age(cookie::time::Duration::ZERO);

        let mut cache_cookie = self.base_cookie(SESSION_DATA_COOKIE, String::new());
        cache_cookie.set_max_age(cookie::time::Duration::ZERO);

        (token_cookie, cache_cookie)
    }
}

// ============================================================================
// API Handlers
// ============================================================================

/// Sign-in request
#[derive(Debug, Deserialize)]
pub struct SignInRequest {
    pub email: String,
    pub password: String,
}

/// Sign-in / sign-out response
#[derive(Debug, Serialize)]
pub struct SignInResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<User>,
}

/// Session payload of `get-session`
#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub session: SessionInfo,
    pub user: User,
}

impl From<Session> for SessionResponse {
    fn from(session: Session) -> Self {
        Self {
            session: SessionInfo::from(&session),
            user: session.user,
        }
    }
}

/// Client address from proxy headers
fn forwarded_ip(headers: &HeaderMap) -> Option<String> {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty());

    forwarded
        .or_else(|| {
            headers
                .get("x-real-ip")
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|ip| !ip.is_empty())
        })
        .map(str::to_string)
}

/// Client address used for rate limiting and session metadata.
///
/// Proxy headers are client-controlled, so they are read only behind a
/// trusted proxy; otherwise the socket peer is used.
pub fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>, trust_proxy_headers: bool) -> String {
    if trust_proxy_headers {
        if let Some(ip) = forwarded_ip(headers) {
            return ip;
        }
    }

    peer.map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Sign-in handler
pub async fn sign_in_handler(
    State(state): State<Arc<AuthService>>,
    jar: CookieJar,
    req: Request,
) -> Result<(CookieJar, Json<SignInResponse>), AuthError> {
    let (parts, body) = req.into_parts();
    let bytes = axum::body::to_bytes(body, MAX_BODY_BYTES)
        .await
        .map_err(|e| AuthError::Validation(format!("Failed to read body: {}", e)))?;

    let sign_in: SignInRequest = serde_json::from_slice(&bytes)
        .map_err(|e| AuthError::Validation(format!("Invalid JSON: {}", e)))?;

    let peer = parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let ip = client_ip(&parts.headers, peer, state.config.trust_proxy_headers);
    let user_agent = parts
        .headers
        .get(axum::http::header::USER_AGENT)
        .and_then(|h| h.to_str().ok());

    let issued = state
        .sign_in(&sign_in.email, &sign_in.password, &ip, user_agent)
        .await?;

    let cache_value = state.issue_cache(&issued.session)?;
    let jar = jar
        .add(state.build_session_cookie(&issued.token, &issued.session))
        .add(state.build_cache_cookie(&cache_value));

    Ok((
        jar,
        Json(SignInResponse {
            success: true,
            user: Some(issued.session.user),
        }),
    ))
}

/// Sign-out handler
pub async fn sign_out_handler(
    State(state): State<Arc<AuthService>>,
    headers: HeaderMap,
    jar: CookieJar,
) -> Result<(CookieJar, Json<SignInResponse>), AuthError> {
    if let Some(token) = session_token_from_headers(&headers) {
        state.sign_out(&token).await?;
    }

    let (token_cookie, cache_cookie) = state.build_logout_cookies();
    let jar = jar.add(token_cookie).add(cache_cookie);

    Ok((jar, Json(SignInResponse { success: true, user: None })))
}

/// Current session, or `null`; refreshes the cookie cache
pub async fn get_session_handler(
    State(state): State<Arc<AuthService>>,
    CurrentSession(session): CurrentSession,
    jar: CookieJar,
) -> Result<(CookieJar, Json<Option<SessionResponse>>), AuthError> {
    match session {
        Some(session) => {
            let cache_value = state.issue_cache(&session)?;
            let jar = jar.add(state.build_cache_cookie(&cache_value));
            Ok((jar, Json(Some(SessionResponse::from(session)))))
        }
        None => {
            // Drop a cache that outlived its session
            let jar = if jar.get(SESSION_DATA_COOKIE).is_some() {
                let (_, cache_cookie) = state.build_logout_cookies();
                jar.add(cache_cookie)
            } else {
                jar
            };
            Ok((jar, Json(None)))
        }
    }
}

// ============================================================================
// Router
// ============================================================================

/// Create the authentication router
///
/// Callers wrap it with the request-session and ban-sweep layers.
pub fn auth_router(state: Arc<AuthService>) -> Router {
    Router::new()
        .route("/sign-in/email", post(sign_in_handler))
        .route("/sign-out", post(sign_out_handler))
        .route("/get-session", get(get_session_handler))
        .with_state(state)
}

// ============================================================================
// Tests
// ============================================================================
