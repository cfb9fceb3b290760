//! Session Resolver
//!
//! Resolves the caller's session from the `portal.session_token` cookie or an
//! `Authorization: Bearer` header. Resolution is memoized per request in a
//! [`RequestSession`] placed in the request extensions, so repeated lookups
//! during one request cost a single store round-trip. Nothing is cached across
//! requests.
//!
//! Also holds the signed cookie cache (`portal.session_data`): a short-lived
//! JWT with a role snapshot that the edge page check reads without touching
//! the store. It may lag behind the store by up to its TTL.

use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts, HeaderMap},
    middleware::Next,
    response::Response,
};
use axum_extra::extract::cookie::CookieJar;
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use crate::gate::Principal;
use crate::identity::{IdentityProvider, Session};
use crate::role::Role;

/// Cookie holding the opaque session token
pub const SESSION_TOKEN_COOKIE: &str = "portal.session_token";

/// Cookie holding the signed session cache
pub const SESSION_DATA_COOKIE: &str = "portal.session_data";

/// Extract the session token from cookies, falling back to a bearer header
pub fn session_token_from_headers(headers: &HeaderMap) -> Option<String> {
    let jar = CookieJar::from_headers(headers);
    if let Some(cookie) = jar.get(SESSION_TOKEN_COOKIE) {
        if !cookie.value().is_empty() {
            return Some(cookie.value().to_string());
        }
    }

    headers
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
}

/// Look up a session, mapping provider failure and logically banned users to `None`
pub async fn resolve_session(provider: &dyn IdentityProvider, token: &str) -> Option<Session> {
    match provider.get_session(token).await {
        Ok(Some(session)) if session.user.is_actively_banned(Utc::now()) => {
            debug!("Session {} belongs to banned user {}", session.id, session.user.id);
            None
        }
        Ok(session) => session,
        Err(e) => {
            warn!("Session lookup failed, treating caller as signed out: {}", e);
            None
        }
    }
}

struct RequestSessionInner {
    token: Option<String>,
    provider: Arc<dyn IdentityProvider>,
    resolved: OnceCell<Option<Session>>,
}

/// Per-request, lazily resolved session
#[derive(Clone)]
pub struct RequestSession {
    inner: Arc<RequestSessionInner>,
}

impl RequestSession {
    pub fn new(token: Option<String>, provider: Arc<dyn IdentityProvider>) -> Self {
        Self {
            inner: Arc::new(RequestSessionInner {
                token,
                provider,
                resolved: OnceCell::new(),
            }),
        }
    }

    pub fn from_headers(headers: &HeaderMap, provider: Arc<dyn IdentityProvider>) -> Self {
        Self::new(session_token_from_headers(headers), provider)
    }

    /// Raw token presented by the caller, if any
    pub fn token(&self) -> Option<&str> {
        self.inner.token.as_deref()
    }

    /// Resolve once; later calls reuse the first result
    pub async fn resolve(&self) -> Option<Session> {
        self.inner
            .resolved
            .get_or_init(|| async {
                match self.inner.token.as_deref() {
                    Some(token) => resolve_session(self.inner.provider.as_ref(), token).await,
                    None => None,
                }
            })
            .await
            .clone()
    }
}

/// Middleware: install a fresh [`RequestSession`] for this request
pub async fn attach_request_session(
    State(provider): State<Arc<dyn IdentityProvider>>,
    mut req: Request,
    next: Next,
) -> Response {
    let request_session = RequestSession::from_headers(req.headers(), provider);
    req.extensions_mut().insert(request_session);
    next.run(req).await
}

/// Extractor: the resolved session, `None` when signed out
pub struct CurrentSession(pub Option<Session>);

impl<S> FromRequestParts<S> for CurrentSession
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let request_session = parts.extensions.get::<RequestSession>().cloned();
        let session = match request_session {
            Some(rs) => rs.resolve().await,
            None => {
                warn!("No request session installed for {}", parts.uri.path());
                None
            }
        };
        Ok(Self(session))
    }
}

/// Claims of the signed session cache
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedSession {
    /// User ID
    pub sub: String,
    /// Session ID
    pub sid: String,
    /// Role at issue time
    pub role: Role,
    pub name: String,
    pub email: String,
    pub iat: i64,
    pub exp: i64,
}

impl Principal for CachedSession {
    fn user_id(&self) -> &str {
        &self.sub
    }

    fn role(&self) -> Role {
        self.role
    }
}

/// Signs and verifies the session cache cookie
pub struct CookieCache {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    ttl: Duration,
}

impl CookieCache {
    pub fn new(secret: &str, ttl: Duration) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Snapshot a session; never outlives the session itself
    pub fn issue(&self, session: &Session) -> Result<String, jsonwebtoken::errors::Error> {
        let now = Utc::now();
        let exp = (now + self.ttl).min(session.expires_at);

        let claims = CachedSession {
            sub: session.user.id.clone(),
            sid: session.id.clone(),
            role: session.user.role,
            name: session.user.name.clone(),
            email: session.user.email.clone(),
            iat: now.timestamp(),
            exp: exp.timestamp(),
        };

        encode(&Header::default(), &claims, &self.encoding_key)
    }

    /// Verify a cache value; expired, tampered or malformed values are `None`
    pub fn read(&self, value: &str) -> Option<CachedSession> {
        let mut validation = Validation::default();
        validation.leeway = 0;

        match decode::<CachedSession>(value, &self.decoding_key, &validation) {
            Ok(data) => Some(data.claims),
            Err(e) => {
                debug!("Ignoring session cache: {}", e);
                None
            }
        }
    }

    /// Read the cache cookie from request headers
    pub fn read_headers(&self, headers: &HeaderMap) -> Option<CachedSession> {
        let jar = CookieJar::from_headers(headers);
        jar.get(SESSION_DATA_COOKIE).and_then(|c| self.read(c.value()))
    }
}
