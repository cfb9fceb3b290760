//! Ban-State Sweeper
//!
//! Clears bans whose expiry has passed. It is not scheduled: every
//! authenticated entry point is wrapped with [`sweep_expired_bans`] so the
//! sweep runs right before that request is authorized.
//!
//! Sweeps are idempotent and safe to run concurrently. The store clears the
//! whole expired set with one predicate update, and a row cleared by a racing
//! sweep simply no longer matches.

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::identity::{IdentityProvider, StoreError};

/// Finds and clears expired bans
pub struct BanSweeper {
    provider: Arc<dyn IdentityProvider>,
}

impl BanSweeper {
    pub fn new(provider: Arc<dyn IdentityProvider>) -> Self {
        Self { provider }
    }

    /// Unban every user whose ban expired, returning how many were cleared
    pub async fn sweep_expired_bans(&self) -> Result<usize, StoreError> {
        let unbanned = self.provider.clear_expired_bans(Utc::now()).await?;
        if unbanned > 0 {
            info!("Cleared {} expired ban(s)", unbanned);
        }
        Ok(unbanned)
    }

    /// Sweep, logging instead of failing. Ban state may be stale for the
    /// current request when this returns `None`.
    pub async fn sweep_best_effort(&self) -> Option<usize> {
        match self.sweep_expired_bans().await {
            Ok(count) => Some(count),
            Err(e) => {
                warn!("Expired ban sweep failed, continuing: {}", e);
                None
            }
        }
    }
}

/// Middleware: best-effort sweep, then the wrapped handler
pub async fn sweep_expired_bans(
    State(sweeper): State<Arc<BanSweeper>>,
    req: Request,
    next: Next,
) -> Response {
    if sweeper.sweep_best_effort().await.is_none() {
        debug!("Serving {} with possibly stale ban state", req.uri().path());
    }
    next.run(req).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::NewUser;
    use crate::role::Role;
    use crate::store::SqliteIdentityStore;
    use crate::testing::FailingProvider;
    use axum::http::Request;
    use axum::{body::Body, http::StatusCode, middleware, routing::get, Router};
    use chrono::Duration;
    use tower::ServiceExt;

    async fn store_with_expired_ban() -> (Arc<SqliteIdentityStore>, String) {
        let store = Arc::new(SqliteIdentityStore::open_in_memory().unwrap());
        let user = store
            .create_user(NewUser {
                name: "Temp".to_string(),
                email: "temp@example.com".to_string(),
                password_hash: "x".to_string(),
                role: Role::Visitor,
                email_verified: false,
            })
            .await
            .unwrap();
        store
            .ban_user(&user.id, Some("cooling off"), Some(Utc::now() - Duration::minutes(1)))
            .await
            .unwrap();
        (store, user.id)
    }

    #[tokio::test]
    async fn test_sweep_unbans_expired_user() {
        let (store, user_id) = store_with_expired_ban().await;
        let sweeper = BanSweeper::new(store.clone());

        assert_eq!(sweeper.sweep_expired_bans().await.unwrap(), 1);

        let user = store.get_user(&user_id).await.unwrap().unwrap();
        assert!(!user.banned);
        assert!(user.ban_reason.is_none());
        assert!(user.ban_expires.is_none());
    }

    #[tokio::test]
    async fn test_sweep_is_idempotent() {
        let (store, _) = store_with_expired_ban().await;
        let sweeper = BanSweeper::new(store);

        assert_eq!(sweeper.sweep_expired_bans().await.unwrap(), 1);
        assert_eq!(sweeper.sweep_expired_bans().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_sweeps_clear_once() {
        let (store, _) = store_with_expired_ban().await;
        let sweeper = Arc::new(BanSweeper::new(store));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let sweeper = sweeper.clone();
                tokio::spawn(async move { sweeper.sweep_expired_bans().await.unwrap() })
            })
            .collect();

        let mut total = 0;
        for handle in handles {
            total += handle.await.unwrap();
        }
        assert_eq!(total, 1);
    }

    #[tokio::test]
    async fn test_best_effort_swallows_failure() {
        let sweeper = BanSweeper::new(Arc::new(FailingProvider));
        assert!(sweeper.sweep_expired_bans().await.is_err());
        assert_eq!(sweeper.sweep_best_effort().await, None);
    }

    #[tokio::test]
    async fn test_middleware_does_not_block_on_failure() {
        let sweeper = Arc::new(BanSweeper::new(Arc::new(FailingProvider)));
        let app = Router::new()
            .route("/", get(|| async { "ok" }))
            .layer(middleware::from_fn_with_state(sweeper, sweep_expired_bans));

        let response = app
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_middleware_sweeps_before_handler() {
        let (store, user_id) = store_with_expired_ban().await;
        let sweeper = Arc::new(BanSweeper::new(store.clone()));

        let handler_store = store.clone();
        let app = Router::new()
            .route(
                "/",
                get(move || {
                    let store = handler_store.clone();
                    let user_id = user_id.clone();
                    async move {
                        let user = store.get_user(&user_id).await.unwrap().unwrap();
                        if user.banned { "stale" } else { "fresh" }
                    }
                }),
            )
            .layer(middleware::from_fn_with_state(sweeper, sweep_expired_bans));

        let response = app
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();

        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"fresh");
    }
}
