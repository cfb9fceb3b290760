//! Shared handler state

use std::sync::Arc;

use crate::account::AccountService;
use crate::admin::AdminService;
use crate::auth::{AuthConfig, AuthService};
use crate::identity::IdentityProvider;
use crate::policy::PolicyTable;
use crate::sweeper::BanSweeper;

/// Everything the portal handlers need, cheap to clone
#[derive(Clone)]
pub struct AppState {
    pub provider: Arc<dyn IdentityProvider>,
    pub policy: Arc<PolicyTable>,
    pub sweeper: Arc<BanSweeper>,
    pub auth: Arc<AuthService>,
    pub admin: Arc<AdminService>,
    pub account: Arc<AccountService>,
}

impl AppState {
    pub fn new(provider: Arc<dyn IdentityProvider>, policy: PolicyTable, auth: AuthConfig) -> Self {
        Self {
            policy: Arc::new(policy),
            sweeper: Arc::new(BanSweeper::new(provider.clone())),
            auth: Arc::new(AuthService::new(provider.clone(), auth)),
            admin: Arc::new(AdminService::new(provider.clone())),
            account: Arc::new(AccountService::new(provider.clone())),
            provider,
        }
    }
}
