// SPDX-License-Identifier: MIT

//! Authhub: bearer-token authentication and IdP identity reconciliation.
//!
//! This crate issues and verifies a two-layer token (a signed envelope
//! wrapping an encrypted inner credential) and reconciles identity-provider
//! profile data into local user, detail and token records on every login.

pub mod config;
pub mod crypto;
pub mod db;
pub mod error;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;
pub mod time_utils;

use config::Config;
use db::IdentityStore;
use services::{LoginService, ReconcileService, TokenCodec};
use std::sync::Arc;

/// Shared application state.
pub struct AppState {
    pub config: Config,
    pub store: Arc<dyn IdentityStore>,
    pub tokens: TokenCodec,
    pub reconciler: Arc<ReconcileService>,
    pub login: LoginService,
}

impl AppState {
    /// Wire the services over a store.
    pub fn new(config: Config, store: Arc<dyn IdentityStore>) -> Self {
        let tokens = TokenCodec::new(config.shared_key.clone(), config.token_ttl_hours);
        let reconciler = Arc::new(ReconcileService::new(
            store.clone(),
            config.user_expiry_days,
            config.reconcile_atomic,
        ));
        let login = LoginService::new(&config, store.clone(), reconciler.clone(), tokens.clone());
        Self {
            config,
            store,
            tokens,
            reconciler,
            login,
        }
    }
}
