// SPDX-License-Identifier: MIT

use authhub::config::Config;
use authhub::db::MemoryStore;
use authhub::routes::create_router;
use authhub::AppState;
use std::sync::Arc;

/// Create a test app over an in-memory store.
/// Returns the router, the shared state and a handle to the store.
#[allow(dead_code)]
pub fn create_test_app() -> (axum::Router, Arc<AppState>, MemoryStore) {
    let config = Config::test_default();
    create_test_app_with_config(config)
}

/// Create a test app with a custom config (e.g. atomic reconciliation).
#[allow(dead_code)]
pub fn create_test_app_with_config(config: Config) -> (axum::Router, Arc<AppState>, MemoryStore) {
    let store = MemoryStore::new();
    let state = Arc::new(AppState::new(config, Arc::new(store.clone())));
    (create_router(state.clone()), state, store)
}
