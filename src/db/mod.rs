// SPDX-License-Identifier: MIT

//! Storage layer for identity records.
//!
//! Reconciliation performs several read-then-write round trips per login
//! (user row, detail rows, token record). Historically those writes are NOT
//! one atomic unit: a failure after the user upsert leaves the detail/token
//! rows stale, and that partial progress is observable. `session(atomic)`
//! preserves that default while letting correctness-sensitive deployments
//! opt into a single transaction per login (`RECONCILE_ATOMIC=true`).
//!
//! The in-memory store only serializes atomic sessions (no rollback); real
//! atomicity needs the Postgres backend.

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgIdentityStore;

use crate::error::AppError;
use crate::models::{DetailPatch, TokenPatch, TokenRecord, User, UserDetail, UserPatch};
use async_trait::async_trait;

/// Read-side store operations plus the entry point for write sessions.
#[async_trait]
pub trait IdentityStore: Send + Sync {
    /// Open a write session. With `atomic` the whole session is one
    /// transaction where the backend supports it; otherwise every write
    /// applies immediately.
    async fn session(&self, atomic: bool) -> Result<Box<dyn StoreSession>, AppError>;

    async fn find_user_by_sub(&self, sub_uid: &str) -> Result<Option<User>, AppError>;

    async fn find_user_by_id(&self, user_id: i64) -> Result<Option<User>, AppError>;

    async fn find_detail_by_identity(
        &self,
        identity_id: &str,
    ) -> Result<Option<UserDetail>, AppError>;

    /// Oldest detail row for a user (the fallback login path reads one
    /// representative row).
    async fn first_detail_for_user(&self, user_id: i64) -> Result<Option<UserDetail>, AppError>;

    async fn find_token_by_user(&self, user_id: i64) -> Result<Option<TokenRecord>, AppError>;

    async fn find_token_by_auth_code(
        &self,
        auth_code: &str,
    ) -> Result<Option<TokenRecord>, AppError>;

    async fn find_token_by_access_token(
        &self,
        access_token: &str,
    ) -> Result<Option<TokenRecord>, AppError>;
}

/// A write session over the identity tables.
///
/// Reads issued through the session observe the session's own uncommitted
/// writes when it is transactional.
#[async_trait]
pub trait StoreSession: Send {
    async fn find_user_by_sub(&mut self, sub_uid: &str) -> Result<Option<User>, AppError>;

    /// Insert a user row; returns the generated user id. Inserting a
    /// duplicate `sub_uid` is an error (unique constraint).
    async fn insert_user(&mut self, user: &User) -> Result<i64, AppError>;

    async fn update_user(&mut self, user_id: i64, patch: &UserPatch) -> Result<(), AppError>;

    async fn find_detail_by_identity(
        &mut self,
        identity_id: &str,
    ) -> Result<Option<UserDetail>, AppError>;

    /// Insert a detail row; returns the generated detail id. Duplicate
    /// `identity_id` is an error.
    async fn insert_detail(&mut self, detail: &UserDetail) -> Result<i64, AppError>;

    async fn update_detail(
        &mut self,
        user_detail_id: i64,
        patch: &DetailPatch,
    ) -> Result<(), AppError>;

    async fn find_token_by_user(&mut self, user_id: i64) -> Result<Option<TokenRecord>, AppError>;

    /// Insert a token record; returns the generated id. One row per user.
    async fn insert_token(&mut self, record: &TokenRecord) -> Result<i64, AppError>;

    async fn update_token(&mut self, id: i64, patch: &TokenPatch) -> Result<(), AppError>;

    /// Commit the session. A no-op for non-atomic sessions; dropping an
    /// atomic session without committing rolls it back.
    async fn commit(self: Box<Self>) -> Result<(), AppError>;
}
