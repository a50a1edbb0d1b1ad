// SPDX-License-Identifier: MIT

//! In-memory identity store for tests and local development.
//!
//! Enforces the same uniqueness rules as the SQL schema so races and
//! duplicate inserts fail here the way they fail against Postgres. Atomic
//! sessions only serialize (one writer at a time); there is no rollback.

use crate::db::{IdentityStore, StoreSession};
use crate::error::AppError;
use crate::models::{DetailPatch, TokenPatch, TokenRecord, User, UserDetail, UserPatch};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Default)]
struct MemInner {
    users: DashMap<i64, User>,
    users_by_sub: DashMap<String, i64>,
    details: DashMap<i64, UserDetail>,
    details_by_identity: DashMap<String, i64>,
    /// Token records keyed by user id (one per user)
    tokens: DashMap<i64, TokenRecord>,
    next_user_id: AtomicI64,
    next_detail_id: AtomicI64,
    next_token_id: AtomicI64,
}

/// In-memory identity store.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<MemInner>,
    write_lock: Arc<Mutex<()>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    // Inspection helpers for tests.

    pub fn user_count(&self) -> usize {
        self.inner.users.len()
    }

    pub fn detail_count(&self) -> usize {
        self.inner.details.len()
    }

    pub fn token_count(&self) -> usize {
        self.inner.tokens.len()
    }

    pub fn details_for_user(&self, user_id: i64) -> Vec<UserDetail> {
        let mut out: Vec<UserDetail> = self
            .inner
            .details
            .iter()
            .filter(|e| e.value().user_id == user_id)
            .map(|e| e.value().clone())
            .collect();
        out.sort_by_key(|d| d.user_detail_id);
        out
    }
}

#[async_trait]
impl IdentityStore for MemoryStore {
    async fn session(&self, atomic: bool) -> Result<Box<dyn StoreSession>, AppError> {
        let guard = if atomic {
            Some(self.write_lock.clone().lock_owned().await)
        } else {
            None
        };
        Ok(Box::new(MemSession {
            inner: self.inner.clone(),
            _guard: guard,
        }))
    }

    async fn find_user_by_sub(&self, sub_uid: &str) -> Result<Option<User>, AppError> {
        Ok(lookup_user_by_sub(&self.inner, sub_uid))
    }

    async fn find_user_by_id(&self, user_id: i64) -> Result<Option<User>, AppError> {
        Ok(self.inner.users.get(&user_id).map(|u| u.value().clone()))
    }

    async fn find_detail_by_identity(
        &self,
        identity_id: &str,
    ) -> Result<Option<UserDetail>, AppError> {
        Ok(lookup_detail_by_identity(&self.inner, identity_id))
    }

    async fn first_detail_for_user(&self, user_id: i64) -> Result<Option<UserDetail>, AppError> {
        Ok(self.details_for_user(user_id).into_iter().next())
    }

    async fn find_token_by_user(&self, user_id: i64) -> Result<Option<TokenRecord>, AppError> {
        Ok(self.inner.tokens.get(&user_id).map(|t| t.value().clone()))
    }

    async fn find_token_by_auth_code(
        &self,
        auth_code: &str,
    ) -> Result<Option<TokenRecord>, AppError> {
        Ok(self
            .inner
            .tokens
            .iter()
            .filter(|e| e.value().auth_code == auth_code)
            .map(|e| e.value().clone())
            .min_by_key(|t| t.id))
    }

    async fn find_token_by_access_token(
        &self,
        access_token: &str,
    ) -> Result<Option<TokenRecord>, AppError> {
        Ok(self
            .inner
            .tokens
            .iter()
            .filter(|e| e.value().access_token == access_token)
            .map(|e| e.value().clone())
            .min_by_key(|t| t.id))
    }
}

fn lookup_user_by_sub(inner: &MemInner, sub_uid: &str) -> Option<User> {
    let id = *inner.users_by_sub.get(sub_uid)?;
    inner.users.get(&id).map(|u| u.value().clone())
}

fn lookup_detail_by_identity(inner: &MemInner, identity_id: &str) -> Option<UserDetail> {
    let id = *inner.details_by_identity.get(identity_id)?;
    inner.details.get(&id).map(|d| d.value().clone())
}

struct MemSession {
    inner: Arc<MemInner>,
    _guard: Option<OwnedMutexGuard<()>>,
}

#[async_trait]
impl StoreSession for MemSession {
    async fn find_user_by_sub(&mut self, sub_uid: &str) -> Result<Option<User>, AppError> {
        Ok(lookup_user_by_sub(&self.inner, sub_uid))
    }

    async fn insert_user(&mut self, user: &User) -> Result<i64, AppError> {
        // entry() keeps the check-and-insert atomic, like the unique index.
        match self.inner.users_by_sub.entry(user.sub_uid.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(AppError::Database(format!(
                "duplicate key value violates unique constraint: sub_uid {}",
                user.sub_uid
            ))),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                let id = self.inner.next_user_id.fetch_add(1, Ordering::SeqCst) + 1;
                let mut row = user.clone();
                row.user_id = id;
                slot.insert(id);
                self.inner.users.insert(id, row);
                Ok(id)
            }
        }
    }

    async fn update_user(&mut self, user_id: i64, patch: &UserPatch) -> Result<(), AppError> {
        if let Some(mut row) = self.inner.users.get_mut(&user_id) {
            patch.apply(row.value_mut());
        }
        Ok(())
    }

    async fn find_detail_by_identity(
        &mut self,
        identity_id: &str,
    ) -> Result<Option<UserDetail>, AppError> {
        Ok(lookup_detail_by_identity(&self.inner, identity_id))
    }

    async fn insert_detail(&mut self, detail: &UserDetail) -> Result<i64, AppError> {
        match self
            .inner
            .details_by_identity
            .entry(detail.identity_id.clone())
        {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(AppError::Database(format!(
                "duplicate key value violates unique constraint: identity_id {}",
                detail.identity_id
            ))),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                let id = self.inner.next_detail_id.fetch_add(1, Ordering::SeqCst) + 1;
                let mut row = detail.clone();
                row.user_detail_id = id;
                slot.insert(id);
                self.inner.details.insert(id, row);
                Ok(id)
            }
        }
    }

    async fn update_detail(
        &mut self,
        user_detail_id: i64,
        patch: &DetailPatch,
    ) -> Result<(), AppError> {
        if let Some(mut row) = self.inner.details.get_mut(&user_detail_id) {
            patch.apply(row.value_mut());
        }
        Ok(())
    }

    async fn find_token_by_user(&mut self, user_id: i64) -> Result<Option<TokenRecord>, AppError> {
        Ok(self.inner.tokens.get(&user_id).map(|t| t.value().clone()))
    }

    async fn insert_token(&mut self, record: &TokenRecord) -> Result<i64, AppError> {
        match self.inner.tokens.entry(record.user_id) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(AppError::Database(format!(
                "duplicate key value violates unique constraint: token user_id {}",
                record.user_id
            ))),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                let id = self.inner.next_token_id.fetch_add(1, Ordering::SeqCst) + 1;
                let mut row = record.clone();
                row.id = id;
                slot.insert(row);
                Ok(id)
            }
        }
    }

    async fn update_token(&mut self, id: i64, patch: &TokenPatch) -> Result<(), AppError> {
        for mut entry in self.inner.tokens.iter_mut() {
            if entry.value().id == id {
                patch.apply(entry.value_mut());
                break;
            }
        }
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), AppError> {
        Ok(())
    }
}
