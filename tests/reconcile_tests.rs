// SPDX-License-Identifier: MIT

//! Identity reconciliation tests over the in-memory store.

mod common;

use authhub::db::{IdentityStore, MemoryStore, StoreSession};
use authhub::error::AppError;
use authhub::models::{
    DetailPatch, IdpProfile, IdpUserInfo, Identity, TokenGrant, TokenPatch, TokenRecord, User,
    UserDetail, UserPatch,
};
use authhub::services::reconcile::{derived_identity_key, ReconcileService};
use std::sync::Arc;

fn email_profile(sub: &str, email: &str) -> IdpProfile {
    IdpProfile {
        sub_uid: sub.to_string(),
        name: "Ada Lovelace".to_string(),
        nick_name: "ada".to_string(),
        user_name: "ada-l".to_string(),
        picture: "https://img.example.com/ada.png".to_string(),
        email: email.to_string(),
        email_verified: true,
        locality: "London".to_string(),
        ..Default::default()
    }
}

fn code_grant(code: &str) -> TokenGrant {
    TokenGrant {
        access_token: "provider-access".to_string(),
        token_type: "Bearer".to_string(),
        expires_in: 7200,
        refresh_token: "provider-refresh".to_string(),
        id_token: "provider-idtoken".to_string(),
        scope: "openid profile".to_string(),
        created_at: 1_700_000_000,
        auth_code: code.to_string(),
    }
}

fn github_identity(id: &str) -> Identity {
    Identity {
        identity_id: id.to_string(),
        openid: format!("openid-{}", id),
        provider: "github".to_string(),
        ext_idp_id: "ext-1".to_string(),
        user_id_in_idp: "9001".to_string(),
        company: "Initech".to_string(),
        city: "Austin".to_string(),
        email: "gh@example.com".to_string(),
        user_info: IdpUserInfo {
            phone: "".to_string(),
            email: "gh@example.com".to_string(),
            name: "gh-display".to_string(),
            user_name: "gh-login".to_string(),
            avatar: "https://img.example.com/gh.png".to_string(),
        },
    }
}

/// Email-only profile, no federated identities: one user, one derived
/// detail row, one token record, non-zero user id.
#[tokio::test]
async fn test_derived_identity_end_to_end() {
    let (_app, state, store) = common::create_test_app();

    let profile = email_profile("abc123", "a@example.com");
    let user_id = state
        .reconciler
        .reconcile("", &profile, &code_grant("code-1"), "session-token")
        .await
        .unwrap();

    assert!(user_id > 0);
    assert_eq!(store.user_count(), 1);
    assert_eq!(store.token_count(), 1);

    let details = store.details_for_user(user_id);
    assert_eq!(details.len(), 1);
    let (expected_key, label) = derived_identity_key(&profile).unwrap();
    assert_eq!(details[0].identity_id, expected_key);
    assert_eq!(details[0].provider, label);
    assert_eq!(label, "Email");
    assert_eq!(details[0].email, "a@example.com");
    // Address-block fields ride along on the detail row.
    assert_eq!(details[0].locality, "London");

    let user = store.find_user_by_id(user_id).await.unwrap().unwrap();
    assert_eq!(user.sub_uid, "abc123");
    assert_eq!(user.access_token, "session-token");
    assert!(!user.expiration_time.is_empty());

    let record = store.find_token_by_user(user_id).await.unwrap().unwrap();
    assert_eq!(record.auth_code, "code-1");
    assert_eq!(record.id_token, "provider-idtoken");
}

/// Reconciling the same (sub, profile) twice leaves exactly one row per
/// table; a third call with only the email changed updates that field and
/// nothing else the login did not supply.
#[tokio::test]
async fn test_reconcile_idempotence_and_sparse_update() {
    let (_app, state, store) = common::create_test_app();

    let profile = email_profile("abc123", "a@example.com");
    let first = state
        .reconciler
        .reconcile("", &profile, &code_grant("code-1"), "tok")
        .await
        .unwrap();
    let second = state
        .reconciler
        .reconcile("", &profile, &code_grant("code-1"), "tok")
        .await
        .unwrap();

    assert_eq!(first, second);
    assert_eq!(store.user_count(), 1);
    assert_eq!(store.detail_count(), 1);
    assert_eq!(store.token_count(), 1);

    let before = store.find_user_by_id(first).await.unwrap().unwrap();

    // Third login: only the email differs.
    let changed = email_profile("abc123", "b@example.com");
    let third = state
        .reconciler
        .reconcile("", &changed, &code_grant("code-1"), "tok")
        .await
        .unwrap();
    assert_eq!(third, first);

    let after = store.find_user_by_id(first).await.unwrap().unwrap();
    assert_eq!(after.email, "b@example.com");
    assert_eq!(after.name, before.name);
    assert_eq!(after.nick_name, before.nick_name);
    assert_eq!(after.user_name, before.user_name);
    assert_eq!(after.picture, before.picture);
    assert_eq!(after.phone_number, before.phone_number);
    assert_eq!(after.create_time, before.create_time);

    // The derived identity key tracks the email, so the new email keys a
    // new detail row; the old row stays.
    assert_eq!(store.detail_count(), 2);
}

/// Federated identities: one detail row per identity, keyed by identity
/// id, and the matching identity mirrors its profile onto the user row.
#[tokio::test]
async fn test_multi_identity_upsert_and_mirror() {
    let (_app, state, store) = common::create_test_app();

    let mut profile = email_profile("sub-multi", "a@example.com");
    profile.identities = vec![
        github_identity("ident-gh"),
        Identity {
            identity_id: "ident-wc".to_string(),
            provider: "wechat".to_string(),
            user_info: IdpUserInfo {
                name: "wc-display".to_string(),
                avatar: "https://img.example.com/wc.png".to_string(),
                ..Default::default()
            },
            ..Default::default()
        },
        // An identity without an id is skipped entirely.
        Identity::default(),
    ];

    let user_id = state
        .reconciler
        .reconcile("ident-gh", &profile, &code_grant("code-2"), "tok")
        .await
        .unwrap();

    let details = store.details_for_user(user_id);
    assert_eq!(details.len(), 2);
    let gh = details.iter().find(|d| d.identity_id == "ident-gh").unwrap();
    assert_eq!(gh.provider, "github");
    assert_eq!(gh.company, "Initech");
    assert_eq!(gh.user_name, "gh-login");

    // The matching identity refreshed the primary display fields.
    let user = store.find_user_by_id(user_id).await.unwrap().unwrap();
    assert_eq!(user.user_name, "gh-login");
    assert_eq!(user.nick_name, "gh-display");
    assert_eq!(user.picture, "https://img.example.com/gh.png");
    assert_eq!(user.email, "gh@example.com");
    // Empty mirror phone must not clobber the stored one.
    assert_eq!(user.phone_number, "");

    // Second login through the same identities: still two rows.
    state
        .reconciler
        .reconcile("ident-gh", &profile, &code_grant(""), "tok")
        .await
        .unwrap();
    assert_eq!(store.details_for_user(user_id).len(), 2);
    assert_eq!(store.user_count(), 1);
}

/// Without a fresh authorization code the token-record update leaves the
/// code and id-token columns untouched.
#[tokio::test]
async fn test_token_record_column_widening() {
    let (_app, state, store) = common::create_test_app();

    let profile = email_profile("sub-token", "a@example.com");
    let user_id = state
        .reconciler
        .reconcile("", &profile, &code_grant("code-first"), "tok")
        .await
        .unwrap();

    // Refresh-style login: new provider tokens, no code.
    let mut refresh = code_grant("");
    refresh.access_token = "provider-access-2".to_string();
    refresh.id_token = "should-not-land".to_string();
    state
        .reconciler
        .reconcile("", &profile, &refresh, "tok")
        .await
        .unwrap();

    let record = store.find_token_by_user(user_id).await.unwrap().unwrap();
    assert_eq!(record.access_token, "provider-access-2");
    assert_eq!(record.auth_code, "code-first");
    assert_eq!(record.id_token, "provider-idtoken");

    // A fresh code widens the update again.
    let mut fresh = code_grant("code-second");
    fresh.id_token = "new-idtoken".to_string();
    state
        .reconciler
        .reconcile("", &profile, &fresh, "tok")
        .await
        .unwrap();

    let record = store.find_token_by_user(user_id).await.unwrap().unwrap();
    assert_eq!(record.auth_code, "code-second");
    assert_eq!(record.id_token, "new-idtoken");
}

/// Two concurrent logins for one subject are serialized per subject:
/// exactly one user row comes out, and both calls resolve to it.
#[tokio::test]
async fn test_concurrent_same_subject_logins() {
    let (_app, state, store) = common::create_test_app();

    let profile = email_profile("sub-race", "race@example.com");
    let grant_c1 = code_grant("c1");
    let grant_c2 = code_grant("c2");
    let (a, b) = tokio::join!(
        state
            .reconciler
            .reconcile("", &profile, &grant_c1, "tok"),
        state
            .reconciler
            .reconcile("", &profile, &grant_c2, "tok"),
    );

    let a = a.unwrap();
    let b = b.unwrap();
    assert_eq!(a, b);
    assert_eq!(store.user_count(), 1);
    assert_eq!(store.token_count(), 1);
}

/// The atomic option changes isolation, not results.
#[tokio::test]
async fn test_atomic_mode_smoke() {
    let mut config = authhub::config::Config::test_default();
    config.reconcile_atomic = true;
    let (_app, state, store) = common::create_test_app_with_config(config);

    let profile = email_profile("sub-atomic", "atomic@example.com");
    let user_id = state
        .reconciler
        .reconcile("", &profile, &code_grant("code"), "tok")
        .await
        .unwrap();

    assert!(user_id > 0);
    assert_eq!(store.user_count(), 1);
    assert_eq!(store.detail_count(), 1);
    assert_eq!(store.token_count(), 1);
}

// ─── Detail-failure leniency ─────────────────────────────────────────────

/// Store wrapper whose sessions fail every detail write.
struct FailingDetailStore {
    inner: MemoryStore,
}

#[async_trait::async_trait]
impl IdentityStore for FailingDetailStore {
    async fn session(&self, atomic: bool) -> Result<Box<dyn StoreSession>, AppError> {
        Ok(Box::new(FailingDetailSession {
            inner: self.inner.session(atomic).await?,
        }))
    }

    async fn find_user_by_sub(&self, sub_uid: &str) -> Result<Option<User>, AppError> {
        self.inner.find_user_by_sub(sub_uid).await
    }

    async fn find_user_by_id(&self, user_id: i64) -> Result<Option<User>, AppError> {
        self.inner.find_user_by_id(user_id).await
    }

    async fn find_detail_by_identity(
        &self,
        identity_id: &str,
    ) -> Result<Option<UserDetail>, AppError> {
        self.inner.find_detail_by_identity(identity_id).await
    }

    async fn first_detail_for_user(&self, user_id: i64) -> Result<Option<UserDetail>, AppError> {
        self.inner.first_detail_for_user(user_id).await
    }

    async fn find_token_by_user(&self, user_id: i64) -> Result<Option<TokenRecord>, AppError> {
        self.inner.find_token_by_user(user_id).await
    }

    async fn find_token_by_auth_code(
        &self,
        auth_code: &str,
    ) -> Result<Option<TokenRecord>, AppError> {
        self.inner.find_token_by_auth_code(auth_code).await
    }

    async fn find_token_by_access_token(
        &self,
        access_token: &str,
    ) -> Result<Option<TokenRecord>, AppError> {
        self.inner.find_token_by_access_token(access_token).await
    }
}

struct FailingDetailSession {
    inner: Box<dyn StoreSession>,
}

#[async_trait::async_trait]
impl StoreSession for FailingDetailSession {
    async fn find_user_by_sub(&mut self, sub_uid: &str) -> Result<Option<User>, AppError> {
        self.inner.find_user_by_sub(sub_uid).await
    }

    async fn insert_user(&mut self, user: &User) -> Result<i64, AppError> {
        self.inner.insert_user(user).await
    }

    async fn update_user(&mut self, user_id: i64, patch: &UserPatch) -> Result<(), AppError> {
        self.inner.update_user(user_id, patch).await
    }

    async fn find_detail_by_identity(
        &mut self,
        identity_id: &str,
    ) -> Result<Option<UserDetail>, AppError> {
        self.inner.find_detail_by_identity(identity_id).await
    }

    async fn insert_detail(&mut self, _detail: &UserDetail) -> Result<i64, AppError> {
        Err(AppError::Database("injected detail failure".to_string()))
    }

    async fn update_detail(
        &mut self,
        _user_detail_id: i64,
        _patch: &DetailPatch,
    ) -> Result<(), AppError> {
        Err(AppError::Database("injected detail failure".to_string()))
    }

    async fn find_token_by_user(&mut self, user_id: i64) -> Result<Option<TokenRecord>, AppError> {
        self.inner.find_token_by_user(user_id).await
    }

    async fn insert_token(&mut self, record: &TokenRecord) -> Result<i64, AppError> {
        self.inner.insert_token(record).await
    }

    async fn update_token(&mut self, id: i64, patch: &TokenPatch) -> Result<(), AppError> {
        self.inner.update_token(id, patch).await
    }

    async fn commit(self: Box<Self>) -> Result<(), AppError> {
        self.inner.commit().await
    }
}

/// A detail write failure is logged, not fatal: the login still succeeds
/// and the token record is still written. User-insert failures, by
/// contrast, abort the login.
#[tokio::test]
async fn test_detail_failure_is_not_fatal() {
    let mem = MemoryStore::new();
    let store = Arc::new(FailingDetailStore { inner: mem.clone() });
    let reconciler = ReconcileService::new(store, 30, false);

    let profile = email_profile("sub-lenient", "lenient@example.com");
    let user_id = reconciler
        .reconcile("", &profile, &code_grant("code"), "tok")
        .await
        .unwrap();

    assert!(user_id > 0);
    assert_eq!(mem.user_count(), 1);
    assert_eq!(mem.detail_count(), 0);
    assert_eq!(mem.token_count(), 1);
}
