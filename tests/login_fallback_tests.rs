// SPDX-License-Identifier: MIT

//! IdP-unavailable fallback tests.
//!
//! The test config points at an IdP that is not running, so every login
//! exercises the fallback: previously reconciled records answer the
//! request instead of failing it outright.

mod common;

use authhub::db::{IdentityStore, StoreSession as _};
use authhub::models::{TokenRecord, User};
use axum::body::Body;
use axum::http::{Request, StatusCode};
use tower::ServiceExt; // for oneshot

/// Seed a reconciled user with a cached session token and a token record
/// remembering the authorization code that created it.
async fn seed_reconciled_user(store: &authhub::db::MemoryStore, sub: &str, code: &str) -> i64 {
    let mut session = store.session(false).await.unwrap();

    let mut user = User::with_sub(sub);
    user.nick_name = "cached-nick".to_string();
    user.email = "cached@example.com".to_string();
    user.access_token = "cached-session-token".to_string();
    let user_id = session.insert_user(&user).await.unwrap();

    let record = TokenRecord {
        user_id,
        access_token: "cached-provider-access".to_string(),
        auth_code: code.to_string(),
        ..Default::default()
    };
    session.insert_token(&record).await.unwrap();
    session.commit().await.unwrap();

    user_id
}

#[tokio::test]
async fn test_code_login_falls_back_to_store() {
    let (_app, state, store) = common::create_test_app();
    let user_id = seed_reconciled_user(&store, "fallback-sub", "code-xyz").await;

    // The code exchange fails (no IdP listening); the token record keyed
    // by this code resolves the login anyway.
    let data = state.login.login_with_code("code-xyz").await.unwrap();

    assert_eq!(data.user_id, user_id);
    assert_eq!(data.nick_name, "cached-nick");
    // The cached session token is returned, not a freshly issued one.
    assert_eq!(data.user_token, "cached-session-token");
}

#[tokio::test]
async fn test_code_login_without_history_fails() {
    let (_app, state, _store) = common::create_test_app();

    let err = state.login.login_with_code("never-seen").await.unwrap_err();
    // The original IdP failure is surfaced once the fallback finds
    // nothing.
    assert!(matches!(err, authhub::error::AppError::IdpApi(_)));
}

#[tokio::test]
async fn test_sub_login_falls_back_to_store() {
    let (_app, state, store) = common::create_test_app();
    let user_id = seed_reconciled_user(&store, "fallback-sub-2", "code-2").await;

    let data = state
        .login
        .login_with_sub("fallback-sub-2", "")
        .await
        .unwrap();

    assert_eq!(data.user_id, user_id);
    assert_eq!(data.email, "cached@example.com");
}

#[tokio::test]
async fn test_callback_route_serves_fallback() {
    let (app, _state, store) = common::create_test_app();
    seed_reconciled_user(&store, "fallback-sub-3", "code-route").await;

    let response = app
        .oneshot(
            Request::builder()
                .uri("/auth/callback?code=code-route&state=junk")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), 64 * 1024)
        .await
        .unwrap();
    let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(parsed["nickName"], "cached-nick");
    assert_eq!(parsed["userToken"], "cached-session-token");
}

#[tokio::test]
async fn test_callback_route_unknown_code_is_bad_gateway() {
    let (app, _state, _store) = common::create_test_app();

    let response = app
        .oneshot(
            Request::builder()
                .uri("/auth/callback?code=no-history&state=junk")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
}
