// SPDX-License-Identifier: MIT

//! API routes for authenticated users.
//! The auth middleware is applied in routes/mod.rs for these routes.

use crate::error::{AppError, Result};
use crate::middleware::auth::AuthUser;
use crate::AppState;
use axum::{extract::State, routing::get, Extension, Json, Router};
use serde::Serialize;
use std::sync::Arc;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/user", get(get_user))
        .route("/api/user/detail", get(get_user_detail))
}

// ─── User Profile ────────────────────────────────────────────

/// Current user response.
#[derive(Serialize)]
pub struct UserResponse {
    #[serde(rename = "userId")]
    pub user_id: i64,
    pub sub: String,
    #[serde(rename = "nickName")]
    pub nick_name: String,
    #[serde(rename = "avatarUrl")]
    pub avatar_url: String,
    pub email: String,
    #[serde(rename = "userToken")]
    pub user_token: String,
}

/// Get the profile of the authenticated subject.
async fn get_user(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<UserResponse>> {
    let row = state
        .store
        .find_user_by_sub(&user.sub)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("User {} not found", user.sub)))?;

    Ok(Json(UserResponse {
        user_id: row.user_id,
        sub: row.sub_uid,
        nick_name: row.nick_name,
        avatar_url: row.picture,
        email: row.email,
        user_token: row.access_token,
    }))
}

// ─── Extended Detail ─────────────────────────────────────────

/// Extended profile response: user display fields plus the first detail
/// row's address/locale block.
#[derive(Serialize)]
pub struct UserDetailResponse {
    #[serde(rename = "userId")]
    pub user_id: i64,
    pub sub: String,
    #[serde(rename = "nickName")]
    pub nick_name: String,
    pub email: String,
    pub provider: String,
    pub gender: String,
    pub birthdate: String,
    pub formatted: String,
    pub region: String,
    pub locality: String,
    pub company: String,
    pub city: String,
}

/// Get the authenticated subject's extended profile.
async fn get_user_detail(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<UserDetailResponse>> {
    let row = state
        .store
        .find_user_by_sub(&user.sub)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("User {} not found", user.sub)))?;

    let detail = state
        .store
        .first_detail_for_user(row.user_id)
        .await?
        .unwrap_or_default();

    Ok(Json(UserDetailResponse {
        user_id: row.user_id,
        sub: row.sub_uid,
        nick_name: row.nick_name,
        email: row.email,
        provider: detail.provider,
        gender: detail.gender,
        birthdate: detail.birthdate,
        formatted: detail.formatted,
        region: detail.region,
        locality: detail.locality,
        company: detail.company,
        city: detail.city,
    }))
}
