// SPDX-License-Identifier: MIT

//! Login orchestration.
//!
//! A login either arrives with a fresh authorization code (OAuth callback)
//! or with a subject id from an already-established IdP session. Both paths
//! normalize the IdP profile, reconcile it into local records and issue a
//! two-layer token. When the IdP is unreachable the service answers from
//! previously reconciled data instead of failing the request.

use crate::config::Config;
use crate::db::IdentityStore;
use crate::error::AppError;
use crate::models::{IdpProfile, TokenGrant, User};
use crate::services::idp::IdpClient;
use crate::services::provider;
use crate::services::reconcile::ReconcileService;
use crate::services::token::TokenCodec;
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;

/// Login response payload.
#[derive(Debug, Clone, Serialize)]
pub struct LoginUserData {
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

/// High-level login service.
#[derive(Clone)]
pub struct LoginService {
    idp: IdpClient,
    reconciler: Arc<ReconcileService>,
    store: Arc<dyn IdentityStore>,
    tokens: TokenCodec,
}

impl LoginService {
    pub fn new(
        config: &Config,
        store: Arc<dyn IdentityStore>,
        reconciler: Arc<ReconcileService>,
        tokens: TokenCodec,
    ) -> Self {
        let idp = IdpClient::new(
            config.idp_issuer_url.clone(),
            config.idp_client_id.clone(),
            config.idp_client_secret.clone(),
            config.idp_userpool_id.clone(),
            config.idp_userpool_secret.clone(),
        );
        Self {
            idp,
            reconciler,
            store,
            tokens,
        }
    }

    /// Authorization-code login (OAuth callback).
    pub async fn login_with_code(&self, code: &str) -> Result<LoginUserData, AppError> {
        let grant = match self.idp.exchange_code(code).await {
            Ok(grant) => grant,
            Err(e) => {
                tracing::error!(error = %e, "Code exchange failed, answering from store");
                let stale = TokenGrant {
                    auth_code: code.to_string(),
                    ..Default::default()
                };
                return self.fallback_by_grant(&stale, e).await;
            }
        };

        let raw = match self.idp.fetch_user_info(&grant.access_token).await {
            Ok(raw) => raw,
            Err(e) => {
                tracing::error!(error = %e, "Userinfo fetch failed, answering from store");
                return self.fallback_by_grant(&grant, e).await;
            }
        };

        let profile = provider::profile_from_userinfo(&raw);
        if profile.sub_uid.is_empty() {
            let e = AppError::IdpApi("userinfo carried no subject".into());
            return self.fallback_by_grant(&grant, e).await;
        }

        match self
            .reconciler
            .reconcile("", &profile, &grant, &grant.access_token)
            .await
        {
            Ok(user_id) => self.finish_login(user_id, &profile).await,
            Err(e) => {
                tracing::error!(sub_uid = %profile.sub_uid, error = %e, "Reconciliation failed");
                self.fallback_by_grant(&grant, e).await
            }
        }
    }

    /// Subject login: the caller presents an IdP subject id plus the
    /// federated identity it authenticated with.
    pub async fn login_with_sub(
        &self,
        sub: &str,
        federated_identity_id: &str,
    ) -> Result<LoginUserData, AppError> {
        let raw = match self.idp.fetch_user_by_sub(sub).await {
            Ok(raw) => raw,
            Err(e) => {
                tracing::error!(sub, error = %e, "Directory lookup failed, answering from store");
                return self.fallback_by_sub(sub, e).await;
            }
        };

        let mut profile = provider::profile_from_directory(&raw);
        if profile.sub_uid.is_empty() {
            profile.sub_uid = sub.to_string();
        }

        // No fresh authorization code on this path, so the token-record
        // update stays narrow.
        let grant = TokenGrant::default();

        match self
            .reconciler
            .reconcile(federated_identity_id, &profile, &grant, &grant.access_token)
            .await
        {
            Ok(user_id) => self.finish_login(user_id, &profile).await,
            Err(e) => {
                tracing::error!(sub, error = %e, "Reconciliation failed");
                self.fallback_by_sub(sub, e).await
            }
        }
    }

    /// Issue the two-layer token and assemble the response from the
    /// reconciled user row (mirror updates included).
    async fn finish_login(
        &self,
        user_id: i64,
        profile: &IdpProfile,
    ) -> Result<LoginUserData, AppError> {
        let user = self
            .store
            .find_user_by_id(user_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("User {} not found", user_id)))?;

        let token = self
            .tokens
            .issue(&login_claims(profile))
            .map_err(|e| AppError::Internal(anyhow::anyhow!("Token issuance failed: {}", e)))?;

        Ok(response_from_user(&user, token))
    }

    /// Answer a code login from previously reconciled records: token
    /// record by auth code (or access token), then the user it belongs to.
    async fn fallback_by_grant(
        &self,
        grant: &TokenGrant,
        cause: AppError,
    ) -> Result<LoginUserData, AppError> {
        let record = if !grant.auth_code.is_empty() {
            self.store.find_token_by_auth_code(&grant.auth_code).await?
        } else {
            self.store
                .find_token_by_access_token(&grant.access_token)
                .await?
        };

        let Some(record) = record else {
            return Err(cause);
        };
        let Some(user) = self.store.find_user_by_id(record.user_id).await? else {
            return Err(cause);
        };

        tracing::info!(user_id = user.user_id, "Login served from reconciled records");
        let token = user.access_token.clone();
        Ok(response_from_user(&user, token))
    }

    /// Answer a subject login from the stored user row.
    async fn fallback_by_sub(&self, sub: &str, cause: AppError) -> Result<LoginUserData, AppError> {
        let Some(user) = self.store.find_user_by_sub(sub).await? else {
            return Err(cause);
        };

        tracing::info!(user_id = user.user_id, "Login served from reconciled records");
        let token = user.access_token.clone();
        Ok(response_from_user(&user, token))
    }
}

/// Inner-credential claims for a login.
fn login_claims(profile: &IdpProfile) -> serde_json::Value {
    json!({
        "sub": profile.sub_uid,
        "name": profile.name,
        "nickname": profile.nick_name,
        "picture": profile.picture,
        "email": profile.email,
        "email_verified": profile.email_verified,
        "phone_number": profile.phone_number,
        "phone_number_verified": profile.phone_number_verified,
        "updated_at": profile.updated_at,
    })
}

fn response_from_user(user: &User, token: String) -> LoginUserData {
    LoginUserData {
        user_id: user.user_id,
        sub: user.sub_uid.clone(),
        nick_name: user.nick_name.clone(),
        avatar_url: user.picture.clone(),
        email: user.email.clone(),
        user_token: token,
    }
}
