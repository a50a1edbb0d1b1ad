// SPDX-License-Identifier: MIT

//! Identity provider API client.
//!
//! Thin typed wrapper over the IdP's OIDC endpoints plus the user-pool
//! directory API. All failures surface as `AppError::IdpApi`; callers
//! decide whether to fall back to previously reconciled data.

use crate::error::AppError;
use crate::models::TokenGrant;
use serde_json::Value;

/// IdP API client.
#[derive(Clone)]
pub struct IdpClient {
    http: reqwest::Client,
    issuer_url: String,
    client_id: String,
    client_secret: String,
    userpool_id: String,
    userpool_secret: String,
}

impl IdpClient {
    /// Create a new client with application and user-pool credentials.
    pub fn new(
        issuer_url: String,
        client_id: String,
        client_secret: String,
        userpool_id: String,
        userpool_secret: String,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            issuer_url,
            client_id,
            client_secret,
            userpool_id,
            userpool_secret,
        }
    }

    /// Exchange an authorization code for a token grant.
    pub async fn exchange_code(&self, code: &str) -> Result<TokenGrant, AppError> {
        let url = format!("{}/oidc/token", self.issuer_url);

        let response = self
            .http
            .post(&url)
            .form(&[
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("grant_type", "authorization_code"),
                ("code", code),
            ])
            .send()
            .await
            .map_err(|e| AppError::IdpApi(format!("Token exchange request failed: {}", e)))?;

        let mut grant: TokenGrant = self.check_response_json(response).await?;
        if grant.access_token.is_empty() {
            return Err(AppError::IdpApi("Token exchange returned no access token".into()));
        }
        grant.auth_code = code.to_string();
        Ok(grant)
    }

    /// Fetch the userinfo claims for an access token.
    pub async fn fetch_user_info(&self, access_token: &str) -> Result<Value, AppError> {
        let url = format!("{}/oidc/me", self.issuer_url);

        let response = self
            .http
            .get(&url)
            .query(&[("access_token", access_token)])
            .send()
            .await
            .map_err(|e| AppError::IdpApi(format!("Userinfo request failed: {}", e)))?;

        self.check_response_json(response).await
    }

    /// Look up a user in the directory by subject id (user-pool
    /// credentials, includes the `identities` array).
    pub async fn fetch_user_by_sub(&self, sub: &str) -> Result<Value, AppError> {
        let url = format!("{}/api/v2/users/{}", self.issuer_url, sub);

        let response = self
            .http
            .get(&url)
            .header("x-userpool-id", &self.userpool_id)
            .bearer_auth(&self.userpool_secret)
            .send()
            .await
            .map_err(|e| AppError::IdpApi(format!("Directory request failed: {}", e)))?;

        self.check_response_json(response).await
    }

    /// Check response status and parse the JSON body.
    async fn check_response_json<T: for<'de> serde::Deserialize<'de>>(
        &self,
        response: reqwest::Response,
    ) -> Result<T, AppError> {
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::IdpApi(format!("HTTP {}: {}", status, body)));
        }

        response
            .json()
            .await
            .map_err(|e| AppError::IdpApi(format!("JSON parse error: {}", e)))
    }
}
