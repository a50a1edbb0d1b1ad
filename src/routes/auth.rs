// SPDX-License-Identifier: MIT

//! Login routes: IdP redirect, OAuth callback and subject login.

use axum::{
    extract::{Query, State},
    response::Redirect,
    routing::{get, post},
    Json, Router,
};
use axum_extra::extract::cookie::{Cookie, CookieJar};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{AppError, Result};
use crate::services::login::LoginUserData;
use crate::AppState;

// Type alias for HMAC-SHA256
type HmacSha256 = Hmac<Sha256>;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/auth/authorize", get(auth_start))
        .route("/auth/callback", get(auth_callback))
        .route("/auth/token-login", post(token_login))
        .route("/auth/logout", get(logout))
}

/// Query parameters for starting the login flow.
#[derive(Deserialize)]
pub struct AuthStartParams {
    /// Frontend URL to redirect back to after login completes.
    /// If not provided, uses the configured frontend URL.
    #[serde(default)]
    redirect_uri: Option<String>,
}

/// Start the login flow - redirect to the IdP authorization endpoint.
async fn auth_start(
    State(state): State<Arc<AppState>>,
    Query(params): Query<AuthStartParams>,
) -> Result<Redirect> {
    let frontend_url = params
        .redirect_uri
        .unwrap_or_else(|| state.config.frontend_url.clone());

    // Encode frontend URL + timestamp in state
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|e| AppError::Internal(anyhow::anyhow!("System time error: {}", e)))?
        .as_millis();

    // Create the data payload: "frontend_url|timestamp_hex"
    let state_payload = format!("{}|{:x}", frontend_url, timestamp);

    // Sign the payload
    let mut mac = HmacSha256::new_from_slice(&state.config.oauth_state_key)
        .map_err(|e| AppError::Internal(anyhow::anyhow!("HMAC init failed: {}", e)))?;
    mac.update(state_payload.as_bytes());
    let signature = mac.finalize().into_bytes();

    // Combine payload + signature: "payload|signature_hex", then base64
    // for the URL
    let signed_state = format!("{}|{}", state_payload, hex::encode(signature));
    let oauth_state = URL_SAFE_NO_PAD.encode(signed_state.as_bytes());

    let auth_url = format!(
        "{}/oidc/auth?\
         client_id={}&\
         redirect_uri={}&\
         response_type=code&\
         scope=openid%20profile%20email%20external_id%20phone&\
         state={}",
        state.config.idp_issuer_url,
        state.config.idp_client_id,
        urlencoding::encode(&state.config.idp_redirect_url),
        oauth_state
    );

    tracing::info!(
        client_id = %state.config.idp_client_id,
        frontend_url = %frontend_url,
        "Starting login flow, redirecting to the IdP"
    );

    Ok(Redirect::temporary(&auth_url))
}

#[derive(Deserialize)]
pub struct CallbackParams {
    code: String,
    #[serde(default)]
    state: String,
    #[serde(default)]
    error: Option<String>,
}

/// OAuth callback - exchange the code, reconcile the user and hand the
/// issued token back.
async fn auth_callback(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Query(params): Query<CallbackParams>,
) -> Result<(CookieJar, Json<LoginUserData>)> {
    if verify_and_decode_state(&params.state, &state.config.oauth_state_key).is_none() {
        tracing::warn!("Invalid or tampered state parameter on callback");
    }

    if let Some(error) = params.error {
        tracing::warn!(error = %error, "OAuth error from the IdP");
        return Err(AppError::BadRequest(format!("IdP returned error: {}", error)));
    }

    let data = state.login.login_with_code(&params.code).await?;

    tracing::info!(user_id = data.user_id, "Login successful");

    let cookie = Cookie::build(("user_token", data.user_token.clone()))
        .path("/")
        .http_only(true)
        .max_age(time::Duration::hours(1))
        .build();

    Ok((jar.add(cookie), Json(data)))
}

/// Request body for subject login.
#[derive(Deserialize)]
pub struct TokenLoginParams {
    #[serde(default)]
    id: String,
    #[serde(default, rename = "federationIdentityId")]
    federation_identity_id: String,
}

/// Subject login - an already-authenticated IdP session presents its
/// subject and federated identity ids.
async fn token_login(
    State(state): State<Arc<AppState>>,
    Json(params): Json<TokenLoginParams>,
) -> Result<Json<LoginUserData>> {
    if params.id.is_empty() {
        return Err(AppError::BadRequest("id is required".into()));
    }

    let data = state
        .login
        .login_with_sub(&params.id, &params.federation_identity_id)
        .await?;

    tracing::info!(user_id = data.user_id, "Subject login successful");

    Ok(Json(data))
}

/// Logout - clears the callback cookie; tokens are stateless and simply
/// expire.
async fn logout(jar: CookieJar) -> (CookieJar, Redirect) {
    (jar.remove(Cookie::from("user_token")), Redirect::temporary("/"))
}

/// Verify the HMAC signature and decode the frontend URL from the OAuth
/// state parameter.
fn verify_and_decode_state(state: &str, secret: &[u8]) -> Option<String> {
    let bytes = URL_SAFE_NO_PAD.decode(state).ok()?;
    let state_str = String::from_utf8(bytes).ok()?;

    // Format is "frontend_url|timestamp_hex|signature_hex"
    let parts: Vec<&str> = state_str.splitn(3, '|').collect();
    if parts.len() != 3 {
        return None;
    }

    let frontend_url = parts[0];
    let timestamp_hex = parts[1];
    let signature_hex = parts[2];

    // Reconstruct payload and verify signature
    let payload = format!("{}|{}", frontend_url, timestamp_hex);

    let mut mac = HmacSha256::new_from_slice(secret).ok()?;
    mac.update(payload.as_bytes());

    let expected_signature = hex::encode(mac.finalize().into_bytes());

    if signature_hex != expected_signature {
        tracing::error!("OAuth state signature mismatch! Potential tampering.");
        return None;
    }

    Some(frontend_url.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signed_state(frontend_url: &str, secret: &[u8]) -> String {
        let payload = format!("{}|{:x}", frontend_url, 1234567890u128);
        let mut mac = HmacSha256::new_from_slice(secret).unwrap();
        mac.update(payload.as_bytes());
        let signature = hex::encode(mac.finalize().into_bytes());
        URL_SAFE_NO_PAD.encode(format!("{}|{}", payload, signature).as_bytes())
    }

    #[test]
    fn test_verify_and_decode_state_success() {
        let secret = b"secret_key";
        let encoded = signed_state("https://example.com", secret);
        assert_eq!(
            verify_and_decode_state(&encoded, secret),
            Some("https://example.com".to_string())
        );
    }

    #[test]
    fn test_verify_and_decode_state_invalid_signature() {
        let secret = b"secret_key";
        let state_data = format!("{}|{:x}|{}", "https://example.com", 1234567890u128, "bogus");
        let encoded = URL_SAFE_NO_PAD.encode(state_data.as_bytes());
        assert_eq!(verify_and_decode_state(&encoded, secret), None);
    }

    #[test]
    fn test_verify_and_decode_state_wrong_secret() {
        let encoded = signed_state("https://example.com", b"secret_key");
        assert_eq!(verify_and_decode_state(&encoded, b"wrong_key"), None);
    }

    #[test]
    fn test_verify_and_decode_state_malformed() {
        let encoded = URL_SAFE_NO_PAD.encode("invalid|format");
        assert_eq!(verify_and_decode_state(&encoded, b"secret_key"), None);
    }
}
