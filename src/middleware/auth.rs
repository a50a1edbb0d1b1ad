// SPDX-License-Identifier: MIT

//! Token authentication middleware (the authorization gate).
//!
//! A candidate token is taken from the `token` header, the `token` query
//! parameter, or a `token` field in a JSON request body, first match wins.
//! Verification is stateless; every request re-verifies from scratch.
//!
//! All rejections look the same to the caller. Which verification step
//! failed is internal information and goes to the logs only.

use crate::services::token::TokenError;
use crate::AppState;
use axum::{
    body::Body,
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::Response,
};
use serde::Deserialize;
use std::sync::Arc;

/// Name of the header, query parameter and body field carrying the token.
pub const TOKEN_FIELD: &str = "token";

/// Largest request body the gate will buffer while looking for a token.
const MAX_BODY_BYTES: usize = 1 << 20;

/// Authenticated principal extracted from a verified token.
#[derive(Debug, Clone)]
pub struct AuthUser {
    /// Subject id from the inner credential
    pub sub: String,
    /// Raw inner credential text, for handlers that need the full claims
    pub id_token: String,
}

/// JSON body shape checked as the last token location.
#[derive(Deserialize)]
struct TokenBody {
    #[serde(default)]
    token: String,
}

/// Middleware that requires a valid two-layer token.
pub async fn require_auth(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let (token, request) = extract_token(request).await;

    let Some(token) = token else {
        // Anonymous, not malformed: nothing was presented at all.
        tracing::debug!(error = %TokenError::NoToken, "Rejecting unauthenticated request");
        return Err(StatusCode::UNAUTHORIZED);
    };

    let verified = state.tokens.verify(&token).map_err(|e| {
        tracing::warn!(error = %e, "Token verification failed");
        StatusCode::UNAUTHORIZED
    })?;

    let mut request = request;
    request.extensions_mut().insert(AuthUser {
        sub: verified.sub,
        id_token: verified.inner_token,
    });

    Ok(next.run(request).await)
}

/// Pull a candidate token out of the request. The body is only buffered
/// when header and query carry nothing, and the request is rebuilt so the
/// handler still sees it.
async fn extract_token(request: Request) -> (Option<String>, Request) {
    if let Some(token) = request
        .headers()
        .get(TOKEN_FIELD)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
    {
        return (Some(token.to_string()), request);
    }

    if let Some(token) = request.uri().query().and_then(token_from_query) {
        return (Some(token), request);
    }

    let (parts, body) = request.into_parts();
    let bytes = match axum::body::to_bytes(body, MAX_BODY_BYTES).await {
        Ok(bytes) => bytes,
        Err(_) => {
            return (None, Request::from_parts(parts, Body::empty()));
        }
    };

    let token = serde_json::from_slice::<TokenBody>(&bytes)
        .ok()
        .map(|b| b.token)
        .filter(|t| !t.is_empty());

    (token, Request::from_parts(parts, Body::from(bytes)))
}

fn token_from_query(query: &str) -> Option<String> {
    query.split('&').find_map(|pair| {
        let (key, value) = pair.split_once('=')?;
        if key != TOKEN_FIELD || value.is_empty() {
            return None;
        }
        Some(
            urlencoding::decode(value)
                .map(|v| v.into_owned())
                .unwrap_or_else(|_| value.to_string()),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_from_query() {
        assert_eq!(
            token_from_query("a=1&token=abc.def.ghi&b=2").as_deref(),
            Some("abc.def.ghi")
        );
        assert_eq!(token_from_query("a=1&b=2"), None);
        assert_eq!(token_from_query("token="), None);
        // Percent-encoded values decode.
        assert_eq!(token_from_query("token=a%2Bb").as_deref(), Some("a+b"));
    }
}
