// SPDX-License-Identifier: MIT

//! Two-layer token codec.
//!
//! An issued token is an HS256-signed outer envelope `{iat, exp, data}`
//! whose `data` claim is the base64 of the AES-encrypted inner credential,
//! itself an HS256 JWT carrying `sub` and the subject's profile claims.
//! One shared key drives both MAC layers and the cipher; splitting the key
//! would invalidate every outstanding token.
//!
//! The inner credential has no expiry of its own; the outer envelope
//! bounds its lifetime.

use crate::crypto::{self, CryptoError};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::Utc;
use jsonwebtoken::{
    decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Token verification/issuance failures.
///
/// The gate collapses all of these into one generic response; the variants
/// exist for internal logs and tests.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TokenError {
    #[error("Shared key has an invalid length")]
    InvalidKeyLength,

    #[error("Inner credential decryption failed")]
    DecryptionFailed,

    #[error("Malformed token envelope")]
    MalformedEnvelope,

    #[error("Invalid envelope signature")]
    InvalidSignature,

    #[error("Invalid inner credential signature")]
    InvalidInnerSignature,

    #[error("Token expired")]
    Expired,

    #[error("Inner credential carries no subject")]
    MissingSubject,

    #[error("No token presented")]
    NoToken,
}

impl From<CryptoError> for TokenError {
    fn from(e: CryptoError) -> Self {
        match e {
            CryptoError::InvalidKeyLength => TokenError::InvalidKeyLength,
            CryptoError::DecryptionFailed => TokenError::DecryptionFailed,
        }
    }
}

/// Outer envelope claims.
#[derive(Debug, Serialize, Deserialize)]
struct EnvelopeClaims {
    /// Issued at (Unix timestamp)
    iat: i64,
    /// Expiration time (Unix timestamp)
    exp: i64,
    /// base64 of the encrypted inner credential
    data: String,
}

/// Result of a successful verification.
#[derive(Debug, Clone)]
pub struct VerifiedToken {
    /// Subject id from the inner credential
    pub sub: String,
    /// The recovered inner JWT text, verbatim
    pub inner_token: String,
    /// Full inner claim set
    pub claims: serde_json::Map<String, Value>,
}

/// Issues and verifies two-layer tokens under one shared key.
#[derive(Clone)]
pub struct TokenCodec {
    key: Vec<u8>,
    ttl_hours: i64,
}

impl TokenCodec {
    pub fn new(key: Vec<u8>, ttl_hours: i64) -> Self {
        Self { key, ttl_hours }
    }

    /// Issue a token over `inner_claims` with the configured TTL.
    pub fn issue(&self, inner_claims: &Value) -> Result<String, TokenError> {
        self.issue_with_ttl(inner_claims, self.ttl_hours)
    }

    /// Issue a token with an explicit TTL in hours.
    pub fn issue_with_ttl(&self, inner_claims: &Value, ttl_hours: i64) -> Result<String, TokenError> {
        let inner_jwt = encode(
            &Header::new(Algorithm::HS256),
            inner_claims,
            &EncodingKey::from_secret(&self.key),
        )
        .map_err(|_| TokenError::MalformedEnvelope)?;

        let ciphertext = crypto::encrypt(inner_jwt.as_bytes(), &self.key)?;
        let data = BASE64.encode(ciphertext);

        let now = Utc::now().timestamp();
        let claims = EnvelopeClaims {
            iat: now,
            exp: now + ttl_hours * 3600,
            data,
        };

        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(&self.key),
        )
        .map_err(|_| TokenError::MalformedEnvelope)
    }

    /// Verify a token and recover the subject and inner claims.
    ///
    /// The order is fixed: envelope signature and expiry first, then
    /// decryption, then the inner signature. Nothing past a failed step
    /// runs.
    pub fn verify(&self, wire: &str) -> Result<VerifiedToken, TokenError> {
        // 1. Outer envelope: signature + expiry.
        let mut outer_validation = Validation::new(Algorithm::HS256);
        outer_validation.leeway = 0;

        let envelope = decode::<EnvelopeClaims>(
            wire,
            &DecodingKey::from_secret(&self.key),
            &outer_validation,
        )
        .map_err(|e| match e.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => TokenError::Expired,
            jsonwebtoken::errors::ErrorKind::InvalidSignature => TokenError::InvalidSignature,
            _ => TokenError::MalformedEnvelope,
        })?;

        // 2. Recover the inner credential.
        let ciphertext = BASE64
            .decode(&envelope.claims.data)
            .map_err(|_| TokenError::MalformedEnvelope)?;
        let inner_bytes = crypto::decrypt(&ciphertext, &self.key)?;
        let inner_token =
            String::from_utf8(inner_bytes).map_err(|_| TokenError::DecryptionFailed)?;

        // 3. Inner credential: signature only, no expiry requirement.
        let mut inner_validation = Validation::new(Algorithm::HS256);
        inner_validation.validate_exp = false;
        inner_validation.validate_aud = false;
        inner_validation.required_spec_claims.clear();

        let inner = decode::<Value>(
            &inner_token,
            &DecodingKey::from_secret(&self.key),
            &inner_validation,
        )
        .map_err(|_| TokenError::InvalidInnerSignature)?;

        // 4. Subject extraction.
        let claims = match inner.claims {
            Value::Object(map) => map,
            _ => return Err(TokenError::MissingSubject),
        };
        let sub = claims
            .get("sub")
            .and_then(Value::as_str)
            .ok_or(TokenError::MissingSubject)?
            .to_string();

        Ok(VerifiedToken {
            sub,
            inner_token,
            claims,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn codec() -> TokenCodec {
        TokenCodec::new(crate::config::DEFAULT_SHARED_KEY.to_vec(), 72)
    }

    #[test]
    fn test_issue_verify_roundtrip() {
        let claims = json!({
            "sub": "subject-42",
            "email": "someone@example.com",
            "nickname": "someone",
        });
        let wire = codec().issue(&claims).unwrap();

        // Three dot-separated segments on the wire.
        assert_eq!(wire.split('.').count(), 3);

        let verified = codec().verify(&wire).unwrap();
        assert_eq!(verified.sub, "subject-42");
        assert_eq!(
            verified.claims.get("email").unwrap().as_str().unwrap(),
            "someone@example.com"
        );
        // The recovered inner credential is itself a three-segment JWT.
        assert_eq!(verified.inner_token.split('.').count(), 3);
    }

    #[test]
    fn test_expired_envelope_rejected() {
        let wire = codec()
            .issue_with_ttl(&json!({"sub": "s"}), -1)
            .unwrap();
        assert_eq!(codec().verify(&wire).unwrap_err(), TokenError::Expired);
    }

    #[test]
    fn test_missing_subject() {
        let wire = codec().issue(&json!({"email": "x@y.z"})).unwrap();
        assert_eq!(
            codec().verify(&wire).unwrap_err(),
            TokenError::MissingSubject
        );
    }

    #[test]
    fn test_non_string_subject() {
        let wire = codec().issue(&json!({"sub": 115})).unwrap();
        assert_eq!(
            codec().verify(&wire).unwrap_err(),
            TokenError::MissingSubject
        );
    }
}
