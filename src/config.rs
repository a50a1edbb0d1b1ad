//! Application configuration loaded from environment variables.
//!
//! The shared token key doubles as MAC key and cipher key for issued
//! tokens; the built-in fallback exists so local setups boot, and must be
//! overridden with `TOKEN_KEY` anywhere real tokens are issued.

use std::env;

/// Built-in shared key fallback (32 bytes, AES-256 sized). Insecure by
/// definition: it ships with the source. Override with `TOKEN_KEY`.
pub const DEFAULT_SHARED_KEY: &[u8; 32] = b"k3W#pV8$nQz5xC!rT1uB7yM4sJ9dF2hL";

/// Default lifetime of an issued outer envelope, in hours.
pub const DEFAULT_TOKEN_TTL_HOURS: i64 = 72;

/// Default sliding expiration window for user records, in days.
pub const DEFAULT_USER_EXPIRY_DAYS: i64 = 30;

/// Application configuration, loaded once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    // --- Server ---
    /// Server port
    pub port: u16,
    /// Frontend URL for login redirects and CORS
    pub frontend_url: String,
    /// Postgres connection string
    pub database_url: String,

    // --- Identity provider ---
    /// IdP application client ID (public)
    pub idp_client_id: String,
    /// IdP application client secret
    pub idp_client_secret: String,
    /// IdP user-pool ID (directory lookups)
    pub idp_userpool_id: String,
    /// IdP user-pool secret
    pub idp_userpool_secret: String,
    /// IdP issuer base URL (token + userinfo endpoints live under it)
    pub idp_issuer_url: String,
    /// OAuth redirect URL registered with the IdP
    pub idp_redirect_url: String,

    // --- Tokens ---
    /// Shared signing/encryption key for issued tokens (raw bytes).
    /// One key for both layers; splitting it would invalidate every
    /// outstanding token.
    pub shared_key: Vec<u8>,
    /// Outer envelope lifetime in hours
    pub token_ttl_hours: i64,
    /// User record expiration window in days
    pub user_expiry_days: i64,
    /// HMAC key for the OAuth `state` parameter
    pub oauth_state_key: Vec<u8>,

    // --- Reconciliation ---
    /// Wrap each reconciliation in a single storage transaction.
    /// Off by default: the historical behavior allows partial progress
    /// when a later write fails.
    pub reconcile_atomic: bool,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok(); // Load .env file if present

        let shared_key = env::var("TOKEN_KEY")
            .map(String::into_bytes)
            .unwrap_or_else(|_| DEFAULT_SHARED_KEY.to_vec());

        let oauth_state_key = env::var("OAUTH_STATE_KEY")
            .map(String::into_bytes)
            .unwrap_or_else(|_| shared_key.clone());

        Ok(Self {
            port: env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .unwrap_or(8080),
            frontend_url: env::var("FRONTEND_URL")
                .unwrap_or_else(|_| "http://localhost:5173".to_string()),
            database_url: env::var("DATABASE_URL")
                .map_err(|_| ConfigError::Missing("DATABASE_URL"))?,

            idp_client_id: env::var("IDP_CLIENT_ID")
                .map_err(|_| ConfigError::Missing("IDP_CLIENT_ID"))?,
            idp_client_secret: env::var("IDP_CLIENT_SECRET")
                .map(|v| v.trim().to_string())
                .map_err(|_| ConfigError::Missing("IDP_CLIENT_SECRET"))?,
            idp_userpool_id: env::var("IDP_USERPOOL_ID").unwrap_or_default(),
            idp_userpool_secret: env::var("IDP_USERPOOL_SECRET")
                .map(|v| v.trim().to_string())
                .unwrap_or_default(),
            idp_issuer_url: env::var("IDP_ISSUER_URL")
                .map_err(|_| ConfigError::Missing("IDP_ISSUER_URL"))?,
            idp_redirect_url: env::var("IDP_REDIRECT_URL").unwrap_or_default(),

            shared_key,
            token_ttl_hours: env_i64("TOKEN_TTL_HOURS", DEFAULT_TOKEN_TTL_HOURS),
            user_expiry_days: env_i64("USER_EXPIRY_DAYS", DEFAULT_USER_EXPIRY_DAYS),
            oauth_state_key,

            reconcile_atomic: env::var("RECONCILE_ATOMIC")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
        })
    }

    /// Default config for testing only.
    pub fn test_default() -> Self {
        Self {
            port: 8080,
            frontend_url: "http://localhost:5173".to_string(),
            database_url: "postgres://localhost/authhub_test".to_string(),
            idp_client_id: "test_client_id".to_string(),
            idp_client_secret: "test_client_secret".to_string(),
            idp_userpool_id: "test_pool_id".to_string(),
            idp_userpool_secret: "test_pool_secret".to_string(),
            idp_issuer_url: "http://localhost:9999".to_string(),
            idp_redirect_url: "http://localhost:8080/auth/callback".to_string(),
            shared_key: DEFAULT_SHARED_KEY.to_vec(),
            token_ttl_hours: DEFAULT_TOKEN_TTL_HOURS,
            user_expiry_days: DEFAULT_USER_EXPIRY_DAYS,
            oauth_state_key: DEFAULT_SHARED_KEY.to_vec(),
            reconcile_atomic: false,
        }
    }
}

fn env_i64(name: &str, default: i64) -> i64 {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),
}
