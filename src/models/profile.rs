//! Normalized identity-provider shapes.
//!
//! These are wire/transient types: the provider adapters produce them from
//! raw IdP JSON and the reconciler consumes them. Nothing here is persisted
//! as-is.

use serde::Deserialize;

/// Per-provider normalized profile carried by a federated identity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdpUserInfo {
    pub phone: String,
    pub email: String,
    pub name: String,
    pub user_name: String,
    pub avatar: String,
}

/// One federated identity reported by the IdP for a user.
#[derive(Debug, Clone, Default)]
pub struct Identity {
    pub openid: String,
    pub identity_id: String,
    pub provider: String,
    pub ext_idp_id: String,
    pub user_id_in_idp: String,
    pub company: String,
    pub city: String,
    pub email: String,
    pub user_info: IdpUserInfo,
}

/// Normalized login profile assembled from IdP data.
///
/// Missing fields are empty strings throughout; the reconciler decides what
/// an empty value means per field.
#[derive(Debug, Clone, Default)]
pub struct IdpProfile {
    /// IdP subject identifier
    pub sub_uid: String,
    pub name: String,
    pub user_name: String,
    pub nick_name: String,
    pub picture: String,
    pub phone_number: String,
    pub phone_number_verified: bool,
    pub email: String,
    pub email_verified: bool,
    pub given_name: String,
    pub family_name: String,
    pub middle_name: String,
    pub preferred_username: String,
    pub profile_url: String,
    pub website: String,
    pub gender: String,
    pub birthdate: String,
    pub zoneinfo: String,
    pub locale: String,
    pub formatted: String,
    pub street_address: String,
    pub locality: String,
    pub region: String,
    pub postal_code: String,
    pub country: String,
    pub updated_at: String,
    pub blocked: bool,
    pub is_deleted: bool,
    /// Federated identities, in IdP order
    pub identities: Vec<Identity>,
}

/// Token-endpoint response from the IdP, plus the authorization code that
/// produced it (empty on refresh-style logins with no fresh code).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TokenGrant {
    #[serde(default)]
    pub access_token: String,
    #[serde(default)]
    pub token_type: String,
    #[serde(default)]
    pub expires_in: i64,
    #[serde(default)]
    pub refresh_token: String,
    #[serde(default)]
    pub id_token: String,
    #[serde(default)]
    pub scope: String,
    #[serde(default)]
    pub created_at: i64,
    #[serde(skip)]
    pub auth_code: String,
}
