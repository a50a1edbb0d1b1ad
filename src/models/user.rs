//! Stored identity records and their partial-update builders.
//!
//! Updates go through typed patch structs: a patch carries `Some(...)` for
//! exactly the columns a write should touch, so a login event never
//! clobbers fields it did not supply.

/// Lifecycle state of a user record. Users are never hard-deleted; the
/// status flag flips instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type)]
#[repr(i16)]
pub enum UserStatus {
    Active = 1,
    Blocked = 2,
    Deleted = 3,
}

/// Canonical user record, one per IdP subject.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct User {
    /// Local numeric id (generated on insert)
    pub user_id: i64,
    /// IdP subject identifier; unique, immutable once set
    pub sub_uid: String,
    pub name: String,
    pub user_name: String,
    pub nick_name: String,
    pub picture: String,
    pub phone_number: String,
    pub phone_number_verified: bool,
    pub email: String,
    pub email_verified: bool,
    /// Last provider access token seen for this user (cached)
    pub access_token: String,
    /// Sliding expiration of the cached login, RFC3339
    pub expiration_time: String,
    pub status: UserStatus,
    pub create_time: String,
    pub update_time: String,
}

impl User {
    /// Empty record for the create path; callers fill profile fields in.
    pub fn with_sub(sub_uid: &str) -> Self {
        Self {
            user_id: 0,
            sub_uid: sub_uid.to_string(),
            name: String::new(),
            user_name: String::new(),
            nick_name: String::new(),
            picture: String::new(),
            phone_number: String::new(),
            phone_number_verified: false,
            email: String::new(),
            email_verified: false,
            access_token: String::new(),
            expiration_time: String::new(),
            status: UserStatus::Active,
            create_time: String::new(),
            update_time: String::new(),
        }
    }
}

/// Partial update for a user row.
#[derive(Debug, Clone, Default)]
pub struct UserPatch {
    pub name: Option<String>,
    pub user_name: Option<String>,
    pub nick_name: Option<String>,
    pub picture: Option<String>,
    pub phone_number: Option<String>,
    pub phone_number_verified: Option<bool>,
    pub email: Option<String>,
    pub email_verified: Option<bool>,
    pub access_token: Option<String>,
    pub expiration_time: Option<String>,
    pub status: Option<UserStatus>,
    pub update_time: Option<String>,
}

impl UserPatch {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.user_name.is_none()
            && self.nick_name.is_none()
            && self.picture.is_none()
            && self.phone_number.is_none()
            && self.phone_number_verified.is_none()
            && self.email.is_none()
            && self.email_verified.is_none()
            && self.access_token.is_none()
            && self.expiration_time.is_none()
            && self.status.is_none()
            && self.update_time.is_none()
    }

    /// Apply to an in-memory row (memory store and tests).
    pub fn apply(&self, user: &mut User) {
        if let Some(v) = &self.name {
            user.name = v.clone();
        }
        if let Some(v) = &self.user_name {
            user.user_name = v.clone();
        }
        if let Some(v) = &self.nick_name {
            user.nick_name = v.clone();
        }
        if let Some(v) = &self.picture {
            user.picture = v.clone();
        }
        if let Some(v) = &self.phone_number {
            user.phone_number = v.clone();
        }
        if let Some(v) = self.phone_number_verified {
            user.phone_number_verified = v;
        }
        if let Some(v) = &self.email {
            user.email = v.clone();
        }
        if let Some(v) = self.email_verified {
            user.email_verified = v;
        }
        if let Some(v) = &self.access_token {
            user.access_token = v.clone();
        }
        if let Some(v) = &self.expiration_time {
            user.expiration_time = v.clone();
        }
        if let Some(v) = self.status {
            user.status = v;
        }
        if let Some(v) = &self.update_time {
            user.update_time = v.clone();
        }
    }
}

/// Extended profile row, one per federated (or derived) identity.
#[derive(Debug, Clone, Default, sqlx::FromRow)]
pub struct UserDetail {
    /// Local numeric id (generated on insert)
    pub user_detail_id: i64,
    /// Owning user
    pub user_id: i64,
    /// Federated identity id from the IdP, or a derived hash of
    /// phone/email when the IdP reports none. Unique.
    pub identity_id: String,
    pub openid: String,
    pub provider: String,
    pub ext_idp_id: String,
    pub user_id_in_idp: String,
    pub user_name: String,
    pub nick_name: String,
    pub photo: String,
    pub company: String,
    pub city: String,
    pub email: String,
    pub gender: String,
    pub birthdate: String,
    pub locale: String,
    pub zoneinfo: String,
    pub website: String,
    pub profile_url: String,
    pub preferred_username: String,
    pub given_name: String,
    pub middle_name: String,
    pub family_name: String,
    pub formatted: String,
    pub street_address: String,
    pub locality: String,
    pub region: String,
    pub postal_code: String,
    pub country: String,
    /// `updated_at` as reported by the IdP
    pub idp_updated_at: String,
    pub create_time: String,
    pub update_time: String,
}

/// Partial update for a detail row. Primary key, owning user and
/// `create_time` are never part of a patch.
#[derive(Debug, Clone, Default)]
pub struct DetailPatch {
    pub openid: Option<String>,
    pub provider: Option<String>,
    pub ext_idp_id: Option<String>,
    pub user_id_in_idp: Option<String>,
    pub user_name: Option<String>,
    pub nick_name: Option<String>,
    pub photo: Option<String>,
    pub company: Option<String>,
    pub city: Option<String>,
    pub email: Option<String>,
    pub gender: Option<String>,
    pub birthdate: Option<String>,
    pub locale: Option<String>,
    pub zoneinfo: Option<String>,
    pub website: Option<String>,
    pub profile_url: Option<String>,
    pub preferred_username: Option<String>,
    pub given_name: Option<String>,
    pub middle_name: Option<String>,
    pub family_name: Option<String>,
    pub formatted: Option<String>,
    pub street_address: Option<String>,
    pub locality: Option<String>,
    pub region: Option<String>,
    pub postal_code: Option<String>,
    pub country: Option<String>,
    pub idp_updated_at: Option<String>,
    pub update_time: Option<String>,
}

impl DetailPatch {
    pub fn apply(&self, detail: &mut UserDetail) {
        macro_rules! copy {
            ($($field:ident),* $(,)?) => {
                $(if let Some(v) = &self.$field {
                    detail.$field = v.clone();
                })*
            };
        }
        copy!(
            openid,
            provider,
            ext_idp_id,
            user_id_in_idp,
            user_name,
            nick_name,
            photo,
            company,
            city,
            email,
            gender,
            birthdate,
            locale,
            zoneinfo,
            website,
            profile_url,
            preferred_username,
            given_name,
            middle_name,
            family_name,
            formatted,
            street_address,
            locality,
            region,
            postal_code,
            country,
            idp_updated_at,
            update_time,
        );
    }
}

/// Latest provider token for a user, one row per user.
#[derive(Debug, Clone, Default, sqlx::FromRow)]
pub struct TokenRecord {
    /// Local numeric id (generated on insert)
    pub id: i64,
    pub user_id: i64,
    pub access_token: String,
    pub refresh_token: String,
    pub id_token: String,
    pub token_type: String,
    pub scope: String,
    /// Provider-reported lifetime in seconds
    pub expires_in: i64,
    /// Provider-reported issuance time, Unix seconds
    pub created_at: i64,
    /// Authorization code of the most recent code exchange
    pub auth_code: String,
    pub create_time: String,
    pub update_time: String,
}

/// Partial update for a token record.
#[derive(Debug, Clone, Default)]
pub struct TokenPatch {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub id_token: Option<String>,
    pub token_type: Option<String>,
    pub scope: Option<String>,
    pub expires_in: Option<i64>,
    pub created_at: Option<i64>,
    pub auth_code: Option<String>,
    pub update_time: Option<String>,
}

impl TokenPatch {
    pub fn apply(&self, rec: &mut TokenRecord) {
        if let Some(v) = &self.access_token {
            rec.access_token = v.clone();
        }
        if let Some(v) = &self.refresh_token {
            rec.refresh_token = v.clone();
        }
        if let Some(v) = &self.id_token {
            rec.id_token = v.clone();
        }
        if let Some(v) = &self.token_type {
            rec.token_type = v.clone();
        }
        if let Some(v) = &self.scope {
            rec.scope = v.clone();
        }
        if let Some(v) = self.expires_in {
            rec.expires_in = v;
        }
        if let Some(v) = self.created_at {
            rec.created_at = v;
        }
        if let Some(v) = &self.auth_code {
            rec.auth_code = v.clone();
        }
        if let Some(v) = &self.update_time {
            rec.update_time = v.clone();
        }
    }
}
