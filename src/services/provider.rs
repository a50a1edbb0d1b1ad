// SPDX-License-Identifier: MIT

//! Provider adapters: raw IdP JSON to normalized profiles.
//!
//! Two raw shapes exist: the OIDC userinfo endpoint (flat snake_case
//! claims, nested `address`) and the directory/user-pool API (camelCase,
//! nullable fields, an `identities` array). A missing or null key at any
//! level maps to an empty string.

use crate::models::{IdpProfile, IdpUserInfo, Identity};
use serde_json::Value;

pub const PROVIDER_OAUTH2: &str = "oauth2";
pub const PROVIDER_GITHUB: &str = "github";
pub const PROVIDER_WECHAT: &str = "wechat";

/// String field, absent/null-safe.
fn s(v: &Value, key: &str) -> String {
    v.get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

/// Bool field, absent/null-safe.
fn b(v: &Value, key: &str) -> bool {
    v.get(key).and_then(Value::as_bool).unwrap_or(false)
}

/// Build a profile from an OIDC userinfo response.
pub fn profile_from_userinfo(raw: &Value) -> IdpProfile {
    let mut p = IdpProfile {
        sub_uid: s(raw, "sub"),
        name: s(raw, "name"),
        nick_name: s(raw, "nickname"),
        user_name: s(raw, "preferred_username"),
        picture: s(raw, "picture"),
        phone_number: s(raw, "phone_number"),
        phone_number_verified: b(raw, "phone_number_verified"),
        email: s(raw, "email"),
        email_verified: b(raw, "email_verified"),
        given_name: s(raw, "given_name"),
        family_name: s(raw, "family_name"),
        middle_name: s(raw, "middle_name"),
        preferred_username: s(raw, "preferred_username"),
        profile_url: s(raw, "profile"),
        website: s(raw, "website"),
        gender: s(raw, "gender"),
        birthdate: s(raw, "birthdate"),
        zoneinfo: s(raw, "zoneinfo"),
        locale: s(raw, "locale"),
        updated_at: s(raw, "updated_at"),
        ..Default::default()
    };
    if let Some(address) = raw.get("address") {
        p.formatted = s(address, "formatted");
        p.street_address = s(address, "street_address");
        p.locality = s(address, "locality");
        p.region = s(address, "region");
        p.postal_code = s(address, "postal_code");
        p.country = s(address, "country");
    }
    p
}

/// Build a profile from a directory (user-pool) lookup response.
pub fn profile_from_directory(raw: &Value) -> IdpProfile {
    let mut p = IdpProfile {
        sub_uid: s(raw, "id"),
        name: s(raw, "name"),
        user_name: s(raw, "username"),
        nick_name: s(raw, "nickname"),
        picture: s(raw, "photo"),
        phone_number: s(raw, "phone"),
        phone_number_verified: b(raw, "phoneVerified"),
        email: s(raw, "email"),
        email_verified: b(raw, "emailVerified"),
        given_name: s(raw, "givenName"),
        family_name: s(raw, "familyName"),
        middle_name: s(raw, "middleName"),
        preferred_username: s(raw, "preferredUsername"),
        profile_url: s(raw, "profile"),
        website: s(raw, "website"),
        gender: s(raw, "gender"),
        birthdate: s(raw, "birthdate"),
        zoneinfo: s(raw, "zoneinfo"),
        locale: s(raw, "locale"),
        formatted: s(raw, "formatted"),
        street_address: s(raw, "streetAddress"),
        locality: s(raw, "locality"),
        region: s(raw, "region"),
        postal_code: s(raw, "postalCode"),
        country: s(raw, "country"),
        updated_at: s(raw, "updatedAt"),
        blocked: b(raw, "blocked"),
        is_deleted: b(raw, "isDeleted"),
        ..Default::default()
    };

    let defaults = IdpUserInfo {
        phone: p.phone_number.clone(),
        email: p.email.clone(),
        user_name: p.user_name.clone(),
        name: if p.nick_name.is_empty() {
            p.name.clone()
        } else {
            p.nick_name.clone()
        },
        avatar: p.picture.clone(),
    };

    // Built by appending only; entries without an id carry no identity.
    if let Some(entries) = raw.get("identities").and_then(Value::as_array) {
        for entry in entries {
            let provider = s(entry, "provider");
            let identity = Identity {
                openid: s(entry, "openid"),
                identity_id: s(entry, "id"),
                provider: provider.clone(),
                ext_idp_id: s(entry, "extIdpId"),
                user_id_in_idp: s(entry, "userIdInIdp"),
                company: s(entry, "company"),
                city: s(entry, "city"),
                email: s(entry, "email"),
                user_info: normalize_identity(
                    &provider,
                    entry.get("userInfoInIdp").unwrap_or(&Value::Null),
                    defaults.clone(),
                ),
            };
            p.identities.push(identity);
        }
    }

    p
}

/// Normalize a per-identity raw profile for a known provider family.
///
/// Unknown providers pass the top-level defaults through untouched;
/// reconciliation still proceeds on those.
pub fn normalize_identity(provider: &str, raw: &Value, defaults: IdpUserInfo) -> IdpUserInfo {
    let mut info = defaults;
    match provider {
        PROVIDER_OAUTH2 => {
            info.name = s(raw, "middleName");
            info.user_name = s(raw, "familyName");
            info.avatar = s(raw, "photo");
        }
        PROVIDER_GITHUB => {
            info.name = s(raw, "nickname");
            info.user_name = s(raw, "username");
            info.avatar = s(raw, "photo");
        }
        PROVIDER_WECHAT => {
            info.name = s(raw, "nickname");
            info.avatar = s(raw, "photo");
        }
        _ => {}
    }
    info
}
