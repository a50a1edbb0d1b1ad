// SPDX-License-Identifier: MIT

//! Identity reconciliation: merges IdP profile data into the local
//! user / detail / token records on every login.
//!
//! Failure handling is deliberately asymmetric and matches the system's
//! historical contract: a failed user INSERT aborts the login, while a
//! failed user UPDATE, detail write or token-record write is logged and
//! reconciliation continues. Concurrent logins for one subject are
//! serialized with a per-subject mutex; gate verification never takes a
//! lock.

use crate::db::{IdentityStore, StoreSession};
use crate::error::AppError;
use crate::models::{
    DetailPatch, IdpProfile, IdpUserInfo, TokenGrant, TokenPatch, TokenRecord, User, UserDetail,
    UserPatch, UserStatus,
};
use crate::time_utils::{format_utc_rfc3339, now_rfc3339};
use chrono::{Duration, Utc};
use dashmap::DashMap;
use md5::{Digest, Md5};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Reconciliation service.
pub struct ReconcileService {
    store: Arc<dyn IdentityStore>,
    user_expiry_days: i64,
    atomic: bool,
    /// Per-subject mutex to serialize reconciliation for one `sub_uid`.
    sub_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl ReconcileService {
    pub fn new(store: Arc<dyn IdentityStore>, user_expiry_days: i64, atomic: bool) -> Self {
        Self {
            store,
            user_expiry_days,
            atomic,
            sub_locks: DashMap::new(),
        }
    }

    /// Reconcile a login event into the local records.
    ///
    /// `federated_identity_id` is the identity id the caller authenticated
    /// with (empty when the IdP reported none); `session_token` is cached
    /// onto the user row. Returns the local user id.
    pub async fn reconcile(
        &self,
        federated_identity_id: &str,
        profile: &IdpProfile,
        grant: &TokenGrant,
        session_token: &str,
    ) -> Result<i64, AppError> {
        if profile.sub_uid.is_empty() {
            return Err(AppError::BadRequest("profile carries no subject".into()));
        }

        let lock = self
            .sub_locks
            .entry(profile.sub_uid.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = lock.lock().await;

        let mut session = self.store.session(self.atomic).await?;

        let now = now_rfc3339();
        let expiration =
            format_utc_rfc3339(Utc::now() + Duration::days(self.user_expiry_days));

        // ─── User row ────────────────────────────────────────────────
        let existing = session.find_user_by_sub(&profile.sub_uid).await?;

        let user_id = match &existing {
            Some(user) => {
                let patch = diff_user_patch(user, profile, session_token, &expiration, &now);
                if let Err(e) = session.update_user(user.user_id, &patch).await {
                    tracing::error!(
                        sub_uid = %profile.sub_uid,
                        error = %e,
                        "User update failed, continuing reconciliation"
                    );
                }
                user.user_id
            }
            None => {
                let row = full_user_row(profile, session_token, &expiration, &now);
                // Insert failure is fatal for this login attempt.
                session.insert_user(&row).await?
            }
        };

        // ─── Detail rows ─────────────────────────────────────────────
        // Everything below is lenient: failures are logged, never fatal.
        let mut mirrored: Option<IdpUserInfo> = None;

        if federated_identity_id.is_empty() {
            if let Some((identity_id, provider_label)) = derived_identity_key(profile) {
                let mut row = detail_base_row(user_id, profile);
                row.identity_id = identity_id;
                row.provider = provider_label.to_string();
                row.user_name = profile.user_name.clone();
                row.nick_name = profile.nick_name.clone();
                row.photo = profile.picture.clone();
                row.email = profile.email.clone();

                let mut patch = detail_base_patch(profile);
                patch.user_name = Some(row.user_name.clone());
                patch.nick_name = Some(row.nick_name.clone());
                patch.photo = Some(row.photo.clone());
                patch.email = Some(row.email.clone());
                // The provider label is written on insert only; an
                // existing derived row keeps its original label.

                self.upsert_detail(&mut session, row, patch, &now).await;
            }
            // No phone and no email: nothing to key a detail row by.
        } else {
            for identity in &profile.identities {
                if identity.identity_id.is_empty() {
                    continue;
                }
                if identity.identity_id == federated_identity_id {
                    mirrored = Some(identity.user_info.clone());
                }

                let mut row = detail_base_row(user_id, profile);
                row.identity_id = identity.identity_id.clone();
                row.openid = identity.openid.clone();
                row.provider = identity.provider.clone();
                row.ext_idp_id = identity.ext_idp_id.clone();
                row.user_id_in_idp = identity.user_id_in_idp.clone();
                row.company = identity.company.clone();
                row.city = identity.city.clone();
                row.user_name = identity.user_info.user_name.clone();
                row.nick_name = identity.user_info.name.clone();
                row.photo = identity.user_info.avatar.clone();
                row.email = identity.email.clone();

                let mut patch = detail_base_patch(profile);
                patch.openid = Some(row.openid.clone());
                patch.provider = Some(row.provider.clone());
                patch.ext_idp_id = Some(row.ext_idp_id.clone());
                patch.user_id_in_idp = Some(row.user_id_in_idp.clone());
                patch.user_name = Some(row.user_name.clone());
                patch.nick_name = Some(row.nick_name.clone());
                patch.photo = Some(row.photo.clone());
                patch.company = Some(row.company.clone());
                patch.city = Some(row.city.clone());
                patch.email = Some(row.email.clone());

                self.upsert_detail(&mut session, row, patch, &now).await;
            }

            // A repeat login through a known federated identity refreshes
            // the user's primary display fields from that identity.
            if let Some(info) = mirrored {
                match session.find_user_by_sub(&profile.sub_uid).await {
                    Ok(Some(_)) => {
                        let patch = UserPatch {
                            phone_number: (!info.phone.is_empty()).then(|| info.phone.clone()),
                            email: (!info.email.is_empty()).then(|| info.email.clone()),
                            picture: Some(info.avatar.clone()),
                            user_name: Some(info.user_name.clone()),
                            nick_name: Some(info.name.clone()),
                            ..Default::default()
                        };
                        if let Err(e) = session.update_user(user_id, &patch).await {
                            tracing::error!(user_id, error = %e, "Mirror update failed");
                        }
                    }
                    Ok(None) => {}
                    Err(e) => {
                        tracing::error!(user_id, error = %e, "Mirror lookup failed");
                    }
                }
            }
        }

        // ─── Token record ────────────────────────────────────────────
        self.upsert_token_record(&mut session, user_id, grant, &now)
            .await;

        session.commit().await?;

        Ok(user_id)
    }

    /// Upsert one detail row by `identity_id`. The update path preserves
    /// the primary key, the owning user and `create_time`. Never fatal.
    async fn upsert_detail(
        &self,
        session: &mut Box<dyn StoreSession>,
        mut row: UserDetail,
        mut patch: DetailPatch,
        now: &str,
    ) {
        match session.find_detail_by_identity(&row.identity_id).await {
            Ok(Some(existing)) => {
                patch.update_time = Some(now.to_string());
                if let Err(e) = session.update_detail(existing.user_detail_id, &patch).await {
                    tracing::error!(
                        identity_id = %row.identity_id,
                        error = %e,
                        "Detail update failed"
                    );
                }
            }
            Ok(None) => {
                row.create_time = now.to_string();
                if let Err(e) = session.insert_detail(&row).await {
                    tracing::error!(
                        identity_id = %row.identity_id,
                        error = %e,
                        "Detail insert failed"
                    );
                }
            }
            Err(e) => {
                tracing::error!(
                    identity_id = %row.identity_id,
                    error = %e,
                    "Detail lookup failed"
                );
            }
        }
    }

    /// Upsert the latest provider token for a user. A fresh authorization
    /// code widens the update to the code and id-token columns. Never
    /// fatal.
    async fn upsert_token_record(
        &self,
        session: &mut Box<dyn StoreSession>,
        user_id: i64,
        grant: &TokenGrant,
        now: &str,
    ) {
        let existing = match session.find_token_by_user(user_id).await {
            Ok(found) => found,
            Err(e) => {
                tracing::error!(user_id, error = %e, "Token record lookup failed");
                None
            }
        };

        match existing {
            Some(record) => {
                let mut patch = TokenPatch {
                    access_token: Some(grant.access_token.clone()),
                    refresh_token: Some(grant.refresh_token.clone()),
                    token_type: Some(grant.token_type.clone()),
                    scope: Some(grant.scope.clone()),
                    expires_in: Some(grant.expires_in),
                    created_at: Some(grant.created_at),
                    update_time: Some(now.to_string()),
                    ..Default::default()
                };
                if !grant.auth_code.is_empty() {
                    patch.auth_code = Some(grant.auth_code.clone());
                    patch.id_token = Some(grant.id_token.clone());
                }
                if let Err(e) = session.update_token(record.id, &patch).await {
                    tracing::error!(user_id, error = %e, "Token record update failed");
                }
            }
            None => {
                let record = TokenRecord {
                    id: 0,
                    user_id,
                    access_token: grant.access_token.clone(),
                    refresh_token: grant.refresh_token.clone(),
                    id_token: grant.id_token.clone(),
                    token_type: grant.token_type.clone(),
                    scope: grant.scope.clone(),
                    expires_in: grant.expires_in,
                    created_at: grant.created_at,
                    auth_code: grant.auth_code.clone(),
                    create_time: now.to_string(),
                    update_time: String::new(),
                };
                if let Err(e) = session.insert_token(&record).await {
                    tracing::error!(user_id, error = %e, "Token record insert failed");
                }
            }
        }
    }
}

/// Derived identity key for profiles with no federated identity: md5 hex
/// of phone+email, preferring phone. No phone and no email means no key.
pub fn derived_identity_key(profile: &IdpProfile) -> Option<(String, &'static str)> {
    let (source, label) = if !profile.phone_number.is_empty() && !profile.email.is_empty() {
        (
            format!("{}{}", profile.phone_number, profile.email),
            "PhoneNumber,Email",
        )
    } else if !profile.phone_number.is_empty() {
        (profile.phone_number.clone(), "PhoneNumber")
    } else if !profile.email.is_empty() {
        (profile.email.clone(), "Email")
    } else {
        return None;
    };
    Some((hex::encode(Md5::digest(source.as_bytes())), label))
}

/// Full user row for the create path.
fn full_user_row(profile: &IdpProfile, session_token: &str, expiration: &str, now: &str) -> User {
    let mut user = User::with_sub(&profile.sub_uid);
    user.name = profile.name.clone();
    user.user_name = profile.user_name.clone();
    user.nick_name = profile.nick_name.clone();
    user.picture = profile.picture.clone();
    user.phone_number = profile.phone_number.clone();
    user.phone_number_verified = profile.phone_number_verified;
    user.email = profile.email.clone();
    user.email_verified = profile.email_verified;
    user.access_token = session_token.to_string();
    user.expiration_time = expiration.to_string();
    user.status = profile_status(profile);
    user.create_time = now.to_string();
    user
}

/// Sparse patch for the update path: only fields whose value actually
/// changed are written, so the login never clobbers columns it did not
/// supply.
fn diff_user_patch(
    existing: &User,
    profile: &IdpProfile,
    session_token: &str,
    expiration: &str,
    now: &str,
) -> UserPatch {
    fn changed(old: &str, new: &str) -> Option<String> {
        (old != new).then(|| new.to_string())
    }

    let status = profile_status(profile);
    UserPatch {
        name: changed(&existing.name, &profile.name),
        user_name: changed(&existing.user_name, &profile.user_name),
        nick_name: changed(&existing.nick_name, &profile.nick_name),
        picture: changed(&existing.picture, &profile.picture),
        phone_number: changed(&existing.phone_number, &profile.phone_number),
        phone_number_verified: (existing.phone_number_verified != profile.phone_number_verified)
            .then_some(profile.phone_number_verified),
        email: changed(&existing.email, &profile.email),
        email_verified: (existing.email_verified != profile.email_verified)
            .then_some(profile.email_verified),
        access_token: changed(&existing.access_token, session_token),
        expiration_time: changed(&existing.expiration_time, expiration),
        status: (existing.status != status).then_some(status),
        update_time: Some(now.to_string()),
    }
}

fn profile_status(profile: &IdpProfile) -> UserStatus {
    if profile.is_deleted {
        UserStatus::Deleted
    } else if profile.blocked {
        UserStatus::Blocked
    } else {
        UserStatus::Active
    }
}

/// Address/locale block shared by every detail row of a login.
fn detail_base_row(user_id: i64, profile: &IdpProfile) -> UserDetail {
    UserDetail {
        user_id,
        gender: profile.gender.clone(),
        birthdate: profile.birthdate.clone(),
        locale: profile.locale.clone(),
        zoneinfo: profile.zoneinfo.clone(),
        website: profile.website.clone(),
        profile_url: profile.profile_url.clone(),
        preferred_username: profile.preferred_username.clone(),
        given_name: profile.given_name.clone(),
        middle_name: profile.middle_name.clone(),
        family_name: profile.family_name.clone(),
        formatted: profile.formatted.clone(),
        street_address: profile.street_address.clone(),
        locality: profile.locality.clone(),
        region: profile.region.clone(),
        postal_code: profile.postal_code.clone(),
        country: profile.country.clone(),
        idp_updated_at: profile.updated_at.clone(),
        ..Default::default()
    }
}

fn detail_base_patch(profile: &IdpProfile) -> DetailPatch {
    DetailPatch {
        gender: Some(profile.gender.clone()),
        birthdate: Some(profile.birthdate.clone()),
        locale: Some(profile.locale.clone()),
        zoneinfo: Some(profile.zoneinfo.clone()),
        website: Some(profile.website.clone()),
        profile_url: Some(profile.profile_url.clone()),
        preferred_username: Some(profile.preferred_username.clone()),
        given_name: Some(profile.given_name.clone()),
        middle_name: Some(profile.middle_name.clone()),
        family_name: Some(profile.family_name.clone()),
        formatted: Some(profile.formatted.clone()),
        street_address: Some(profile.street_address.clone()),
        locality: Some(profile.locality.clone()),
        region: Some(profile.region.clone()),
        postal_code: Some(profile.postal_code.clone()),
        country: Some(profile.country.clone()),
        idp_updated_at: Some(profile.updated_at.clone()),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derived_identity_key_precedence() {
        let mut profile = IdpProfile {
            phone_number: "13500000000".into(),
            email: "a@example.com".into(),
            ..Default::default()
        };
        let (both, label) = derived_identity_key(&profile).unwrap();
        assert_eq!(label, "PhoneNumber,Email");
        assert_eq!(
            both,
            hex::encode(Md5::digest(b"13500000000a@example.com"))
        );

        profile.email.clear();
        let (phone_only, label) = derived_identity_key(&profile).unwrap();
        assert_eq!(label, "PhoneNumber");
        assert_eq!(phone_only, hex::encode(Md5::digest(b"13500000000")));

        profile.phone_number.clear();
        assert!(derived_identity_key(&profile).is_none());
    }

    #[test]
    fn test_diff_user_patch_only_changes() {
        let profile = IdpProfile {
            sub_uid: "s".into(),
            name: "Ada".into(),
            email: "new@example.com".into(),
            ..Default::default()
        };
        let mut existing = full_user_row(&profile, "tok", "2026-01-01T00:00:00Z", "now");
        existing.user_id = 7;
        existing.email = "old@example.com".into();

        let patch = diff_user_patch(&existing, &profile, "tok", "2026-01-01T00:00:00Z", "later");
        assert_eq!(patch.email.as_deref(), Some("new@example.com"));
        assert!(patch.name.is_none());
        assert!(patch.access_token.is_none());
        assert!(patch.expiration_time.is_none());
        assert_eq!(patch.update_time.as_deref(), Some("later"));
    }
}
