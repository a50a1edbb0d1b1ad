// SPDX-License-Identifier: MIT

//! Postgres-backed identity store.
//!
//! Partial updates are built with `QueryBuilder` from the typed patch
//! structs, so an UPDATE touches exactly the columns the patch carries.

use crate::db::{IdentityStore, StoreSession};
use crate::error::AppError;
use crate::models::{DetailPatch, TokenPatch, TokenRecord, User, UserDetail, UserPatch};
use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, Transaction};

/// Postgres identity store.
#[derive(Clone)]
pub struct PgIdentityStore {
    pool: PgPool,
}

impl PgIdentityStore {
    /// Connect to Postgres and run pending migrations.
    pub async fn connect(database_url: &str) -> Result<Self, AppError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .map_err(|e| AppError::Database(format!("Failed to connect to Postgres: {}", e)))?;

        sqlx::migrate!()
            .run(&pool)
            .await
            .map_err(|e| AppError::Database(format!("Migration failed: {}", e)))?;

        tracing::info!("Connected to Postgres");

        Ok(Self { pool })
    }

    /// Wrap an existing pool (tests against a throwaway database).
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl IdentityStore for PgIdentityStore {
    async fn session(&self, atomic: bool) -> Result<Box<dyn StoreSession>, AppError> {
        let conn = if atomic {
            let tx = self
                .pool
                .begin()
                .await
                .map_err(|e| AppError::Database(format!("Failed to begin transaction: {}", e)))?;
            PgConn::Tx(tx)
        } else {
            PgConn::Pool(self.pool.clone())
        };
        Ok(Box::new(PgSession { conn }))
    }

    async fn find_user_by_sub(&self, sub_uid: &str) -> Result<Option<User>, AppError> {
        queries::user_by_sub(&self.pool, sub_uid).await
    }

    async fn find_user_by_id(&self, user_id: i64) -> Result<Option<User>, AppError> {
        queries::user_by_id(&self.pool, user_id).await
    }

    async fn find_detail_by_identity(
        &self,
        identity_id: &str,
    ) -> Result<Option<UserDetail>, AppError> {
        queries::detail_by_identity(&self.pool, identity_id).await
    }

    async fn first_detail_for_user(&self, user_id: i64) -> Result<Option<UserDetail>, AppError> {
        queries::first_detail_for_user(&self.pool, user_id).await
    }

    async fn find_token_by_user(&self, user_id: i64) -> Result<Option<TokenRecord>, AppError> {
        queries::token_by_user(&self.pool, user_id).await
    }

    async fn find_token_by_auth_code(
        &self,
        auth_code: &str,
    ) -> Result<Option<TokenRecord>, AppError> {
        queries::token_by_auth_code(&self.pool, auth_code).await
    }

    async fn find_token_by_access_token(
        &self,
        access_token: &str,
    ) -> Result<Option<TokenRecord>, AppError> {
        queries::token_by_access_token(&self.pool, access_token).await
    }
}

/// Either a pool (autocommit writes) or one open transaction.
enum PgConn {
    Pool(PgPool),
    Tx(Transaction<'static, Postgres>),
}

struct PgSession {
    conn: PgConn,
}

#[async_trait]
impl StoreSession for PgSession {
    async fn find_user_by_sub(&mut self, sub_uid: &str) -> Result<Option<User>, AppError> {
        match &mut self.conn {
            PgConn::Pool(pool) => queries::user_by_sub(&*pool, sub_uid).await,
            PgConn::Tx(tx) => queries::user_by_sub(&mut **tx, sub_uid).await,
        }
    }

    async fn insert_user(&mut self, user: &User) -> Result<i64, AppError> {
        match &mut self.conn {
            PgConn::Pool(pool) => queries::insert_user(&*pool, user).await,
            PgConn::Tx(tx) => queries::insert_user(&mut **tx, user).await,
        }
    }

    async fn update_user(&mut self, user_id: i64, patch: &UserPatch) -> Result<(), AppError> {
        match &mut self.conn {
            PgConn::Pool(pool) => queries::update_user(&*pool, user_id, patch).await,
            PgConn::Tx(tx) => queries::update_user(&mut **tx, user_id, patch).await,
        }
    }

    async fn find_detail_by_identity(
        &mut self,
        identity_id: &str,
    ) -> Result<Option<UserDetail>, AppError> {
        match &mut self.conn {
            PgConn::Pool(pool) => queries::detail_by_identity(&*pool, identity_id).await,
            PgConn::Tx(tx) => queries::detail_by_identity(&mut **tx, identity_id).await,
        }
    }

    async fn insert_detail(&mut self, detail: &UserDetail) -> Result<i64, AppError> {
        match &mut self.conn {
            PgConn::Pool(pool) => queries::insert_detail(&*pool, detail).await,
            PgConn::Tx(tx) => queries::insert_detail(&mut **tx, detail).await,
        }
    }

    async fn update_detail(
        &mut self,
        user_detail_id: i64,
        patch: &DetailPatch,
    ) -> Result<(), AppError> {
        match &mut self.conn {
            PgConn::Pool(pool) => queries::update_detail(&*pool, user_detail_id, patch).await,
            PgConn::Tx(tx) => queries::update_detail(&mut **tx, user_detail_id, patch).await,
        }
    }

    async fn find_token_by_user(&mut self, user_id: i64) -> Result<Option<TokenRecord>, AppError> {
        match &mut self.conn {
            PgConn::Pool(pool) => queries::token_by_user(&*pool, user_id).await,
            PgConn::Tx(tx) => queries::token_by_user(&mut **tx, user_id).await,
        }
    }

    async fn insert_token(&mut self, record: &TokenRecord) -> Result<i64, AppError> {
        match &mut self.conn {
            PgConn::Pool(pool) => queries::insert_token(&*pool, record).await,
            PgConn::Tx(tx) => queries::insert_token(&mut **tx, record).await,
        }
    }

    async fn update_token(&mut self, id: i64, patch: &TokenPatch) -> Result<(), AppError> {
        match &mut self.conn {
            PgConn::Pool(pool) => queries::update_token(&*pool, id, patch).await,
            PgConn::Tx(tx) => queries::update_token(&mut **tx, id, patch).await,
        }
    }

    async fn commit(self: Box<Self>) -> Result<(), AppError> {
        match self.conn {
            PgConn::Pool(_) => Ok(()),
            PgConn::Tx(tx) => tx
                .commit()
                .await
                .map_err(|e| AppError::Database(format!("Transaction commit failed: {}", e))),
        }
    }
}

mod queries {
    use super::*;
    use sqlx::PgExecutor;
    use sqlx::QueryBuilder;

    fn db_err(e: sqlx::Error) -> AppError {
        AppError::Database(e.to_string())
    }

    pub async fn user_by_sub<'e, E: PgExecutor<'e>>(
        ex: E,
        sub_uid: &str,
    ) -> Result<Option<User>, AppError> {
        sqlx::query_as::<_, User>("SELECT * FROM auth_user WHERE sub_uid = $1")
            .bind(sub_uid)
            .fetch_optional(ex)
            .await
            .map_err(db_err)
    }

    pub async fn user_by_id<'e, E: PgExecutor<'e>>(
        ex: E,
        user_id: i64,
    ) -> Result<Option<User>, AppError> {
        sqlx::query_as::<_, User>("SELECT * FROM auth_user WHERE user_id = $1")
            .bind(user_id)
            .fetch_optional(ex)
            .await
            .map_err(db_err)
    }

    pub async fn insert_user<'e, E: PgExecutor<'e>>(ex: E, user: &User) -> Result<i64, AppError> {
        sqlx::query_scalar::<_, i64>(
            "INSERT INTO auth_user (sub_uid, name, user_name, nick_name, picture, \
             phone_number, phone_number_verified, email, email_verified, access_token, \
             expiration_time, status, create_time, update_time) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14) \
             RETURNING user_id",
        )
        .bind(&user.sub_uid)
        .bind(&user.name)
        .bind(&user.user_name)
        .bind(&user.nick_name)
        .bind(&user.picture)
        .bind(&user.phone_number)
        .bind(user.phone_number_verified)
        .bind(&user.email)
        .bind(user.email_verified)
        .bind(&user.access_token)
        .bind(&user.expiration_time)
        .bind(user.status)
        .bind(&user.create_time)
        .bind(&user.update_time)
        .fetch_one(ex)
        .await
        .map_err(db_err)
    }

    pub async fn update_user<'e, E: PgExecutor<'e>>(
        ex: E,
        user_id: i64,
        patch: &UserPatch,
    ) -> Result<(), AppError> {
        let mut qb = QueryBuilder::<Postgres>::new("UPDATE auth_user SET ");
        let mut any = false;
        {
            let mut sep = qb.separated(", ");
            macro_rules! col {
                ($field:ident) => {
                    if let Some(v) = &patch.$field {
                        sep.push(concat!(stringify!($field), " = "))
                            .push_bind_unseparated(v.clone());
                        any = true;
                    }
                };
            }
            col!(name);
            col!(user_name);
            col!(nick_name);
            col!(picture);
            col!(phone_number);
            if let Some(v) = patch.phone_number_verified {
                sep.push("phone_number_verified = ").push_bind_unseparated(v);
                any = true;
            }
            col!(email);
            if let Some(v) = patch.email_verified {
                sep.push("email_verified = ").push_bind_unseparated(v);
                any = true;
            }
            col!(access_token);
            col!(expiration_time);
            if let Some(v) = patch.status {
                sep.push("status = ").push_bind_unseparated(v);
                any = true;
            }
            col!(update_time);
        }
        if !any {
            return Ok(());
        }
        qb.push(" WHERE user_id = ").push_bind(user_id);
        qb.build().execute(ex).await.map_err(db_err)?;
        Ok(())
    }

    pub async fn detail_by_identity<'e, E: PgExecutor<'e>>(
        ex: E,
        identity_id: &str,
    ) -> Result<Option<UserDetail>, AppError> {
        sqlx::query_as::<_, UserDetail>("SELECT * FROM auth_user_detail WHERE identity_id = $1")
            .bind(identity_id)
            .fetch_optional(ex)
            .await
            .map_err(db_err)
    }

    pub async fn first_detail_for_user<'e, E: PgExecutor<'e>>(
        ex: E,
        user_id: i64,
    ) -> Result<Option<UserDetail>, AppError> {
        sqlx::query_as::<_, UserDetail>(
            "SELECT * FROM auth_user_detail WHERE user_id = $1 ORDER BY user_detail_id LIMIT 1",
        )
        .bind(user_id)
        .fetch_optional(ex)
        .await
        .map_err(db_err)
    }

    pub async fn insert_detail<'e, E: PgExecutor<'e>>(
        ex: E,
        d: &UserDetail,
    ) -> Result<i64, AppError> {
        sqlx::query_scalar::<_, i64>(
            "INSERT INTO auth_user_detail (user_id, identity_id, openid, provider, \
             ext_idp_id, user_id_in_idp, user_name, nick_name, photo, company, city, email, \
             gender, birthdate, locale, zoneinfo, website, profile_url, preferred_username, \
             given_name, middle_name, family_name, formatted, street_address, locality, \
             region, postal_code, country, idp_updated_at, create_time, update_time) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, \
             $17, $18, $19, $20, $21, $22, $23, $24, $25, $26, $27, $28, $29, $30, $31) \
             RETURNING user_detail_id",
        )
        .bind(d.user_id)
        .bind(&d.identity_id)
        .bind(&d.openid)
        .bind(&d.provider)
        .bind(&d.ext_idp_id)
        .bind(&d.user_id_in_idp)
        .bind(&d.user_name)
        .bind(&d.nick_name)
        .bind(&d.photo)
        .bind(&d.company)
        .bind(&d.city)
        .bind(&d.email)
        .bind(&d.gender)
        .bind(&d.birthdate)
        .bind(&d.locale)
        .bind(&d.zoneinfo)
        .bind(&d.website)
        .bind(&d.profile_url)
        .bind(&d.preferred_username)
        .bind(&d.given_name)
        .bind(&d.middle_name)
        .bind(&d.family_name)
        .bind(&d.formatted)
        .bind(&d.street_address)
        .bind(&d.locality)
        .bind(&d.region)
        .bind(&d.postal_code)
        .bind(&d.country)
        .bind(&d.idp_updated_at)
        .bind(&d.create_time)
        .bind(&d.update_time)
        .fetch_one(ex)
        .await
        .map_err(db_err)
    }

    pub async fn update_detail<'e, E: PgExecutor<'e>>(
        ex: E,
        user_detail_id: i64,
        patch: &DetailPatch,
    ) -> Result<(), AppError> {
        let mut qb = QueryBuilder::<Postgres>::new("UPDATE auth_user_detail SET ");
        let mut any = false;
        {
            let mut sep = qb.separated(", ");
            macro_rules! col {
                ($($field:ident),* $(,)?) => {
                    $(if let Some(v) = &patch.$field {
                        sep.push(concat!(stringify!($field), " = "))
                            .push_bind_unseparated(v.clone());
                        any = true;
                    })*
                };
            }
            col!(
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
        if !any {
            return Ok(());
        }
        qb.push(" WHERE user_detail_id = ").push_bind(user_detail_id);
        qb.build().execute(ex).await.map_err(db_err)?;
        Ok(())
    }

    pub async fn token_by_user<'e, E: PgExecutor<'e>>(
        ex: E,
        user_id: i64,
    ) -> Result<Option<TokenRecord>, AppError> {
        sqlx::query_as::<_, TokenRecord>("SELECT * FROM auth_token_record WHERE user_id = $1")
            .bind(user_id)
            .fetch_optional(ex)
            .await
            .map_err(db_err)
    }

    pub async fn token_by_auth_code<'e, E: PgExecutor<'e>>(
        ex: E,
        auth_code: &str,
    ) -> Result<Option<TokenRecord>, AppError> {
        sqlx::query_as::<_, TokenRecord>(
            "SELECT * FROM auth_token_record WHERE auth_code = $1 ORDER BY id LIMIT 1",
        )
        .bind(auth_code)
        .fetch_optional(ex)
        .await
        .map_err(db_err)
    }

    pub async fn token_by_access_token<'e, E: PgExecutor<'e>>(
        ex: E,
        access_token: &str,
    ) -> Result<Option<TokenRecord>, AppError> {
        sqlx::query_as::<_, TokenRecord>(
            "SELECT * FROM auth_token_record WHERE access_token = $1 ORDER BY id LIMIT 1",
        )
        .bind(access_token)
        .fetch_optional(ex)
        .await
        .map_err(db_err)
    }

    pub async fn insert_token<'e, E: PgExecutor<'e>>(
        ex: E,
        r: &TokenRecord,
    ) -> Result<i64, AppError> {
        sqlx::query_scalar::<_, i64>(
            "INSERT INTO auth_token_record (user_id, access_token, refresh_token, id_token, \
             token_type, scope, expires_in, created_at, auth_code, create_time, update_time) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11) RETURNING id",
        )
        .bind(r.user_id)
        .bind(&r.access_token)
        .bind(&r.refresh_token)
        .bind(&r.id_token)
        .bind(&r.token_type)
        .bind(&r.scope)
        .bind(r.expires_in)
        .bind(r.created_at)
        .bind(&r.auth_code)
        .bind(&r.create_time)
        .bind(&r.update_time)
        .fetch_one(ex)
        .await
        .map_err(db_err)
    }

    pub async fn update_token<'e, E: PgExecutor<'e>>(
        ex: E,
        id: i64,
        patch: &TokenPatch,
    ) -> Result<(), AppError> {
        let mut qb = QueryBuilder::<Postgres>::new("UPDATE auth_token_record SET ");
        let mut any = false;
        {
            let mut sep = qb.separated(", ");
            macro_rules! col {
                ($($field:ident),* $(,)?) => {
                    $(if let Some(v) = &patch.$field {
                        sep.push(concat!(stringify!($field), " = "))
                            .push_bind_unseparated(v.clone());
                        any = true;
                    })*
                };
            }
            col!(access_token, refresh_token, id_token, token_type, scope);
            if let Some(v) = patch.expires_in {
                sep.push("expires_in = ").push_bind_unseparated(v);
                any = true;
            }
            if let Some(v) = patch.created_at {
                sep.push("created_at = ").push_bind_unseparated(v);
                any = true;
            }
            col!(auth_code, update_time);
        }
        if !any {
            return Ok(());
        }
        qb.push(" WHERE id = ").push_bind(id);
        qb.build().execute(ex).await.map_err(db_err)?;
        Ok(())
    }
}
