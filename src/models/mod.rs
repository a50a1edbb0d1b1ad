// SPDX-License-Identifier: MIT

//! Data models for the application.

pub mod profile;
pub mod user;

pub use profile::{IdpProfile, IdpUserInfo, Identity, TokenGrant};
pub use user::{
    DetailPatch, TokenPatch, TokenRecord, User, UserDetail, UserPatch, UserStatus,
};
