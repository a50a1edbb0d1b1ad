// SPDX-License-Identifier: MIT

//! Services module - business logic layer.

pub mod idp;
pub mod login;
pub mod provider;
pub mod reconcile;
pub mod token;

pub use idp::IdpClient;
pub use login::{LoginService, LoginUserData};
pub use reconcile::ReconcileService;
pub use token::{TokenCodec, TokenError, VerifiedToken};
