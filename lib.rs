/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Weavegate: the background core of an Arweave browser-extension
//! wallet.
//!
//! The crate owns the state and the gating logic behind the extension's
//! injected API: which origins may call what ([`permissions`]), which
//! token contracts the user tracks ([`tokens`]), the wallet records and
//! the unlocked keyfile ([`wallet`]), and the approval popup round-trip
//! ([`auth`]). The [`api`] module composes them into one async handler
//! per capability. UI, message routing, and RSA keyfile primitives stay
//! in the embedding shell, injected through the [`auth::PopupHost`],
//! [`api::KeyfileCrypto`], and [`storage::StorageBackend`] traits.

pub mod api;
pub mod auth;
pub mod config;
pub mod permissions;
pub mod storage;
pub mod tokens;
pub mod wallet;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub use api::{ApiError, Background, CallerContext, DecryptOptions, KeyfileCrypto};
pub use auth::{AuthBridge, AuthKind, AuthOutcome, AuthRequest, PopupHost};
pub use config::{CoreConfig, Gateway};
pub use permissions::{Permission, PermissionRegistry, PermissionSet};
pub use storage::{JsonFileStore, MemoryStore, StorageBackend, StoreError};
pub use tokens::{Token, TokenRegistry, TokenState, TokenType};
pub use wallet::WalletManager;
