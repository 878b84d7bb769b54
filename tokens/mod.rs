/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Tracked token contracts.
//!
//! The registry holds the list of token contracts the user opted into,
//! in the order they were added. Display metadata (`name`, `ticker`) is
//! copied out of the evaluated contract state at add-time; the state
//! itself is re-evaluated later through [`cache`].

pub mod cache;

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::Gateway;
use crate::storage::{StorageBackend, StoreError, get_json, set_json};
use crate::wallet::{WalletError, WalletManager};
use cache::EvalCache;

const TOKENS_KEY: &str = "tokens";

#[derive(Debug)]
pub enum TokenError {
    Validation(String),
    /// Adding a token requires an active wallet.
    NoActiveWallet,
    Duplicate(String),
    Store(StoreError),
    Wallet(String),
}

impl std::fmt::Display for TokenError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TokenError::Validation(e) => write!(f, "invalid token state: {e}"),
            TokenError::NoActiveWallet => write!(f, "no active address set"),
            TokenError::Duplicate(id) => write!(f, "token {id} already added"),
            TokenError::Store(e) => write!(f, "token store failed: {e}"),
            TokenError::Wallet(e) => write!(f, "wallet lookup failed: {e}"),
        }
    }
}

impl std::error::Error for TokenError {}

impl From<StoreError> for TokenError {
    fn from(e: StoreError) -> Self {
        TokenError::Store(e)
    }
}

/// Token kind tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    Fungible,
    Collectible,
}

/// Evaluated contract state, as supplied by the caller at add-time.
/// Only `name` and `ticker` are validated; everything else the
/// evaluation produced rides along untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenState {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub ticker: String,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl TokenState {
    /// Shape check: a usable state carries a non-empty name and ticker.
    pub fn validate(&self) -> Result<(), TokenError> {
        if self.name.trim().is_empty() {
            return Err(TokenError::Validation("state has no name".to_string()));
        }
        if self.ticker.trim().is_empty() {
            return Err(TokenError::Validation("state has no ticker".to_string()));
        }
        Ok(())
    }
}

/// A tracked token contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Token {
    pub id: String,
    pub name: String,
    pub ticker: String,
    #[serde(rename = "type")]
    pub token_type: TokenType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gateway: Option<Gateway>,
}

/// Storage-backed token list with an attached evaluation cache.
pub struct TokenRegistry {
    store: Arc<dyn StorageBackend>,
    wallet: Arc<WalletManager>,
    cache: EvalCache,
}

impl TokenRegistry {
    pub fn new(store: Arc<dyn StorageBackend>, wallet: Arc<WalletManager>) -> Self {
        Self {
            store,
            wallet,
            cache: EvalCache::default(),
        }
    }

    /// Stored tokens in add order.
    pub async fn list(&self) -> Result<Vec<Token>, TokenError> {
        Ok(get_json(&*self.store, TOKENS_KEY).await?.unwrap_or_default())
    }

    /// Append a token after validating, in order: state shape, active
    /// wallet, duplicate id. The order is observable: callers see the
    /// first failing check when several would fail.
    pub async fn add(
        &self,
        id: &str,
        token_type: TokenType,
        state: &TokenState,
        gateway: Option<Gateway>,
    ) -> Result<(), TokenError> {
        state.validate()?;

        let active = self.wallet.active_address().await.map_err(|e| match e {
            WalletError::Store(store) => TokenError::Store(store),
            other => TokenError::Wallet(other.to_string()),
        })?;
        if active.is_none() {
            return Err(TokenError::NoActiveWallet);
        }

        let mut tokens = self.list().await?;
        if tokens.iter().any(|token| token.id == id) {
            return Err(TokenError::Duplicate(id.to_string()));
        }

        tokens.push(Token {
            id: id.to_string(),
            name: state.name.clone(),
            ticker: state.ticker.clone(),
            token_type,
            gateway,
        });
        set_json(&*self.store, TOKENS_KEY, &tokens).await?;
        log::info!("Tracking token {id}");
        Ok(())
    }

    /// Remove `id` from the list and drop its cached evaluation. No-op
    /// (not an error) when the token was never tracked.
    pub async fn remove(&self, id: &str) -> Result<(), TokenError> {
        let tokens = self.list().await?;
        let remaining: Vec<Token> = tokens.into_iter().filter(|token| token.id != id).collect();
        set_json(&*self.store, TOKENS_KEY, &remaining).await?;
        self.cache.invalidate(id);
        Ok(())
    }

    /// The stored gateway override for `id`, if the token carries one.
    pub async fn token_gateway(&self, id: &str) -> Result<Option<Gateway>, TokenError> {
        Ok(self
            .list()
            .await?
            .into_iter()
            .find(|token| token.id == id)
            .and_then(|token| token.gateway))
    }

    pub fn cache(&self) -> &EvalCache {
        &self.cache
    }
}
