/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Background action handlers.
//!
//! One async entry point per externally invokable capability. Every
//! handler follows the same shape: validate the input, resolve the
//! requesting origin, check (or request) permission, perform the effect,
//! return a result or a structured [`ApiError`]. Nothing here retries;
//! a failed invocation is terminal and the page re-initiates.

use std::sync::Arc;

use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
use async_trait::async_trait;

use crate::auth::{AuthBridge, AuthRequest, PopupHost};
use crate::config::{CoreConfig, Gateway};
use crate::permissions::{Permission, PermissionRegistry, PermissionSet, normalize_origin};
use crate::storage::{JsonFileStore, StorageBackend, StoreError};
use crate::tokens::{TokenError, TokenRegistry, TokenState, TokenType};
use crate::wallet::{WalletError, WalletManager};

/// Extension page opened when an action needs a wallet and none exists.
const WELCOME_PAGE: &str = "tabs/welcome.html";
/// Byte length of the RSA-wrapped symmetric key at the head of an
/// encrypted payload (4096-bit modulus).
const WRAPPED_KEY_LEN: usize = 512;
const AES_GCM_NONCE_LEN: usize = 12;

#[derive(Debug)]
pub enum ApiError {
    /// Malformed or missing input; surfaced immediately, never retried.
    Validation(String),
    /// Origin lacks a required capability, or no usable wallet exists.
    Permission(String),
    /// The entity already exists; no state was changed.
    Duplicate(String),
    /// The human declined or abandoned the approval surface.
    UserRejected(String),
    /// A delegated cryptographic operation failed.
    Crypto(String),
    Store(StoreError),
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApiError::Validation(e) => write!(f, "validation failed: {e}"),
            ApiError::Permission(e) => write!(f, "permission denied: {e}"),
            ApiError::Duplicate(e) => write!(f, "duplicate entry: {e}"),
            ApiError::UserRejected(e) => write!(f, "user rejected: {e}"),
            ApiError::Crypto(e) => write!(f, "crypto failed: {e}"),
            ApiError::Store(e) => write!(f, "store failed: {e}"),
        }
    }
}

impl std::error::Error for ApiError {}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        ApiError::Store(e)
    }
}

impl From<TokenError> for ApiError {
    fn from(e: TokenError) -> Self {
        match e {
            TokenError::Validation(msg) => ApiError::Validation(msg),
            TokenError::NoActiveWallet => ApiError::Permission("No active address set".to_string()),
            TokenError::Duplicate(_) => ApiError::Duplicate("Token already added".to_string()),
            TokenError::Store(store) => ApiError::Store(store),
            TokenError::Wallet(msg) => ApiError::Store(StoreError::Data(msg)),
        }
    }
}

impl From<WalletError> for ApiError {
    fn from(e: WalletError) -> Self {
        match e {
            WalletError::NoWallet => ApiError::Permission("No wallets added".to_string()),
            WalletError::Locked => ApiError::Permission("Wallet is locked".to_string()),
            WalletError::BadPassword => ApiError::Permission("Invalid password".to_string()),
            WalletError::UnknownAddress(addr) => {
                ApiError::Validation(format!("no wallet with address {addr}"))
            }
            WalletError::Crypto(msg) => ApiError::Crypto(msg),
            WalletError::Data(msg) => ApiError::Store(StoreError::Data(msg)),
            WalletError::Store(store) => ApiError::Store(store),
        }
    }
}

/// RSA keyfile operations, delegated to the embedding shell. The core
/// never parses private key material itself.
#[async_trait]
pub trait KeyfileCrypto: Send + Sync {
    /// RSA-OAEP-unwrap the symmetric key at the head of an encrypted
    /// payload, using the keyfile's private key.
    async fn unwrap_key(
        &self,
        keyfile: &[u8],
        wrapped: &[u8],
        algorithm: &str,
        hash: &str,
    ) -> Result<Vec<u8>, String>;
}

/// Options the page sends along with a decrypt call.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct DecryptOptions {
    pub algorithm: String,
    pub hash: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub salt: Option<String>,
}

/// The invoking tab, as the message router saw it.
#[derive(Debug, Clone, Default)]
pub struct CallerContext {
    pub tab_url: Option<String>,
}

impl CallerContext {
    pub fn from_tab(url: &str) -> Self {
        Self {
            tab_url: Some(url.to_string()),
        }
    }

    fn origin(&self) -> Result<String, ApiError> {
        let Some(url) = &self.tab_url else {
            return Err(ApiError::Validation("No tab selected".to_string()));
        };
        normalize_origin(url).map_err(ApiError::Validation)
    }
}

/// Everything the background handlers compose: the registries, the
/// popup bridge, the wallet, and the delegated crypto.
pub struct Background {
    permissions: Arc<PermissionRegistry>,
    tokens: Arc<TokenRegistry>,
    wallet: Arc<WalletManager>,
    bridge: Arc<AuthBridge>,
    crypto: Arc<dyn KeyfileCrypto>,
    config: CoreConfig,
}

impl Background {
    pub fn new(
        store: Arc<dyn StorageBackend>,
        host: Arc<dyn PopupHost>,
        crypto: Arc<dyn KeyfileCrypto>,
        config: CoreConfig,
    ) -> Self {
        let wallet = Arc::new(WalletManager::new(store.clone()));
        Self {
            permissions: Arc::new(PermissionRegistry::new(store.clone())),
            tokens: Arc::new(TokenRegistry::new(store, wallet.clone())),
            wallet,
            bridge: Arc::new(AuthBridge::new(host)),
            crypto,
            config,
        }
    }

    /// Production construction: config from the platform config dir,
    /// state in the file-backed store next to it.
    pub fn open(
        host: Arc<dyn PopupHost>,
        crypto: Arc<dyn KeyfileCrypto>,
    ) -> Result<Self, StoreError> {
        let config = CoreConfig::load().map_err(|e| StoreError::Data(e.to_string()))?;
        let store_dir = config
            .store_dir()
            .ok_or_else(|| StoreError::Io("no config dir on this platform".to_string()))?;
        let store = Arc::new(JsonFileStore::open(store_dir)?);
        Ok(Self::new(store, host, crypto, config))
    }

    pub fn permissions(&self) -> &Arc<PermissionRegistry> {
        &self.permissions
    }

    pub fn tokens(&self) -> &Arc<TokenRegistry> {
        &self.tokens
    }

    pub fn wallet(&self) -> &Arc<WalletManager> {
        &self.wallet
    }

    pub fn bridge(&self) -> &Arc<AuthBridge> {
        &self.bridge
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    async fn require(&self, origin: &str, permission: Permission) -> Result<(), ApiError> {
        let required: PermissionSet = [permission].into_iter().collect();
        if self.permissions.has_permissions(origin, &required).await? {
            return Ok(());
        }
        Err(ApiError::Permission(format!(
            "Missing permission: {permission}"
        )))
    }

    /// Connect the calling page: request `requested` capabilities for
    /// its origin through the approval popup. Succeeds without a popup
    /// when the origin already holds every requested tag.
    pub async fn connect(
        &self,
        ctx: &CallerContext,
        requested: &PermissionSet,
    ) -> Result<(), ApiError> {
        if requested.is_empty() {
            return Err(ApiError::Validation("No permissions requested".to_string()));
        }
        let origin = ctx.origin()?;

        if self.wallet.wallets().await?.is_empty() {
            self.bridge.host().open_page(WELCOME_PAGE).await;
            return Err(ApiError::Permission("No wallets added".to_string()));
        }

        let existing = self.permissions.get_permissions(&origin).await?;
        if existing.contains_all(requested) {
            log::info!("{origin} is already connected with every requested permission");
            return Ok(());
        }

        let outcome = self
            .bridge
            .authenticate(AuthRequest::connect(&origin, requested.clone()))
            .await;
        if !outcome.res {
            return Err(ApiError::UserRejected(outcome.message));
        }
        Ok(())
    }

    /// Drop the calling page's grant entirely.
    pub async fn disconnect(&self, ctx: &CallerContext) -> Result<(), ApiError> {
        let origin = ctx.origin()?;
        if self.permissions.get_permissions(&origin).await?.is_empty() {
            return Err(ApiError::Permission("App is not connected".to_string()));
        }
        self.permissions.revoke(&origin).await?;
        Ok(())
    }

    /// Track a new token contract. Runs the full gate sequence:
    /// id shape, state shape, connected origin, duplicate id, human
    /// approval, then the registry commit.
    pub async fn add_token(
        &self,
        ctx: &CallerContext,
        id: &str,
        token_type: TokenType,
        state: Option<&TokenState>,
        gateway: Option<Gateway>,
    ) -> Result<(), ApiError> {
        if !is_arweave_id(id) {
            return Err(ApiError::Validation("Invalid token contract ID".to_string()));
        }
        let Some(state) = state else {
            return Err(ApiError::Validation("No state returned".to_string()));
        };
        state.validate().map_err(ApiError::from)?;

        let origin = ctx.origin()?;
        if self.permissions.get_permissions(&origin).await?.is_empty() {
            return Err(ApiError::Permission(
                "The app needs to be connected to add a new token".to_string(),
            ));
        }

        let tokens = self.tokens.list().await.map_err(ApiError::from)?;
        if tokens.iter().any(|token| token.id == id) {
            return Err(ApiError::Duplicate("Token already added".to_string()));
        }

        let outcome = self
            .bridge
            .authenticate(AuthRequest::token(&origin, id))
            .await;
        if !outcome.res {
            return Err(ApiError::UserRejected(outcome.message));
        }

        self.tokens
            .add(id, token_type, state, gateway)
            .await
            .map_err(ApiError::from)
    }

    /// Decrypt a payload addressed to the active wallet. The payload is
    /// an envelope: a 512-byte RSA-wrapped symmetric key, then a
    /// nonce-prefixed AES-256-GCM ciphertext. The RSA step is delegated
    /// through [`KeyfileCrypto`]; when a salt is supplied the decrypted
    /// text is truncated at its first occurrence.
    pub async fn decrypt(
        &self,
        ctx: &CallerContext,
        data: &[u8],
        options: &DecryptOptions,
    ) -> Result<String, ApiError> {
        let origin = ctx.origin()?;
        self.require(&origin, Permission::Decrypt).await?;

        let keyfile = match self.wallet.active_keyfile().await {
            Ok(keyfile) => keyfile,
            Err(WalletError::NoWallet) => {
                // Corrective flow instead of a silent failure.
                self.bridge.host().open_page(WELCOME_PAGE).await;
                return Err(ApiError::Permission("No wallets added".to_string()));
            }
            Err(e) => return Err(e.into()),
        };

        if data.len() <= WRAPPED_KEY_LEN + AES_GCM_NONCE_LEN {
            return Err(ApiError::Validation(
                "Encrypted payload is too short".to_string(),
            ));
        }
        let (wrapped, sealed) = data.split_at(WRAPPED_KEY_LEN);

        let symmetric_key = self
            .crypto
            .unwrap_key(keyfile.as_bytes(), wrapped, &options.algorithm, &options.hash)
            .await
            .map_err(ApiError::Crypto)?;

        let cipher = Aes256Gcm::new_from_slice(&symmetric_key)
            .map_err(|e| ApiError::Crypto(format!("unwrapped key is unusable: {e}")))?;
        let (nonce, ciphertext) = sealed.split_at(AES_GCM_NONCE_LEN);
        let plaintext = cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|e| ApiError::Crypto(format!("payload decryption failed: {e}")))?;

        let text = String::from_utf8(plaintext)
            .map_err(|e| ApiError::Crypto(format!("decrypted payload is not UTF-8: {e}")))?;
        match &options.salt {
            Some(salt) => Ok(text
                .split_once(salt.as_str())
                .map(|(head, _)| head.to_string())
                .unwrap_or(text)),
            None => Ok(text),
        }
    }

    /// The active wallet address.
    pub async fn active_address(&self, ctx: &CallerContext) -> Result<String, ApiError> {
        let origin = ctx.origin()?;
        self.require(&origin, Permission::AccessAddress).await?;
        self.wallet
            .active_address()
            .await?
            .ok_or_else(|| ApiError::Permission("No active address set".to_string()))
    }

    /// Every stored wallet address.
    pub async fn all_addresses(&self, ctx: &CallerContext) -> Result<Vec<String>, ApiError> {
        let origin = ctx.origin()?;
        self.require(&origin, Permission::AccessAllAddresses).await?;
        Ok(self.wallet.addresses().await?)
    }

    /// The public modulus of the active wallet's keyfile.
    pub async fn public_key(&self, ctx: &CallerContext) -> Result<String, ApiError> {
        let origin = ctx.origin()?;
        self.require(&origin, Permission::AccessPublicKey).await?;

        let keyfile = self.wallet.active_keyfile().await?;
        let jwk: serde_json::Value = serde_json::from_slice(keyfile.as_bytes())
            .map_err(|e| ApiError::Crypto(format!("keyfile is not valid JSON: {e}")))?;
        jwk.get("n")
            .and_then(|n| n.as_str())
            .map(|n| n.to_string())
            .ok_or_else(|| ApiError::Crypto("keyfile has no public modulus".to_string()))
    }

    /// The wallet's configured default gateway.
    pub async fn arweave_config(&self, ctx: &CallerContext) -> Result<Gateway, ApiError> {
        let origin = ctx.origin()?;
        self.require(&origin, Permission::AccessArweaveConfig).await?;
        Ok(self.config.default_gateway.clone())
    }

    /// The gateway configured for state evaluation of `token_id`,
    /// falling back to the crate default.
    pub async fn evaluation_gateway(&self, token_id: &str) -> Result<Gateway, ApiError> {
        Ok(self
            .tokens
            .token_gateway(token_id)
            .await
            .map_err(ApiError::from)?
            .unwrap_or_else(|| self.config.default_gateway.clone()))
    }
}

/// Arweave ids (addresses and transaction/contract ids) are 43
/// characters of base64url.
pub fn is_arweave_id(value: &str) -> bool {
    value.len() == 43
        && value
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}
