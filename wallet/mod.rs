/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Wallet records and the active keyfile.
//!
//! Keyfiles are stored encrypted with a password-derived AES-256-GCM key
//! and only ever decrypted into process memory. Authenticating in the
//! approval popup is exactly a successful [`WalletManager::unlock`]; the
//! background handlers that need key material read the unlocked keyfile
//! and never see the password.

use std::sync::Arc;

use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;

use crate::storage::{StorageBackend, StoreError, get_json, set_json};

const WALLETS_KEY: &str = "wallets";
const ACTIVE_ADDRESS_KEY: &str = "active_address";
const KEYFILE_MAGIC: &[u8; 8] = b"WGKF0001";
const AES_GCM_NONCE_LEN: usize = 12;

#[derive(Debug)]
pub enum WalletError {
    /// No wallets have been added yet.
    NoWallet,
    /// A keyfile operation was attempted before `unlock`.
    Locked,
    BadPassword,
    UnknownAddress(String),
    Crypto(String),
    Data(String),
    Store(StoreError),
}

impl std::fmt::Display for WalletError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WalletError::NoWallet => write!(f, "no wallets added"),
            WalletError::Locked => write!(f, "wallet is locked"),
            WalletError::BadPassword => write!(f, "invalid password"),
            WalletError::UnknownAddress(addr) => write!(f, "no wallet with address {addr}"),
            WalletError::Crypto(e) => write!(f, "keyfile crypto failed: {e}"),
            WalletError::Data(e) => write!(f, "wallet data corrupt: {e}"),
            WalletError::Store(e) => write!(f, "wallet store failed: {e}"),
        }
    }
}

impl std::error::Error for WalletError {}

impl From<StoreError> for WalletError {
    fn from(e: StoreError) -> Self {
        WalletError::Store(e)
    }
}

/// Decrypted keyfile bytes (an RSA JWK document). Deliberately opaque in
/// debug output.
#[derive(Clone)]
pub struct Keyfile(Vec<u8>);

impl Keyfile {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl std::fmt::Debug for Keyfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Keyfile({} bytes)", self.0.len())
    }
}

/// Stored wallet: address plus the encrypted keyfile payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletRecord {
    pub address: String,
    keyfile: String,
}

fn password_key(password: &str) -> [u8; 32] {
    let digest = Sha256::digest(password.as_bytes());
    digest.into()
}

fn encrypt_keyfile(keyfile: &[u8], password: &str) -> Result<String, WalletError> {
    let cipher = Aes256Gcm::new_from_slice(&password_key(password))
        .map_err(|e| WalletError::Crypto(format!("AES key init failed: {e}")))?;
    let mut nonce = [0u8; AES_GCM_NONCE_LEN];
    rand::rngs::OsRng.fill_bytes(&mut nonce);
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), keyfile)
        .map_err(|e| WalletError::Crypto(format!("AES-GCM encrypt failed: {e}")))?;

    let mut payload = Vec::with_capacity(KEYFILE_MAGIC.len() + nonce.len() + ciphertext.len());
    payload.extend_from_slice(KEYFILE_MAGIC);
    payload.extend_from_slice(&nonce);
    payload.extend_from_slice(&ciphertext);
    Ok(BASE64.encode(payload))
}

fn decrypt_keyfile(encoded: &str, password: &str) -> Result<Keyfile, WalletError> {
    let payload = BASE64
        .decode(encoded)
        .map_err(|e| WalletError::Data(format!("keyfile payload is not base64: {e}")))?;
    if payload.len() < KEYFILE_MAGIC.len() + AES_GCM_NONCE_LEN
        || &payload[..KEYFILE_MAGIC.len()] != KEYFILE_MAGIC
    {
        return Err(WalletError::Data("keyfile payload header mismatch".to_string()));
    }
    let nonce_end = KEYFILE_MAGIC.len() + AES_GCM_NONCE_LEN;
    let cipher = Aes256Gcm::new_from_slice(&password_key(password))
        .map_err(|e| WalletError::Crypto(format!("AES key init failed: {e}")))?;
    let plaintext = cipher
        .decrypt(
            Nonce::from_slice(&payload[KEYFILE_MAGIC.len()..nonce_end]),
            &payload[nonce_end..],
        )
        .map_err(|_| WalletError::BadPassword)?;
    Ok(Keyfile(plaintext))
}

/// Storage-backed wallet state plus the in-memory unlocked keyfile.
pub struct WalletManager {
    store: Arc<dyn StorageBackend>,
    unlocked: RwLock<Option<Keyfile>>,
}

impl WalletManager {
    pub fn new(store: Arc<dyn StorageBackend>) -> Self {
        Self {
            store,
            unlocked: RwLock::new(None),
        }
    }

    /// Stored wallet records.
    pub async fn wallets(&self) -> Result<Vec<WalletRecord>, WalletError> {
        Ok(get_json(&*self.store, WALLETS_KEY).await?.unwrap_or_default())
    }

    /// Every stored wallet address, in insertion order.
    pub async fn addresses(&self) -> Result<Vec<String>, WalletError> {
        Ok(self
            .wallets()
            .await?
            .into_iter()
            .map(|record| record.address)
            .collect())
    }

    /// Encrypt `keyfile` under `password` and append the record. The
    /// first wallet added becomes the active one.
    pub async fn add_wallet(
        &self,
        address: &str,
        keyfile: &[u8],
        password: &str,
    ) -> Result<(), WalletError> {
        let mut wallets = self.wallets().await?;
        if wallets.iter().any(|record| record.address == address) {
            return Err(WalletError::Data(format!(
                "wallet {address} is already stored"
            )));
        }
        wallets.push(WalletRecord {
            address: address.to_string(),
            keyfile: encrypt_keyfile(keyfile, password)?,
        });
        set_json(&*self.store, WALLETS_KEY, &wallets).await?;

        if self.active_address().await?.is_none() {
            self.set_active(address).await?;
        }
        log::info!("Stored wallet {address}");
        Ok(())
    }

    /// The active wallet address, or `None` when no wallet is set.
    pub async fn active_address(&self) -> Result<Option<String>, WalletError> {
        Ok(get_json(&*self.store, ACTIVE_ADDRESS_KEY).await?)
    }

    pub async fn set_active(&self, address: &str) -> Result<(), WalletError> {
        let wallets = self.wallets().await?;
        if !wallets.iter().any(|record| record.address == address) {
            return Err(WalletError::UnknownAddress(address.to_string()));
        }
        set_json(&*self.store, ACTIVE_ADDRESS_KEY, &address).await?;
        // A different wallet may now be active; force a fresh unlock.
        *self.unlocked.write().await = None;
        Ok(())
    }

    /// Decrypt the active wallet's keyfile with `password` and keep it in
    /// memory until [`lock`](Self::lock). This is the popup's
    /// authenticate step.
    pub async fn unlock(&self, password: &str) -> Result<(), WalletError> {
        let Some(active) = self.active_address().await? else {
            return Err(WalletError::NoWallet);
        };
        let wallets = self.wallets().await?;
        let record = wallets
            .iter()
            .find(|record| record.address == active)
            .ok_or(WalletError::UnknownAddress(active))?;
        let keyfile = decrypt_keyfile(&record.keyfile, password)?;
        *self.unlocked.write().await = Some(keyfile);
        Ok(())
    }

    pub async fn lock(&self) {
        *self.unlocked.write().await = None;
    }

    pub async fn is_unlocked(&self) -> bool {
        self.unlocked.read().await.is_some()
    }

    /// The unlocked active keyfile. `NoWallet` when none is stored,
    /// `Locked` when `unlock` has not run since startup or `set_active`.
    pub async fn active_keyfile(&self) -> Result<Keyfile, WalletError> {
        if self.active_address().await?.is_none() {
            return Err(WalletError::NoWallet);
        }
        self.unlocked
            .read()
            .await
            .clone()
            .ok_or(WalletError::Locked)
    }
}
