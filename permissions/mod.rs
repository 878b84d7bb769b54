/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Per-origin application permissions.
//!
//! Each connected page holds a [`PermissionGrant`]: the set of capability
//! tags the user approved for that origin. Grants are additive; accepting
//! a connect request unions the new tags into whatever was already
//! granted. Disconnecting deletes the grant entirely.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::storage::{StorageBackend, StoreError, get_json, set_json};

const APP_INDEX_KEY: &str = "apps";

fn grant_key(origin: &str) -> String {
    format!("app:{origin}")
}

/// Capability a page can hold. Closed set; the wire tag is the serde
/// name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Permission {
    Connect,
    SignTransaction,
    CreateTransaction,
    CreateAndSignTransaction,
    AccessAddress,
    AccessAllAddresses,
    AccessPublicKey,
    AccessArweaveConfig,
    Decrypt,
    Sign,
    Encrypt,
    AddToken,
    AccessToken,
    Dispatch,
}

impl Permission {
    /// Human-readable explanation shown in the approval popup.
    pub fn description(&self) -> &'static str {
        match self {
            Permission::Connect => "Connect to the wallet",
            Permission::SignTransaction => "Sign transactions on your behalf",
            Permission::CreateTransaction => "Create new transactions",
            Permission::CreateAndSignTransaction => "Create and sign transactions",
            Permission::AccessAddress => "Read your active wallet address",
            Permission::AccessAllAddresses => "Read all of your wallet addresses",
            Permission::AccessPublicKey => "Read the public key of your active wallet",
            Permission::AccessArweaveConfig => "Read your gateway configuration",
            Permission::Decrypt => "Decrypt data with your active wallet",
            Permission::Sign => "Sign messages with your active wallet",
            Permission::Encrypt => "Encrypt data with your active wallet",
            Permission::AddToken => "Add new tokens to your wallet",
            Permission::AccessToken => "Read your tracked tokens",
            Permission::Dispatch => "Dispatch transactions for you",
        }
    }

    fn tag(&self) -> &'static str {
        match self {
            Permission::Connect => "connect",
            Permission::SignTransaction => "sign-transaction",
            Permission::CreateTransaction => "create-transaction",
            Permission::CreateAndSignTransaction => "create-and-sign-transaction",
            Permission::AccessAddress => "access-address",
            Permission::AccessAllAddresses => "access-all-addresses",
            Permission::AccessPublicKey => "access-public-key",
            Permission::AccessArweaveConfig => "access-arweave-config",
            Permission::Decrypt => "decrypt",
            Permission::Sign => "sign",
            Permission::Encrypt => "encrypt",
            Permission::AddToken => "add-token",
            Permission::AccessToken => "access-token",
            Permission::Dispatch => "dispatch",
        }
    }
}

impl std::fmt::Display for Permission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.tag())
    }
}

/// Insertion-ordered, duplicate-free set of capability tags.
///
/// Order is preserved for display only; set operations ignore it. The
/// requested-vs-granted delta the popup presents is [`difference`].
///
/// [`difference`]: PermissionSet::difference
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct PermissionSet {
    tags: Vec<Permission>,
}

impl PermissionSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, permission: Permission) {
        if !self.tags.contains(&permission) {
            self.tags.push(permission);
        }
    }

    pub fn contains(&self, permission: Permission) -> bool {
        self.tags.contains(&permission)
    }

    /// True iff every tag in `required` is present.
    pub fn contains_all(&self, required: &PermissionSet) -> bool {
        required.tags.iter().all(|tag| self.contains(*tag))
    }

    /// Tags of `self` and `other`, self's order first.
    pub fn union(&self, other: &PermissionSet) -> PermissionSet {
        let mut merged = self.clone();
        for tag in &other.tags {
            merged.insert(*tag);
        }
        merged
    }

    /// Tags of `self` not present in `other`.
    pub fn difference(&self, other: &PermissionSet) -> PermissionSet {
        PermissionSet {
            tags: self
                .tags
                .iter()
                .copied()
                .filter(|tag| !other.contains(*tag))
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tags.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = Permission> + '_ {
        self.tags.iter().copied()
    }
}

impl FromIterator<Permission> for PermissionSet {
    fn from_iter<I: IntoIterator<Item = Permission>>(iter: I) -> Self {
        let mut set = PermissionSet::new();
        for tag in iter {
            set.insert(tag);
        }
        set
    }
}

// Deserializes through a plain Vec so stored duplicates collapse instead
// of breaking the set invariant.
impl<'de> Deserialize<'de> for PermissionSet {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let tags = Vec::<Permission>::deserialize(deserializer)?;
        Ok(tags.into_iter().collect())
    }
}

/// One origin's authorized capability set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissionGrant {
    pub url: String,
    pub permissions: PermissionSet,
}

/// Reduce a page URL to its grant key: scheme + host, plus the port when
/// one is spelled out. Path, query and fragment are stripped.
pub fn normalize_origin(raw: &str) -> Result<String, String> {
    let parsed = Url::parse(raw).map_err(|e| format!("invalid URL '{raw}': {e}"))?;
    let host = parsed
        .host_str()
        .ok_or_else(|| format!("URL '{raw}' has no host"))?;
    match parsed.port() {
        Some(port) => Ok(format!("{}://{host}:{port}", parsed.scheme())),
        None => Ok(format!("{}://{host}", parsed.scheme())),
    }
}

/// Storage-backed registry of per-origin grants.
pub struct PermissionRegistry {
    store: Arc<dyn StorageBackend>,
}

impl PermissionRegistry {
    pub fn new(store: Arc<dyn StorageBackend>) -> Self {
        Self { store }
    }

    /// The grant for `origin`, or the empty set when none exists.
    pub async fn get_permissions(&self, origin: &str) -> Result<PermissionSet, StoreError> {
        let grant: Option<PermissionGrant> = get_json(&*self.store, &grant_key(origin)).await?;
        Ok(grant.map(|g| g.permissions).unwrap_or_default())
    }

    /// True iff `origin` holds every tag in `required`.
    pub async fn has_permissions(
        &self,
        origin: &str,
        required: &PermissionSet,
    ) -> Result<bool, StoreError> {
        Ok(self.get_permissions(origin).await?.contains_all(required))
    }

    /// Union `new_tags` into the grant for `origin`, creating the record
    /// when absent. Persisted before returning.
    pub async fn grant(&self, origin: &str, new_tags: &PermissionSet) -> Result<(), StoreError> {
        let existing = self.get_permissions(origin).await?;
        let grant = PermissionGrant {
            url: origin.to_string(),
            permissions: existing.union(new_tags),
        };
        set_json(&*self.store, &grant_key(origin), &grant).await?;

        let mut index = self.connected_apps().await?;
        if !index.iter().any(|app| app == origin) {
            index.push(origin.to_string());
            set_json(&*self.store, APP_INDEX_KEY, &index).await?;
        }
        log::info!("Granted {} permission(s) to {origin}", grant.permissions.len());
        Ok(())
    }

    /// Delete the grant for `origin` entirely. No-op when absent.
    pub async fn revoke(&self, origin: &str) -> Result<(), StoreError> {
        self.store.remove(&grant_key(origin)).await?;

        let index = self.connected_apps().await?;
        if index.iter().any(|app| app == origin) {
            let remaining: Vec<String> = index.into_iter().filter(|app| app != origin).collect();
            set_json(&*self.store, APP_INDEX_KEY, &remaining).await?;
            log::info!("Revoked all permissions for {origin}");
        }
        Ok(())
    }

    /// Origins that currently hold a grant.
    pub async fn connected_apps(&self) -> Result<Vec<String>, StoreError> {
        Ok(get_json(&*self.store, APP_INDEX_KEY)
            .await?
            .unwrap_or_default())
    }
}
