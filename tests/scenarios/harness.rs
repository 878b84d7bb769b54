/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Shared scenario fixtures: a popup host that hands opened surfaces to
//! the test, and a keyfile crypto fake with a knowable envelope layout.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use weavegate::api::KeyfileCrypto;
use weavegate::auth::{AuthRequest, PopupHost};
use weavegate::storage::MemoryStore;
use weavegate::{Background, CoreConfig};

pub const KEYFILE: &[u8] = br#"{"kty":"RSA","n":"test-modulus","d":"test-exponent"}"#;
pub const PASSWORD: &str = "hunter2";

pub struct OpenedSurface {
    pub surface_id: Uuid,
    pub request: AuthRequest,
    pub closed: CancellationToken,
}

/// Popup host that forwards every opened surface to the test and counts
/// corrective pages.
pub struct TestHost {
    opened: mpsc::UnboundedSender<OpenedSurface>,
    pages: AtomicUsize,
}

impl TestHost {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<OpenedSurface>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Arc::new(Self {
                opened: tx,
                pages: AtomicUsize::new(0),
            }),
            rx,
        )
    }

    pub fn opened_pages(&self) -> usize {
        self.pages.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PopupHost for TestHost {
    async fn open_auth_surface(&self, surface_id: Uuid, request: &AuthRequest) -> CancellationToken {
        let closed = CancellationToken::new();
        let _ = self.opened.send(OpenedSurface {
            surface_id,
            request: request.clone(),
            closed: closed.clone(),
        });
        closed
    }

    async fn open_page(&self, _path: &str) {
        self.pages.fetch_add(1, Ordering::SeqCst);
    }
}

/// Fake RSA delegation: the "wrapped" key simply carries the symmetric
/// key in its first 32 bytes.
pub struct FakeKeyfileCrypto;

#[async_trait]
impl KeyfileCrypto for FakeKeyfileCrypto {
    async fn unwrap_key(
        &self,
        _keyfile: &[u8],
        wrapped: &[u8],
        _algorithm: &str,
        _hash: &str,
    ) -> Result<Vec<u8>, String> {
        if wrapped.len() < 32 {
            return Err("wrapped key too short".to_string());
        }
        Ok(wrapped[..32].to_vec())
    }
}

/// Build the envelope `decrypt` expects: 512-byte wrapped key, then a
/// nonce-prefixed AES-256-GCM ciphertext.
pub fn seal_envelope(key: &[u8; 32], nonce: &[u8; 12], plaintext: &[u8]) -> Vec<u8> {
    let cipher = Aes256Gcm::new_from_slice(key).expect("aes key");
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(nonce), plaintext)
        .expect("seal");

    let mut wrapped = key.to_vec();
    wrapped.resize(512, 0);
    let mut envelope = wrapped;
    envelope.extend_from_slice(nonce);
    envelope.extend_from_slice(&ciphertext);
    envelope
}

pub struct Scenario {
    pub background: Arc<Background>,
    pub host: Arc<TestHost>,
    pub surfaces: mpsc::UnboundedReceiver<OpenedSurface>,
}

/// A background wired to an in-memory store, test host, and fake
/// crypto. No wallet is added; scenarios that need one call
/// `with_wallet`.
pub fn scenario() -> Scenario {
    let (host, surfaces) = TestHost::new();
    let background = Arc::new(Background::new(
        MemoryStore::shared(),
        host.clone(),
        Arc::new(FakeKeyfileCrypto),
        CoreConfig::default(),
    ));
    Scenario {
        background,
        host,
        surfaces,
    }
}

impl Scenario {
    pub async fn with_wallet(self) -> Self {
        self.background
            .wallet()
            .add_wallet("BNttzDav3jHVnNiV7nYbQv-GY0HQ-4XXsdkE5K9ylHQ", KEYFILE, PASSWORD)
            .await
            .expect("wallet added");
        self
    }
}
