/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Authentication popup bridge.
//!
//! A background handler that needs human approval constructs an
//! [`AuthRequest`] and hands it to [`AuthBridge::authenticate`], which
//! opens a dedicated approval surface through the injected [`PopupHost`]
//! and suspends the caller. The surface side (see [`session`]) resolves
//! the request exactly once through [`AuthBridge::deliver`]. A surface
//! that goes away without resolving counts as a rejection: the host's
//! cancellation token fires and the caller receives the user-cancelled
//! outcome instead of blocking forever.

pub mod session;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::permissions::PermissionSet;

/// Reason reported when the surface closes without an explicit answer.
pub const CANCELLED_MESSAGE: &str = "User cancelled the login";
/// Reason reported for requests the surface cannot reconstruct.
pub const INVALID_AUTH_MESSAGE: &str = "Invalid auth call";

/// What the popup is being asked to authorize. Closed set; the wire tag
/// is the serde name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthKind {
    Connect,
    SignTransaction,
    CreateTransaction,
    CreateAndSignTransaction,
    Token,
    Decrypt,
    Sign,
}

impl AuthKind {
    fn tag(&self) -> &'static str {
        match self {
            AuthKind::Connect => "connect",
            AuthKind::SignTransaction => "sign_transaction",
            AuthKind::CreateTransaction => "create_transaction",
            AuthKind::CreateAndSignTransaction => "create_and_sign_transaction",
            AuthKind::Token => "token",
            AuthKind::Decrypt => "decrypt",
            AuthKind::Sign => "sign",
        }
    }

    /// Tag the outcome message carries back to the caller.
    pub fn result_tag(&self) -> String {
        format!("{}_result", self.tag())
    }
}

impl std::fmt::Display for AuthKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.tag())
    }
}

/// One in-flight approval round-trip. Serialized into the surface's
/// invocation context; the surface reconstructs and re-validates it
/// rather than trusting the opener.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthRequest {
    #[serde(rename = "type")]
    pub kind: AuthKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Requested capability tags; connect requests only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub permissions: Option<PermissionSet>,
    /// Contract id being added; token requests only.
    #[serde(rename = "tokenID", skip_serializing_if = "Option::is_none")]
    pub token_id: Option<String>,
}

impl AuthRequest {
    pub fn connect(origin: &str, permissions: PermissionSet) -> Self {
        Self {
            kind: AuthKind::Connect,
            url: Some(origin.to_string()),
            permissions: Some(permissions),
            token_id: None,
        }
    }

    pub fn token(origin: &str, token_id: &str) -> Self {
        Self {
            kind: AuthKind::Token,
            url: Some(origin.to_string()),
            permissions: None,
            token_id: Some(token_id.to_string()),
        }
    }

    pub fn plain(kind: AuthKind, origin: &str) -> Self {
        Self {
            kind,
            url: Some(origin.to_string()),
            permissions: None,
            token_id: None,
        }
    }
}

/// Terminal answer for one request: `{res, message, type}` on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthOutcome {
    pub res: bool,
    pub message: String,
    #[serde(rename = "type")]
    pub kind: String,
}

impl AuthOutcome {
    pub fn accepted(kind: AuthKind) -> Self {
        Self {
            res: true,
            message: "Success".to_string(),
            kind: kind.result_tag(),
        }
    }

    pub fn rejected(kind: AuthKind, message: &str) -> Self {
        Self {
            res: false,
            message: message.to_string(),
            kind: kind.result_tag(),
        }
    }
}

/// Host-side surface management, injected by the extension shell.
#[async_trait]
pub trait PopupHost: Send + Sync {
    /// Open the approval surface for `request`, addressed by
    /// `surface_id`. The returned token must fire when the surface is
    /// gone; a host that cannot open a surface at all returns a token
    /// that is already cancelled.
    async fn open_auth_surface(&self, surface_id: Uuid, request: &AuthRequest)
    -> CancellationToken;

    /// Open a non-modal extension page (corrective flows, e.g. the
    /// welcome page when no wallet exists).
    async fn open_page(&self, path: &str);
}

/// Pairs each open surface with the oneshot that resolves its caller.
pub struct AuthBridge {
    host: Arc<dyn PopupHost>,
    pending: Mutex<HashMap<Uuid, oneshot::Sender<AuthOutcome>>>,
}

impl AuthBridge {
    pub fn new(host: Arc<dyn PopupHost>) -> Self {
        Self {
            host,
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Run one approval round-trip to completion. Resolves with exactly
    /// one outcome: the surface's answer, or the cancellation outcome
    /// when the surface closes (or never opens) without answering.
    pub async fn authenticate(&self, request: AuthRequest) -> AuthOutcome {
        let surface_id = Uuid::new_v4();
        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .expect("pending auth lock poisoned")
            .insert(surface_id, tx);

        log::info!("Opening auth surface {surface_id} for {}", request.kind);
        let closed = self.host.open_auth_surface(surface_id, &request).await;

        tokio::select! {
            biased;

            outcome = rx => match outcome {
                Ok(outcome) => outcome,
                // Sender dropped without an answer; treat like a close.
                Err(_) => AuthOutcome::rejected(request.kind, CANCELLED_MESSAGE),
            },

            _ = closed.cancelled() => {
                self.pending
                    .lock()
                    .expect("pending auth lock poisoned")
                    .remove(&surface_id);
                log::info!("Auth surface {surface_id} closed without an outcome");
                AuthOutcome::rejected(request.kind, CANCELLED_MESSAGE)
            }
        }
    }

    /// Resolve the pending request for `surface_id`. Returns false when
    /// the request was already resolved (or never existed); at most one
    /// delivery wins.
    pub fn deliver(&self, surface_id: Uuid, outcome: AuthOutcome) -> bool {
        let sender = self
            .pending
            .lock()
            .expect("pending auth lock poisoned")
            .remove(&surface_id);
        let Some(sender) = sender else {
            log::warn!("Dropping outcome for unknown auth surface {surface_id}");
            return false;
        };
        if sender.send(outcome).is_err() {
            log::warn!("Caller for auth surface {surface_id} went away before delivery");
            return false;
        }
        true
    }

    pub fn host(&self) -> &Arc<dyn PopupHost> {
        &self.host
    }
}
