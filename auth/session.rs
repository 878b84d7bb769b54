/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Surface-side approval session.
//!
//! The popup UI drives one [`AuthSession`] per surface: reconstruct the
//! request from the invocation context, let the human authenticate
//! (unlock the wallet), then accept or reject. Every exit path delivers
//! exactly one outcome through the bridge; the session owns the
//! validation and delta computation so the UI layer stays presentation
//! only.

use std::sync::Arc;

use uuid::Uuid;

use super::{
    AuthBridge, AuthKind, AuthOutcome, AuthRequest, CANCELLED_MESSAGE, INVALID_AUTH_MESSAGE,
};
use crate::permissions::{PermissionRegistry, PermissionSet, normalize_origin};
use crate::storage::StoreError;
use crate::wallet::{WalletError, WalletManager};

const NO_TAB_MESSAGE: &str = "No tab selected";

#[derive(Debug)]
pub enum SessionError {
    /// Accept requires a successful `authenticate` first.
    NotAuthenticated,
    /// The session already delivered its outcome.
    AlreadyResolved,
    Store(StoreError),
}

impl std::fmt::Display for SessionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionError::NotAuthenticated => write!(f, "wallet is not unlocked"),
            SessionError::AlreadyResolved => write!(f, "session already resolved"),
            SessionError::Store(e) => write!(f, "session store failed: {e}"),
        }
    }
}

impl std::error::Error for SessionError {}

/// How the connect screen is framed for the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectFraming {
    /// Origin holds nothing yet; present the full requested set.
    FreshGrant,
    /// Origin is already connected; present only the missing tags.
    AlreadyConnected,
}

/// Where the session stands after an authenticate step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthStep {
    /// Connect request: the human still has to accept or reject.
    AwaitingDecision,
    /// The outcome was already delivered.
    Resolved,
}

struct ConnectContext {
    origin: String,
    requested: PermissionSet,
    presented: PermissionSet,
    framing: ConnectFraming,
}

pub struct AuthSession {
    bridge: Arc<AuthBridge>,
    wallet: Arc<WalletManager>,
    permissions: Arc<PermissionRegistry>,
    surface_id: Uuid,
    request: AuthRequest,
    connect: Option<ConnectContext>,
    authenticated: bool,
    finished: bool,
}

impl std::fmt::Debug for AuthSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthSession")
            .field("surface_id", &self.surface_id)
            .field("request", &self.request)
            .field("connect", &self.connect.is_some())
            .field("authenticated", &self.authenticated)
            .field("finished", &self.finished)
            .finish()
    }
}

impl AuthSession {
    /// Reconstruct and validate the request the surface was opened with.
    ///
    /// A request that cannot be reconstructed, or a connect request
    /// missing its url or permission set, resolves immediately as
    /// rejected; the returned outcome tells the UI what was delivered so
    /// it can close.
    pub async fn begin(
        raw_request: &str,
        surface_id: Uuid,
        bridge: Arc<AuthBridge>,
        wallet: Arc<WalletManager>,
        permissions: Arc<PermissionRegistry>,
    ) -> Result<AuthSession, AuthOutcome> {
        let request: AuthRequest = match serde_json::from_str(raw_request) {
            Ok(request) => request,
            Err(e) => {
                log::warn!("Auth surface {surface_id} got an unreadable request: {e}");
                // The request kind is unknown here; answer on the
                // connect channel like the original flow does.
                let outcome = AuthOutcome::rejected(AuthKind::Connect, INVALID_AUTH_MESSAGE);
                bridge.deliver(surface_id, outcome.clone());
                return Err(outcome);
            }
        };

        let reject = |outcome: AuthOutcome| {
            bridge.deliver(surface_id, outcome.clone());
            Err(outcome)
        };

        let connect = match request.kind {
            AuthKind::Connect => {
                let (Some(url), Some(requested)) = (&request.url, &request.permissions) else {
                    return reject(AuthOutcome::rejected(request.kind, INVALID_AUTH_MESSAGE));
                };
                if requested.is_empty() {
                    return reject(AuthOutcome::rejected(request.kind, INVALID_AUTH_MESSAGE));
                }
                let Ok(origin) = normalize_origin(url) else {
                    return reject(AuthOutcome::rejected(request.kind, INVALID_AUTH_MESSAGE));
                };

                let existing = match permissions.get_permissions(&origin).await {
                    Ok(existing) => existing,
                    Err(e) => {
                        return reject(AuthOutcome::rejected(request.kind, &e.to_string()));
                    }
                };
                let framing = if existing.is_empty() {
                    ConnectFraming::FreshGrant
                } else {
                    ConnectFraming::AlreadyConnected
                };
                Some(ConnectContext {
                    origin,
                    requested: requested.clone(),
                    presented: requested.difference(&existing),
                    framing,
                })
            }
            AuthKind::Token => {
                if request.token_id.is_none() {
                    return reject(AuthOutcome::rejected(request.kind, INVALID_AUTH_MESSAGE));
                }
                None
            }
            _ => None,
        };

        Ok(AuthSession {
            bridge,
            wallet,
            permissions,
            surface_id,
            request,
            connect,
            authenticated: false,
            finished: false,
        })
    }

    pub fn kind(&self) -> AuthKind {
        self.request.kind
    }

    pub fn framing(&self) -> Option<ConnectFraming> {
        self.connect.as_ref().map(|c| c.framing)
    }

    /// The capability tags the UI should list: the requested-minus-
    /// granted delta for connect requests.
    pub fn presented_permissions(&self) -> Option<&PermissionSet> {
        self.connect.as_ref().map(|c| &c.presented)
    }

    pub fn origin(&self) -> Option<&str> {
        self.connect.as_ref().map(|c| c.origin.as_str())
    }

    /// Unlock the wallet with `password`. A wrong password is not
    /// terminal; the UI re-prompts. For every kind but connect a
    /// successful unlock is the approval itself and resolves the
    /// session.
    pub async fn authenticate(&mut self, password: &str) -> Result<AuthStep, WalletError> {
        if self.finished {
            return Ok(AuthStep::Resolved);
        }
        self.wallet.unlock(password).await?;
        self.authenticated = true;

        if self.request.kind == AuthKind::Connect {
            return Ok(AuthStep::AwaitingDecision);
        }

        // Non-connect requests need a requesting tab to answer to.
        let outcome = if self.request.url.is_some() {
            AuthOutcome::accepted(self.request.kind)
        } else {
            AuthOutcome::rejected(self.request.kind, NO_TAB_MESSAGE)
        };
        self.resolve(outcome);
        Ok(AuthStep::Resolved)
    }

    /// Accept a connect request: persist the union of prior and newly
    /// requested capabilities, then deliver the success outcome.
    pub async fn accept(&mut self) -> Result<(), SessionError> {
        if self.finished {
            return Err(SessionError::AlreadyResolved);
        }
        if !self.authenticated {
            return Err(SessionError::NotAuthenticated);
        }
        let Some(connect) = &self.connect else {
            // Non-connect requests resolve inside `authenticate`.
            return Err(SessionError::AlreadyResolved);
        };

        if let Err(e) = self
            .permissions
            .grant(&connect.origin, &connect.requested)
            .await
        {
            let outcome = AuthOutcome::rejected(self.request.kind, &e.to_string());
            self.resolve(outcome);
            return Err(SessionError::Store(e));
        }

        self.resolve(AuthOutcome::accepted(self.request.kind));
        Ok(())
    }

    /// Reject the request (cancel button, or the surface unloading).
    /// Safe to call after resolution; later calls are no-ops.
    pub fn cancel(&mut self) {
        if self.finished {
            return;
        }
        self.resolve(AuthOutcome::rejected(self.request.kind, CANCELLED_MESSAGE));
    }

    fn resolve(&mut self, outcome: AuthOutcome) {
        self.finished = true;
        self.bridge.deliver(self.surface_id, outcome);
    }
}
