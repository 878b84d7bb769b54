/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! End-to-end scenarios: background handlers on one side, a driven
//! approval surface on the other, talking through the real bridge.

mod harness;

use std::sync::Arc;

use harness::{FakeKeyfileCrypto, OpenedSurface, PASSWORD, TestHost, scenario, seal_envelope};
use weavegate::api::DecryptOptions;
use weavegate::auth::session::{AuthSession, AuthStep, ConnectFraming};
use weavegate::auth::{AuthKind, CANCELLED_MESSAGE};
use weavegate::storage::JsonFileStore;
use weavegate::tokens::{TokenState, TokenType};
use weavegate::{ApiError, Background, CallerContext, CoreConfig, Permission, PermissionSet};

fn set(tags: &[Permission]) -> PermissionSet {
    tags.iter().copied().collect()
}

fn token_state(name: &str, ticker: &str) -> TokenState {
    TokenState {
        name: name.to_string(),
        ticker: ticker.to_string(),
        extra: Default::default(),
    }
}

const CONTRACT_ID: &str = "usjm4PCxUd5mtaon7zc97-dt-3qf67yPyqgzLnLqk5A";

/// Start a session for an opened surface, exactly as the popup process
/// would.
async fn begin_session(background: &Arc<Background>, surface: &OpenedSurface) -> AuthSession {
    let raw = serde_json::to_string(&surface.request).expect("request serializes");
    AuthSession::begin(
        &raw,
        surface.surface_id,
        background.bridge().clone(),
        background.wallet().clone(),
        background.permissions().clone(),
    )
    .await
    .expect("session starts")
}

/// Unlock and approve whatever the surface asks for.
async fn approve(background: &Arc<Background>, surface: OpenedSurface) {
    let mut session = begin_session(background, &surface).await;
    match session.authenticate(PASSWORD).await.expect("unlock") {
        AuthStep::AwaitingDecision => session.accept().await.expect("accept"),
        AuthStep::Resolved => {}
    }
}

#[tokio::test]
async fn fresh_connect_presents_the_full_set_and_grants_it() {
    let mut scenario = scenario().with_wallet().await;

    let handler = tokio::spawn({
        let background = scenario.background.clone();
        async move {
            background
                .connect(
                    &CallerContext::from_tab("https://x.test/mint?ref=1"),
                    &set(&[Permission::Connect]),
                )
                .await
        }
    });

    let surface = scenario.surfaces.recv().await.expect("surface opened");
    let mut session = begin_session(&scenario.background, &surface).await;

    // No prior grant: full requested set, no already-connected framing.
    assert_eq!(session.framing(), Some(ConnectFraming::FreshGrant));
    assert_eq!(
        session
            .presented_permissions()
            .unwrap()
            .iter()
            .collect::<Vec<_>>(),
        vec![Permission::Connect]
    );

    assert_eq!(
        session.authenticate(PASSWORD).await.unwrap(),
        AuthStep::AwaitingDecision
    );
    session.accept().await.unwrap();

    handler.await.expect("handler task").expect("connect succeeds");
    let granted = scenario
        .background
        .permissions()
        .get_permissions("https://x.test")
        .await
        .unwrap();
    assert_eq!(granted.iter().collect::<Vec<_>>(), vec![Permission::Connect]);
}

#[tokio::test]
async fn repeat_connect_presents_the_delta_with_already_connected_framing() {
    let mut scenario = scenario().with_wallet().await;
    scenario
        .background
        .permissions()
        .grant("https://x.test", &set(&[Permission::Connect]))
        .await
        .unwrap();

    let handler = tokio::spawn({
        let background = scenario.background.clone();
        async move {
            background
                .connect(
                    &CallerContext::from_tab("https://x.test"),
                    &set(&[Permission::Connect, Permission::Sign]),
                )
                .await
        }
    });

    let surface = scenario.surfaces.recv().await.expect("surface opened");
    let mut session = begin_session(&scenario.background, &surface).await;

    assert_eq!(session.framing(), Some(ConnectFraming::AlreadyConnected));
    assert_eq!(
        session
            .presented_permissions()
            .unwrap()
            .iter()
            .collect::<Vec<_>>(),
        vec![Permission::Sign]
    );

    session.authenticate(PASSWORD).await.unwrap();
    session.accept().await.unwrap();

    handler.await.expect("handler task").expect("connect succeeds");
    let granted = scenario
        .background
        .permissions()
        .get_permissions("https://x.test")
        .await
        .unwrap();
    assert_eq!(
        granted.iter().collect::<Vec<_>>(),
        vec![Permission::Connect, Permission::Sign]
    );
}

#[tokio::test]
async fn add_token_permission_check_precedes_the_duplicate_check() {
    let scenario = scenario().with_wallet().await;

    // The token is already tracked, but the origin holds no grant: the
    // permission failure must win over the duplicate.
    scenario
        .background
        .tokens()
        .add(CONTRACT_ID, TokenType::Fungible, &token_state("X", "X"), None)
        .await
        .unwrap();

    let result = scenario
        .background
        .add_token(
            &CallerContext::from_tab("https://unconnected.test"),
            CONTRACT_ID,
            TokenType::Fungible,
            Some(&token_state("X", "X")),
            None,
        )
        .await;

    assert!(matches!(result, Err(ApiError::Permission(_))));
}

#[tokio::test]
async fn abandoned_surface_resolves_as_cancellation() {
    let mut scenario = scenario().with_wallet().await;

    let handler = tokio::spawn({
        let background = scenario.background.clone();
        async move {
            background
                .connect(
                    &CallerContext::from_tab("https://x.test"),
                    &set(&[Permission::Connect]),
                )
                .await
        }
    });

    // The user closes the window without answering.
    let surface = scenario.surfaces.recv().await.expect("surface opened");
    surface.closed.cancel();

    let result = handler.await.expect("handler task");
    match result {
        Err(ApiError::UserRejected(message)) => assert_eq!(message, CANCELLED_MESSAGE),
        other => panic!("expected a user rejection, got {other:?}"),
    }

    // Nothing was granted.
    let granted = scenario
        .background
        .permissions()
        .get_permissions("https://x.test")
        .await
        .unwrap();
    assert!(granted.is_empty());
}

#[tokio::test]
async fn approved_add_token_commits_and_rechecks_duplicates() {
    let mut scenario = scenario().with_wallet().await;
    scenario
        .background
        .permissions()
        .grant("https://x.test", &set(&[Permission::Connect]))
        .await
        .unwrap();

    let handler = tokio::spawn({
        let background = scenario.background.clone();
        async move {
            background
                .add_token(
                    &CallerContext::from_tab("https://x.test"),
                    CONTRACT_ID,
                    TokenType::Fungible,
                    Some(&token_state("Example", "EXA")),
                    None,
                )
                .await
        }
    });

    let surface = scenario.surfaces.recv().await.expect("surface opened");
    assert_eq!(surface.request.kind, AuthKind::Token);
    assert_eq!(surface.request.token_id.as_deref(), Some(CONTRACT_ID));
    approve(&scenario.background, surface).await;

    handler.await.expect("handler task").expect("token added");
    let tokens = scenario.background.tokens().list().await.unwrap();
    assert_eq!(tokens.len(), 1);
    assert_eq!(tokens[0].id, CONTRACT_ID);
    assert_eq!(tokens[0].ticker, "EXA");

    // A second attempt fails the duplicate gate before any popup.
    let result = scenario
        .background
        .add_token(
            &CallerContext::from_tab("https://x.test"),
            CONTRACT_ID,
            TokenType::Fungible,
            Some(&token_state("Example", "EXA")),
            None,
        )
        .await;
    assert!(matches!(result, Err(ApiError::Duplicate(_))));
    assert!(scenario.surfaces.try_recv().is_err(), "no surface expected");
}

#[tokio::test]
async fn decrypt_unseals_the_envelope_and_honors_the_salt() {
    let scenario = scenario().with_wallet().await;
    let ctx = CallerContext::from_tab("https://x.test");
    scenario
        .background
        .permissions()
        .grant("https://x.test", &set(&[Permission::Decrypt]))
        .await
        .unwrap();
    scenario.background.wallet().unlock(PASSWORD).await.unwrap();

    let key = [7u8; 32];
    let nonce = [9u8; 12];
    let envelope = seal_envelope(&key, &nonce, b"hello weavegate--pad");

    let options = DecryptOptions {
        algorithm: "RSA-OAEP".to_string(),
        hash: "SHA-256".to_string(),
        salt: None,
    };
    let plain = scenario
        .background
        .decrypt(&ctx, &envelope, &options)
        .await
        .expect("decrypts");
    assert_eq!(plain, "hello weavegate--pad");

    let salted = DecryptOptions {
        salt: Some("--".to_string()),
        ..options
    };
    let plain = scenario
        .background
        .decrypt(&ctx, &envelope, &salted)
        .await
        .expect("decrypts");
    assert_eq!(plain, "hello weavegate");
}

#[tokio::test]
async fn decrypt_without_permission_or_wallet_fails_in_order() {
    let scenario = scenario();
    let ctx = CallerContext::from_tab("https://x.test");
    let options = DecryptOptions {
        algorithm: "RSA-OAEP".to_string(),
        hash: "SHA-256".to_string(),
        salt: None,
    };

    // No grant at all: the capability check fires first.
    let result = scenario
        .background
        .decrypt(&ctx, &[0u8; 600], &options)
        .await;
    assert!(matches!(result, Err(ApiError::Permission(_))));
    assert_eq!(scenario.host.opened_pages(), 0);

    // Granted but no wallet stored: the corrective welcome flow opens.
    scenario
        .background
        .permissions()
        .grant("https://x.test", &set(&[Permission::Decrypt]))
        .await
        .unwrap();
    let result = scenario
        .background
        .decrypt(&ctx, &[0u8; 600], &options)
        .await;
    assert!(matches!(result, Err(ApiError::Permission(_))));
    assert_eq!(scenario.host.opened_pages(), 1);
}

#[tokio::test]
async fn evaluation_gateway_prefers_the_stored_override() {
    let scenario = scenario().with_wallet().await;
    let override_gateway = weavegate::Gateway {
        host: "gw.example".to_string(),
        port: 1984,
        protocol: "http".to_string(),
    };
    scenario
        .background
        .tokens()
        .add(
            CONTRACT_ID,
            TokenType::Fungible,
            &token_state("X", "X"),
            Some(override_gateway.clone()),
        )
        .await
        .unwrap();

    let gateway = scenario
        .background
        .evaluation_gateway(CONTRACT_ID)
        .await
        .unwrap();
    assert_eq!(gateway, override_gateway);

    // Unknown tokens evaluate through the configured default.
    let gateway = scenario
        .background
        .evaluation_gateway("missing")
        .await
        .unwrap();
    assert_eq!(gateway.host, "arweave.net");
}

#[tokio::test]
async fn grants_survive_a_store_reopen() {
    let dir = tempfile::tempdir().expect("temp dir");
    let (host, _surfaces) = TestHost::new();

    {
        let store = Arc::new(JsonFileStore::open(dir.path().to_path_buf()).unwrap());
        let background = Background::new(
            store,
            host.clone(),
            Arc::new(FakeKeyfileCrypto),
            CoreConfig::default(),
        );
        background
            .permissions()
            .grant(
                "https://x.test",
                &set(&[Permission::Connect, Permission::Sign]),
            )
            .await
            .unwrap();
    }

    let store = Arc::new(JsonFileStore::open(dir.path().to_path_buf()).unwrap());
    let background = Background::new(
        store,
        host,
        Arc::new(FakeKeyfileCrypto),
        CoreConfig::default(),
    );
    let granted = background
        .permissions()
        .get_permissions("https://x.test")
        .await
        .unwrap();
    assert_eq!(
        granted.iter().collect::<Vec<_>>(),
        vec![Permission::Connect, Permission::Sign]
    );
    assert_eq!(
        background.permissions().connected_apps().await.unwrap(),
        vec!["https://x.test"]
    );
}
