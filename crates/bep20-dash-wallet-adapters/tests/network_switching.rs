mod common;

use std::sync::Arc;
use std::time::Duration;

use bep20_dash_wallet_adapters::{Eip1193Adapter, ProviderShape};
use bep20_dash_wallet_core::errors::{ActionHandler, ActionOutcome};
use bep20_dash_wallet_core::handle::methods;
use bep20_dash_wallet_core::networks::target_network;
use bep20_dash_wallet_core::{
    ActionKind, ErrorClassifier, ErrorType, NetworkReconciler, NetworkState, ProviderRpcError,
    SessionConfig, WalletHandle,
};
use tokio::sync::mpsc;

use common::{session, session_with, target_chain, test_config, TestClock};

fn reconciler() -> NetworkReconciler {
    let classifier = ErrorClassifier::new(Arc::new(TestClock::default()), 100);
    NetworkReconciler::new(target_network(), Arc::new(classifier))
}

fn handle(adapter: &Eip1193Adapter) -> WalletHandle {
    WalletHandle::new(Arc::new(adapter.clone()))
}

fn methods_called(adapter: &Eip1193Adapter) -> Vec<String> {
    adapter
        .calls()
        .expect("calls")
        .into_iter()
        .map(|c| c.method)
        .collect()
}

#[tokio::test]
async fn validate_classifies_the_active_chain() {
    let adapter = Eip1193Adapter::deterministic();
    let reconciler = reconciler();
    let handle = handle(&adapter);

    let info = reconciler.validate(Some(&handle)).await.expect("validate");
    assert!(info.is_correct);
    assert_eq!(reconciler.state(), NetworkState::Correct);

    adapter.set_chain_silently(1).expect("move to mainnet");
    let info = reconciler.validate(Some(&handle)).await.expect("validate");
    assert_eq!(info.chain_name, "Ethereum Mainnet");
    assert!(!info.is_correct);
    assert!(info.is_supported);
    assert_eq!(reconciler.state(), NetworkState::Wrong);

    adapter.set_chain_silently(0x999).expect("move to unknown chain");
    let info = reconciler.validate(Some(&handle)).await.expect("validate");
    assert_eq!(info.chain_name, "Chain 2457");
    assert!(!info.is_supported);
    assert_eq!(reconciler.current_network(), Some(info));
}

#[tokio::test]
async fn validate_surfaces_provider_errors() {
    let adapter = Eip1193Adapter::deterministic();
    adapter
        .fail_next(methods::CHAIN_ID, ProviderRpcError::new(-32603, "internal"))
        .expect("script failure");
    let reconciler = reconciler();

    let error = reconciler
        .validate(Some(&handle(&adapter)))
        .await
        .expect_err("chain read fails");
    assert_eq!(error.error_type, ErrorType::InternalError);
    assert_eq!(reconciler.state(), NetworkState::Error);
}

#[tokio::test]
async fn switch_adds_a_chain_the_wallet_does_not_know() {
    let adapter = Eip1193Adapter::deterministic()
        .with_chain(1)
        .with_known_chains([1]);
    let reconciler = reconciler();

    let info = reconciler
        .switch_to_target(&handle(&adapter))
        .await
        .expect("switch via add");
    assert!(info.is_correct);
    assert_eq!(reconciler.state(), NetworkState::Correct);
    assert_eq!(adapter.current_chain().expect("chain"), target_chain());

    let added = adapter.added_chains().expect("added chains");
    assert_eq!(added.len(), 1);
    let expected =
        serde_json::to_value(target_network().add_chain_params()).expect("serialize params");
    assert_eq!(added[0], expected);
    assert_eq!(
        methods_called(&adapter),
        vec![methods::SWITCH_CHAIN, methods::ADD_CHAIN, methods::CHAIN_ID]
    );
}

#[tokio::test]
async fn add_without_activation_switches_afterwards() {
    let adapter = Eip1193Adapter::deterministic()
        .with_chain(1)
        .with_known_chains([1])
        .switch_on_add(false);
    let reconciler = reconciler();

    let info = reconciler
        .switch_to_target(&handle(&adapter))
        .await
        .expect("switch after add");
    assert!(info.is_correct);
    assert_eq!(
        methods_called(&adapter),
        vec![
            methods::SWITCH_CHAIN,
            methods::ADD_CHAIN,
            methods::CHAIN_ID,
            methods::SWITCH_CHAIN,
            methods::CHAIN_ID,
        ]
    );
}

#[tokio::test]
async fn rejected_switch_asks_the_user_without_manual_steps() {
    let adapter = Eip1193Adapter::deterministic().with_chain(1);
    adapter
        .fail_next(
            methods::SWITCH_CHAIN,
            ProviderRpcError::new(4001, "User rejected the request."),
        )
        .expect("script failure");
    let reconciler = reconciler();

    let failure = reconciler
        .switch_to_target(&handle(&adapter))
        .await
        .expect_err("rejected");
    assert_eq!(failure.error.error_type, ErrorType::UserRejected);
    assert!(failure.requires_user_action);
    assert!(failure.manual.is_none());
    assert!(failure
        .error
        .user_message
        .contains(&target_network().chain_name));
    assert_eq!(reconciler.state(), NetworkState::Wrong);
    assert_eq!(adapter.call_count(methods::ADD_CHAIN).expect("calls"), 0);
}

#[tokio::test]
async fn failed_switch_offers_manual_instructions() {
    let adapter = Eip1193Adapter::deterministic().with_chain(1);
    adapter
        .fail_next(
            methods::SWITCH_CHAIN,
            ProviderRpcError::new(-32603, "Internal JSON-RPC error."),
        )
        .expect("script failure");
    let reconciler = reconciler();

    let failure = reconciler
        .switch_to_target(&handle(&adapter))
        .await
        .expect_err("switch fails");
    assert_eq!(failure.error.error_type, ErrorType::NetworkSwitchFailed);
    assert!(failure.requires_user_action);
    let manual = failure.manual.expect("manual instructions");
    assert_eq!(manual.chain_id, target_chain());
    assert_eq!(manual.steps.len(), 8);
    assert!(failure.error.has_action(ActionKind::ShowManualInstructions));
    assert_eq!(reconciler.state(), NetworkState::Error);
}

#[tokio::test]
async fn rejected_add_after_unknown_chain() {
    let adapter = Eip1193Adapter::deterministic()
        .with_chain(1)
        .with_known_chains([1]);
    adapter
        .fail_next(
            methods::ADD_CHAIN,
            ProviderRpcError::new(4001, "User rejected the request."),
        )
        .expect("script failure");
    let reconciler = reconciler();

    let failure = reconciler
        .switch_to_target(&handle(&adapter))
        .await
        .expect_err("add rejected");
    assert_eq!(failure.error.error_type, ErrorType::UserRejected);
    assert!(failure.manual.is_none());
    assert_eq!(adapter.current_chain().expect("chain"), 1);
}

#[tokio::test]
async fn chain_listener_is_registered_once_per_provider() {
    let adapter = Eip1193Adapter::deterministic();
    let reconciler = reconciler();
    let handle = handle(&adapter);
    let (tx, mut rx) = mpsc::unbounded_channel();

    for _ in 0..2 {
        let tx = tx.clone();
        reconciler
            .setup_listeners(&handle, move |change| {
                let _ = tx.send(change);
            })
            .expect("listener");
    }
    assert!(reconciler.has_listener());
    assert_eq!(adapter.listener_count().expect("listeners"), 1);

    adapter.debug_inject_chain_changed(1).expect("inject chain");
    let change = rx.try_recv().expect("one change");
    assert_eq!(change.chain_id, 1);
    assert!(!change.is_correct);
    assert_eq!(change.info.chain_name, "Ethereum Mainnet");
    assert!(rx.try_recv().is_err());
    assert_eq!(reconciler.state(), NetworkState::Wrong);

    reconciler.clear_listeners();
    assert!(!reconciler.has_listener());
    assert_eq!(adapter.listener_count().expect("listeners"), 0);
}

#[tokio::test]
async fn providers_without_events_cannot_be_watched() {
    let adapter = Eip1193Adapter::deterministic().with_shape(ProviderShape {
        events: false,
        ..ProviderShape::metamask()
    });
    let reconciler = reconciler();

    let error = reconciler
        .setup_listeners(&handle(&adapter), |_| {})
        .expect_err("no event support");
    assert_eq!(error.error_type, ErrorType::UnsupportedMethod);
    assert!(!reconciler.has_listener());
}

#[tokio::test(start_paused = true)]
async fn session_switches_automatically_on_connect() {
    let adapter = Eip1193Adapter::deterministic().with_chain(1);
    let session = session(&adapter);

    let snapshot = session.connect().await.expect("connect");
    assert!(snapshot.is_connected);
    assert!(snapshot.is_correct_network);
    assert_eq!(snapshot.chain_id, Some(target_chain()));
    assert!(snapshot.error.is_none());
    assert_eq!(adapter.call_count(methods::SWITCH_CHAIN).expect("calls"), 1);
}

#[tokio::test(start_paused = true)]
async fn wrong_network_stays_hidden_while_the_automatic_switch_runs() {
    let adapter = Eip1193Adapter::deterministic().with_chain(1);
    let gate = adapter.hold(methods::SWITCH_CHAIN).expect("hold switch");
    let session = session(&adapter);

    let connecting = tokio::spawn({
        let session = session.clone();
        async move { session.connect().await }
    });
    while adapter.call_count(methods::SWITCH_CHAIN).expect("calls") == 0 {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let midway = session
        .restore()
        .await
        .expect("restore")
        .expect("connected while switching");
    assert!(midway.is_connected);
    assert!(!midway.is_correct_network);
    assert!(midway.error.is_none());

    gate.release();
    let snapshot = connecting.await.expect("join").expect("connect");
    assert!(snapshot.is_correct_network);
    assert!(snapshot.error.is_none());
    assert_eq!(session.error_stats().total, 0);
}

#[tokio::test(start_paused = true)]
async fn session_reports_wrong_network_when_auto_switch_is_off() {
    let adapter = Eip1193Adapter::deterministic().with_chain(1);
    let session = session_with(
        &adapter,
        SessionConfig {
            auto_switch_on_connect: false,
            ..test_config()
        },
    );

    let snapshot = session.connect().await.expect("connect");
    assert!(snapshot.is_connected);
    assert!(!snapshot.is_correct_network);
    assert_eq!(snapshot.chain_id, Some(1));
    let error = snapshot.error.expect("wrong network error");
    assert_eq!(error.error_type, ErrorType::WrongNetwork);
    assert_eq!(adapter.call_count(methods::SWITCH_CHAIN).expect("calls"), 0);

    let info = session.switch_network().await.expect("manual switch");
    assert!(info.is_correct);
    let snapshot = session.snapshot();
    assert!(snapshot.is_correct_network);
    assert!(snapshot.error.is_none());
    assert!(!snapshot.is_loading);
}

#[tokio::test(start_paused = true)]
async fn wrong_network_action_switches_through_the_session() {
    let adapter = Eip1193Adapter::deterministic().with_chain(1);
    adapter
        .fail_next(
            methods::SWITCH_CHAIN,
            ProviderRpcError::new(4001, "User rejected the request."),
        )
        .expect("script failure");
    let session = session(&adapter);

    let snapshot = session.connect().await.expect("connect");
    assert!(snapshot.is_connected);
    assert!(!snapshot.is_correct_network);
    let error = snapshot.error.expect("wrong network error");
    assert_eq!(error.error_type, ErrorType::WrongNetwork);

    let action = error.primary_action().expect("primary action").clone();
    assert_eq!(action.kind, ActionKind::SwitchNetwork);
    assert!(matches!(action.handler, Some(ActionHandler::Callback(_))));
    assert_eq!(action.invoke().await, ActionOutcome::Ran);

    let snapshot = session.snapshot();
    assert!(snapshot.is_correct_network);
    assert!(snapshot.error.is_none());
}

#[tokio::test(start_paused = true)]
async fn session_add_network_registers_the_target() {
    let adapter = Eip1193Adapter::deterministic()
        .with_chain(1)
        .with_known_chains([1]);
    let session = session_with(
        &adapter,
        SessionConfig {
            auto_switch_on_connect: false,
            ..test_config()
        },
    );
    session.connect().await.expect("connect");

    let info = session.add_network().await.expect("add network");
    assert!(info.is_correct);
    assert_eq!(adapter.added_chains().expect("added").len(), 1);
    assert!(session.snapshot().is_correct_network);
}

#[tokio::test(start_paused = true)]
async fn switching_without_a_session_fails() {
    let adapter = Eip1193Adapter::deterministic();
    let session = session(&adapter);

    let failure = session.switch_network().await.expect_err("not connected");
    assert_eq!(failure.error.error_type, ErrorType::Disconnected);
    assert!(failure.requires_user_action);
    assert_eq!(
        session.snapshot().error.map(|e| e.error_type),
        Some(ErrorType::Disconnected)
    );
    assert_eq!(adapter.call_count(methods::SWITCH_CHAIN).expect("calls"), 0);
}
