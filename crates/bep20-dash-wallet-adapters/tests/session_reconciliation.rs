mod common;

use std::time::Duration;

use alloy::primitives::Address;
use bep20_dash_wallet_adapters::{Eip1193Adapter, ProviderShape};
use bep20_dash_wallet_core::errors::ActionOutcome;
use bep20_dash_wallet_core::handle::methods;
use bep20_dash_wallet_core::session::ReconcileOutcome;
use bep20_dash_wallet_core::{
    ErrorType, ProviderRpcError, SessionContext, SessionNotice, SessionSnapshot, TokenDescriptor,
};

use common::{session, target_chain, wait_for_snapshot, ACCOUNT_A, ACCOUNT_B};

#[tokio::test(start_paused = true)]
async fn connect_publishes_a_connected_snapshot() {
    let adapter = Eip1193Adapter::deterministic();
    let session = session(&adapter);
    let rx = session.subscribe();

    let snapshot = session.connect().await.expect("connect");
    assert_eq!(snapshot.account.as_deref(), Some(ACCOUNT_A));
    assert_eq!(snapshot.chain_id, Some(target_chain()));
    assert!(snapshot.is_connected);
    assert!(!snapshot.is_connecting);
    assert!(snapshot.is_correct_network);
    assert!(!snapshot.is_loading);
    assert!(snapshot.error.is_none());
    assert_eq!(*rx.borrow(), snapshot);
    assert!(session.is_reconciling());
}

#[tokio::test(start_paused = true)]
async fn concurrent_session_connects_are_single_flight() {
    let adapter = Eip1193Adapter::deterministic();
    adapter
        .set_delay(methods::REQUEST_ACCOUNTS, Duration::from_millis(50))
        .expect("delay");
    let session = session(&adapter);

    let (first, second) = tokio::join!(session.connect(), session.connect());
    assert!(first.expect("first connects").is_connected);
    let error = second.expect_err("second is rejected");
    assert_eq!(error.error_type, ErrorType::PendingRequest);
}

#[tokio::test(start_paused = true)]
async fn failed_connect_exposes_an_actionable_error() {
    let adapter = Eip1193Adapter::deterministic();
    adapter
        .fail_next(
            methods::REQUEST_ACCOUNTS,
            ProviderRpcError::new(4001, "User rejected the request."),
        )
        .expect("script failure");
    let session = session(&adapter);

    let error = session.connect().await.expect_err("rejected");
    assert_eq!(error.error_type, ErrorType::UserRejected);
    let snapshot = session.snapshot();
    assert!(!snapshot.is_connected);
    assert_eq!(snapshot.error.as_ref(), Some(&error));

    let retry = error.primary_action().expect("retry action");
    assert_eq!(retry.invoke().await, ActionOutcome::Ran);
    let snapshot = session.snapshot();
    assert!(snapshot.is_connected);
    assert!(snapshot.error.is_none());
}

#[tokio::test(start_paused = true)]
async fn disconnect_resets_the_snapshot_and_stops_reconciling() {
    let adapter = Eip1193Adapter::deterministic();
    let session = session(&adapter);
    session.connect().await.expect("connect");
    assert!(session.is_reconciling());

    session.disconnect();
    assert_eq!(session.snapshot(), SessionSnapshot::default());
    assert!(!session.is_reconciling());
    assert_eq!(adapter.listener_count().expect("listeners"), 0);

    // A second disconnect is a no-op.
    session.disconnect();
    assert_eq!(session.snapshot(), SessionSnapshot::default());
}

#[tokio::test(start_paused = true)]
async fn account_drift_is_corrected_by_reconciliation() {
    let adapter = Eip1193Adapter::deterministic();
    let session = session(&adapter);
    session.connect().await.expect("connect");

    assert_eq!(session.reconcile_once().await, ReconcileOutcome::InSync);

    adapter
        .set_accounts_silently(&[ACCOUNT_B])
        .expect("silent account change");
    assert_eq!(session.reconcile_once().await, ReconcileOutcome::Corrected);
    let snapshot = session.snapshot();
    assert_eq!(snapshot.account.as_deref(), Some(ACCOUNT_B));
    assert_eq!(
        snapshot.notice,
        Some(SessionNotice::AccountChanged {
            account: ACCOUNT_B.to_owned()
        })
    );
    assert_eq!(
        session.manager().signer().map(|s| s.address().to_owned()),
        Some(ACCOUNT_B.to_owned())
    );
}

#[tokio::test(start_paused = true)]
async fn chain_drift_is_corrected_by_reconciliation() {
    let adapter = Eip1193Adapter::deterministic();
    let session = session(&adapter);
    session.connect().await.expect("connect");

    adapter.set_chain_silently(1).expect("silent chain change");
    assert_eq!(session.reconcile_once().await, ReconcileOutcome::Corrected);
    let snapshot = session.snapshot();
    assert_eq!(snapshot.chain_id, Some(1));
    assert!(snapshot.is_connected);
    assert!(!snapshot.is_correct_network);
    assert_eq!(
        snapshot.error.map(|e| e.error_type),
        Some(ErrorType::WrongNetwork)
    );
}

#[tokio::test(start_paused = true)]
async fn locked_wallet_ends_the_session_within_one_tick() {
    let adapter = Eip1193Adapter::deterministic();
    let session = session(&adapter);
    session.connect().await.expect("connect");

    adapter.set_accounts_silently(&[]).expect("lock wallet");
    // The first tick runs two seconds after connecting.
    tokio::time::sleep(Duration::from_millis(2_100)).await;

    let snapshot = session.snapshot();
    assert!(!snapshot.is_connected);
    assert!(snapshot.account.is_none());
    assert!(snapshot.error.is_none());
    assert!(snapshot.notice.is_none());
    assert!(!session.is_reconciling());
}

#[tokio::test(start_paused = true)]
async fn reconcile_skips_while_connecting() {
    let adapter = Eip1193Adapter::deterministic();
    adapter
        .set_delay(methods::REQUEST_ACCOUNTS, Duration::from_millis(50))
        .expect("delay");
    let session = session(&adapter);

    let (connected, outcome) = tokio::join!(session.connect(), session.reconcile_once());
    connected.expect("connect");
    assert_eq!(outcome, ReconcileOutcome::Skipped);
}

#[tokio::test(start_paused = true)]
async fn connects_issued_during_a_reconcile_tick_are_rejected() {
    let adapter = Eip1193Adapter::deterministic().authorized(true);
    let gate = adapter.hold(methods::ACCOUNTS).expect("hold accounts");
    let session = session(&adapter);

    let ticking = tokio::spawn({
        let session = session.clone();
        async move { session.reconcile_once().await }
    });
    while adapter.call_count(methods::ACCOUNTS).expect("calls") == 0 {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let (first, second) = tokio::join!(session.connect(), session.connect());
    for result in [first, second] {
        let error = result.expect_err("session is busy");
        assert_eq!(error.error_type, ErrorType::PendingRequest);
    }

    gate.release();
    assert_eq!(ticking.await.expect("join"), ReconcileOutcome::Reconnected);
    assert!(session.snapshot().is_connected);
    assert_eq!(adapter.call_count(methods::REQUEST_ACCOUNTS).expect("calls"), 1);
}

#[tokio::test(start_paused = true)]
async fn disconnect_during_connect_discards_the_late_result() {
    let adapter = Eip1193Adapter::deterministic();
    let gate = adapter.hold(methods::REQUEST_ACCOUNTS).expect("hold");
    let session = session(&adapter);

    let connecting = tokio::spawn({
        let session = session.clone();
        async move { session.connect().await }
    });
    while adapter.call_count(methods::REQUEST_ACCOUNTS).expect("calls") == 0 {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    session.disconnect();
    gate.release();

    connecting.await.expect("join").expect_err("attempt was abandoned");
    let snapshot = session.snapshot();
    assert!(!snapshot.is_connected);
    assert!(!snapshot.is_loading);
    assert!(snapshot.account.is_none());
    assert!(snapshot.error.is_none());
    assert_eq!(session.error_stats().total, 0);
    assert!(!session.is_reconciling());
}

#[tokio::test(start_paused = true)]
async fn legacy_session_reconciles_through_the_legacy_accounts_getter() {
    let legacy = Eip1193Adapter::deterministic().with_shape(ProviderShape::legacy_enable());
    let session = session(&legacy);

    let snapshot = session.connect().await.expect("legacy connect");
    assert!(snapshot.is_connected);
    assert_eq!(snapshot.account.as_deref(), Some(ACCOUNT_A));
    assert_eq!(snapshot.chain_id, None);
    assert!(snapshot.error.is_none());
    assert_eq!(session.error_stats().total, 0);

    assert_eq!(session.reconcile_once().await, ReconcileOutcome::InSync);

    legacy.set_accounts_silently(&[ACCOUNT_B]).expect("swap account");
    assert_eq!(session.reconcile_once().await, ReconcileOutcome::Corrected);
    let snapshot = session.snapshot();
    assert_eq!(snapshot.account.as_deref(), Some(ACCOUNT_B));
    assert!(snapshot.error.is_none());

    legacy.set_accounts_silently(&[]).expect("lock wallet");
    assert_eq!(session.reconcile_once().await, ReconcileOutcome::Disconnected);
    assert!(!session.snapshot().is_connected);
    assert_eq!(legacy.call_count(methods::CHAIN_ID).expect("calls"), 0);
}

#[tokio::test(start_paused = true)]
async fn reconcile_reconnects_when_accounts_reappear() {
    let adapter = Eip1193Adapter::deterministic();
    let session = session(&adapter);

    assert_eq!(session.reconcile_once().await, ReconcileOutcome::Idle);

    session.connect().await.expect("connect");
    session.disconnect();
    // The wallet still authorises the site after an explicit disconnect.
    assert_eq!(session.reconcile_once().await, ReconcileOutcome::Reconnected);
    assert!(session.snapshot().is_connected);
}

#[tokio::test(start_paused = true)]
async fn provider_disconnect_sets_a_notice() {
    let adapter = Eip1193Adapter::deterministic();
    let session = session(&adapter);
    session.connect().await.expect("connect");
    let mut rx = session.subscribe();

    adapter
        .debug_inject_disconnect(None)
        .expect("inject disconnect");
    let snapshot = wait_for_snapshot(&mut rx, |s| {
        s.notice == Some(SessionNotice::ProviderDisconnected)
    })
    .await;
    assert!(!snapshot.is_connected);
    assert!(snapshot.error.is_none());
    assert!(!session.is_reconciling());
}

#[tokio::test(start_paused = true)]
async fn account_event_sets_a_notice() {
    let adapter = Eip1193Adapter::deterministic();
    let session = session(&adapter);
    session.connect().await.expect("connect");
    let mut rx = session.subscribe();

    adapter
        .debug_inject_accounts_changed(&[ACCOUNT_B])
        .expect("inject accounts");
    let snapshot = wait_for_snapshot(&mut rx, |s| s.notice.is_some()).await;
    assert_eq!(snapshot.account.as_deref(), Some(ACCOUNT_B));
    assert_eq!(
        snapshot.notice,
        Some(SessionNotice::AccountChanged {
            account: ACCOUNT_B.to_owned()
        })
    );
}

#[tokio::test(start_paused = true)]
async fn chain_event_updates_network_correctness() {
    let adapter = Eip1193Adapter::deterministic();
    let session = session(&adapter);
    session.connect().await.expect("connect");
    let mut rx = session.subscribe();

    adapter.debug_inject_chain_changed(1).expect("inject chain");
    let snapshot = wait_for_snapshot(&mut rx, |s| {
        s.notice
            == Some(SessionNotice::NetworkChanged {
                chain_id: 1,
                is_correct: false,
            })
    })
    .await;
    assert_eq!(snapshot.chain_id, Some(1));
    assert!(!snapshot.is_correct_network);
    assert_eq!(
        snapshot.error.map(|e| e.error_type),
        Some(ErrorType::WrongNetwork)
    );

    adapter
        .debug_inject_chain_changed(target_chain())
        .expect("inject chain");
    let target = target_chain();
    let snapshot = wait_for_snapshot(&mut rx, |s| {
        s.notice
            == Some(SessionNotice::NetworkChanged {
                chain_id: target,
                is_correct: true,
            })
    })
    .await;
    assert!(snapshot.is_correct_network);
    assert!(snapshot.error.is_none());
}

#[tokio::test(start_paused = true)]
async fn restore_reconnects_only_authorised_sites() {
    let fresh = Eip1193Adapter::deterministic();
    let session = session(&fresh);
    assert_eq!(session.restore().await.expect("restore"), None);
    assert_eq!(
        fresh.call_count(methods::REQUEST_ACCOUNTS).expect("calls"),
        0
    );

    let returning = Eip1193Adapter::deterministic().authorized(true);
    let session = common::session(&returning);
    let snapshot = session
        .restore()
        .await
        .expect("restore")
        .expect("restored session");
    assert!(snapshot.is_connected);
    assert_eq!(snapshot.account.as_deref(), Some(ACCOUNT_A));
}

#[tokio::test(start_paused = true)]
async fn watch_token_asks_the_wallet() {
    let adapter = Eip1193Adapter::deterministic();
    let session = session(&adapter);
    let token = TokenDescriptor {
        address: "0x55d398326f99059ff775485246999027b3197955"
            .parse::<Address>()
            .expect("token address"),
        symbol: "USDT".to_owned(),
        decimals: 18,
        image: Some("https://dash.example/usdt.png".to_owned()),
    };

    let error = session.watch_token(&token).await.expect_err("not connected");
    assert_eq!(error.error_type, ErrorType::Disconnected);

    session.connect().await.expect("connect");
    assert!(session.watch_token(&token).await.expect("watch"));
    let watched = adapter.watched_assets().expect("watched");
    assert_eq!(watched.len(), 1);
    assert_eq!(watched[0]["symbol"], "USDT");
    assert_eq!(watched[0]["decimals"], 18);
    assert_eq!(watched[0]["image"], "https://dash.example/usdt.png");
}

#[tokio::test(start_paused = true)]
async fn errors_are_counted_by_the_session_classifier() {
    let adapter = Eip1193Adapter::deterministic();
    adapter
        .fail_next(
            methods::REQUEST_ACCOUNTS,
            ProviderRpcError::new(4001, "User rejected the request."),
        )
        .expect("script failure");
    let session = session(&adapter);
    session.connect().await.expect_err("rejected");

    let stats = session.error_stats();
    assert_eq!(stats.total, 1);
    assert_eq!(stats.by_code.get(&4001), Some(&1));
}

#[tokio::test]
async fn uninitialized_context_is_inert() {
    let context = SessionContext::uninitialized();
    assert!(!context.is_initialized());
    assert_eq!(context.snapshot(), SessionSnapshot::default());
    assert!(context.account().is_none());
    assert!(!context.is_connected());
    assert!(!context.is_loading());
    assert_eq!(*context.subscribe().borrow(), SessionSnapshot::default());

    assert_eq!(
        context.connect().await.expect("no-op connect"),
        SessionSnapshot::default()
    );
    assert_eq!(context.switch_network().await.expect("no-op switch"), None);
    context.disconnect();
    context.clear_error();
}

#[tokio::test(start_paused = true)]
async fn context_delegates_to_the_session() {
    let adapter = Eip1193Adapter::deterministic();
    let context = SessionContext::new(session(&adapter));
    assert!(context.is_initialized());

    context.connect().await.expect("connect");
    assert!(context.is_connected());
    assert_eq!(context.account().as_deref(), Some(ACCOUNT_A));
    assert!(context.is_correct_network());

    context.disconnect();
    assert!(!context.is_connected());
}
