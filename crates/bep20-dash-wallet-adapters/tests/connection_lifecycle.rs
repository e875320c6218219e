mod common;

use std::time::Duration;

use bep20_dash_wallet_adapters::Eip1193Adapter;
use bep20_dash_wallet_core::handle::methods;
use bep20_dash_wallet_core::manager::{ConnectionSignal, DisconnectReason};
use bep20_dash_wallet_core::{ConnectOptions, ConnectionStatus, ErrorType, ProviderRpcError};

use common::{manager, target_chain, ACCOUNT_A, ACCOUNT_B};

#[tokio::test(start_paused = true)]
async fn connect_reads_account_and_chain() {
    let adapter = Eip1193Adapter::deterministic();
    let manager = manager(&adapter);

    let session = manager
        .connect(ConnectOptions::default())
        .await
        .expect("connect");
    assert_eq!(session.account, ACCOUNT_A);
    assert_eq!(session.chain_id, Some(target_chain()));
    assert_eq!(session.wallet_name, "MetaMask");
    assert!(!session.reused);

    let state = manager.state();
    assert_eq!(state.status, ConnectionStatus::Connected);
    assert_eq!(state.account.as_deref(), Some(ACCOUNT_A));
    assert_eq!(state.chain_id, Some(target_chain().to_string()));
    assert!(state.last_connected_at.is_some());
    assert!(manager.handle().is_some());
    assert_eq!(manager.listener_count(), 3);
    assert_eq!(adapter.listener_count().expect("listeners"), 3);
}

#[tokio::test(start_paused = true)]
async fn connecting_twice_reuses_the_session() {
    let adapter = Eip1193Adapter::deterministic();
    let manager = manager(&adapter);
    manager
        .connect(ConnectOptions::default())
        .await
        .expect("first connect");

    let again = manager
        .connect(ConnectOptions::default())
        .await
        .expect("second connect");
    assert!(again.reused);
    assert_eq!(again.wallet_name, "MetaMask");
    assert_eq!(
        adapter
            .call_count(methods::REQUEST_ACCOUNTS)
            .expect("calls"),
        1
    );
    assert_eq!(adapter.listener_count().expect("listeners"), 3);
}

#[tokio::test(start_paused = true)]
async fn concurrent_connects_are_single_flight() {
    let adapter = Eip1193Adapter::deterministic();
    adapter
        .set_delay(methods::REQUEST_ACCOUNTS, Duration::from_millis(100))
        .expect("delay");
    let manager = manager(&adapter);

    let (first, second) = tokio::join!(
        manager.connect(ConnectOptions::default()),
        manager.connect(ConnectOptions::default()),
    );
    let session = first.expect("first attempt connects");
    assert_eq!(session.account, ACCOUNT_A);

    let rejected = second.expect_err("second attempt is rejected");
    assert_eq!(rejected.error.error_type, ErrorType::PendingRequest);
    assert!(!rejected.retryable);
    assert_eq!(
        adapter
            .call_count(methods::REQUEST_ACCOUNTS)
            .expect("calls"),
        1
    );
    assert_eq!(manager.state().status, ConnectionStatus::Connected);
}

#[tokio::test(start_paused = true)]
async fn forced_reconnect_supersedes_the_running_attempt() {
    let adapter = Eip1193Adapter::deterministic();
    let gate = adapter.hold(methods::REQUEST_ACCOUNTS).expect("hold");
    let manager = manager(&adapter);

    let (first, second, ()) = tokio::join!(
        manager.connect(ConnectOptions::default()),
        manager.connect(ConnectOptions::forced()),
        async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            gate.release();
        },
    );
    let superseded = first.expect_err("first attempt was superseded");
    assert!(!superseded.retryable);
    second.expect("forced attempt connects");

    assert_eq!(manager.state().status, ConnectionStatus::Connected);
    assert_eq!(adapter.listener_count().expect("listeners"), 3);
}

#[tokio::test(start_paused = true)]
async fn disconnect_clears_state_and_listeners() {
    let adapter = Eip1193Adapter::deterministic();
    let manager = manager(&adapter);
    manager
        .connect(ConnectOptions::default())
        .await
        .expect("connect");

    assert!(manager.disconnect());
    let state = manager.state();
    assert_eq!(state.status, ConnectionStatus::Disconnected);
    assert!(state.account.is_none());
    assert!(state.chain_id.is_none());
    assert!(manager.handle().is_none());
    assert!(manager.signer().is_none());
    assert_eq!(manager.listener_count(), 0);
    assert_eq!(adapter.listener_count().expect("listeners"), 0);

    assert!(!manager.disconnect());
}

#[tokio::test(start_paused = true)]
async fn user_rejection_is_final() {
    let adapter = Eip1193Adapter::deterministic();
    adapter
        .fail_next(
            methods::REQUEST_ACCOUNTS,
            ProviderRpcError::new(4001, "User rejected the request."),
        )
        .expect("script failure");
    let manager = manager(&adapter);

    let failure = manager
        .connect(ConnectOptions::default())
        .await
        .expect_err("rejected");
    assert_eq!(failure.error.error_type, ErrorType::UserRejected);
    assert_eq!(failure.error.code, Some(4001));
    assert!(!failure.retryable);
    assert!(!manager.retry_scheduled());

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(
        adapter
            .call_count(methods::REQUEST_ACCOUNTS)
            .expect("calls"),
        1
    );
    // A rejection never falls back to a silent accounts read.
    assert_eq!(adapter.call_count(methods::ACCOUNTS).expect("calls"), 0);
    assert_eq!(manager.state().status, ConnectionStatus::Error);
}

#[tokio::test(start_paused = true)]
async fn pending_request_suggests_a_delay_without_retrying() {
    let adapter = Eip1193Adapter::deterministic();
    adapter
        .fail_next(
            methods::REQUEST_ACCOUNTS,
            ProviderRpcError::new(
                -32002,
                "Request of type 'wallet_requestPermissions' already pending",
            ),
        )
        .expect("script failure");
    let manager = manager(&adapter);

    let failure = manager
        .connect(ConnectOptions::default())
        .await
        .expect_err("pending");
    assert_eq!(failure.error.error_type, ErrorType::PendingRequest);
    assert!(failure.retryable);
    assert_eq!(failure.retry_after, Some(Duration::from_secs(3)));
    assert!(!manager.retry_scheduled());
}

#[tokio::test(start_paused = true)]
async fn locked_wallet_schedules_a_retry() {
    let adapter = Eip1193Adapter::deterministic().with_accounts(&[]);
    let manager = manager(&adapter);

    let failure = manager
        .connect(ConnectOptions::default())
        .await
        .expect_err("locked");
    assert_eq!(failure.error.error_type, ErrorType::WalletLocked);
    assert!(failure.retryable);
    assert_eq!(failure.retry_after, Some(Duration::from_secs(2)));
    assert!(manager.retry_scheduled());
}

#[tokio::test(start_paused = true)]
async fn automatic_retry_connects_after_a_transient_failure() {
    let adapter = Eip1193Adapter::deterministic();
    adapter
        .fail_next(
            methods::REQUEST_ACCOUNTS,
            ProviderRpcError::new(-32005, "limit exceeded"),
        )
        .expect("script failure");
    adapter
        .fail_next(
            methods::ACCOUNTS,
            ProviderRpcError::new(-32005, "limit exceeded"),
        )
        .expect("script failure");
    let manager = manager(&adapter);
    let mut signals = manager.take_signals().expect("signal receiver");

    let failure = manager
        .connect(ConnectOptions::default())
        .await
        .expect_err("first attempt fails");
    assert_eq!(failure.error.error_type, ErrorType::NetworkError);
    assert!(failure.retryable);
    assert!(manager.retry_scheduled());

    // Backoff for the first retry is one second without jitter.
    tokio::time::sleep(Duration::from_millis(1_100)).await;
    let state = manager.state();
    assert_eq!(state.status, ConnectionStatus::Connected);
    assert_eq!(state.account.as_deref(), Some(ACCOUNT_A));
    assert_eq!(state.retry_count, 0);

    let signal = signals.recv().await.expect("retry signal");
    assert_eq!(
        signal,
        ConnectionSignal::Connected {
            account: ACCOUNT_A.to_owned(),
            chain_id: Some(target_chain()),
        }
    );
}

#[tokio::test(start_paused = true)]
async fn retries_stop_when_the_budget_is_spent() {
    let adapter = Eip1193Adapter::deterministic().with_accounts(&[]);
    let manager = manager(&adapter);
    let mut signals = manager.take_signals().expect("signal receiver");

    manager
        .connect(ConnectOptions::default())
        .await
        .expect_err("locked");
    tokio::time::sleep(Duration::from_secs(60)).await;

    let state = manager.state();
    assert_eq!(state.status, ConnectionStatus::Error);
    assert_eq!(state.retry_count, 3);
    assert!(!manager.retry_scheduled());
    assert_eq!(
        adapter
            .call_count(methods::REQUEST_ACCOUNTS)
            .expect("calls"),
        4
    );

    let mut failed = 0;
    while let Ok(signal) = signals.try_recv() {
        assert!(matches!(signal, ConnectionSignal::RetryFailed { .. }));
        failed += 1;
    }
    assert_eq!(failed, 3);

    let exhausted = manager.retry().await.expect_err("budget spent");
    assert_eq!(exhausted.error.error_type, ErrorType::WalletLocked);
    assert!(!exhausted.retryable);
}

#[tokio::test(start_paused = true)]
async fn timeout_fails_and_late_answers_are_ignored() {
    let adapter = Eip1193Adapter::deterministic();
    let gate = adapter.hold(methods::REQUEST_ACCOUNTS).expect("hold");
    let manager = manager(&adapter);

    let failure = manager
        .connect(ConnectOptions {
            timeout: Some(Duration::from_secs(5)),
            ..ConnectOptions::default()
        })
        .await
        .expect_err("times out");
    assert_eq!(failure.error.error_type, ErrorType::Timeout);
    assert!(failure.retryable);
    assert!(!manager.retry_scheduled());

    gate.release();
    tokio::task::yield_now().await;
    let state = manager.state();
    assert_eq!(state.status, ConnectionStatus::Error);
    assert!(state.account.is_none());

    let session = manager
        .connect(ConnectOptions::default())
        .await
        .expect("next attempt connects");
    assert_eq!(session.account, ACCOUNT_A);
}

#[tokio::test(start_paused = true)]
async fn provider_events_update_state() {
    let adapter = Eip1193Adapter::deterministic();
    let manager = manager(&adapter);
    let mut signals = manager.take_signals().expect("signal receiver");
    manager
        .connect(ConnectOptions::default())
        .await
        .expect("connect");

    adapter
        .debug_inject_accounts_changed(&[ACCOUNT_B])
        .expect("inject accounts");
    assert_eq!(manager.state().account.as_deref(), Some(ACCOUNT_B));
    assert_eq!(
        manager.signer().map(|s| s.address().to_owned()),
        Some(ACCOUNT_B.to_owned())
    );
    assert_eq!(
        signals.recv().await.expect("signal"),
        ConnectionSignal::AccountChanged {
            account: ACCOUNT_B.to_owned()
        }
    );

    adapter.debug_inject_chain_changed(1).expect("inject chain");
    assert_eq!(manager.state().chain_id.as_deref(), Some("1"));
    assert_eq!(
        signals.recv().await.expect("signal"),
        ConnectionSignal::ChainChanged { chain_id: 1 }
    );

    adapter
        .debug_inject_accounts_changed(&[])
        .expect("inject empty accounts");
    assert_eq!(manager.state().status, ConnectionStatus::Disconnected);
    assert_eq!(adapter.listener_count().expect("listeners"), 0);
    assert_eq!(
        signals.recv().await.expect("signal"),
        ConnectionSignal::Disconnected {
            reason: DisconnectReason::NoAccounts
        }
    );
}

#[tokio::test(start_paused = true)]
async fn provider_disconnect_ends_the_session() {
    let adapter = Eip1193Adapter::deterministic();
    let manager = manager(&adapter);
    let mut signals = manager.take_signals().expect("signal receiver");
    manager
        .connect(ConnectOptions::default())
        .await
        .expect("connect");

    adapter
        .debug_inject_disconnect(Some(ProviderRpcError::new(4900, "disconnected")))
        .expect("inject disconnect");
    assert_eq!(manager.state().status, ConnectionStatus::Disconnected);
    assert!(manager.handle().is_none());
    assert_eq!(
        signals.recv().await.expect("signal"),
        ConnectionSignal::Disconnected {
            reason: DisconnectReason::ProviderDisconnected
        }
    );
}

#[tokio::test(start_paused = true)]
async fn signer_signs_for_the_connected_account() {
    let adapter = Eip1193Adapter::deterministic();
    let manager = manager(&adapter);
    manager
        .connect(ConnectOptions::default())
        .await
        .expect("connect");

    let signer = manager.signer().expect("signer");
    assert_eq!(signer.address(), ACCOUNT_A);
    let signature = signer.sign_message(b"bep20 dashboard").await.expect("sign");
    assert!(signature.starts_with("0x"));
    assert_eq!(signature.len(), 2 + 130);

    let calls = adapter.calls().expect("calls");
    let sign = calls
        .iter()
        .find(|c| c.method == methods::PERSONAL_SIGN)
        .expect("personal_sign call");
    assert_eq!(sign.params[1], ACCOUNT_A);
}
