#![allow(dead_code)]

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bep20_dash_wallet_adapters::{Eip1193Adapter, InjectedEnvironment};
use bep20_dash_wallet_core::networks::target_network;
use bep20_dash_wallet_core::{
    ClockPort, ConnectionManager, ErrorClassifier, PortError, ProviderDetector, SessionConfig,
    SessionController, SessionSnapshot,
};
use tokio::sync::watch;

pub const ACCOUNT_A: &str = "0x1000000000000000000000000000000000000001";
pub const ACCOUNT_B: &str = "0x2000000000000000000000000000000000000002";

#[derive(Debug, Default)]
pub struct TestClock {
    now: AtomicU64,
}

impl ClockPort for TestClock {
    fn now_ms(&self) -> Result<u64, PortError> {
        Ok(self.now.fetch_add(1, Ordering::SeqCst) + 1_739_750_400_000)
    }
}

pub fn target_chain() -> u64 {
    target_network().chain_id
}

/// Default session settings without backoff jitter.
pub fn test_config() -> SessionConfig {
    SessionConfig {
        backoff_jitter_ratio: 0.0,
        ..SessionConfig::default()
    }
}

pub fn environment(adapter: &Eip1193Adapter) -> Arc<InjectedEnvironment> {
    Arc::new(InjectedEnvironment::new().with_provider(adapter.clone()))
}

pub fn detector(environment: Arc<InjectedEnvironment>) -> Arc<ProviderDetector> {
    Arc::new(ProviderDetector::new(
        environment,
        Duration::from_millis(test_config().detection_cache_ttl_ms),
    ))
}

pub fn manager_for(environment: Arc<InjectedEnvironment>) -> ConnectionManager {
    let clock: Arc<dyn ClockPort> = Arc::new(TestClock::default());
    let classifier = Arc::new(ErrorClassifier::new(Arc::clone(&clock), 100));
    ConnectionManager::new(detector(environment), classifier, clock, test_config())
}

pub fn manager(adapter: &Eip1193Adapter) -> ConnectionManager {
    manager_for(environment(adapter))
}

pub fn session_with(adapter: &Eip1193Adapter, config: SessionConfig) -> SessionController {
    SessionController::new(environment(adapter), Arc::new(TestClock::default()), config)
}

pub fn session(adapter: &Eip1193Adapter) -> SessionController {
    session_with(adapter, test_config())
}

/// Waits until the published snapshot satisfies `predicate`.
pub async fn wait_for_snapshot(
    rx: &mut watch::Receiver<SessionSnapshot>,
    predicate: impl FnMut(&SessionSnapshot) -> bool,
) -> SessionSnapshot {
    tokio::time::timeout(Duration::from_secs(5), rx.wait_for(predicate))
        .await
        .expect("snapshot condition reached in time")
        .expect("session still alive")
        .clone()
}
