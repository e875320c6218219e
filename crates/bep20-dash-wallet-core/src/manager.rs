//! Connection orchestration: detect, pick a strategy, acquire accounts, wrap the
//! provider and read its chain, with single-flight, timeout and auto-retry.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use tokio::sync::mpsc;

use crate::config::SessionConfig;
use crate::detector::{ProviderDetector, ProviderDescriptor};
use crate::domain::{
    normalize_account, ConnectionState, ConnectionStatus, ConnectionStrategy, InstallSuggestion,
    TimestampMs,
};
use crate::errors::{ErrorClassifier, ErrorContext, ErrorType, RawError, StructuredError};
use crate::handle::{WalletHandle, WalletSigner};
use crate::networks::parse_chain_id;
use crate::ports::{
    ClockPort, InjectedProvider, ProviderEvent, ProviderEventKind, ProviderRpcError,
    SubscriptionSet,
};
use crate::retry::{RetryPolicy, RetrySlot};
use crate::state_machine::{connection_transition, ConnectionAction};

const COMPONENT: &str = "connection_manager";

#[derive(Debug, Clone, Default)]
pub struct ConnectOptions {
    pub force_reconnect: bool,
    pub max_retries: Option<u32>,
    pub timeout: Option<Duration>,
}

impl ConnectOptions {
    pub fn forced() -> Self {
        Self {
            force_reconnect: true,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConnectedSession {
    pub account: String,
    pub chain_id: Option<u64>,
    pub handle: WalletHandle,
    pub wallet_name: String,
    /// True when an existing connection was returned without re-detecting.
    pub reused: bool,
}

#[derive(Debug, Clone)]
pub struct ConnectFailure {
    pub error: StructuredError,
    /// Whether a caller may usefully try again.
    pub retryable: bool,
    pub retry_after: Option<Duration>,
    pub install_suggestions: Vec<InstallSuggestion>,
    /// The attempt was overtaken by a disconnect or a forced reconnect.
    pub superseded: bool,
}

impl ConnectFailure {
    fn new(error: StructuredError, retry_after: Option<Duration>) -> Self {
        let retryable = is_retryable(error.error_type);
        Self {
            error,
            retryable,
            retry_after,
            install_suggestions: Vec::new(),
            superseded: false,
        }
    }

    fn terminal(error: StructuredError) -> Self {
        Self {
            error,
            retryable: false,
            retry_after: None,
            install_suggestions: Vec::new(),
            superseded: false,
        }
    }

    fn stale(self) -> Self {
        Self {
            retryable: false,
            retry_after: None,
            superseded: true,
            ..self
        }
    }

    fn schedules_auto_retry(&self) -> bool {
        self.retryable
            && !matches!(
                self.error.error_type,
                ErrorType::Timeout | ErrorType::PendingRequest
            )
    }
}

pub type ConnectionResult = Result<ConnectedSession, ConnectFailure>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    Explicit,
    NoAccounts,
    ProviderDisconnected,
}

/// Notifications for the session about changes the manager made on its own.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionSignal {
    /// A scheduled retry connected without a caller waiting on it.
    Connected {
        account: String,
        chain_id: Option<u64>,
    },
    AccountChanged {
        account: String,
    },
    ChainChanged {
        chain_id: u64,
    },
    Disconnected {
        reason: DisconnectReason,
    },
    RetryFailed {
        error: StructuredError,
    },
}

#[derive(Debug)]
struct Slot {
    state: ConnectionState,
    handle: Option<WalletHandle>,
    signer: Option<WalletSigner>,
    subscriptions: SubscriptionSet,
    epoch: u64,
    timeout: Duration,
    wallet_name: String,
}

struct Established {
    handle: WalletHandle,
    account: String,
    chain_id: Option<u64>,
    wallet_name: String,
}

struct ManagerInner {
    detector: Arc<ProviderDetector>,
    classifier: Arc<ErrorClassifier>,
    clock: Arc<dyn ClockPort>,
    config: SessionConfig,
    policy: RetryPolicy,
    slot: Mutex<Slot>,
    retry: Mutex<RetrySlot>,
    signal_tx: mpsc::UnboundedSender<ConnectionSignal>,
    signal_rx: Mutex<Option<mpsc::UnboundedReceiver<ConnectionSignal>>>,
}

#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<ManagerInner>,
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl ConnectionManager {
    pub fn new(
        detector: Arc<ProviderDetector>,
        classifier: Arc<ErrorClassifier>,
        clock: Arc<dyn ClockPort>,
        config: SessionConfig,
    ) -> Self {
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        let slot = Slot {
            state: ConnectionState::empty(config.max_retries),
            handle: None,
            signer: None,
            subscriptions: SubscriptionSet::default(),
            epoch: 0,
            timeout: Duration::from_millis(config.connect_timeout_ms),
            wallet_name: String::new(),
        };
        Self {
            inner: Arc::new(ManagerInner {
                detector,
                classifier,
                clock,
                policy: RetryPolicy::from_config(&config),
                config,
                slot: Mutex::new(slot),
                retry: Mutex::new(RetrySlot::default()),
                signal_tx,
                signal_rx: Mutex::new(Some(signal_rx)),
            }),
        }
    }

    /// Hands out the signal receiver. Only the first caller gets it.
    pub fn take_signals(&self) -> Option<mpsc::UnboundedReceiver<ConnectionSignal>> {
        self.inner
            .signal_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    pub fn state(&self) -> ConnectionState {
        self.slot().state.clone()
    }

    pub fn is_busy(&self) -> bool {
        self.slot().state.status.is_busy()
    }

    /// Borrowed for one operation; never hold on to it across operations.
    pub fn handle(&self) -> Option<WalletHandle> {
        self.slot().handle.clone()
    }

    pub fn signer(&self) -> Option<WalletSigner> {
        self.slot().signer.clone()
    }

    pub fn listener_count(&self) -> usize {
        self.slot().subscriptions.len()
    }

    pub fn retry_scheduled(&self) -> bool {
        self.retry_slot().is_scheduled()
    }

    pub fn detector(&self) -> &Arc<ProviderDetector> {
        &self.inner.detector
    }

    pub async fn connect(&self, options: ConnectOptions) -> ConnectionResult {
        let timeout = options
            .timeout
            .unwrap_or(Duration::from_millis(self.inner.config.connect_timeout_ms));
        let max_retries = options.max_retries.unwrap_or(self.inner.config.max_retries);

        let (epoch, stale_subscriptions) = {
            let mut slot = self.slot();
            let status = slot.state.status;
            if status.is_busy() && !options.force_reconnect {
                drop(slot);
                return Err(self.pending_failure());
            }
            if status == ConnectionStatus::Connected && !options.force_reconnect {
                if let Some(existing) = reuse(&slot) {
                    return Ok(existing);
                }
            }

            let (next, transition) = match connection_transition(
                &slot.state,
                ConnectionAction::Begin {
                    retrying: false,
                    // A connected slot without a handle is rebuilt from scratch.
                    force: options.force_reconnect || status == ConnectionStatus::Connected,
                },
            ) {
                Ok(step) => step,
                Err(err) => {
                    drop(slot);
                    return Err(ConnectFailure::terminal(self.classify(
                        RawError::typed(ErrorType::System, err.to_string()),
                        "connect",
                    )));
                }
            };
            tracing::debug!(from = ?transition.from, to = ?transition.to, "connection transition");
            slot.state = ConnectionState {
                max_retries,
                ..next
            };
            slot.handle = None;
            slot.signer = None;
            slot.timeout = timeout;
            slot.epoch = slot.epoch.wrapping_add(1);
            (slot.epoch, std::mem::take(&mut slot.subscriptions))
        };
        self.dispose(stale_subscriptions);
        self.retry_slot().cancel();

        self.run_attempt(epoch, timeout).await
    }

    /// Runs one retry of a failed connection. A no-op failure once the retry
    /// budget is spent.
    pub async fn retry(&self) -> ConnectionResult {
        let (epoch, timeout) = {
            let mut slot = self.slot();
            let status = slot.state.status;
            if status.is_busy() {
                drop(slot);
                return Err(self.pending_failure());
            }
            if status == ConnectionStatus::Connected {
                if let Some(existing) = reuse(&slot) {
                    return Ok(existing);
                }
            }
            if status != ConnectionStatus::Error
                || slot.state.retry_count >= slot.state.max_retries
            {
                let last = slot.state.error.clone();
                drop(slot);
                let error = last.unwrap_or_else(|| {
                    self.classify(
                        RawError::typed(ErrorType::Unknown, "no failed connection to retry"),
                        "retry",
                    )
                });
                return Err(ConnectFailure::terminal(error));
            }

            let Ok((next, _)) = connection_transition(
                &slot.state,
                ConnectionAction::Begin {
                    retrying: true,
                    force: false,
                },
            ) else {
                drop(slot);
                return Err(self.pending_failure());
            };
            slot.state = next;
            slot.epoch = slot.epoch.wrapping_add(1);
            tracing::info!(attempt = slot.state.retry_count, "retrying wallet connection");
            (slot.epoch, slot.timeout)
        };
        self.retry_slot().cancel();

        self.run_attempt(epoch, timeout).await
    }

    /// Detaches listeners, cancels retries and resets state. Returns `false`
    /// when there was nothing to tear down.
    pub fn disconnect(&self) -> bool {
        self.teardown(DisconnectReason::Explicit)
    }

    /// Folds a drift-corrected account into state through the transition table.
    pub fn update_account(&self, account: &str) -> bool {
        let Some(account) = normalize_account(account) else {
            return false;
        };
        let mut slot = self.slot();
        if slot.state.account.as_deref() == Some(account.as_str()) {
            return false;
        }
        match connection_transition(
            &slot.state,
            ConnectionAction::AccountChanged {
                account: account.clone(),
            },
        ) {
            Ok((next, _)) => {
                slot.signer = slot.handle.as_ref().map(|h| h.signer(&account));
                slot.state = next;
                true
            }
            Err(_) => false,
        }
    }

    pub fn update_chain(&self, chain_id: u64) -> bool {
        let chain = chain_id.to_string();
        let mut slot = self.slot();
        if slot.state.chain_id.as_deref() == Some(chain.as_str()) {
            return false;
        }
        match connection_transition(&slot.state, ConnectionAction::ChainChanged { chain_id: chain })
        {
            Ok((next, _)) => {
                slot.state = next;
                true
            }
            Err(_) => false,
        }
    }

    async fn run_attempt(&self, epoch: u64, timeout: Duration) -> ConnectionResult {
        match tokio::time::timeout(timeout, self.establish()).await {
            Ok(Ok(established)) => self.complete(epoch, established),
            Ok(Err(failure)) => Err(self.fail(epoch, failure)),
            Err(_) => {
                let error = self.classify(
                    RawError::typed(
                        ErrorType::Timeout,
                        format!("connection attempt exceeded {} ms", timeout.as_millis()),
                    ),
                    "connect",
                );
                Err(self.fail(epoch, ConnectFailure::new(error, None)))
            }
        }
    }

    async fn establish(&self) -> Result<Established, ConnectFailure> {
        let descriptor = self.inner.detector.detect().await;
        let context = |op: &'static str| {
            ErrorContext::new(COMPONENT, op)
                .with("wallet", descriptor.wallet_name.clone())
                .with("strategy", format!("{:?}", descriptor.connection_strategy))
        };

        let provider = match (&descriptor.provider, descriptor.connection_strategy) {
            (Some(provider), strategy) if strategy != ConnectionStrategy::Unsupported => {
                Arc::clone(provider)
            }
            _ => {
                let error = self.inner.classifier.classify(
                    RawError::typed(
                        ErrorType::ProviderNotFound,
                        descriptor
                            .diagnostic
                            .clone()
                            .unwrap_or_else(|| "no wallet provider".to_owned()),
                    ),
                    context("detect"),
                );
                let mut failure = ConnectFailure::terminal(error);
                failure.install_suggestions = descriptor.install_suggestions.clone();
                return Err(failure);
            }
        };

        if descriptor.is_modern && !descriptor.is_available {
            let raw = match &descriptor.probe_error {
                Some(err) => RawError::Provider(err.clone()),
                None => RawError::Message(descriptor.diagnostic.clone().unwrap_or_default()),
            };
            // A provider that is present but not answering is never "not found".
            let error = self.inner.classifier.classify(raw, context("probe"));
            return Err(ConnectFailure::new(error, None));
        }

        let handle = WalletHandle::new(Arc::clone(&provider));
        let accounts = match descriptor.connection_strategy {
            ConnectionStrategy::Modern => self.modern_accounts(&handle, &descriptor).await?,
            ConnectionStrategy::LegacyEnable => self.legacy_enable_accounts(&provider, &descriptor).await?,
            ConnectionStrategy::LegacyAccounts => {
                self.legacy_read_accounts(&handle, &descriptor).await?
            }
            ConnectionStrategy::Unsupported => Vec::new(),
        };

        let Some(account) = accounts.into_iter().next() else {
            let error = self.inner.classifier.classify(
                RawError::typed(ErrorType::WalletLocked, "provider returned no accounts"),
                context("accounts"),
            );
            return Err(ConnectFailure::new(
                error,
                Some(Duration::from_millis(self.inner.config.locked_retry_delay_ms)),
            ));
        };

        let chain_id = if provider.supports_request() {
            match handle.chain_id().await {
                Ok(chain_id) => Some(chain_id),
                Err(err) => {
                    let error = self.inner.classifier.classify(err, context("chain_id"));
                    return Err(ConnectFailure::new(error, None));
                }
            }
        } else {
            None
        };

        Ok(Established {
            handle,
            account,
            chain_id,
            wallet_name: descriptor.wallet_name.clone(),
        })
    }

    async fn modern_accounts(
        &self,
        handle: &WalletHandle,
        descriptor: &ProviderDescriptor,
    ) -> Result<Vec<String>, ConnectFailure> {
        let context = ErrorContext::new(COMPONENT, "request_accounts")
            .with("wallet", descriptor.wallet_name.clone());
        let err = match handle.request_accounts().await {
            Ok(accounts) => return Ok(accounts),
            Err(err) => err,
        };

        if is_rejection(&err) {
            let error = self.inner.classifier.classify(err, context);
            return Err(ConnectFailure::terminal(error));
        }
        if err.code == Some(-32002) {
            let error = self.inner.classifier.classify(err, context);
            return Err(ConnectFailure::new(
                error,
                Some(Duration::from_millis(self.inner.config.pending_retry_delay_ms)),
            ));
        }

        tracing::debug!(error = %err, "eth_requestAccounts failed, falling back to eth_accounts");
        match handle.accounts().await {
            Ok(accounts) => Ok(accounts),
            Err(_) => {
                let error = self.inner.classifier.classify(err, context);
                Err(ConnectFailure::new(error, None))
            }
        }
    }

    async fn legacy_enable_accounts(
        &self,
        provider: &Arc<dyn InjectedProvider>,
        descriptor: &ProviderDescriptor,
    ) -> Result<Vec<String>, ConnectFailure> {
        let context = ErrorContext::new(COMPONENT, "enable")
            .with("wallet", descriptor.wallet_name.clone());
        match provider.enable().await {
            Ok(accounts) => Ok(normalize_all(&accounts)),
            Err(err) if is_rejection(&err) => Err(ConnectFailure::terminal(
                self.inner.classifier.classify(err, context),
            )),
            Err(err) if provider.supports_legacy_accounts() => {
                tracing::debug!(error = %err, "enable() failed, falling back to legacy accounts");
                provider
                    .legacy_accounts()
                    .await
                    .map(|accounts| normalize_all(&accounts))
                    .map_err(|_| {
                        ConnectFailure::new(self.inner.classifier.classify(err, context), None)
                    })
            }
            Err(err) => Err(ConnectFailure::new(
                self.inner.classifier.classify(err, context),
                None,
            )),
        }
    }

    async fn legacy_read_accounts(
        &self,
        handle: &WalletHandle,
        descriptor: &ProviderDescriptor,
    ) -> Result<Vec<String>, ConnectFailure> {
        let provider = handle.raw();
        let result = if provider.supports_legacy_accounts() {
            provider
                .legacy_accounts()
                .await
                .map(|accounts| normalize_all(&accounts))
        } else if provider.supports_request() {
            handle.accounts().await
        } else {
            Err(ProviderRpcError::unsupported("account access"))
        };
        result.map_err(|err| {
            let context = ErrorContext::new(COMPONENT, "legacy_accounts")
                .with("wallet", descriptor.wallet_name.clone());
            ConnectFailure::new(self.inner.classifier.classify(err, context), None)
        })
    }

    fn complete(&self, epoch: u64, established: Established) -> ConnectionResult {
        let subscriptions = self.attach_listeners(&established.handle, epoch);
        let at = self.inner.clock.now_ms().ok().map(TimestampMs);

        let mut slot = self.slot();
        if slot.epoch != epoch {
            drop(slot);
            self.dispose(subscriptions);
            tracing::debug!(epoch, "discarding superseded connection result");
            let error = self.inner.classifier.describe(
                RawError::typed(ErrorType::Disconnected, "connection attempt was superseded"),
                ErrorContext::new(COMPONENT, "connect"),
            );
            return Err(ConnectFailure::terminal(error).stale());
        }

        let action = ConnectionAction::Succeed {
            account: established.account.clone(),
            chain_id: established
                .chain_id
                .map(|c| c.to_string())
                .unwrap_or_default(),
            at,
        };
        let (mut next, transition) = match connection_transition(&slot.state, action) {
            Ok(step) => step,
            Err(err) => {
                drop(slot);
                self.dispose(subscriptions);
                return Err(ConnectFailure::terminal(
                    self.classify(RawError::typed(ErrorType::System, err.to_string()), "connect"),
                ));
            }
        };
        if established.chain_id.is_none() {
            next.chain_id = None;
        }
        slot.state = next;
        slot.signer = Some(established.handle.signer(&established.account));
        slot.handle = Some(established.handle.clone());
        slot.subscriptions = subscriptions;
        slot.wallet_name = established.wallet_name.clone();
        drop(slot);

        tracing::info!(
            from = ?transition.from,
            account = %established.account,
            chain_id = ?established.chain_id,
            wallet = %established.wallet_name,
            "wallet connected"
        );
        Ok(ConnectedSession {
            account: established.account,
            chain_id: established.chain_id,
            handle: established.handle,
            wallet_name: established.wallet_name,
            reused: false,
        })
    }

    fn fail(&self, epoch: u64, failure: ConnectFailure) -> ConnectFailure {
        let delay = {
            let mut slot = self.slot();
            if slot.epoch != epoch {
                return failure.stale();
            }
            let Ok((next, _)) = connection_transition(
                &slot.state,
                ConnectionAction::Fail {
                    error: failure.error.clone(),
                },
            ) else {
                return failure;
            };
            slot.state = next;
            slot.handle = None;
            slot.signer = None;

            let budget_left = slot.state.retry_count < slot.state.max_retries;
            if failure.schedules_auto_retry() && budget_left {
                let backoff = self.inner.policy.delay(slot.state.retry_count);
                Some(failure.retry_after.map_or(backoff, |hint| hint.max(backoff)))
            } else {
                None
            }
        };

        tracing::warn!(
            error_type = %failure.error.error_type,
            retryable = failure.retryable,
            "wallet connection failed"
        );
        if let Some(delay) = delay {
            self.schedule_retry(delay);
        }
        failure
    }

    fn schedule_retry(&self, delay: Duration) {
        let weak: Weak<ManagerInner> = Arc::downgrade(&self.inner);
        tracing::debug!(delay_ms = delay.as_millis() as u64, "scheduling automatic retry");
        self.retry_slot().schedule(delay, async move {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let manager = ConnectionManager { inner };
            manager.retry_slot().release();
            match manager.retry().await {
                Ok(session) => manager.signal(ConnectionSignal::Connected {
                    account: session.account,
                    chain_id: session.chain_id,
                }),
                Err(failure) if failure.superseded => {
                    tracing::debug!("automatic retry was superseded");
                }
                Err(failure) => manager.signal(ConnectionSignal::RetryFailed {
                    error: failure.error,
                }),
            }
        });
    }

    fn attach_listeners(&self, handle: &WalletHandle, epoch: u64) -> SubscriptionSet {
        let mut set = SubscriptionSet::default();
        if !handle.raw().supports_events() {
            return set;
        }
        for kind in [
            ProviderEventKind::AccountsChanged,
            ProviderEventKind::ChainChanged,
            ProviderEventKind::Disconnect,
        ] {
            let weak: Weak<ManagerInner> = Arc::downgrade(&self.inner);
            let listener = Arc::new(move |event: &ProviderEvent| {
                if let Some(inner) = weak.upgrade() {
                    ConnectionManager { inner }.on_provider_event(epoch, event);
                }
            });
            match handle.subscribe(kind, listener) {
                Ok(subscription) => set.push(subscription),
                Err(err) => tracing::warn!(
                    event = kind.event_name(),
                    error = %err,
                    "could not subscribe to provider event"
                ),
            }
        }
        set
    }

    fn on_provider_event(&self, epoch: u64, event: &ProviderEvent) {
        if self.slot().epoch != epoch {
            return;
        }
        match event {
            ProviderEvent::AccountsChanged(accounts) => {
                let accounts = normalize_all(accounts);
                match accounts.first() {
                    None => {
                        tracing::info!("provider reported no accounts, disconnecting");
                        self.teardown(DisconnectReason::NoAccounts);
                    }
                    Some(account) => {
                        if self.update_account(account) {
                            self.signal(ConnectionSignal::AccountChanged {
                                account: account.clone(),
                            });
                        }
                    }
                }
            }
            ProviderEvent::ChainChanged(raw) => match parse_chain_id(raw) {
                Some(chain_id) => {
                    if self.update_chain(chain_id) {
                        self.signal(ConnectionSignal::ChainChanged { chain_id });
                    }
                }
                None => tracing::warn!(raw = %raw, "ignoring unparseable chainChanged payload"),
            },
            ProviderEvent::Disconnect(reason) => {
                tracing::info!(reason = ?reason, "provider disconnected");
                self.teardown(DisconnectReason::ProviderDisconnected);
            }
        }
    }

    fn teardown(&self, reason: DisconnectReason) -> bool {
        self.retry_slot().cancel();
        let subscriptions = {
            let mut slot = self.slot();
            let idle = slot.state.status == ConnectionStatus::Disconnected
                && slot.handle.is_none()
                && slot.subscriptions.is_empty();
            if idle {
                return false;
            }
            slot.state = ConnectionState::empty(slot.state.max_retries);
            slot.handle = None;
            slot.signer = None;
            slot.epoch = slot.epoch.wrapping_add(1);
            std::mem::take(&mut slot.subscriptions)
        };
        self.dispose(subscriptions);
        tracing::info!(reason = ?reason, "wallet disconnected");
        if reason != DisconnectReason::Explicit {
            self.signal(ConnectionSignal::Disconnected { reason });
        }
        true
    }

    fn pending_failure(&self) -> ConnectFailure {
        let error = self.classify(
            RawError::typed(
                ErrorType::PendingRequest,
                "a connection attempt is already in progress",
            ),
            "connect",
        );
        ConnectFailure::terminal(error)
    }

    fn classify(&self, raw: RawError, operation: &'static str) -> StructuredError {
        self.inner
            .classifier
            .classify(raw, ErrorContext::new(COMPONENT, operation))
    }

    fn dispose(&self, mut subscriptions: SubscriptionSet) {
        let count = subscriptions.dispose_all();
        if count > 0 {
            tracing::debug!(count, "provider listeners detached");
        }
    }

    fn signal(&self, signal: ConnectionSignal) {
        // The session may already be gone; nothing to notify then.
        let _ = self.inner.signal_tx.send(signal);
    }

    fn slot(&self) -> MutexGuard<'_, Slot> {
        self.inner.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn retry_slot(&self) -> MutexGuard<'_, RetrySlot> {
        self.inner.retry.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn reuse(slot: &Slot) -> Option<ConnectedSession> {
    let handle = slot.handle.clone()?;
    let account = slot.state.account.clone()?;
    Some(ConnectedSession {
        account,
        chain_id: slot.state.chain_id.as_deref().and_then(parse_chain_id),
        handle,
        wallet_name: slot.wallet_name.clone(),
        reused: true,
    })
}

fn is_retryable(error_type: ErrorType) -> bool {
    error_type.recoverable()
        && !matches!(
            error_type,
            ErrorType::UserRejected | ErrorType::HydrationMismatch | ErrorType::System
        )
}

fn is_rejection(err: &ProviderRpcError) -> bool {
    err.code == Some(4001)
}

fn normalize_all(accounts: &[String]) -> Vec<String> {
    accounts.iter().filter_map(|a| normalize_account(a)).collect()
}
