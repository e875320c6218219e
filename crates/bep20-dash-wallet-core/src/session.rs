//! The session object the UI observes: connection plus network state, event
//! folding, periodic drift correction and the imperative actions.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use futures::FutureExt;
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::config::SessionConfig;
use crate::detector::ProviderDetector;
use crate::domain::{ConnectionStatus, NetworkInfo, NetworkState, TokenDescriptor};
use crate::errors::{
    with_owner_actions, ActionCallback, ErrorClassifier, ErrorContext, ErrorStats, ErrorType,
    RawError, RecoveryCallbacks, StructuredError,
};
use crate::handle::WalletHandle;
use crate::manager::{ConnectOptions, ConnectionManager, ConnectionSignal, DisconnectReason};
use crate::networks::parse_chain_id;
use crate::ports::{ClockPort, ProviderEnvironment};
use crate::reconciler::{NetworkChange, NetworkReconciler, SwitchFailure};

const COMPONENT: &str = "session";

/// Transient, non-blocking information shown next to the blocking error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SessionNotice {
    ProviderDisconnected,
    AccountChanged { account: String },
    NetworkChanged { chain_id: u64, is_correct: bool },
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionSnapshot {
    pub account: Option<String>,
    pub chain_id: Option<u64>,
    pub is_connected: bool,
    pub is_connecting: bool,
    pub is_correct_network: bool,
    pub error: Option<StructuredError>,
    pub is_loading: bool,
    pub notice: Option<SessionNotice>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Another operation held the session; nothing was read.
    Skipped,
    InSync,
    Corrected,
    Disconnected,
    Reconnected,
    /// Not connected and the provider reports no authorised accounts.
    Idle,
    Failed,
}

#[derive(Debug, Default)]
struct LocalState {
    error: Option<StructuredError>,
    notice: Option<SessionNotice>,
    pending_ops: u32,
}

struct SessionInner {
    manager: ConnectionManager,
    reconciler: NetworkReconciler,
    classifier: Arc<ErrorClassifier>,
    config: SessionConfig,
    local: Mutex<LocalState>,
    snapshot: watch::Sender<SessionSnapshot>,
    network_tx: mpsc::UnboundedSender<NetworkChange>,
    reconcile_task: Mutex<Option<JoinHandle<()>>>,
    pump_task: Mutex<Option<JoinHandle<()>>>,
    op_lock: tokio::sync::Mutex<()>,
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        for slot in [&self.reconcile_task, &self.pump_task] {
            if let Some(task) = slot.lock().unwrap_or_else(PoisonError::into_inner).take() {
                task.abort();
            }
        }
    }
}

/// Owns one connection manager and one network reconciler.
///
/// Construct inside a tokio runtime: the event pump is spawned immediately.
#[derive(Clone)]
pub struct SessionController {
    inner: Arc<SessionInner>,
}

impl std::fmt::Debug for SessionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionController")
            .field("snapshot", &self.snapshot())
            .finish_non_exhaustive()
    }
}

impl SessionController {
    pub fn new(
        environment: Arc<dyn ProviderEnvironment>,
        clock: Arc<dyn ClockPort>,
        config: SessionConfig,
    ) -> Self {
        let classifier = Arc::new(
            ErrorClassifier::new(Arc::clone(&clock), config.error_log_capacity)
                .with_environment(environment.user_agent(), environment.current_url()),
        );
        let detector = Arc::new(ProviderDetector::new(
            environment,
            Duration::from_millis(config.detection_cache_ttl_ms),
        ));
        let manager = ConnectionManager::new(
            detector,
            Arc::clone(&classifier),
            clock,
            config.clone(),
        );
        let reconciler = NetworkReconciler::new(config.target.clone(), Arc::clone(&classifier));
        let (network_tx, network_rx) = mpsc::unbounded_channel();
        let (snapshot, _) = watch::channel(SessionSnapshot::default());
        let signals = manager.take_signals();

        let controller = Self {
            inner: Arc::new(SessionInner {
                manager,
                reconciler,
                classifier,
                config,
                local: Mutex::new(LocalState::default()),
                snapshot,
                network_tx,
                reconcile_task: Mutex::new(None),
                pump_task: Mutex::new(None),
                op_lock: tokio::sync::Mutex::new(()),
            }),
        };
        if let Some(signals) = signals {
            controller.start_pump(signals, network_rx);
        }
        controller
    }

    pub fn manager(&self) -> &ConnectionManager {
        &self.inner.manager
    }

    pub fn reconciler(&self) -> &NetworkReconciler {
        &self.inner.reconciler
    }

    pub fn classifier(&self) -> &Arc<ErrorClassifier> {
        &self.inner.classifier
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    pub fn error_stats(&self) -> ErrorStats {
        self.inner.classifier.stats()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.inner.snapshot.subscribe()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.inner.snapshot.borrow().clone()
    }

    pub fn is_reconciling(&self) -> bool {
        self.reconcile_task()
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    pub async fn connect(&self) -> Result<SessionSnapshot, StructuredError> {
        self.connect_with(ConnectOptions::default()).await
    }

    pub async fn connect_with(
        &self,
        options: ConnectOptions,
    ) -> Result<SessionSnapshot, StructuredError> {
        if self.inner.manager.is_busy() && !options.force_reconnect {
            // Resolves immediately with the single-flight rejection.
            return match self.inner.manager.connect(options).await {
                Ok(_) => Ok(self.refresh()),
                Err(failure) => Err(failure.error),
            };
        }

        // Any other holder of the session, a reconcile tick included, means
        // the same single-flight rejection.
        let Ok(_op) = self.inner.op_lock.try_lock() else {
            return Err(self.inner.classifier.classify(
                RawError::typed(
                    ErrorType::PendingRequest,
                    "another wallet operation is in progress",
                ),
                ErrorContext::new(COMPONENT, "connect"),
            ));
        };
        self.begin_op();
        let result = self.inner.manager.connect(options).await;
        let outcome = match result {
            Ok(session) => {
                self.local().error = None;
                self.after_connect(&session.handle).await;
                Ok(())
            }
            Err(failure) if failure.superseded => {
                tracing::debug!("connect result discarded after the session moved on");
                Err(failure.error)
            }
            Err(failure) => {
                let error = self.owned(failure.error);
                self.local().error = Some(error.clone());
                Err(error)
            }
        };
        self.end_op();
        let snapshot = self.refresh();
        outcome.map(|()| snapshot)
    }

    /// Reconnects without prompting when the provider already authorised
    /// this site. Nothing is persisted between sessions.
    pub async fn restore(&self) -> Result<Option<SessionSnapshot>, StructuredError> {
        if self.inner.manager.state().is_connected() {
            return Ok(Some(self.refresh()));
        }
        if !self.has_authorized_accounts().await {
            tracing::debug!("no previously authorised accounts to restore");
            return Ok(None);
        }
        tracing::info!("restoring previously authorised wallet session");
        self.connect().await.map(Some)
    }

    /// Tears everything down. Calling it while disconnected is a no-op.
    pub fn disconnect(&self) {
        self.teardown(None);
    }

    pub async fn switch_network(&self) -> Result<NetworkInfo, SwitchFailure> {
        self.change_network(false).await
    }

    pub async fn add_network(&self) -> Result<NetworkInfo, SwitchFailure> {
        self.change_network(true).await
    }

    pub fn clear_error(&self) {
        self.local().error = None;
        self.refresh();
    }

    /// Asks the wallet to track a token. Returns whether the user accepted.
    pub async fn watch_token(&self, token: &TokenDescriptor) -> Result<bool, StructuredError> {
        let Some(handle) = self.inner.manager.handle() else {
            return Err(self.not_connected("watch_token"));
        };
        match handle.watch_asset(token).await {
            Ok(accepted) => {
                tracing::info!(symbol = %token.symbol, accepted, "token watch requested");
                Ok(accepted)
            }
            Err(err) => {
                let context = ErrorContext::new(COMPONENT, "watch_token")
                    .with("token", token.address.to_string());
                Err(self.inner.classifier.classify(err, context))
            }
        }
    }

    /// One drift-correction pass against the live provider.
    pub async fn reconcile_once(&self) -> ReconcileOutcome {
        let Ok(op) = self.inner.op_lock.try_lock() else {
            return ReconcileOutcome::Skipped;
        };
        let state = self.inner.manager.state();
        match state.status {
            ConnectionStatus::Connecting | ConnectionStatus::Retrying => ReconcileOutcome::Skipped,
            ConnectionStatus::Connected => self.reconcile_connected().await,
            ConnectionStatus::Disconnected | ConnectionStatus::Error => {
                if !self.has_authorized_accounts().await {
                    return ReconcileOutcome::Idle;
                }
                drop(op);
                tracing::warn!("live accounts found while disconnected, reconnecting");
                match self.connect().await {
                    Ok(_) => ReconcileOutcome::Reconnected,
                    Err(_) => ReconcileOutcome::Failed,
                }
            }
        }
    }

    async fn reconcile_connected(&self) -> ReconcileOutcome {
        let Some(handle) = self.inner.manager.handle() else {
            return ReconcileOutcome::Skipped;
        };
        let state = self.inner.manager.state();

        let accounts = match handle.live_accounts().await {
            Ok(accounts) => accounts,
            Err(err) => {
                tracing::warn!(error = %err, "reconciliation could not read accounts");
                return ReconcileOutcome::Failed;
            }
        };
        let Some(live_account) = accounts.first() else {
            // A locked wallet is normal flow, not a fault.
            tracing::info!("provider reports no accounts, ending session");
            self.teardown(None);
            return ReconcileOutcome::Disconnected;
        };

        let mut drifted = false;
        if state.account.as_deref() != Some(live_account.as_str())
            && self.inner.manager.update_account(live_account)
        {
            tracing::warn!(account = %live_account, "account drift corrected");
            self.local().notice = Some(SessionNotice::AccountChanged {
                account: live_account.clone(),
            });
            drifted = true;
        }

        let chain = if handle.raw().supports_request() {
            Some(handle.chain_id().await)
        } else {
            None
        };
        match chain {
            None => {}
            Some(Ok(chain_id)) => {
                let local_chain = state.chain_id.as_deref().and_then(parse_chain_id);
                if local_chain != Some(chain_id) {
                    self.inner.manager.update_chain(chain_id);
                    tracing::warn!(chain_id, "chain drift corrected");
                    drifted = true;
                }
            }
            Some(Err(err)) => tracing::warn!(error = %err, "reconciliation could not read chain"),
        }

        if drifted {
            self.validate_network(&handle, true).await;
            self.refresh();
            ReconcileOutcome::Corrected
        } else {
            ReconcileOutcome::InSync
        }
    }

    async fn after_connect(&self, handle: &WalletHandle) {
        if handle.raw().supports_events() {
            let network_tx = self.inner.network_tx.clone();
            if let Err(error) = self.inner.reconciler.setup_listeners(handle, move |change| {
                let _ = network_tx.send(change);
            }) {
                tracing::warn!(error = %error, "network listener not attached");
            }
        }

        // The wrong-network error waits until an automatic switch has had its go.
        let auto_switch = self.inner.config.auto_switch_on_connect;
        let Some(info) = self.validate_network(handle, !auto_switch).await else {
            self.start_reconciliation();
            return;
        };
        if !info.is_correct && auto_switch {
            tracing::info!(
                chain_id = %info.chain_id,
                target = self.inner.config.target.chain_id,
                "connected on the wrong network, switching automatically"
            );
            match self.inner.reconciler.switch_to_target(handle).await {
                Ok(switched) => self.apply_network(&switched, true),
                Err(failure) => {
                    tracing::warn!(error = %failure.error, "automatic network switch failed");
                    let error = self.wrong_network_error(&info);
                    self.local().error = Some(error);
                }
            }
        }
        self.start_reconciliation();
    }

    /// Reads the chain and folds it into state. Legacy providers have no
    /// chain to read and yield `None` without an error.
    async fn validate_network(
        &self,
        handle: &WalletHandle,
        surface_wrong: bool,
    ) -> Option<NetworkInfo> {
        if !handle.raw().supports_request() {
            tracing::debug!("legacy provider, network validation skipped");
            return None;
        }
        match self.inner.reconciler.validate(Some(handle)).await {
            Ok(info) => {
                self.apply_network(&info, surface_wrong);
                Some(info)
            }
            Err(error) => {
                self.local().error = Some(self.owned(error));
                None
            }
        }
    }

    fn apply_network(&self, info: &NetworkInfo, surface_wrong: bool) {
        if let Some(chain_id) = parse_chain_id(&info.chain_id) {
            self.inner.manager.update_chain(chain_id);
        }
        let mut local = self.local();
        if info.is_correct {
            let stale = local.error.as_ref().is_some_and(|e| {
                matches!(
                    e.error_type,
                    ErrorType::WrongNetwork | ErrorType::NetworkSwitchFailed | ErrorType::ChainNotAdded
                )
            });
            if stale {
                local.error = None;
            }
        } else if surface_wrong {
            drop(local);
            let error = self.wrong_network_error(info);
            self.local().error = Some(error);
        }
    }

    async fn change_network(&self, add_first: bool) -> Result<NetworkInfo, SwitchFailure> {
        let operation = if add_first { "add_network" } else { "switch_network" };
        let Some(handle) = self.inner.manager.handle() else {
            let error = self.not_connected(operation);
            self.local().error = Some(error.clone());
            self.refresh();
            return Err(SwitchFailure {
                error,
                requires_user_action: true,
                manual: None,
            });
        };

        let _op = self.inner.op_lock.lock().await;
        self.begin_op();
        let result = if add_first {
            self.inner.reconciler.add_network(&handle).await
        } else {
            self.inner.reconciler.switch_to_target(&handle).await
        };
        match &result {
            Ok(info) => self.apply_network(info, true),
            Err(failure) => {
                let error = self.owned(failure.error.clone());
                self.local().error = Some(error);
            }
        }
        self.end_op();
        self.refresh();
        result
    }

    async fn has_authorized_accounts(&self) -> bool {
        let descriptor = self.inner.manager.detector().detect().await;
        let Some(provider) = descriptor.provider else {
            return false;
        };
        match WalletHandle::new(provider).live_accounts().await {
            Ok(accounts) => !accounts.is_empty(),
            Err(err) => {
                tracing::debug!(error = %err, "authorised accounts query failed");
                false
            }
        }
    }

    fn teardown(&self, notice: Option<SessionNotice>) {
        self.stop_reconciliation();
        let had_session = self.inner.manager.disconnect();
        self.inner.reconciler.clear_listeners();
        self.inner.reconciler.reset();
        {
            let mut local = self.local();
            local.error = None;
            local.notice = notice;
        }
        if had_session {
            tracing::info!("session ended");
        }
        self.refresh();
    }

    fn start_reconciliation(&self) {
        let mut task = self.reconcile_task();
        if task.as_ref().is_some_and(|t| !t.is_finished()) {
            return;
        }
        let weak: Weak<SessionInner> = Arc::downgrade(&self.inner);
        let initial = Duration::from_millis(self.inner.config.initial_reconcile_delay_ms);
        let interval = Duration::from_millis(self.inner.config.reconcile_interval_ms);
        *task = Some(tokio::spawn(async move {
            tokio::time::sleep(initial).await;
            loop {
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                let session = SessionController { inner };
                let outcome = session.reconcile_once().await;
                tracing::debug!(?outcome, "reconciliation tick");
                if session.inner.manager.state().status == ConnectionStatus::Disconnected {
                    break;
                }
                drop(session);
                tokio::time::sleep(interval).await;
            }
        }));
    }

    fn stop_reconciliation(&self) {
        if let Some(task) = self.reconcile_task().take() {
            task.abort();
        }
    }

    fn start_pump(
        &self,
        mut signals: mpsc::UnboundedReceiver<ConnectionSignal>,
        mut network_rx: mpsc::UnboundedReceiver<NetworkChange>,
    ) {
        let weak: Weak<SessionInner> = Arc::downgrade(&self.inner);
        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    Some(signal) = signals.recv() => {
                        let Some(inner) = weak.upgrade() else { break };
                        SessionController { inner }.on_signal(signal).await;
                    }
                    Some(change) = network_rx.recv() => {
                        let Some(inner) = weak.upgrade() else { break };
                        SessionController { inner }.on_network_change(change);
                    }
                    else => break,
                }
            }
        });
        *self
            .inner
            .pump_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(task);
    }

    async fn on_signal(&self, signal: ConnectionSignal) {
        match signal {
            ConnectionSignal::Connected { account, .. } => {
                tracing::info!(account = %account, "automatic retry connected");
                if let Some(handle) = self.inner.manager.handle() {
                    let _op = self.inner.op_lock.lock().await;
                    self.local().error = None;
                    self.after_connect(&handle).await;
                }
            }
            ConnectionSignal::RetryFailed { error } => {
                // Losing the race to a manual connect is not a failure.
                if error.error_type == ErrorType::PendingRequest {
                    tracing::debug!("automatic retry yielded to an attempt in flight");
                } else {
                    self.local().error = Some(self.owned(error));
                }
            }
            ConnectionSignal::AccountChanged { account } => {
                self.local().notice = Some(SessionNotice::AccountChanged { account });
            }
            ConnectionSignal::ChainChanged { chain_id } => {
                tracing::debug!(chain_id, "chain changed");
            }
            ConnectionSignal::Disconnected { reason } => {
                let notice = match reason {
                    DisconnectReason::ProviderDisconnected => {
                        Some(SessionNotice::ProviderDisconnected)
                    }
                    DisconnectReason::NoAccounts | DisconnectReason::Explicit => None,
                };
                self.teardown(notice);
            }
        }
        self.refresh();
    }

    fn on_network_change(&self, change: NetworkChange) {
        if !self.inner.manager.state().is_connected() {
            return;
        }
        self.inner.manager.update_chain(change.chain_id);
        self.apply_network(&change.info, true);
        self.local().notice = Some(SessionNotice::NetworkChanged {
            chain_id: change.chain_id,
            is_correct: change.is_correct,
        });
        self.refresh();
    }

    fn refresh(&self) -> SessionSnapshot {
        let state = self.inner.manager.state();
        let network = self.inner.reconciler.state();
        let snapshot = {
            let local = self.local();
            SessionSnapshot {
                account: state.account.clone(),
                chain_id: state.chain_id.as_deref().and_then(parse_chain_id),
                is_connected: state.is_connected(),
                is_connecting: state.status.is_busy(),
                is_correct_network: state.is_connected() && network == NetworkState::Correct,
                error: local.error.clone(),
                is_loading: local.pending_ops > 0,
                notice: local.notice.clone(),
            }
        };
        self.inner.snapshot.send_replace(snapshot.clone());
        snapshot
    }

    fn begin_op(&self) {
        self.local().pending_ops += 1;
        self.refresh();
    }

    fn end_op(&self) {
        let mut local = self.local();
        local.pending_ops = local.pending_ops.saturating_sub(1);
    }

    fn wrong_network_error(&self, info: &NetworkInfo) -> StructuredError {
        let target = &self.inner.config.target;
        let error = self.inner.classifier.classify(
            RawError::typed(
                ErrorType::WrongNetwork,
                format!(
                    "wallet is on {} ({}), expected {} ({})",
                    info.chain_name, info.chain_id, target.chain_name, target.chain_id
                ),
            ),
            ErrorContext::new(COMPONENT, "validate_network").with("chain_id", info.chain_id.clone()),
        );
        self.owned(error)
    }

    fn not_connected(&self, operation: &'static str) -> StructuredError {
        self.inner.classifier.classify(
            RawError::typed(ErrorType::Disconnected, "no wallet is connected"),
            ErrorContext::new(COMPONENT, operation),
        )
    }

    /// Binds the error's recovery actions to this session's own operations.
    fn owned(&self, error: StructuredError) -> StructuredError {
        with_owner_actions(error, &self.callbacks())
    }

    fn callbacks(&self) -> RecoveryCallbacks {
        let weak = Arc::downgrade(&self.inner);
        let connect: ActionCallback = {
            let weak = weak.clone();
            Arc::new(move || {
                let weak = weak.clone();
                async move {
                    if let Some(inner) = weak.upgrade() {
                        let _ = SessionController { inner }.connect().await;
                    }
                }
                .boxed()
            })
        };
        let switch_network: ActionCallback = {
            let weak = weak.clone();
            Arc::new(move || {
                let weak = weak.clone();
                async move {
                    if let Some(inner) = weak.upgrade() {
                        let _ = SessionController { inner }.switch_network().await;
                    }
                }
                .boxed()
            })
        };
        let add_network: ActionCallback = Arc::new(move || {
            let weak = weak.clone();
            async move {
                if let Some(inner) = weak.upgrade() {
                    let _ = SessionController { inner }.add_network().await;
                }
            }
            .boxed()
        });
        RecoveryCallbacks {
            connect: Some(connect),
            switch_network: Some(switch_network),
            add_network: Some(add_network),
        }
    }

    fn local(&self) -> MutexGuard<'_, LocalState> {
        self.inner.local.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn reconcile_task(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.inner
            .reconcile_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// What the UI holds. Readable and callable before a session exists, in which
/// case every field has its empty default and every action does nothing.
#[derive(Debug, Clone, Default)]
pub struct SessionContext {
    controller: Option<SessionController>,
}

impl SessionContext {
    pub fn new(controller: SessionController) -> Self {
        Self {
            controller: Some(controller),
        }
    }

    pub fn uninitialized() -> Self {
        Self::default()
    }

    pub fn is_initialized(&self) -> bool {
        self.controller.is_some()
    }

    pub fn controller(&self) -> Option<&SessionController> {
        self.controller.as_ref()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.controller
            .as_ref()
            .map(SessionController::snapshot)
            .unwrap_or_default()
    }

    pub fn account(&self) -> Option<String> {
        self.snapshot().account
    }

    pub fn chain_id(&self) -> Option<u64> {
        self.snapshot().chain_id
    }

    pub fn is_connected(&self) -> bool {
        self.snapshot().is_connected
    }

    pub fn is_connecting(&self) -> bool {
        self.snapshot().is_connecting
    }

    pub fn is_correct_network(&self) -> bool {
        self.snapshot().is_correct_network
    }

    pub fn error(&self) -> Option<StructuredError> {
        self.snapshot().error
    }

    pub fn is_loading(&self) -> bool {
        self.snapshot().is_loading
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        match &self.controller {
            Some(controller) => controller.subscribe(),
            None => watch::channel(SessionSnapshot::default()).1,
        }
    }

    pub async fn connect(&self) -> Result<SessionSnapshot, StructuredError> {
        match &self.controller {
            Some(controller) => controller.connect().await,
            None => Ok(SessionSnapshot::default()),
        }
    }

    pub fn disconnect(&self) {
        if let Some(controller) = &self.controller {
            controller.disconnect();
        }
    }

    /// `Ok(None)` when there is no session to switch.
    pub async fn switch_network(&self) -> Result<Option<NetworkInfo>, SwitchFailure> {
        match &self.controller {
            Some(controller) => controller.switch_network().await.map(Some),
            None => Ok(None),
        }
    }

    pub fn clear_error(&self) {
        if let Some(controller) = &self.controller {
            controller.clear_error();
        }
    }
}
