//! Active-chain validation and switching against the single target network.

use std::sync::{Arc, Mutex, PoisonError, Weak};

use crate::domain::{ManualInstructions, NetworkDescriptor, NetworkInfo, NetworkState};
use crate::errors::{ErrorClassifier, ErrorContext, ErrorType, RawError, StructuredError};
use crate::handle::{provider_key, WalletHandle};
use crate::networks::{known_chain, parse_chain_id, synthesized_name};
use crate::ports::{ProviderEvent, ProviderEventKind, ProviderRpcError, Subscription};

const COMPONENT: &str = "network_reconciler";

#[derive(Debug, Clone, PartialEq)]
pub struct NetworkChange {
    pub chain_id: u64,
    pub info: NetworkInfo,
    pub is_correct: bool,
}

#[derive(Debug, Clone)]
pub struct SwitchFailure {
    pub error: StructuredError,
    pub requires_user_action: bool,
    pub manual: Option<ManualInstructions>,
}

#[derive(Debug)]
struct ReconcilerState {
    current: Option<NetworkInfo>,
    state: NetworkState,
    listener: Option<(usize, Subscription)>,
}

pub struct NetworkReconciler {
    target: NetworkDescriptor,
    classifier: Arc<ErrorClassifier>,
    inner: Arc<Mutex<ReconcilerState>>,
}

impl std::fmt::Debug for NetworkReconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkReconciler")
            .field("target", &self.target.chain_id)
            .field("state", &self.state())
            .finish()
    }
}

impl NetworkReconciler {
    pub fn new(target: NetworkDescriptor, classifier: Arc<ErrorClassifier>) -> Self {
        Self {
            target,
            classifier,
            inner: Arc::new(Mutex::new(ReconcilerState {
                current: None,
                state: NetworkState::Unknown,
                listener: None,
            })),
        }
    }

    pub fn target(&self) -> &NetworkDescriptor {
        &self.target
    }

    pub fn state(&self) -> NetworkState {
        lock(&self.inner).state
    }

    pub fn current_network(&self) -> Option<NetworkInfo> {
        lock(&self.inner).current.clone()
    }

    /// Resolves a chain id to a [`NetworkInfo`] without touching any provider.
    pub fn describe(&self, chain_id: u64) -> NetworkInfo {
        describe_chain(&self.target, chain_id)
    }

    pub async fn validate(
        &self,
        handle: Option<&WalletHandle>,
    ) -> Result<NetworkInfo, StructuredError> {
        let Some(handle) = handle else {
            let error = self.classifier.classify(
                RawError::typed(ErrorType::ProviderNotFound, "no provider to read the chain from"),
                ErrorContext::new(COMPONENT, "validate"),
            );
            self.settle(None, NetworkState::Error);
            return Err(error);
        };

        match handle.chain_id().await {
            Ok(chain_id) => {
                let info = self.describe(chain_id);
                self.settle(Some(info.clone()), state_for(&info));
                tracing::debug!(chain_id, correct = info.is_correct, "network validated");
                Ok(info)
            }
            Err(err) => {
                self.settle(None, NetworkState::Error);
                Err(self
                    .classifier
                    .classify(err, ErrorContext::new(COMPONENT, "validate")))
            }
        }
    }

    /// Switches the wallet to the target, adding the chain first when the
    /// wallet does not know it.
    pub async fn switch_to_target(
        &self,
        handle: &WalletHandle,
    ) -> Result<NetworkInfo, SwitchFailure> {
        self.set_state(NetworkState::Switching);
        let outcome = self.switch_inner(handle).await;
        self.finish(&outcome);
        outcome
    }

    pub async fn add_network(&self, handle: &WalletHandle) -> Result<NetworkInfo, SwitchFailure> {
        self.set_state(NetworkState::Switching);
        let outcome = self.add_inner(handle).await;
        self.finish(&outcome);
        outcome
    }

    /// Registers the chain-change listener once per provider.
    pub fn setup_listeners<F>(&self, handle: &WalletHandle, on_change: F) -> Result<(), StructuredError>
    where
        F: Fn(NetworkChange) + Send + Sync + 'static,
    {
        let key = provider_key(handle.raw());
        let stale = {
            let mut guard = lock(&self.inner);
            if guard
                .listener
                .as_ref()
                .is_some_and(|(existing, _)| *existing == key)
            {
                return Ok(());
            }
            guard.listener.take()
        };
        if let Some((_, subscription)) = stale {
            subscription.dispose();
        }

        let weak: Weak<Mutex<ReconcilerState>> = Arc::downgrade(&self.inner);
        let target = self.target.clone();
        let listener = Arc::new(move |event: &ProviderEvent| {
            let ProviderEvent::ChainChanged(raw) = event else {
                return;
            };
            let Some(chain_id) = parse_chain_id(raw) else {
                tracing::warn!(raw = %raw, "ignoring unparseable chainChanged payload");
                return;
            };
            let info = describe_chain(&target, chain_id);
            if let Some(inner) = weak.upgrade() {
                let mut guard = lock(&inner);
                guard.state = state_for(&info);
                guard.current = Some(info.clone());
            }
            on_change(NetworkChange {
                chain_id,
                is_correct: info.is_correct,
                info,
            });
        });

        let subscription = handle
            .subscribe(ProviderEventKind::ChainChanged, listener)
            .map_err(|e| {
                self.classifier
                    .classify(e, ErrorContext::new(COMPONENT, "setup_listeners"))
            })?;
        lock(&self.inner).listener = Some((key, subscription));
        Ok(())
    }

    pub fn clear_listeners(&self) {
        let taken = lock(&self.inner).listener.take();
        if let Some((_, subscription)) = taken {
            subscription.dispose();
        }
    }

    pub fn has_listener(&self) -> bool {
        lock(&self.inner).listener.is_some()
    }

    /// Forgets the last observed network; listeners are untouched.
    pub fn reset(&self) {
        self.settle(None, NetworkState::Unknown);
    }

    pub fn manual_instructions(&self) -> ManualInstructions {
        let name = self.target.chain_name.clone();
        let rpc_url = self.target.rpc_urls.first().cloned().unwrap_or_default();
        let explorer = self
            .target
            .block_explorer_urls
            .first()
            .cloned()
            .unwrap_or_default();
        let symbol = self.target.native_currency.symbol.clone();
        let steps = vec![
            "Open your wallet and go to Settings > Networks.".to_owned(),
            "Choose \"Add network\" and enter the details below.".to_owned(),
            format!("Network name: {name}"),
            format!("Chain ID: {}", self.target.chain_id),
            format!("RPC URL: {rpc_url}"),
            format!("Currency symbol: {symbol}"),
            format!("Block explorer: {explorer}"),
            format!("Save, then select {name} as the active network and reconnect."),
        ];
        ManualInstructions {
            network_name: name,
            chain_id: self.target.chain_id,
            rpc_url,
            currency_symbol: symbol,
            block_explorer_url: explorer,
            steps,
        }
    }

    async fn switch_inner(&self, handle: &WalletHandle) -> Result<NetworkInfo, SwitchFailure> {
        tracing::info!(target_chain = self.target.chain_id, "requesting network switch");
        match handle.switch_chain(self.target.chain_id).await {
            Ok(()) => self.read_after_change(handle, "switch_to_target").await,
            Err(err) if is_unrecognized_chain(&err) => {
                tracing::info!(
                    target_chain = self.target.chain_id,
                    "target chain unknown to wallet, adding it"
                );
                self.add_inner(handle).await
            }
            Err(err) => Err(self.switch_failure(err, "switch_to_target")),
        }
    }

    async fn add_inner(&self, handle: &WalletHandle) -> Result<NetworkInfo, SwitchFailure> {
        if let Err(err) = handle.add_chain(&self.target).await {
            return Err(self.switch_failure(err, "add_network"));
        }
        let info = self.read_after_change(handle, "add_network").await?;
        if info.is_correct {
            return Ok(info);
        }
        // Some wallets register the chain without activating it.
        match handle.switch_chain(self.target.chain_id).await {
            Ok(()) => self.read_after_change(handle, "add_network").await,
            Err(err) => Err(self.switch_failure(err, "add_network")),
        }
    }

    async fn read_after_change(
        &self,
        handle: &WalletHandle,
        operation: &'static str,
    ) -> Result<NetworkInfo, SwitchFailure> {
        match handle.chain_id().await {
            Ok(chain_id) => Ok(self.describe(chain_id)),
            Err(err) => Err(SwitchFailure {
                error: self
                    .classifier
                    .classify(err, ErrorContext::new(COMPONENT, operation)),
                requires_user_action: false,
                manual: None,
            }),
        }
    }

    fn switch_failure(&self, err: ProviderRpcError, operation: &'static str) -> SwitchFailure {
        let context = ErrorContext::new(COMPONENT, operation)
            .with("target_chain", self.target.chain_id.to_string());
        if is_user_rejection(&err) {
            let mut error = self.classifier.classify(err, context);
            error.user_message = format!(
                "Switch your wallet to {} to continue.",
                self.target.chain_name
            );
            return SwitchFailure {
                error,
                requires_user_action: true,
                manual: None,
            };
        }
        let error = self.classifier.classify(
            RawError::typed(
                ErrorType::NetworkSwitchFailed,
                format!("{operation} failed (code {:?}): {}", err.code, err.message),
            ),
            context,
        );
        SwitchFailure {
            error,
            requires_user_action: true,
            manual: Some(self.manual_instructions()),
        }
    }

    fn finish(&self, outcome: &Result<NetworkInfo, SwitchFailure>) {
        match outcome {
            Ok(info) => self.settle(Some(info.clone()), state_for(info)),
            Err(failure) if failure.error.error_type == ErrorType::UserRejected => {
                let current = self.current_network();
                self.settle(current, NetworkState::Wrong)
            }
            Err(_) => {
                let current = self.current_network();
                self.settle(current, NetworkState::Error)
            }
        }
    }

    fn set_state(&self, state: NetworkState) {
        lock(&self.inner).state = state;
    }

    fn settle(&self, current: Option<NetworkInfo>, state: NetworkState) {
        let mut guard = lock(&self.inner);
        guard.current = current;
        guard.state = state;
    }
}

impl Drop for NetworkReconciler {
    fn drop(&mut self) {
        self.clear_listeners();
    }
}

fn lock(inner: &Mutex<ReconcilerState>) -> std::sync::MutexGuard<'_, ReconcilerState> {
    inner.lock().unwrap_or_else(PoisonError::into_inner)
}

fn state_for(info: &NetworkInfo) -> NetworkState {
    if info.is_correct {
        NetworkState::Correct
    } else {
        NetworkState::Wrong
    }
}

pub fn describe_chain(target: &NetworkDescriptor, chain_id: u64) -> NetworkInfo {
    if chain_id == target.chain_id {
        return NetworkInfo {
            chain_id: chain_id.to_string(),
            chain_name: target.chain_name.clone(),
            is_correct: true,
            is_supported: true,
            native_currency: Some(target.native_currency.clone()),
            rpc_urls: Some(target.rpc_urls.clone()),
            block_explorer_urls: Some(target.block_explorer_urls.clone()),
        };
    }
    match known_chain(chain_id) {
        Some(known) => NetworkInfo {
            chain_id: chain_id.to_string(),
            chain_name: known.chain_name,
            is_correct: false,
            is_supported: true,
            native_currency: Some(known.native_currency),
            rpc_urls: Some(known.rpc_urls),
            block_explorer_urls: Some(known.block_explorer_urls),
        },
        None => NetworkInfo {
            chain_id: chain_id.to_string(),
            chain_name: synthesized_name(chain_id),
            is_correct: false,
            is_supported: false,
            native_currency: None,
            rpc_urls: None,
            block_explorer_urls: None,
        },
    }
}

fn is_unrecognized_chain(err: &ProviderRpcError) -> bool {
    if err.code == Some(4902) {
        return true;
    }
    let message = err.message.to_lowercase();
    message.contains("unrecognized chain") || message.contains("try adding the chain")
}

fn is_user_rejection(err: &ProviderRpcError) -> bool {
    err.code == Some(4001) || err.message.to_lowercase().contains("user rejected")
}
