use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Adapter runtime failures that happen before a provider could answer.
#[derive(Debug, Error)]
pub enum PortError {
    #[error("port not implemented: {0}")]
    NotImplemented(&'static str),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("validation error: {0}")]
    Validation(String),
    #[error("policy error: {0}")]
    Policy(String),
    #[error("not found: {0}")]
    NotFound(String),
}

/// Raw error as reported by an injected provider (EIP-1193 `ProviderRpcError`).
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("provider rpc error (code {code:?}): {message}")]
pub struct ProviderRpcError {
    pub code: Option<i64>,
    pub message: String,
    pub data: Option<Value>,
}

impl ProviderRpcError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            message: message.into(),
            data: None,
        }
    }

    pub fn message(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
            data: None,
        }
    }

    pub fn unsupported(method: &str) -> Self {
        Self::new(4200, format!("provider does not support {method}"))
    }
}

impl From<PortError> for ProviderRpcError {
    fn from(value: PortError) -> Self {
        match value {
            PortError::Transport(msg) => Self::message(format!("rpc transport failed: {msg}")),
            PortError::NotImplemented(what) => Self::unsupported(what),
            PortError::Policy(msg) => Self::message(format!("provider unavailable: {msg}")),
            PortError::Validation(msg) => Self::new(-32602, msg),
            PortError::NotFound(msg) => Self::message(format!("provider not found: {msg}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProviderEventKind {
    AccountsChanged,
    ChainChanged,
    Disconnect,
}

impl ProviderEventKind {
    pub fn event_name(self) -> &'static str {
        match self {
            Self::AccountsChanged => "accountsChanged",
            Self::ChainChanged => "chainChanged",
            Self::Disconnect => "disconnect",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProviderEvent {
    AccountsChanged(Vec<String>),
    /// Raw chain id as emitted by the provider, usually `0x`-prefixed hex.
    ChainChanged(String),
    Disconnect(Option<ProviderRpcError>),
}

impl ProviderEvent {
    pub fn kind(&self) -> ProviderEventKind {
        match self {
            Self::AccountsChanged(_) => ProviderEventKind::AccountsChanged,
            Self::ChainChanged(_) => ProviderEventKind::ChainChanged,
            Self::Disconnect(_) => ProviderEventKind::Disconnect,
        }
    }
}

pub type EventListener = Arc<dyn Fn(&ProviderEvent) + Send + Sync>;

/// Disposer for one listener registration. Unsubscribes on `dispose` or drop.
pub struct Subscription {
    kind: ProviderEventKind,
    disposer: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new(kind: ProviderEventKind, disposer: impl FnOnce() + Send + 'static) -> Self {
        Self {
            kind,
            disposer: Some(Box::new(disposer)),
        }
    }

    pub fn kind(&self) -> ProviderEventKind {
        self.kind
    }

    pub fn dispose(mut self) {
        self.run_disposer();
    }

    fn run_disposer(&mut self) {
        if let Some(disposer) = self.disposer.take() {
            disposer();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.run_disposer();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("kind", &self.kind)
            .field("active", &self.disposer.is_some())
            .finish()
    }
}

/// Owned group of subscriptions torn down together.
#[derive(Debug, Default)]
pub struct SubscriptionSet {
    items: Vec<Subscription>,
}

impl SubscriptionSet {
    pub fn push(&mut self, subscription: Subscription) {
        self.items.push(subscription);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Returns how many registrations were disposed.
    pub fn dispose_all(&mut self) -> usize {
        let count = self.items.len();
        for subscription in self.items.drain(..) {
            subscription.dispose();
        }
        count
    }
}

/// Wallet signature flags an injected object advertises about itself.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletFlags {
    pub is_metamask: bool,
    pub is_trust: bool,
    pub is_binance: bool,
    pub is_coinbase: bool,
    pub is_token_pocket: bool,
    pub is_okx: bool,
}

/// A wallet object injected into the page.
#[async_trait]
pub trait InjectedProvider: Send + Sync + fmt::Debug {
    fn flags(&self) -> WalletFlags;

    fn supports_request(&self) -> bool {
        true
    }

    fn supports_enable(&self) -> bool {
        false
    }

    fn supports_legacy_accounts(&self) -> bool {
        false
    }

    fn supports_events(&self) -> bool {
        true
    }

    async fn request(&self, method: &str, params: Value) -> Result<Value, ProviderRpcError>;

    async fn enable(&self) -> Result<Vec<String>, ProviderRpcError> {
        Err(ProviderRpcError::unsupported("enable"))
    }

    async fn legacy_accounts(&self) -> Result<Vec<String>, ProviderRpcError> {
        Err(ProviderRpcError::unsupported("legacy accounts"))
    }

    fn subscribe(
        &self,
        kind: ProviderEventKind,
        listener: EventListener,
    ) -> Result<Subscription, ProviderRpcError>;
}

/// The page-global scope a provider is discovered in.
pub trait ProviderEnvironment: Send + Sync {
    /// Request-capable candidates; several when multiple extensions are installed.
    fn injected_providers(&self) -> Vec<Arc<dyn InjectedProvider>>;

    /// Pre-EIP-1193 `web3.currentProvider`, if any.
    fn legacy_provider(&self) -> Option<Arc<dyn InjectedProvider>>;

    fn user_agent(&self) -> Option<String> {
        None
    }

    fn current_url(&self) -> Option<String> {
        None
    }
}

pub trait ClockPort: Send + Sync {
    fn now_ms(&self) -> Result<u64, PortError>;
}
