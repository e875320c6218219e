//! Provider error classification.
//!
//! Every raw provider failure is turned into a [`StructuredError`] before it
//! reaches session state. Classification first looks at the numeric EIP-1193 /
//! JSON-RPC code, then at the lowercased message text, and finally falls back
//! to [`ErrorType::Unknown`]. Each classified error is appended to a bounded
//! rolling log and folded into aggregate counters.

use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError};

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::TimestampMs;
use crate::ports::{ClockPort, ProviderRpcError};

pub const METAMASK_DOWNLOAD_URL: &str = "https://metamask.io/download/";
pub const SUPPORT_URL: &str = "https://github.com/bep20-dash/bep20-dash/issues";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorType {
    ProviderNotFound,
    UserRejected,
    WalletLocked,
    WrongNetwork,
    NetworkSwitchFailed,
    ChainNotAdded,
    PendingRequest,
    Timeout,
    NetworkError,
    Disconnected,
    InsufficientFunds,
    HydrationMismatch,
    UnsupportedMethod,
    InvalidInput,
    TransactionRejected,
    InternalError,
    Unknown,
    System,
}

impl ErrorType {
    pub fn severity(self) -> Severity {
        match self {
            Self::UserRejected => Severity::Low,
            Self::ProviderNotFound
            | Self::HydrationMismatch
            | Self::InternalError
            | Self::System => Severity::High,
            _ => Severity::Medium,
        }
    }

    pub fn recoverable(self) -> bool {
        !matches!(
            self,
            Self::ProviderNotFound
                | Self::InsufficientFunds
                | Self::UnsupportedMethod
                | Self::InvalidInput
                | Self::TransactionRejected
        )
    }

    pub fn default_message(self) -> &'static str {
        match self {
            Self::ProviderNotFound => {
                "No wallet detected. Install MetaMask or another BNB Smart Chain wallet to continue."
            }
            Self::UserRejected => "You rejected the request in your wallet.",
            Self::WalletLocked => "Your wallet is locked. Unlock it and try again.",
            Self::WrongNetwork => "Your wallet is connected to the wrong network.",
            Self::NetworkSwitchFailed => {
                "Could not switch networks automatically. Add the network to your wallet."
            }
            Self::ChainNotAdded => "The required network is not configured in your wallet.",
            Self::PendingRequest => {
                "A wallet request is already pending. Open your wallet to complete it."
            }
            Self::Timeout => "The wallet did not respond in time.",
            Self::NetworkError => "A network error occurred while talking to your wallet.",
            Self::Disconnected => "Your wallet disconnected.",
            Self::InsufficientFunds => "Insufficient funds for this transaction.",
            Self::HydrationMismatch => "The page is out of sync. Reload to continue.",
            Self::UnsupportedMethod => "Your wallet does not support this operation.",
            Self::InvalidInput => "The wallet rejected the request parameters.",
            Self::TransactionRejected => "The transaction was rejected by the network.",
            Self::InternalError => "Your wallet reported an internal error.",
            Self::Unknown => "An unexpected wallet error occurred.",
            Self::System => "Something went wrong. Reload the page to continue.",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::ProviderNotFound => "provider_not_found",
            Self::UserRejected => "user_rejected",
            Self::WalletLocked => "wallet_locked",
            Self::WrongNetwork => "wrong_network",
            Self::NetworkSwitchFailed => "network_switch_failed",
            Self::ChainNotAdded => "chain_not_added",
            Self::PendingRequest => "pending_request",
            Self::Timeout => "timeout",
            Self::NetworkError => "network_error",
            Self::Disconnected => "disconnected",
            Self::InsufficientFunds => "insufficient_funds",
            Self::HydrationMismatch => "hydration_mismatch",
            Self::UnsupportedMethod => "unsupported_method",
            Self::InvalidInput => "invalid_input",
            Self::TransactionRejected => "transaction_rejected",
            Self::InternalError => "internal_error",
            Self::Unknown => "unknown",
            Self::System => "system",
        }
    }
}

impl fmt::Display for ErrorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Retry,
    Install,
    Unlock,
    SwitchNetwork,
    AddNetwork,
    Refresh,
    ShowManualInstructions,
    Dismiss,
    ContactSupport,
}

pub type ActionCallback = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

#[derive(Clone)]
pub enum ActionHandler {
    /// Bound to one of the owning component's own operations.
    Callback(ActionCallback),
    /// Full page reload. Only used when no owner operation can recover.
    ReloadPage,
}

impl fmt::Debug for ActionHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Callback(_) => f.write_str("Callback(..)"),
            Self::ReloadPage => f.write_str("ReloadPage"),
        }
    }
}

impl PartialEq for ActionHandler {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Callback(a), Self::Callback(b)) => Arc::ptr_eq(a, b),
            (Self::ReloadPage, Self::ReloadPage) => true,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionOutcome {
    Ran,
    ReloadRequested,
    NoHandler,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryAction {
    pub kind: ActionKind,
    pub label: String,
    pub is_primary: bool,
    pub target_url: Option<String>,
    #[serde(skip)]
    pub handler: Option<ActionHandler>,
}

impl RecoveryAction {
    fn new(kind: ActionKind, label: &str) -> Self {
        Self {
            kind,
            label: label.to_owned(),
            is_primary: false,
            target_url: None,
            handler: None,
        }
    }

    fn primary(mut self) -> Self {
        self.is_primary = true;
        self
    }

    fn url(mut self, url: &str) -> Self {
        self.target_url = Some(url.to_owned());
        self
    }

    fn handler(mut self, handler: ActionHandler) -> Self {
        self.handler = Some(handler);
        self
    }

    pub async fn invoke(&self) -> ActionOutcome {
        match &self.handler {
            Some(ActionHandler::Callback(callback)) => {
                callback().await;
                ActionOutcome::Ran
            }
            Some(ActionHandler::ReloadPage) => ActionOutcome::ReloadRequested,
            None => ActionOutcome::NoHandler,
        }
    }
}

/// Operations of the component that owns an error, used to wire action handlers.
#[derive(Clone, Default)]
pub struct RecoveryCallbacks {
    pub connect: Option<ActionCallback>,
    pub switch_network: Option<ActionCallback>,
    pub add_network: Option<ActionCallback>,
}

impl fmt::Debug for RecoveryCallbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecoveryCallbacks")
            .field("connect", &self.connect.is_some())
            .field("switch_network", &self.switch_network.is_some())
            .field("add_network", &self.add_network.is_some())
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[error("{error_type}: {technical_details}")]
pub struct StructuredError {
    pub error_type: ErrorType,
    pub severity: Severity,
    pub recoverable: bool,
    pub code: Option<i64>,
    pub user_message: String,
    pub technical_details: String,
    pub actions: Vec<RecoveryAction>,
    pub context: BTreeMap<String, String>,
    pub timestamp: TimestampMs,
}

impl StructuredError {
    pub fn primary_action(&self) -> Option<&RecoveryAction> {
        self.actions.iter().find(|a| a.is_primary)
    }

    pub fn has_action(&self, kind: ActionKind) -> bool {
        self.actions.iter().any(|a| a.kind == kind)
    }

    /// Fixed replacement for an internal classification failure.
    pub fn system(details: impl Into<String>, timestamp: TimestampMs) -> Self {
        let error_type = ErrorType::System;
        Self {
            error_type,
            severity: Severity::High,
            recoverable: true,
            code: None,
            user_message: error_type.default_message().to_owned(),
            technical_details: details.into(),
            actions: vec![RecoveryAction::new(ActionKind::Refresh, "Reload page")
                .primary()
                .handler(ActionHandler::ReloadPage)],
            context: BTreeMap::new(),
            timestamp,
        }
    }
}

/// Failure input to [`ErrorClassifier::classify`].
#[derive(Debug, Clone)]
pub enum RawError {
    Structured(StructuredError),
    Provider(ProviderRpcError),
    /// A failure whose type is already known to the caller.
    Typed {
        error_type: ErrorType,
        details: String,
    },
    Message(String),
}

impl RawError {
    pub fn typed(error_type: ErrorType, details: impl Into<String>) -> Self {
        Self::Typed {
            error_type,
            details: details.into(),
        }
    }
}

impl From<StructuredError> for RawError {
    fn from(value: StructuredError) -> Self {
        Self::Structured(value)
    }
}

impl From<ProviderRpcError> for RawError {
    fn from(value: ProviderRpcError) -> Self {
        Self::Provider(value)
    }
}

impl From<String> for RawError {
    fn from(value: String) -> Self {
        Self::Message(value)
    }
}

impl From<&str> for RawError {
    fn from(value: &str) -> Self {
        Self::Message(value.to_owned())
    }
}

#[derive(Debug, Clone, Default)]
pub struct ErrorContext {
    entries: BTreeMap<String, String>,
}

impl ErrorContext {
    pub fn new(component: &str, operation: &str) -> Self {
        let mut entries = BTreeMap::new();
        entries.insert("component".to_owned(), component.to_owned());
        entries.insert("operation".to_owned(), operation.to_owned());
        Self { entries }
    }

    pub fn with(mut self, key: &str, value: impl Into<String>) -> Self {
        self.entries.insert(key.to_owned(), value.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorLogEntry {
    pub error: StructuredError,
    pub user_agent: Option<String>,
    pub url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorStats {
    pub total: u64,
    pub by_type: BTreeMap<ErrorType, u64>,
    pub by_severity: BTreeMap<Severity, u64>,
    pub by_code: BTreeMap<i64, u64>,
}

/// Bounded rolling log; the oldest entry is evicted first.
#[derive(Debug)]
pub struct ErrorLog {
    capacity: usize,
    entries: VecDeque<ErrorLogEntry>,
    stats: ErrorStats,
}

impl ErrorLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: VecDeque::with_capacity(capacity.max(1)),
            stats: ErrorStats::default(),
        }
    }

    pub fn record(&mut self, entry: ErrorLogEntry) {
        let error = &entry.error;
        self.stats.total = self.stats.total.saturating_add(1);
        *self.stats.by_type.entry(error.error_type).or_default() += 1;
        *self.stats.by_severity.entry(error.severity).or_default() += 1;
        if let Some(code) = error.code {
            *self.stats.by_code.entry(code).or_default() += 1;
        }
        while self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = &ErrorLogEntry> {
        self.entries.iter()
    }

    pub fn stats(&self) -> &ErrorStats {
        &self.stats
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.stats = ErrorStats::default();
    }
}

fn code_entry(code: i64) -> Option<(ErrorType, &'static str)> {
    let entry = match code {
        4001 => (ErrorType::UserRejected, "You rejected the request in your wallet."),
        4100 => (
            ErrorType::WalletLocked,
            "Your wallet has not authorized this site. Unlock it and connect again.",
        ),
        4200 => (
            ErrorType::UnsupportedMethod,
            "Your wallet does not support the requested method.",
        ),
        4900 => (ErrorType::Disconnected, "Your wallet is disconnected from all networks."),
        4901 => (
            ErrorType::Disconnected,
            "Your wallet is not connected to the requested network.",
        ),
        4902 => (
            ErrorType::ChainNotAdded,
            "The required network has not been added to your wallet.",
        ),
        -32700 => (ErrorType::InvalidInput, "The wallet could not parse the request."),
        -32600 => (ErrorType::InvalidInput, "The wallet received an invalid request."),
        -32601 => (
            ErrorType::UnsupportedMethod,
            "The requested method does not exist in your wallet.",
        ),
        -32602 => (ErrorType::InvalidInput, "The request parameters were invalid."),
        -32603 => (ErrorType::InternalError, "Your wallet reported an internal error."),
        -32000 => (ErrorType::InvalidInput, "The wallet rejected the request input."),
        -32001 => (ErrorType::NetworkError, "The requested resource was not found."),
        -32002 => (
            ErrorType::PendingRequest,
            "A wallet request is already pending. Open your wallet to complete it.",
        ),
        -32003 => (ErrorType::TransactionRejected, "The transaction was rejected."),
        -32004 => (
            ErrorType::UnsupportedMethod,
            "The requested method is not supported by the node.",
        ),
        -32005 => (
            ErrorType::NetworkError,
            "The request limit was exceeded. Try again shortly.",
        ),
        -32006 => (
            ErrorType::UnsupportedMethod,
            "The JSON-RPC version is not supported by your wallet.",
        ),
        _ => return None,
    };
    Some(entry)
}

/// Substring rules checked in order against the lowercased message.
const MESSAGE_RULES: &[(&[&str], ErrorType)] = &[
    (
        &[
            "provider not found",
            "provider unavailable",
            "no provider",
            "no ethereum provider",
            "not installed",
            "no wallet",
        ],
        ErrorType::ProviderNotFound,
    ),
    (
        &["rejected", "denied", "cancelled", "canceled"],
        ErrorType::UserRejected,
    ),
    (&["locked", "unlock"], ErrorType::WalletLocked),
    (&["network", "chain", "rpc"], ErrorType::NetworkError),
    (&["timeout", "timed out", "timed-out"], ErrorType::Timeout),
    (
        &["pending", "already processing"],
        ErrorType::PendingRequest,
    ),
    (&["insufficient funds"], ErrorType::InsufficientFunds),
    (&["hydration", "mismatch"], ErrorType::HydrationMismatch),
];

fn match_message(message: &str) -> ErrorType {
    let lowered = message.to_lowercase();
    MESSAGE_RULES
        .iter()
        .find(|(patterns, _)| patterns.iter().any(|p| lowered.contains(p)))
        .map(|(_, error_type)| *error_type)
        .unwrap_or(ErrorType::Unknown)
}

/// Derives the recovery actions for an error from its type alone.
///
/// Handlers are bound to `owner`'s operations. A full page reload is used for
/// hydration mismatches and whenever the owner cannot supply the operation.
pub fn generate_actions(
    error: &StructuredError,
    owner: Option<&RecoveryCallbacks>,
) -> Vec<RecoveryAction> {
    let bind = |pick: fn(&RecoveryCallbacks) -> Option<ActionCallback>| {
        owner
            .and_then(pick)
            .map(ActionHandler::Callback)
            .unwrap_or(ActionHandler::ReloadPage)
    };
    let connect = || bind(|o| o.connect.clone());
    let switch = || bind(|o| o.switch_network.clone());
    let add = || bind(|o| o.add_network.clone());
    let dismiss = || RecoveryAction::new(ActionKind::Dismiss, "Dismiss");

    match error.error_type {
        ErrorType::ProviderNotFound => vec![
            RecoveryAction::new(ActionKind::Install, "Install MetaMask")
                .primary()
                .url(METAMASK_DOWNLOAD_URL),
            RecoveryAction::new(ActionKind::Retry, "I've installed a wallet").handler(connect()),
            dismiss(),
        ],
        ErrorType::UserRejected => vec![
            RecoveryAction::new(ActionKind::Retry, "Try again")
                .primary()
                .handler(connect()),
            dismiss(),
        ],
        ErrorType::WalletLocked => vec![
            RecoveryAction::new(ActionKind::Unlock, "Unlock wallet")
                .primary()
                .handler(connect()),
            dismiss(),
        ],
        ErrorType::WrongNetwork => vec![
            RecoveryAction::new(ActionKind::SwitchNetwork, "Switch network")
                .primary()
                .handler(switch()),
            RecoveryAction::new(ActionKind::AddNetwork, "Add network").handler(add()),
            dismiss(),
        ],
        ErrorType::NetworkSwitchFailed | ErrorType::ChainNotAdded => vec![
            RecoveryAction::new(ActionKind::AddNetwork, "Add network")
                .primary()
                .handler(add()),
            RecoveryAction::new(ActionKind::ShowManualInstructions, "Show manual steps"),
            dismiss(),
        ],
        ErrorType::PendingRequest => vec![RecoveryAction::new(
            ActionKind::Dismiss,
            "I'll check my wallet",
        )
        .primary()],
        ErrorType::Timeout | ErrorType::NetworkError | ErrorType::Disconnected => vec![
            RecoveryAction::new(ActionKind::Retry, "Retry")
                .primary()
                .handler(connect()),
            dismiss(),
        ],
        ErrorType::InsufficientFunds | ErrorType::InvalidInput | ErrorType::TransactionRejected => {
            vec![dismiss().primary()]
        }
        ErrorType::UnsupportedMethod => vec![
            dismiss().primary(),
            RecoveryAction::new(ActionKind::ContactSupport, "Contact support").url(SUPPORT_URL),
        ],
        ErrorType::HydrationMismatch => vec![RecoveryAction::new(ActionKind::Refresh, "Reload page")
            .primary()
            .handler(ActionHandler::ReloadPage)],
        ErrorType::InternalError | ErrorType::Unknown | ErrorType::System => {
            let mut actions = vec![RecoveryAction::new(ActionKind::Retry, "Retry")
                .primary()
                .handler(connect())];
            if error.severity >= Severity::High {
                actions.push(
                    RecoveryAction::new(ActionKind::ContactSupport, "Contact support")
                        .url(SUPPORT_URL),
                );
            }
            actions.push(dismiss());
            actions
        }
    }
}

/// Rebuilds `error`'s actions against `owner`'s operations.
pub fn with_owner_actions(mut error: StructuredError, owner: &RecoveryCallbacks) -> StructuredError {
    error.actions = generate_actions(&error, Some(owner));
    error
}

pub struct ErrorClassifier {
    clock: Arc<dyn ClockPort>,
    user_agent: Option<String>,
    url: Option<String>,
    log: Mutex<ErrorLog>,
}

impl fmt::Debug for ErrorClassifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorClassifier")
            .field("user_agent", &self.user_agent)
            .field("url", &self.url)
            .finish_non_exhaustive()
    }
}

impl ErrorClassifier {
    pub fn new(clock: Arc<dyn ClockPort>, log_capacity: usize) -> Self {
        Self {
            clock,
            user_agent: None,
            url: None,
            log: Mutex::new(ErrorLog::new(log_capacity)),
        }
    }

    pub fn with_environment(mut self, user_agent: Option<String>, url: Option<String>) -> Self {
        self.user_agent = user_agent;
        self.url = url;
        self
    }

    /// Classifies `raw`. Never panics and never fails.
    ///
    /// An already structured error is returned unchanged and is not logged a
    /// second time.
    pub fn classify(&self, raw: impl Into<RawError>, context: ErrorContext) -> StructuredError {
        let raw = raw.into();
        if let RawError::Structured(error) = raw {
            return error;
        }

        let timestamp = self.now();
        let classified = panic::catch_unwind(AssertUnwindSafe(|| {
            build_structured(raw, context, timestamp)
        }))
        .unwrap_or_else(|_| {
            StructuredError::system("error classification failed internally", timestamp)
        });

        self.record(&classified);
        classified
    }

    /// Like [`classify`](Self::classify) but leaves the log and its stats alone.
    pub fn describe(&self, raw: impl Into<RawError>, context: ErrorContext) -> StructuredError {
        match raw.into() {
            RawError::Structured(error) => error,
            raw => {
                let timestamp = self.now();
                panic::catch_unwind(AssertUnwindSafe(|| build_structured(raw, context, timestamp)))
                    .unwrap_or_else(|_| {
                        StructuredError::system("error classification failed internally", timestamp)
                    })
            }
        }
    }

    pub fn stats(&self) -> ErrorStats {
        self.lock_log().stats().clone()
    }

    /// Newest `limit` entries, oldest first.
    pub fn recent(&self, limit: usize) -> Vec<ErrorLogEntry> {
        let log = self.lock_log();
        let skip = log.len().saturating_sub(limit);
        log.entries().skip(skip).cloned().collect()
    }

    pub fn clear_log(&self) {
        self.lock_log().clear();
    }

    fn lock_log(&self) -> std::sync::MutexGuard<'_, ErrorLog> {
        self.log.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn now(&self) -> TimestampMs {
        TimestampMs(self.clock.now_ms().unwrap_or_default())
    }

    fn record(&self, error: &StructuredError) {
        match error.severity {
            Severity::High | Severity::Critical => tracing::error!(
                error_type = %error.error_type,
                code = ?error.code,
                details = %error.technical_details,
                "wallet error classified"
            ),
            Severity::Low | Severity::Medium => tracing::warn!(
                error_type = %error.error_type,
                code = ?error.code,
                details = %error.technical_details,
                "wallet error classified"
            ),
        }
        self.lock_log().record(ErrorLogEntry {
            error: error.clone(),
            user_agent: self.user_agent.clone(),
            url: self.url.clone(),
        });
    }
}

fn build_structured(raw: RawError, context: ErrorContext, timestamp: TimestampMs) -> StructuredError {
    let (error_type, code, message, details) = match raw {
        RawError::Provider(err) => {
            let from_code = err.code.and_then(code_entry);
            match from_code {
                Some((error_type, message)) => (error_type, err.code, Some(message), err.message),
                None => (match_message(&err.message), err.code, None, err.message),
            }
        }
        RawError::Typed {
            error_type,
            details,
        } => (error_type, None, None, details),
        RawError::Message(message) => (match_message(&message), None, None, message),
        RawError::Structured(error) => return error,
    };

    let mut error = StructuredError {
        error_type,
        severity: error_type.severity(),
        recoverable: error_type.recoverable(),
        code,
        user_message: message
            .unwrap_or_else(|| error_type.default_message())
            .to_owned(),
        technical_details: details,
        actions: Vec::new(),
        context: context.entries,
        timestamp,
    };
    error.actions = generate_actions(&error, None);
    error
}
