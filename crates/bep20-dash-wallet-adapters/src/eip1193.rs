use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use alloy::primitives::keccak256;
use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::watch;

use bep20_dash_wallet_core::domain::normalize_account;
use bep20_dash_wallet_core::handle::{methods, parse_accounts, parse_chain_value};
use bep20_dash_wallet_core::networks::target_network;
use bep20_dash_wallet_core::ports::EventListener;
use bep20_dash_wallet_core::{
    InjectedProvider, PortError, ProviderEvent, ProviderEventKind, ProviderRpcError,
    Subscription, WalletFlags,
};

use crate::WalletRuntimeConfig;

pub const DETERMINISTIC_ACCOUNT: &str = "0x1000000000000000000000000000000000000001";

/// Script keys for the non-`request` entry points.
pub const ENABLE: &str = "enable";
pub const LEGACY_ACCOUNTS: &str = "legacy_accounts";

/// Which calling conventions and wallet signature the adapter exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProviderShape {
    pub flags: WalletFlags,
    pub request: bool,
    pub enable: bool,
    pub legacy_accounts: bool,
    pub events: bool,
}

impl Default for ProviderShape {
    fn default() -> Self {
        Self::metamask()
    }
}

impl ProviderShape {
    pub fn metamask() -> Self {
        Self::wallet(WalletFlags {
            is_metamask: true,
            ..WalletFlags::default()
        })
    }

    pub fn wallet(flags: WalletFlags) -> Self {
        Self {
            flags,
            request: true,
            enable: false,
            legacy_accounts: false,
            events: true,
        }
    }

    /// Pre-EIP-1193 object with `enable()` and a synchronous accounts getter.
    pub fn legacy_enable() -> Self {
        Self {
            flags: WalletFlags::default(),
            request: false,
            enable: true,
            legacy_accounts: true,
            events: false,
        }
    }

    pub fn legacy_accounts() -> Self {
        Self {
            enable: false,
            ..Self::legacy_enable()
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub method: String,
    pub params: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedEvent {
    pub sequence: u64,
    pub event: ProviderEvent,
}

/// Blocks requests for one method until released. Dropping it releases too.
#[derive(Debug)]
pub struct RequestGate {
    release: watch::Sender<bool>,
}

impl RequestGate {
    pub fn release(self) {
        let _ = self.release.send(true);
    }
}

#[derive(Debug, Clone)]
pub struct Eip1193Adapter {
    mode: ProviderMode,
    shape: ProviderShape,
    state: Arc<Mutex<ProviderState>>,
}

#[derive(Debug, Clone)]
enum ProviderMode {
    Disabled(String),
    Deterministic,
    Proxy(ProxyRuntime),
}

#[derive(Debug, Clone)]
struct ProxyRuntime {
    base_url: String,
    client: reqwest::Client,
}

struct ProviderState {
    accounts: Vec<String>,
    authorized: bool,
    chain_id: u64,
    known_chains: BTreeSet<u64>,
    switch_on_add: bool,
    added_chains: Vec<Value>,
    watched_assets: Vec<Value>,
    calls: Vec<RecordedCall>,
    failures: HashMap<String, VecDeque<ProviderRpcError>>,
    delays: HashMap<String, Duration>,
    holds: HashMap<String, watch::Receiver<bool>>,
    listeners: BTreeMap<u64, (ProviderEventKind, EventListener)>,
    next_listener: u64,
    event_seq: u64,
    events: Vec<RecordedEvent>,
}

impl Default for ProviderState {
    fn default() -> Self {
        let chain_id = target_network().chain_id;
        Self {
            accounts: vec![DETERMINISTIC_ACCOUNT.to_owned()],
            authorized: false,
            chain_id,
            known_chains: BTreeSet::from([1, chain_id]),
            switch_on_add: true,
            added_chains: Vec::new(),
            watched_assets: Vec::new(),
            calls: Vec::new(),
            failures: HashMap::new(),
            delays: HashMap::new(),
            holds: HashMap::new(),
            listeners: BTreeMap::new(),
            next_listener: 0,
            event_seq: 0,
            events: Vec::new(),
        }
    }
}

impl fmt::Debug for ProviderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderState")
            .field("accounts", &self.accounts)
            .field("authorized", &self.authorized)
            .field("chain_id", &self.chain_id)
            .field("listeners", &self.listeners.len())
            .field("event_seq", &self.event_seq)
            .finish_non_exhaustive()
    }
}

impl Default for Eip1193Adapter {
    fn default() -> Self {
        Self::with_config(&WalletRuntimeConfig::from_env())
    }
}

impl Eip1193Adapter {
    pub fn with_config(config: &WalletRuntimeConfig) -> Self {
        let mode = if let Some(base_url) = &config.eip1193_proxy_url {
            let timeout = Duration::from_millis(config.proxy_timeout_ms);
            match reqwest::Client::builder().timeout(timeout).build() {
                Ok(client) => ProviderMode::Proxy(ProxyRuntime {
                    base_url: base_url.clone(),
                    client,
                }),
                Err(e) if config.strict_runtime_required() => ProviderMode::Disabled(format!(
                    "failed to initialize EIP-1193 proxy client in production profile: {e}"
                )),
                Err(e) => {
                    tracing::warn!(error = %e, "proxy client unavailable, using deterministic runtime");
                    ProviderMode::Deterministic
                }
            }
        } else if config.strict_runtime_required() {
            ProviderMode::Disabled(
                "EIP-1193 proxy URL not configured in production runtime profile".to_owned(),
            )
        } else {
            ProviderMode::Deterministic
        };
        Self::from_mode(mode)
    }

    pub fn deterministic() -> Self {
        Self::from_mode(ProviderMode::Deterministic)
    }

    pub fn disabled(reason: impl Into<String>) -> Self {
        Self::from_mode(ProviderMode::Disabled(reason.into()))
    }

    fn from_mode(mode: ProviderMode) -> Self {
        let mut state = ProviderState::default();
        if matches!(mode, ProviderMode::Proxy(_)) {
            // Filled in from the bridge's first answers.
            state.accounts.clear();
            state.chain_id = 0;
        }
        tracing::debug!(mode = mode_name(&mode), "eip1193 adapter initialised");
        Self {
            mode,
            shape: ProviderShape::default(),
            state: Arc::new(Mutex::new(state)),
        }
    }

    pub fn mode_name(&self) -> &'static str {
        mode_name(&self.mode)
    }

    pub fn with_shape(mut self, shape: ProviderShape) -> Self {
        self.shape = shape;
        self
    }

    pub fn with_chain(self, chain_id: u64) -> Self {
        {
            let mut g = self.state_unchecked();
            g.chain_id = chain_id;
            g.known_chains.insert(chain_id);
        }
        self
    }

    /// Replaces the chains the wallet knows about; the active chain stays known.
    pub fn with_known_chains(self, chains: impl IntoIterator<Item = u64>) -> Self {
        {
            let mut g = self.state_unchecked();
            g.known_chains = chains.into_iter().collect();
            let active = g.chain_id;
            g.known_chains.insert(active);
        }
        self
    }

    pub fn with_accounts(self, accounts: &[&str]) -> Self {
        self.state_unchecked().accounts = accounts
            .iter()
            .filter_map(|a| normalize_account(a))
            .collect();
        self
    }

    /// Marks the site as already authorised, so `eth_accounts` answers without
    /// a prompt.
    pub fn authorized(self, authorized: bool) -> Self {
        self.state_unchecked().authorized = authorized;
        self
    }

    /// Whether `wallet_addEthereumChain` also activates the added chain.
    pub fn switch_on_add(self, switch: bool) -> Self {
        self.state_unchecked().switch_on_add = switch;
        self
    }

    /// The next call of `method` fails with `error`. Calls queue up in order.
    pub fn fail_next(&self, method: &str, error: ProviderRpcError) -> Result<(), PortError> {
        self.lock()?
            .failures
            .entry(method.to_owned())
            .or_default()
            .push_back(error);
        Ok(())
    }

    pub fn set_delay(&self, method: &str, delay: Duration) -> Result<(), PortError> {
        self.lock()?.delays.insert(method.to_owned(), delay);
        Ok(())
    }

    pub fn hold(&self, method: &str) -> Result<RequestGate, PortError> {
        let (release, gate) = watch::channel(false);
        self.lock()?.holds.insert(method.to_owned(), gate);
        Ok(RequestGate { release })
    }

    pub fn calls(&self) -> Result<Vec<RecordedCall>, PortError> {
        Ok(self.lock()?.calls.clone())
    }

    pub fn call_count(&self, method: &str) -> Result<usize, PortError> {
        Ok(self
            .lock()?
            .calls
            .iter()
            .filter(|c| c.method == method)
            .count())
    }

    pub fn added_chains(&self) -> Result<Vec<Value>, PortError> {
        Ok(self.lock()?.added_chains.clone())
    }

    pub fn watched_assets(&self) -> Result<Vec<Value>, PortError> {
        Ok(self.lock()?.watched_assets.clone())
    }

    pub fn listener_count(&self) -> Result<usize, PortError> {
        Ok(self.lock()?.listeners.len())
    }

    pub fn current_chain(&self) -> Result<u64, PortError> {
        Ok(self.lock()?.chain_id)
    }

    pub fn drain_events(&self) -> Result<Vec<RecordedEvent>, PortError> {
        Ok(std::mem::take(&mut self.lock()?.events))
    }

    pub fn debug_inject_accounts_changed(&self, accounts: &[&str]) -> Result<(), PortError> {
        let normalized = normalize_all(accounts)?;
        self.lock()?.accounts = normalized.clone();
        self.emit(ProviderEvent::AccountsChanged(normalized))
    }

    pub fn debug_inject_chain_changed(&self, chain_id: u64) -> Result<(), PortError> {
        {
            let mut g = self.lock()?;
            g.chain_id = chain_id;
            g.known_chains.insert(chain_id);
        }
        self.emit(ProviderEvent::ChainChanged(format!("{chain_id:#x}")))
    }

    pub fn debug_inject_disconnect(&self, error: Option<ProviderRpcError>) -> Result<(), PortError> {
        self.emit(ProviderEvent::Disconnect(error))
    }

    /// Changes the accounts without emitting `accountsChanged`, as when an
    /// event is lost.
    pub fn set_accounts_silently(&self, accounts: &[&str]) -> Result<(), PortError> {
        self.lock()?.accounts = normalize_all(accounts)?;
        Ok(())
    }

    pub fn set_chain_silently(&self, chain_id: u64) -> Result<(), PortError> {
        let mut g = self.lock()?;
        g.chain_id = chain_id;
        g.known_chains.insert(chain_id);
        Ok(())
    }

    /// Re-reads accounts and chain from the bridge and emits events for any
    /// difference from the last snapshot. Proxy runtime only.
    pub async fn poll_events(&self) -> Result<Vec<ProviderEvent>, ProviderRpcError> {
        let proxy = match &self.mode {
            ProviderMode::Proxy(proxy) => proxy,
            ProviderMode::Disabled(reason) => return Err(PortError::Policy(reason.clone()).into()),
            ProviderMode::Deterministic => return Ok(Vec::new()),
        };
        let before = self.lock()?.event_seq;
        for method in [methods::ACCOUNTS, methods::CHAIN_ID] {
            let result = proxy_call(proxy, method, json!([])).await?;
            self.observe(method, &result)?;
        }
        Ok(self
            .lock()?
            .events
            .iter()
            .filter(|e| e.sequence > before)
            .map(|e| e.event.clone())
            .collect())
    }

    fn check_mode(&self) -> Result<(), PortError> {
        if let ProviderMode::Disabled(reason) = &self.mode {
            return Err(PortError::Policy(reason.clone()));
        }
        Ok(())
    }

    /// Records the call and applies any scripted hold, delay or failure.
    async fn intercept(&self, method: &str, params: &Value) -> Result<(), ProviderRpcError> {
        self.check_mode()?;
        let (hold, delay) = {
            let mut g = self.lock()?;
            g.calls.push(RecordedCall {
                method: method.to_owned(),
                params: params.clone(),
            });
            (g.holds.get(method).cloned(), g.delays.get(method).copied())
        };
        if let Some(mut gate) = hold {
            let _ = gate.wait_for(|released| *released).await;
        }
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let scripted = self
            .lock()?
            .failures
            .get_mut(method)
            .and_then(VecDeque::pop_front);
        match scripted {
            Some(error) => {
                tracing::debug!(method, code = ?error.code, "scripted provider failure");
                Err(error)
            }
            None => Ok(()),
        }
    }

    fn deterministic_request(&self, method: &str, params: &Value) -> Result<Value, ProviderRpcError> {
        match method {
            methods::REQUEST_ACCOUNTS => {
                let mut g = self.lock()?;
                g.authorized = true;
                Ok(json!(g.accounts))
            }
            methods::ACCOUNTS => {
                let g = self.lock()?;
                Ok(if g.authorized {
                    json!(g.accounts)
                } else {
                    json!([])
                })
            }
            methods::CHAIN_ID => Ok(json!(format!("{:#x}", self.lock()?.chain_id))),
            methods::SWITCH_CHAIN => {
                let chain_id = chain_param(params)?;
                self.switch_to(chain_id)?;
                Ok(Value::Null)
            }
            methods::ADD_CHAIN => {
                let chain_id = chain_param(params)?;
                let switch = {
                    let mut g = self.lock()?;
                    g.added_chains.push(params[0].clone());
                    g.known_chains.insert(chain_id);
                    g.switch_on_add
                };
                if switch {
                    self.switch_to(chain_id)?;
                }
                Ok(Value::Null)
            }
            methods::WATCH_ASSET => {
                if params.get("type").and_then(Value::as_str) != Some("ERC20") {
                    return Err(ProviderRpcError::new(-32602, "only ERC20 assets are supported"));
                }
                let options = params
                    .get("options")
                    .cloned()
                    .ok_or_else(|| ProviderRpcError::new(-32602, "missing asset options"))?;
                self.lock()?.watched_assets.push(options);
                Ok(json!(true))
            }
            methods::PERSONAL_SIGN => self.deterministic_signature(params),
            other => Err(ProviderRpcError::unsupported(other)),
        }
    }

    fn switch_to(&self, chain_id: u64) -> Result<(), ProviderRpcError> {
        {
            let mut g = self.lock()?;
            if !g.known_chains.contains(&chain_id) {
                return Err(ProviderRpcError::new(
                    4902,
                    format!(
                        "Unrecognized chain ID \"{chain_id:#x}\". Try adding the chain using wallet_addEthereumChain first."
                    ),
                ));
            }
            if g.chain_id == chain_id {
                return Ok(());
            }
            g.chain_id = chain_id;
        }
        self.emit(ProviderEvent::ChainChanged(format!("{chain_id:#x}")))?;
        Ok(())
    }

    fn deterministic_signature(&self, params: &Value) -> Result<Value, ProviderRpcError> {
        let payload = params
            .get(0)
            .and_then(Value::as_str)
            .ok_or_else(|| ProviderRpcError::new(-32602, "missing message"))?;
        let signer = params
            .get(1)
            .and_then(Value::as_str)
            .and_then(normalize_account)
            .ok_or_else(|| ProviderRpcError::new(-32602, "missing signer"))?;
        {
            let g = self.lock()?;
            if !g.authorized || !g.accounts.contains(&signer) {
                return Err(ProviderRpcError::new(
                    4100,
                    "The requested account has not been authorized by the user.",
                ));
            }
        }
        let mut seed = Vec::with_capacity(payload.len() + signer.len());
        seed.extend_from_slice(payload.as_bytes());
        seed.extend_from_slice(signer.as_bytes());
        let hash = keccak256(seed);
        let mut sig = Vec::with_capacity(65);
        sig.extend_from_slice(hash.as_slice());
        sig.extend_from_slice(hash.as_slice());
        sig.push(27);
        Ok(json!(format!("0x{}", alloy::hex::encode(sig))))
    }

    /// Folds a bridge answer into the snapshot, emitting events for changes.
    fn observe(&self, method: &str, result: &Value) -> Result<(), PortError> {
        match method {
            methods::ACCOUNTS | methods::REQUEST_ACCOUNTS => {
                let accounts = parse_accounts(result)
                    .map_err(|e| PortError::Validation(e.message))?;
                let changed = {
                    let mut g = self.lock()?;
                    let changed = g.accounts != accounts;
                    g.accounts = accounts.clone();
                    changed
                };
                if changed {
                    self.emit(ProviderEvent::AccountsChanged(accounts))?;
                }
            }
            methods::CHAIN_ID => {
                let chain_id =
                    parse_chain_value(result).map_err(|e| PortError::Validation(e.message))?;
                let previous = {
                    let mut g = self.lock()?;
                    std::mem::replace(&mut g.chain_id, chain_id)
                };
                if previous != 0 && previous != chain_id {
                    self.emit(ProviderEvent::ChainChanged(format!("{chain_id:#x}")))?;
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn emit(&self, event: ProviderEvent) -> Result<(), PortError> {
        let listeners: Vec<EventListener> = {
            let mut g = self.lock()?;
            g.event_seq = g.event_seq.saturating_add(1);
            let sequence = g.event_seq;
            g.events.push(RecordedEvent {
                sequence,
                event: event.clone(),
            });
            g.listeners
                .values()
                .filter(|(kind, _)| *kind == event.kind())
                .map(|(_, listener)| Arc::clone(listener))
                .collect()
        };
        tracing::debug!(
            event = event.kind().event_name(),
            listeners = listeners.len(),
            "provider event"
        );
        // Listeners may unsubscribe, so they run without the state lock.
        for listener in listeners {
            listener(&event);
        }
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, ProviderState>, PortError> {
        self.state
            .lock()
            .map_err(|e| PortError::Transport(format!("provider lock poisoned: {e}")))
    }

    fn state_unchecked(&self) -> MutexGuard<'_, ProviderState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl InjectedProvider for Eip1193Adapter {
    fn flags(&self) -> WalletFlags {
        self.shape.flags
    }

    fn supports_request(&self) -> bool {
        self.shape.request
    }

    fn supports_enable(&self) -> bool {
        self.shape.enable
    }

    fn supports_legacy_accounts(&self) -> bool {
        self.shape.legacy_accounts
    }

    fn supports_events(&self) -> bool {
        self.shape.events
    }

    async fn request(&self, method: &str, params: Value) -> Result<Value, ProviderRpcError> {
        if !self.shape.request {
            return Err(ProviderRpcError::unsupported("request"));
        }
        self.intercept(method, &params).await?;
        match &self.mode {
            ProviderMode::Deterministic => self.deterministic_request(method, &params),
            ProviderMode::Proxy(proxy) => {
                let result = proxy_call(proxy, method, params).await?;
                if let Err(e) = self.observe(method, &result) {
                    tracing::warn!(method, error = %e, "could not fold proxy answer into snapshot");
                }
                Ok(result)
            }
            ProviderMode::Disabled(reason) => Err(PortError::Policy(reason.clone()).into()),
        }
    }

    async fn enable(&self) -> Result<Vec<String>, ProviderRpcError> {
        if !self.shape.enable || matches!(self.mode, ProviderMode::Proxy(_)) {
            return Err(ProviderRpcError::unsupported(ENABLE));
        }
        self.intercept(ENABLE, &Value::Null).await?;
        let mut g = self.lock()?;
        g.authorized = true;
        Ok(g.accounts.clone())
    }

    async fn legacy_accounts(&self) -> Result<Vec<String>, ProviderRpcError> {
        if !self.shape.legacy_accounts || matches!(self.mode, ProviderMode::Proxy(_)) {
            return Err(ProviderRpcError::unsupported(LEGACY_ACCOUNTS));
        }
        self.intercept(LEGACY_ACCOUNTS, &Value::Null).await?;
        Ok(self.lock()?.accounts.clone())
    }

    fn subscribe(
        &self,
        kind: ProviderEventKind,
        listener: EventListener,
    ) -> Result<Subscription, ProviderRpcError> {
        self.check_mode()?;
        if !self.shape.events {
            return Err(ProviderRpcError::unsupported("on"));
        }
        let id = {
            let mut g = self.lock()?;
            let id = g.next_listener;
            g.next_listener = g.next_listener.saturating_add(1);
            g.listeners.insert(id, (kind, listener));
            id
        };
        let state = Arc::downgrade(&self.state);
        Ok(Subscription::new(kind, move || {
            if let Some(state) = state.upgrade() {
                state
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .listeners
                    .remove(&id);
            }
        }))
    }
}

async fn proxy_call(
    proxy: &ProxyRuntime,
    method: &str,
    params: Value,
) -> Result<Value, ProviderRpcError> {
    let payload = json!({
        "jsonrpc": "2.0",
        "id": 1,
        "method": method,
        "params": params,
    });
    let response = proxy
        .client
        .post(&proxy.base_url)
        .json(&payload)
        .send()
        .await
        .map_err(|e| PortError::Transport(format!("eip1193 proxy request failed: {e}")))?;
    let status = response.status();
    let body: Value = response
        .json()
        .await
        .map_err(|e| PortError::Transport(format!("eip1193 proxy json decode failed: {e}")))?;
    if let Some(err) = body.get("error").filter(|e| !e.is_null()) {
        return Err(rpc_error_from_body(err));
    }
    if !status.is_success() {
        return Err(PortError::Transport(format!("eip1193 proxy status {status}: {body}")).into());
    }
    body.get("result")
        .cloned()
        .ok_or_else(|| PortError::Transport("eip1193 proxy missing result".to_owned()).into())
}

/// Keeps the wallet's own code and message so classification still works
/// behind the bridge.
fn rpc_error_from_body(err: &Value) -> ProviderRpcError {
    let message = err
        .get("message")
        .and_then(Value::as_str)
        .map(str::to_owned)
        .unwrap_or_else(|| err.to_string());
    ProviderRpcError {
        code: err.get("code").and_then(Value::as_i64),
        message,
        data: err.get("data").cloned(),
    }
}

fn chain_param(params: &Value) -> Result<u64, ProviderRpcError> {
    let raw = params
        .get(0)
        .and_then(|p| p.get("chainId"))
        .ok_or_else(|| ProviderRpcError::new(-32602, "missing chainId"))?;
    parse_chain_value(raw).map_err(|e| ProviderRpcError::new(-32602, e.message))
}

fn normalize_all(accounts: &[&str]) -> Result<Vec<String>, PortError> {
    accounts
        .iter()
        .map(|a| {
            normalize_account(a)
                .ok_or_else(|| PortError::Validation(format!("invalid account: {a}")))
        })
        .collect()
}

fn mode_name(mode: &ProviderMode) -> &'static str {
    match mode {
        ProviderMode::Disabled(_) => "disabled",
        ProviderMode::Deterministic => "deterministic",
        ProviderMode::Proxy(_) => "proxy",
    }
}
