use std::sync::Arc;

use alloy::primitives::hex;
use serde_json::{json, Value};

use crate::domain::{normalize_account, NetworkDescriptor, TokenDescriptor};
use crate::networks::parse_chain_id;
use crate::ports::{
    EventListener, InjectedProvider, ProviderEventKind, ProviderRpcError, Subscription,
};

pub mod methods {
    pub const REQUEST_ACCOUNTS: &str = "eth_requestAccounts";
    pub const ACCOUNTS: &str = "eth_accounts";
    pub const CHAIN_ID: &str = "eth_chainId";
    pub const SWITCH_CHAIN: &str = "wallet_switchEthereumChain";
    pub const ADD_CHAIN: &str = "wallet_addEthereumChain";
    pub const WATCH_ASSET: &str = "wallet_watchAsset";
    pub const PERSONAL_SIGN: &str = "personal_sign";
}

/// Typed wrapper over a raw injected provider.
///
/// Cloning shares the same provider; the connection manager owns the
/// authoritative copy and other components only borrow it for one call.
#[derive(Debug, Clone)]
pub struct WalletHandle {
    raw: Arc<dyn InjectedProvider>,
}

impl WalletHandle {
    pub fn new(raw: Arc<dyn InjectedProvider>) -> Self {
        Self { raw }
    }

    pub fn raw(&self) -> &Arc<dyn InjectedProvider> {
        &self.raw
    }

    pub fn same_provider(&self, other: &Arc<dyn InjectedProvider>) -> bool {
        provider_key(&self.raw) == provider_key(other)
    }

    pub async fn request_accounts(&self) -> Result<Vec<String>, ProviderRpcError> {
        let result = self.raw.request(methods::REQUEST_ACCOUNTS, json!([])).await?;
        parse_accounts(&result)
    }

    pub async fn accounts(&self) -> Result<Vec<String>, ProviderRpcError> {
        let result = self.raw.request(methods::ACCOUNTS, json!([])).await?;
        parse_accounts(&result)
    }

    /// Authorised accounts without prompting, through whichever surface the
    /// provider exposes.
    pub async fn live_accounts(&self) -> Result<Vec<String>, ProviderRpcError> {
        if self.raw.supports_request() {
            self.accounts().await
        } else if self.raw.supports_legacy_accounts() {
            let accounts = self.raw.legacy_accounts().await?;
            Ok(accounts.iter().filter_map(|a| normalize_account(a)).collect())
        } else {
            Err(ProviderRpcError::unsupported("accounts"))
        }
    }

    pub async fn chain_id(&self) -> Result<u64, ProviderRpcError> {
        let result = self.raw.request(methods::CHAIN_ID, json!([])).await?;
        parse_chain_value(&result)
    }

    pub async fn switch_chain(&self, chain_id: u64) -> Result<(), ProviderRpcError> {
        self.raw
            .request(
                methods::SWITCH_CHAIN,
                json!([{ "chainId": format!("{chain_id:#x}") }]),
            )
            .await
            .map(|_| ())
    }

    pub async fn add_chain(&self, network: &NetworkDescriptor) -> Result<(), ProviderRpcError> {
        let params = serde_json::to_value(network.add_chain_params())
            .map_err(|e| ProviderRpcError::new(-32602, format!("add chain params: {e}")))?;
        self.raw
            .request(methods::ADD_CHAIN, json!([params]))
            .await
            .map(|_| ())
    }

    /// Returns whether the wallet accepted the token.
    pub async fn watch_asset(&self, token: &TokenDescriptor) -> Result<bool, ProviderRpcError> {
        let mut options = json!({
            "address": token.address.to_string(),
            "symbol": token.symbol,
            "decimals": token.decimals,
        });
        if let Some(image) = &token.image {
            options["image"] = Value::String(image.clone());
        }
        let result = self
            .raw
            .request(
                methods::WATCH_ASSET,
                json!({ "type": "ERC20", "options": options }),
            )
            .await?;
        Ok(result.as_bool().unwrap_or(false))
    }

    pub fn subscribe(
        &self,
        kind: ProviderEventKind,
        listener: EventListener,
    ) -> Result<Subscription, ProviderRpcError> {
        self.raw.subscribe(kind, listener)
    }

    pub fn signer(&self, account: &str) -> WalletSigner {
        WalletSigner {
            address: account.to_owned(),
            handle: self.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct WalletSigner {
    address: String,
    handle: WalletHandle,
}

impl WalletSigner {
    pub fn address(&self) -> &str {
        &self.address
    }

    pub async fn sign_message(&self, message: &[u8]) -> Result<String, ProviderRpcError> {
        let payload = format!("0x{}", hex::encode(message));
        let result = self
            .handle
            .raw
            .request(methods::PERSONAL_SIGN, json!([payload, self.address]))
            .await?;
        result
            .as_str()
            .map(str::to_owned)
            .ok_or_else(|| ProviderRpcError::new(-32603, "signature response must be a string"))
    }
}

/// Identity of a provider object, used to make listener registration idempotent.
pub fn provider_key(provider: &Arc<dyn InjectedProvider>) -> usize {
    Arc::as_ptr(provider) as *const () as usize
}

pub fn parse_accounts(value: &Value) -> Result<Vec<String>, ProviderRpcError> {
    let items = value
        .as_array()
        .ok_or_else(|| ProviderRpcError::new(-32603, "accounts result must be an array"))?;
    items
        .iter()
        .map(|item| {
            item.as_str()
                .and_then(normalize_account)
                .ok_or_else(|| ProviderRpcError::new(-32603, format!("invalid account: {item}")))
        })
        .collect()
}

pub fn parse_chain_value(value: &Value) -> Result<u64, ProviderRpcError> {
    if let Some(n) = value.as_u64() {
        return Ok(n);
    }
    value
        .as_str()
        .and_then(parse_chain_id)
        .ok_or_else(|| ProviderRpcError::new(-32603, format!("invalid chain id: {value}")))
}
