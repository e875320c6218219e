use alloy::primitives::Address;
use serde::{Deserialize, Serialize};

use crate::errors::StructuredError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TimestampMs(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Error,
    Retrying,
}

impl ConnectionStatus {
    /// Busy states block new connect attempts.
    pub fn is_busy(self) -> bool {
        matches!(self, Self::Connecting | Self::Retrying)
    }
}

/// Externally visible connection state. The provider and signer handles are
/// held next to it by the connection manager and never leave it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionState {
    pub status: ConnectionStatus,
    pub account: Option<String>,
    pub chain_id: Option<String>,
    pub error: Option<StructuredError>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub last_connected_at: Option<TimestampMs>,
}

impl ConnectionState {
    pub fn empty(max_retries: u32) -> Self {
        Self {
            status: ConnectionStatus::Disconnected,
            account: None,
            chain_id: None,
            error: None,
            retry_count: 0,
            max_retries,
            last_connected_at: None,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.status == ConnectionStatus::Connected
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NativeCurrency {
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
}

/// Full description of a chain, enough to drive `wallet_addEthereumChain`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkDescriptor {
    pub chain_id: u64,
    pub chain_name: String,
    pub native_currency: NativeCurrency,
    pub rpc_urls: Vec<String>,
    pub block_explorer_urls: Vec<String>,
}

impl NetworkDescriptor {
    pub fn chain_id_hex(&self) -> String {
        format!("{:#x}", self.chain_id)
    }

    pub fn add_chain_params(&self) -> AddChainParameters {
        AddChainParameters {
            chain_id: self.chain_id_hex(),
            chain_name: self.chain_name.clone(),
            native_currency: self.native_currency.clone(),
            rpc_urls: self.rpc_urls.clone(),
            block_explorer_urls: self.block_explorer_urls.clone(),
        }
    }
}

/// Exact parameter shape of `wallet_addEthereumChain` (EIP-3085).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddChainParameters {
    pub chain_id: String,
    pub chain_name: String,
    pub native_currency: NativeCurrency,
    pub rpc_urls: Vec<String>,
    pub block_explorer_urls: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkInfo {
    /// Decimal chain id.
    pub chain_id: String,
    pub chain_name: String,
    pub is_correct: bool,
    pub is_supported: bool,
    pub native_currency: Option<NativeCurrency>,
    pub rpc_urls: Option<Vec<String>>,
    pub block_explorer_urls: Option<Vec<String>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NetworkState {
    Unknown,
    Correct,
    Wrong,
    Switching,
    Error,
}

/// Step-by-step fallback for adding the target network by hand.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManualInstructions {
    pub network_name: String,
    pub chain_id: u64,
    pub rpc_url: String,
    pub currency_symbol: String,
    pub block_explorer_url: String,
    pub steps: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProviderKind {
    PrimaryExtension,
    MobileWallet,
    ExchangeWallet,
    Generic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Capability {
    RequestAccounts,
    SwitchChain,
    AddChain,
    EventSubscription,
    Signing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionStrategy {
    Modern,
    LegacyEnable,
    LegacyAccounts,
    Unsupported,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallSuggestion {
    pub name: String,
    pub url: String,
}

/// BEP-20 token the dashboard asks the wallet to track.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenDescriptor {
    pub address: Address,
    pub symbol: String,
    pub decimals: u8,
    pub image: Option<String>,
}

/// Normalizes an account string to lowercase `0x` form.
pub fn normalize_account(raw: &str) -> Option<String> {
    raw.trim()
        .parse::<Address>()
        .ok()
        .map(|address| format!("{address:#x}"))
}
