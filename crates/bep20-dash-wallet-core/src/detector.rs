use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::time::Instant;

use crate::domain::{Capability, ConnectionStrategy, InstallSuggestion, ProviderKind};
use crate::handle::methods;
use crate::ports::{InjectedProvider, ProviderEnvironment, ProviderRpcError, WalletFlags};

/// Result of one detection pass. Immutable once built.
#[derive(Debug, Clone)]
pub struct ProviderDescriptor {
    pub provider: Option<Arc<dyn InjectedProvider>>,
    pub is_modern: bool,
    pub is_available: bool,
    pub provider_kind: ProviderKind,
    pub wallet_name: String,
    pub capabilities: BTreeSet<Capability>,
    pub connection_strategy: ConnectionStrategy,
    pub install_suggestions: Vec<InstallSuggestion>,
    pub diagnostic: Option<String>,
    pub probe_error: Option<ProviderRpcError>,
}

impl ProviderDescriptor {
    fn unsupported() -> Self {
        Self {
            provider: None,
            is_modern: false,
            is_available: false,
            provider_kind: ProviderKind::Generic,
            wallet_name: "none".to_owned(),
            capabilities: BTreeSet::new(),
            connection_strategy: ConnectionStrategy::Unsupported,
            install_suggestions: install_suggestions(),
            diagnostic: Some("no injected wallet provider found".to_owned()),
            probe_error: None,
        }
    }
}

pub fn install_suggestions() -> Vec<InstallSuggestion> {
    [
        ("MetaMask", "https://metamask.io/download/"),
        ("Trust Wallet", "https://trustwallet.com/download"),
        ("Binance Web3 Wallet", "https://www.binance.com/en/web3wallet"),
    ]
    .into_iter()
    .map(|(name, url)| InstallSuggestion {
        name: name.to_owned(),
        url: url.to_owned(),
    })
    .collect()
}

/// Lower rank wins when several wallets are injected at once.
fn wallet_signature(flags: WalletFlags) -> (u8, ProviderKind, &'static str) {
    // Several wallets also set isMetaMask, so the specific flags are checked first.
    if flags.is_trust {
        (1, ProviderKind::MobileWallet, "Trust Wallet")
    } else if flags.is_binance {
        (2, ProviderKind::ExchangeWallet, "Binance Web3 Wallet")
    } else if flags.is_coinbase {
        (3, ProviderKind::ExchangeWallet, "Coinbase Wallet")
    } else if flags.is_okx {
        (4, ProviderKind::ExchangeWallet, "OKX Wallet")
    } else if flags.is_token_pocket {
        (5, ProviderKind::MobileWallet, "TokenPocket")
    } else if flags.is_metamask {
        (0, ProviderKind::PrimaryExtension, "MetaMask")
    } else {
        (u8::MAX, ProviderKind::Generic, "Injected wallet")
    }
}

/// Finds and classifies the injected wallet, caching the result for a short TTL.
pub struct ProviderDetector {
    environment: Arc<dyn ProviderEnvironment>,
    ttl: Duration,
    cache: Mutex<Option<(Instant, ProviderDescriptor)>>,
}

impl ProviderDetector {
    pub fn new(environment: Arc<dyn ProviderEnvironment>, ttl: Duration) -> Self {
        Self {
            environment,
            ttl,
            cache: Mutex::new(None),
        }
    }

    pub fn environment(&self) -> &Arc<dyn ProviderEnvironment> {
        &self.environment
    }

    pub fn clear_cache(&self) {
        *self.cache.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }

    pub async fn detect(&self) -> ProviderDescriptor {
        if let Some(cached) = self.cached() {
            return cached;
        }
        let descriptor = self.probe().await;
        tracing::debug!(
            wallet = %descriptor.wallet_name,
            strategy = ?descriptor.connection_strategy,
            available = descriptor.is_available,
            "provider detected"
        );
        *self.cache.lock().unwrap_or_else(PoisonError::into_inner) =
            Some((Instant::now(), descriptor.clone()));
        descriptor
    }

    fn cached(&self) -> Option<ProviderDescriptor> {
        let guard = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        guard
            .as_ref()
            .filter(|(at, _)| at.elapsed() < self.ttl)
            .map(|(_, descriptor)| descriptor.clone())
    }

    async fn probe(&self) -> ProviderDescriptor {
        let candidates = self.environment.injected_providers();
        let legacy = self.environment.legacy_provider();

        let modern = candidates
            .iter()
            .filter(|p| p.supports_request())
            .min_by_key(|p| wallet_signature(p.flags()).0)
            .cloned();
        if let Some(provider) = modern {
            return probe_modern(provider).await;
        }

        let legacy_pool: Vec<Arc<dyn InjectedProvider>> =
            candidates.into_iter().chain(legacy).collect();

        if let Some(provider) = legacy_pool.iter().find(|p| p.supports_enable()) {
            return legacy_descriptor(Arc::clone(provider), ConnectionStrategy::LegacyEnable);
        }
        if let Some(provider) = legacy_pool
            .iter()
            .find(|p| p.supports_legacy_accounts() || p.supports_request())
        {
            return legacy_descriptor(Arc::clone(provider), ConnectionStrategy::LegacyAccounts);
        }

        ProviderDescriptor::unsupported()
    }
}

async fn probe_modern(provider: Arc<dyn InjectedProvider>) -> ProviderDescriptor {
    let (_, provider_kind, wallet_name) = wallet_signature(provider.flags());
    let mut capabilities = BTreeSet::from([
        Capability::RequestAccounts,
        Capability::SwitchChain,
        Capability::AddChain,
        Capability::Signing,
    ]);
    if provider.supports_events() {
        capabilities.insert(Capability::EventSubscription);
    }

    let probe = provider
        .request(methods::CHAIN_ID, serde_json::json!([]))
        .await;
    let (is_available, diagnostic, probe_error) = match probe {
        Ok(_) => (true, None, None),
        Err(err) => (
            false,
            Some(format!("{wallet_name} did not answer {}: {err}", methods::CHAIN_ID)),
            Some(err),
        ),
    };

    ProviderDescriptor {
        provider: Some(provider),
        is_modern: true,
        is_available,
        provider_kind,
        wallet_name: wallet_name.to_owned(),
        capabilities,
        connection_strategy: ConnectionStrategy::Modern,
        install_suggestions: Vec::new(),
        diagnostic,
        probe_error,
    }
}

fn legacy_descriptor(
    provider: Arc<dyn InjectedProvider>,
    strategy: ConnectionStrategy,
) -> ProviderDescriptor {
    let (_, provider_kind, wallet_name) = wallet_signature(provider.flags());
    let mut capabilities = BTreeSet::from([Capability::RequestAccounts]);
    if provider.supports_events() {
        capabilities.insert(Capability::EventSubscription);
    }
    ProviderDescriptor {
        provider: Some(provider),
        is_modern: false,
        is_available: true,
        provider_kind,
        wallet_name: wallet_name.to_owned(),
        capabilities,
        connection_strategy: strategy,
        install_suggestions: Vec::new(),
        diagnostic: None,
        probe_error: None,
    }
}
