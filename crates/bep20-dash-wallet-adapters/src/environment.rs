use std::sync::Arc;

use bep20_dash_wallet_core::{InjectedProvider, ProviderEnvironment};

/// The page scope as seen by the detector: zero or more request-capable
/// candidates plus an optional legacy `web3` provider.
#[derive(Debug, Clone, Default)]
pub struct InjectedEnvironment {
    providers: Vec<Arc<dyn InjectedProvider>>,
    legacy: Option<Arc<dyn InjectedProvider>>,
    user_agent: Option<String>,
    url: Option<String>,
}

impl InjectedEnvironment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_provider(self, provider: impl InjectedProvider + 'static) -> Self {
        self.with_shared(Arc::new(provider))
    }

    pub fn with_shared(mut self, provider: Arc<dyn InjectedProvider>) -> Self {
        self.providers.push(provider);
        self
    }

    pub fn with_legacy(mut self, provider: impl InjectedProvider + 'static) -> Self {
        self.legacy = Some(Arc::new(provider));
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }
}

impl ProviderEnvironment for InjectedEnvironment {
    fn injected_providers(&self) -> Vec<Arc<dyn InjectedProvider>> {
        self.providers.clone()
    }

    fn legacy_provider(&self) -> Option<Arc<dyn InjectedProvider>> {
        self.legacy.clone()
    }

    fn user_agent(&self) -> Option<String> {
        self.user_agent.clone()
    }

    fn current_url(&self) -> Option<String> {
        self.url.clone()
    }
}
