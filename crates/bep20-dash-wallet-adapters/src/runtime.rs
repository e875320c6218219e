use std::sync::Arc;

use bep20_dash_wallet_core::{SessionConfig, SessionContext, SessionController};

use crate::{Eip1193Adapter, InjectedEnvironment, SystemClockAdapter, WalletRuntimeConfig};

/// A session wired to the adapter selected by the runtime config.
#[derive(Debug, Clone)]
pub struct WalletRuntime {
    pub adapter: Eip1193Adapter,
    pub session: SessionController,
}

impl WalletRuntime {
    /// Must be called inside a tokio runtime.
    pub fn from_config(config: &WalletRuntimeConfig) -> Self {
        Self::with_session_config(config, config.session_config())
    }

    pub fn from_env() -> Self {
        Self::from_config(&WalletRuntimeConfig::from_env())
    }

    pub fn with_session_config(config: &WalletRuntimeConfig, session: SessionConfig) -> Self {
        let adapter = Eip1193Adapter::with_config(config);
        tracing::info!(
            profile = ?config.runtime_profile,
            mode = adapter.mode_name(),
            target_chain = session.target.chain_id,
            "wallet runtime ready"
        );
        let environment = InjectedEnvironment::new().with_provider(adapter.clone());
        let session =
            SessionController::new(Arc::new(environment), Arc::new(SystemClockAdapter), session);
        Self { adapter, session }
    }

    pub fn context(&self) -> SessionContext {
        SessionContext::new(self.session.clone())
    }
}
