use bep20_dash_wallet_core::SessionConfig;

pub const ENV_PROFILE: &str = "BEP20_DASH_PROFILE";
pub const ENV_PROXY_URL: &str = "BEP20_DASH_EIP1193_PROXY_URL";
pub const ENV_PROXY_TIMEOUT_MS: &str = "BEP20_DASH_PROXY_TIMEOUT_MS";
pub const ENV_CONNECT_TIMEOUT_MS: &str = "BEP20_DASH_CONNECT_TIMEOUT_MS";
pub const ENV_RECONCILE_INTERVAL_MS: &str = "BEP20_DASH_RECONCILE_INTERVAL_MS";
pub const ENV_MAX_RETRIES: &str = "BEP20_DASH_MAX_RETRIES";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RuntimeProfile {
    #[default]
    Development,
    Production,
}

impl RuntimeProfile {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Some(Self::Development),
            "production" | "prod" => Some(Self::Production),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct WalletRuntimeConfig {
    pub runtime_profile: RuntimeProfile,
    pub eip1193_proxy_url: Option<String>,
    pub proxy_timeout_ms: u64,
    pub connect_timeout_ms: u64,
    pub reconcile_interval_ms: u64,
    pub max_retries: u32,
}

impl Default for WalletRuntimeConfig {
    fn default() -> Self {
        let session = SessionConfig::default();
        Self {
            runtime_profile: RuntimeProfile::Development,
            eip1193_proxy_url: None,
            proxy_timeout_ms: 15_000,
            connect_timeout_ms: session.connect_timeout_ms,
            reconcile_interval_ms: session.reconcile_interval_ms,
            max_retries: session.max_retries,
        }
    }
}

impl WalletRuntimeConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from any key lookup. Unparseable values keep their
    /// default and are logged.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(raw) = lookup(ENV_PROFILE) {
            match RuntimeProfile::parse(&raw) {
                Some(profile) => config.runtime_profile = profile,
                None => tracing::warn!(key = ENV_PROFILE, value = %raw, "unknown runtime profile"),
            }
        }
        config.eip1193_proxy_url = lookup(ENV_PROXY_URL)
            .map(|url| url.trim().to_owned())
            .filter(|url| !url.is_empty());

        override_number(&lookup, ENV_PROXY_TIMEOUT_MS, &mut config.proxy_timeout_ms);
        override_number(&lookup, ENV_CONNECT_TIMEOUT_MS, &mut config.connect_timeout_ms);
        override_number(
            &lookup,
            ENV_RECONCILE_INTERVAL_MS,
            &mut config.reconcile_interval_ms,
        );
        override_number(&lookup, ENV_MAX_RETRIES, &mut config.max_retries);
        config
    }

    pub fn strict_runtime_required(&self) -> bool {
        self.runtime_profile == RuntimeProfile::Production
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            connect_timeout_ms: self.connect_timeout_ms,
            reconcile_interval_ms: self.reconcile_interval_ms,
            max_retries: self.max_retries,
            ..SessionConfig::default()
        }
    }
}

fn override_number<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    slot: &mut T,
) {
    let Some(raw) = lookup(key) else {
        return;
    };
    match raw.trim().parse() {
        Ok(value) => *slot = value,
        Err(_) => tracing::warn!(key, value = %raw, "ignoring invalid numeric setting"),
    }
}
