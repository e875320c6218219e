use crate::domain::NetworkDescriptor;
use crate::networks::target_network;

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub target: NetworkDescriptor,
    pub connect_timeout_ms: u64,
    pub reconcile_interval_ms: u64,
    pub initial_reconcile_delay_ms: u64,
    pub detection_cache_ttl_ms: u64,
    pub max_retries: u32,
    pub backoff_base_ms: u64,
    pub backoff_multiplier: u32,
    pub backoff_cap_ms: u64,
    pub backoff_jitter_ratio: f64,
    pub pending_retry_delay_ms: u64,
    pub locked_retry_delay_ms: u64,
    pub error_log_capacity: usize,
    pub auto_switch_on_connect: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            target: target_network(),
            connect_timeout_ms: 30_000,
            reconcile_interval_ms: 10_000,
            initial_reconcile_delay_ms: 2_000,
            detection_cache_ttl_ms: 5_000,
            max_retries: 3,
            backoff_base_ms: 1_000,
            backoff_multiplier: 2,
            backoff_cap_ms: 10_000,
            backoff_jitter_ratio: 0.10,
            pending_retry_delay_ms: 3_000,
            locked_retry_delay_ms: 2_000,
            error_log_capacity: 100,
            auto_switch_on_connect: true,
        }
    }
}
