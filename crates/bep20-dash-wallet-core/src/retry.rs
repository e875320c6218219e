use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::config::SessionConfig;

/// Exponential backoff: `min(base * multiplier^attempt, cap)` plus up to
/// `jitter_ratio` of that value.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub base_ms: u64,
    pub multiplier: u32,
    pub cap_ms: u64,
    pub jitter_ratio: f64,
}

impl RetryPolicy {
    pub fn from_config(config: &SessionConfig) -> Self {
        Self {
            base_ms: config.backoff_base_ms,
            multiplier: config.backoff_multiplier,
            cap_ms: config.backoff_cap_ms,
            jitter_ratio: config.backoff_jitter_ratio.clamp(0.0, 1.0),
        }
    }

    pub fn base_delay(&self, attempt: u32) -> Duration {
        let factor = u64::from(self.multiplier).saturating_pow(attempt);
        Duration::from_millis(self.base_ms.saturating_mul(factor).min(self.cap_ms))
    }

    pub fn delay(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt);
        if self.jitter_ratio <= 0.0 {
            return base;
        }
        let jitter_ms = base.as_millis() as f64 * self.jitter_ratio * unit_random();
        base + Duration::from_millis(jitter_ms as u64)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&SessionConfig::default())
    }
}

/// Uniform value in `[0, 1)`; zero if the OS source is unavailable.
fn unit_random() -> f64 {
    let mut bytes = [0u8; 8];
    if getrandom::getrandom(&mut bytes).is_err() {
        return 0.0;
    }
    (u64::from_le_bytes(bytes) >> 11) as f64 / (1u64 << 53) as f64
}

/// Holds at most one scheduled retry. Scheduling replaces (and aborts) the
/// previous one.
#[derive(Debug, Default)]
pub struct RetrySlot {
    pending: Option<JoinHandle<()>>,
}

impl RetrySlot {
    pub fn schedule<F>(&mut self, delay: Duration, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.cancel();
        self.pending = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            task.await;
        }));
    }

    /// Returns whether a pending retry was cancelled.
    pub fn cancel(&mut self) -> bool {
        match self.pending.take() {
            Some(handle) if !handle.is_finished() => {
                handle.abort();
                true
            }
            _ => false,
        }
    }

    pub fn is_scheduled(&self) -> bool {
        self.pending.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Forgets the handle without aborting it; used by the retry task itself.
    pub fn release(&mut self) {
        self.pending = None;
    }
}
