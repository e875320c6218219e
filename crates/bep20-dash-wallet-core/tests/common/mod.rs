#![allow(dead_code)]

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bep20_dash_wallet_core::{ClockPort, ErrorClassifier, PortError};

pub const BASE_TIME_MS: u64 = 1_739_750_400_000;

/// Returns the same instant on every call.
#[derive(Debug, Default)]
pub struct FixedClock;

impl ClockPort for FixedClock {
    fn now_ms(&self) -> Result<u64, PortError> {
        Ok(BASE_TIME_MS)
    }
}

/// Advances one millisecond per read.
#[derive(Debug, Default)]
pub struct TestClock {
    now: AtomicU64,
}

impl ClockPort for TestClock {
    fn now_ms(&self) -> Result<u64, PortError> {
        Ok(self.now.fetch_add(1, Ordering::SeqCst) + BASE_TIME_MS)
    }
}

pub struct BrokenClock;

impl ClockPort for BrokenClock {
    fn now_ms(&self) -> Result<u64, PortError> {
        Err(PortError::NotImplemented("clock"))
    }
}

pub fn fixed_classifier() -> ErrorClassifier {
    ErrorClassifier::new(Arc::new(FixedClock), 100)
}

pub fn ticking_classifier(capacity: usize) -> ErrorClassifier {
    ErrorClassifier::new(Arc::new(TestClock::default()), capacity)
}
