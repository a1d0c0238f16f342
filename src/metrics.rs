use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::error::ErrorKind;

/// Request counters for monitoring
#[derive(Clone)]
pub struct Metrics {
    pub requests_total: Arc<AtomicU64>,
    pub requests_rejected: Arc<AtomicU64>,
    pub rate_limited: Arc<AtomicU64>,
    pub suspicious_input: Arc<AtomicU64>,
    pub auth_failures: Arc<AtomicU64>,
    pub server_errors: Arc<AtomicU64>,
    pub start_time: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            requests_total: Arc::new(AtomicU64::new(0)),
            requests_rejected: Arc::new(AtomicU64::new(0)),
            rate_limited: Arc::new(AtomicU64::new(0)),
            suspicious_input: Arc::new(AtomicU64::new(0)),
            auth_failures: Arc::new(AtomicU64::new(0)),
            server_errors: Arc::new(AtomicU64::new(0)),
            start_time: Instant::now(),
        }
    }

    pub fn inc_requests(&self) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts a failure response by its classified kind.
    pub fn record_failure(&self, kind: ErrorKind) {
        self.requests_rejected.fetch_add(1, Ordering::Relaxed);
        match kind {
            ErrorKind::RateLimitExceeded => {
                self.rate_limited.fetch_add(1, Ordering::Relaxed);
            }
            ErrorKind::SuspiciousInput => {
                self.suspicious_input.fetch_add(1, Ordering::Relaxed);
            }
            ErrorKind::TokenExpired | ErrorKind::InvalidToken | ErrorKind::Unauthorized => {
                self.auth_failures.fetch_add(1, Ordering::Relaxed);
            }
            ErrorKind::InternalError => {
                self.server_errors.fetch_add(1, Ordering::Relaxed);
            }
            _ => {}
        }
    }

    pub fn get_snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            requests_total: self.requests_total.load(Ordering::Relaxed),
            requests_rejected: self.requests_rejected.load(Ordering::Relaxed),
            rate_limited: self.rate_limited.load(Ordering::Relaxed),
            suspicious_input: self.suspicious_input.load(Ordering::Relaxed),
            auth_failures: self.auth_failures.load(Ordering::Relaxed),
            server_errors: self.server_errors.load(Ordering::Relaxed),
            uptime_seconds: self.start_time.elapsed().as_secs(),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Serialize)]
pub struct MetricsSnapshot {
    pub requests_total: u64,
    pub requests_rejected: u64,
    pub rate_limited: u64,
    pub suspicious_input: u64,
    pub auth_failures: u64,
    pub server_errors: u64,
    pub uptime_seconds: u64,
}
