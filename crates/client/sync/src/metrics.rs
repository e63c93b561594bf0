use std::sync::atomic::{AtomicU64, Ordering};

/// Exchange-level counters, shared with the status line and the test suite.
#[derive(Debug, Default)]
pub struct ExchangeStats {
    pub header_requests_sent: AtomicU64,
    pub body_requests_sent: AtomicU64,
    pub inbound_messages: AtomicU64,
    pub penalties_sent: AtomicU64,
}

impl ExchangeStats {
    pub fn header_requests(&self) -> u64 {
        self.header_requests_sent.load(Ordering::Relaxed)
    }

    pub fn body_requests(&self) -> u64 {
        self.body_requests_sent.load(Ordering::Relaxed)
    }

    pub fn inbound(&self) -> u64 {
        self.inbound_messages.load(Ordering::Relaxed)
    }

    pub fn penalties(&self) -> u64 {
        self.penalties_sent.load(Ordering::Relaxed)
    }

    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}
