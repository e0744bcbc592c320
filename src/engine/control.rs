use std::time::{Duration, Instant};

/// Default interval after which a pending continue re-enables on its own
pub const DEFAULT_CONTINUE_TIMEOUT: Duration = Duration::from_millis(2000);

/// Optimistic disable-then-re-enable gate for "continue" requests.
///
/// Sending disables the gate; any inbound frame or the timeout re-enables it.
#[derive(Debug, Clone)]
pub struct ContinueGate {
    timeout: Duration,
    disabled_at: Option<Instant>,
}

impl Default for ContinueGate {
    fn default() -> Self {
        Self::new(DEFAULT_CONTINUE_TIMEOUT)
    }
}

impl ContinueGate {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            disabled_at: None,
        }
    }

    pub fn is_enabled(&self, now: Instant) -> bool {
        match self.disabled_at {
            None => true,
            Some(at) => now.saturating_duration_since(at) >= self.timeout,
        }
    }

    /// Disable the gate if it is enabled. Returns whether a request may be sent.
    pub fn try_disable(&mut self, now: Instant) -> bool {
        if !self.is_enabled(now) {
            return false;
        }
        self.disabled_at = Some(now);
        true
    }

    pub fn release(&mut self) {
        self.disabled_at = None;
    }
}
