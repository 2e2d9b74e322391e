use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Order failures within this window force a degraded pause.
const FAILURE_WINDOW: Duration = Duration::from_secs(300);
const FAILURE_LIMIT: usize = 3;
/// Entry pause once degraded.
const DEGRADED_PAUSE: Duration = Duration::from_secs(900);

/// Cycle state for one symbol, owned by that symbol's executor task.
#[derive(Debug)]
pub struct SymbolState {
    last_entry: Option<Instant>,
    /// Set after an exit fired; suppresses re-entry for one full cycle
    /// regardless of cooldown expiry.
    forced_cooldown: bool,
    failures: VecDeque<Instant>,
    degraded_until: Option<Instant>,
}

impl SymbolState {
    pub fn new() -> Self {
        Self {
            last_entry: None,
            forced_cooldown: false,
            failures: VecDeque::new(),
            degraded_until: None,
        }
    }

    pub fn record_entry(&mut self) {
        self.last_entry = Some(Instant::now());
    }

    pub fn cooldown_active(&self, cooldown: Duration) -> bool {
        match self.last_entry {
            Some(at) => at.elapsed() < cooldown,
            None => false,
        }
    }

    pub fn arm_forced_cooldown(&mut self) {
        self.forced_cooldown = true;
    }

    /// Consume the one-cycle suppression flag. Returns true when this cycle
    /// must skip entry.
    pub fn take_forced_cooldown(&mut self) -> bool {
        std::mem::take(&mut self.forced_cooldown)
    }

    /// Record an order failure. Three within five minutes degrade the
    /// symbol for fifteen minutes; returns true when that just happened.
    pub fn record_order_failure(&mut self) -> bool {
        let now = Instant::now();
        self.failures.push_back(now);
        while let Some(&front) = self.failures.front() {
            if now.duration_since(front) > FAILURE_WINDOW {
                self.failures.pop_front();
            } else {
                break;
            }
        }
        if self.failures.len() >= FAILURE_LIMIT && self.degraded_until.is_none() {
            self.degraded_until = Some(now + DEGRADED_PAUSE);
            self.failures.clear();
            return true;
        }
        false
    }

    pub fn is_degraded(&mut self) -> bool {
        match self.degraded_until {
            Some(until) if Instant::now() < until => true,
            Some(_) => {
                self.degraded_until = None;
                false
            }
            None => false,
        }
    }
}

impl Default for SymbolState {
    fn default() -> Self {
        Self::new()
    }
}
