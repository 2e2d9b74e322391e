use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

/// Errors in a row before a client is marked degraded and excluded from
/// best-effort routing.
const DEGRADED_THRESHOLD: u32 = 3;

/// Lock-free connection health for one exchange client.
///
/// A degraded client still serves explicitly-named calls (exits must always
/// be possible); it is only excluded from `place_best` style routing.
#[derive(Debug)]
pub struct ConnectionHealth {
    connected: AtomicBool,
    consecutive_errors: AtomicU32,
    total_errors: AtomicU32,
}

impl ConnectionHealth {
    pub fn new() -> Self {
        Self {
            connected: AtomicBool::new(true),
            consecutive_errors: AtomicU32::new(0),
            total_errors: AtomicU32::new(0),
        }
    }

    pub fn record_success(&self) {
        self.consecutive_errors.store(0, Ordering::Relaxed);
        self.connected.store(true, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.consecutive_errors.fetch_add(1, Ordering::Relaxed);
        self.total_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::Relaxed);
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    pub fn is_degraded(&self) -> bool {
        self.consecutive_errors.load(Ordering::Relaxed) >= DEGRADED_THRESHOLD
    }

    pub fn is_routable(&self) -> bool {
        self.is_connected() && !self.is_degraded()
    }

    pub fn consecutive_errors(&self) -> u32 {
        self.consecutive_errors.load(Ordering::Relaxed)
    }
}

impl Default for ConnectionHealth {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_degraded_after_three_consecutive_errors() {
        let health = ConnectionHealth::new();
        assert!(health.is_routable());

        health.record_error();
        health.record_error();
        assert!(!health.is_degraded());

        health.record_error();
        assert!(health.is_degraded());
        assert!(!health.is_routable());
    }

    #[test]
    fn test_success_clears_degraded() {
        let health = ConnectionHealth::new();
        for _ in 0..5 {
            health.record_error();
        }
        assert!(health.is_degraded());

        health.record_success();
        assert!(!health.is_degraded());
        assert!(health.is_routable());
    }

    #[test]
    fn test_disconnected_is_not_routable() {
        let health = ConnectionHealth::new();
        health.set_connected(false);
        assert!(!health.is_routable());
        assert!(!health.is_degraded());
    }
}
