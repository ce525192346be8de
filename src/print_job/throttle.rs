// src/print_job/throttle.rs
//! Coalescing rate limiter for host-facing notifications.
//! At most one value leaves per window; values offered inside the window
//! replace each other and the latest one is held until the window opens.

use std::time::{Duration, Instant};

#[derive(Debug)]
pub struct NotifyThrottle<T> {
    pub min_interval: Duration,
    last_emit: Option<Instant>,
    pending: Option<T>,
}

impl<T> NotifyThrottle<T> {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_emit: None,
            pending: None,
        }
    }

    fn window_open(&self, now: Instant) -> bool {
        match self.last_emit {
            None => true,
            Some(ts) => now.duration_since(ts) >= self.min_interval,
        }
    }

    /// Returns the value to emit now, or keeps it as the pending value.
    pub fn offer(&mut self, value: T, now: Instant) -> Option<T> {
        if self.window_open(now) {
            self.pending = None;
            self.last_emit = Some(now);
            Some(value)
        } else {
            self.pending = Some(value);
            None
        }
    }

    /// Releases the pending value once the window has elapsed.
    pub fn poll(&mut self, now: Instant) -> Option<T> {
        if self.pending.is_some() && self.window_open(now) {
            self.last_emit = Some(now);
            self.pending.take()
        } else {
            None
        }
    }

    /// Records an emission made outside the throttle, dropping anything
    /// pending since it is now stale.
    pub fn mark_emitted(&mut self, now: Instant) {
        self.pending = None;
        self.last_emit = Some(now);
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn reset(&mut self) {
        self.pending = None;
        self.last_emit = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_offer_passes() {
        let mut throttle = NotifyThrottle::new(Duration::from_secs(1));
        assert_eq!(throttle.offer(1, Instant::now()), Some(1));
    }

    #[test]
    fn test_offers_inside_window_coalesce_to_latest() {
        let start = Instant::now();
        let mut throttle = NotifyThrottle::new(Duration::from_secs(1));
        assert_eq!(throttle.offer(1, start), Some(1));
        assert_eq!(throttle.offer(2, start + Duration::from_millis(100)), None);
        assert_eq!(throttle.offer(3, start + Duration::from_millis(200)), None);
        assert_eq!(throttle.poll(start + Duration::from_millis(500)), None);
        assert!(throttle.has_pending());
        assert_eq!(throttle.poll(start + Duration::from_millis(1000)), Some(3));
        assert_eq!(throttle.poll(start + Duration::from_millis(3000)), None);
    }

    #[test]
    fn test_mark_emitted_restarts_window() {
        let start = Instant::now();
        let mut throttle = NotifyThrottle::new(Duration::from_secs(1));
        throttle.offer(1, start);
        throttle.offer(2, start + Duration::from_millis(10));
        throttle.mark_emitted(start + Duration::from_millis(900));
        assert!(!throttle.has_pending());
        assert_eq!(throttle.offer(4, start + Duration::from_millis(1500)), None);
        assert_eq!(throttle.poll(start + Duration::from_millis(1900)), Some(4));
    }
}
