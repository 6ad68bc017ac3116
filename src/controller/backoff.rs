//! # Fibonacci Backoff
//!
//! Progressive retry delays for failed reconciliations. Grows more slowly than
//! exponential backoff, so a resource stuck on a bad key or a broken manifest
//! keeps being retried at a reasonable cadence. A resource that reconciles
//! successfully drops its state and starts over at the minimum.
//!
//! With the default bounds (5s min, 300s max) the sequence is
//! 5s, 5s, 10s, 15s, 25s, 40s, 65s, 105s, 170s, 275s, 300s (max).
//!
//! ## Usage
//!
//! ```rust
//! use sops_secret_controller::controller::backoff::FibonacciBackoff;
//!
//! let mut backoff = FibonacciBackoff::new(5, 300);
//! assert_eq!(backoff.next_backoff_seconds(), 5);
//! assert_eq!(backoff.next_backoff_seconds(), 5);
//! assert_eq!(backoff.next_backoff_seconds(), 10);
//! ```

/// Fibonacci backoff calculator
///
/// Each backoff is the sum of the previous two, capped at `max_seconds`.
#[derive(Debug, Clone)]
pub struct FibonacciBackoff {
    prev_seconds: u64,
    current_seconds: u64,
    max_seconds: u64,
}

impl FibonacciBackoff {
    /// Create a new backoff with the given bounds in seconds
    ///
    /// A zero minimum is raised to one second, otherwise the sequence never grows.
    #[must_use]
    pub fn new(min_seconds: u64, max_seconds: u64) -> Self {
        let min_seconds = min_seconds.max(1);
        Self {
            prev_seconds: 0,
            current_seconds: min_seconds,
            max_seconds: max_seconds.max(min_seconds),
        }
    }

    /// Get the next backoff in seconds and advance the sequence
    pub fn next_backoff_seconds(&mut self) -> u64 {
        let result = self.current_seconds;
        let next = self.prev_seconds.saturating_add(self.current_seconds);
        self.prev_seconds = self.current_seconds;
        self.current_seconds = next.min(self.max_seconds);
        result
    }

}
