//! Backoff sequence implementation

use std::time::Duration;

/// Default schedule, in seconds
pub const DEFAULT_BACKOFF_SECONDS: [u64; 8] = [2, 4, 8, 16, 32, 64, 128, 256];

/// Stateful cursor over an ascending delay schedule
///
/// One instance per worker; never shared.
///
/// # Example
///
/// ```
/// use workcrew_jobs::Backoffs;
/// use std::time::Duration;
///
/// let mut backoffs = Backoffs::seconds(&[2, 4, 8]);
///
/// assert_eq!(backoffs.next(), Duration::from_secs(2));
/// assert_eq!(backoffs.next(), Duration::from_secs(4));
/// assert_eq!(backoffs.next(), Duration::from_secs(8));
/// // Saturates at the last value
/// assert_eq!(backoffs.next(), Duration::from_secs(8));
///
/// backoffs.reset();
/// assert_eq!(backoffs.next(), Duration::from_secs(2));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Backoffs {
    schedule: Vec<Duration>,
    cursor: usize,
    engaged: bool,
}

impl Default for Backoffs {
    fn default() -> Self {
        Self::seconds(&DEFAULT_BACKOFF_SECONDS)
    }
}

impl Backoffs {
    /// Create from an explicit schedule. An empty schedule yields zero delays.
    pub fn new(schedule: Vec<Duration>) -> Self {
        Self {
            schedule,
            cursor: 0,
            engaged: false,
        }
    }

    /// Create from a schedule in whole seconds
    pub fn seconds(schedule: &[u64]) -> Self {
        Self::new(schedule.iter().map(|s| Duration::from_secs(*s)).collect())
    }

    /// Engage on first call, otherwise advance (saturating) and return the delay
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> Duration {
        if self.schedule.is_empty() {
            return Duration::ZERO;
        }
        if !self.engaged {
            self.engaged = true;
            self.cursor = 0;
        } else if self.cursor + 1 < self.schedule.len() {
            self.cursor += 1;
        }
        self.schedule[self.cursor]
    }

    /// Current delay without advancing
    pub fn current(&self) -> Duration {
        self.schedule.get(self.cursor).copied().unwrap_or(Duration::ZERO)
    }

    /// Disengage and rewind to the start of the schedule
    pub fn reset(&mut self) {
        self.engaged = false;
        self.cursor = 0;
    }

    pub fn is_engaged(&self) -> bool {
        self.engaged
    }

    pub fn schedule(&self) -> &[Duration] {
        &self.schedule
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    #[test]
    fn test_fresh_sequence() {
        let mut b = Backoffs::default();
        assert!(!b.is_engaged());
        assert_eq!(b.next(), secs(2));
        assert!(b.is_engaged());
        assert_eq!(b.next(), secs(4));
        assert_eq!(b.next(), secs(8));
    }

    #[test]
    fn test_reset_starts_over() {
        let mut b = Backoffs::default();
        b.next();
        b.next();
        b.next();
        b.reset();
        assert!(!b.is_engaged());
        assert_eq!(b.next(), secs(2));
    }

    #[test]
    fn test_saturates_at_last_value() {
        let mut b = Backoffs::default();
        for _ in 0..8 {
            b.next();
        }
        assert_eq!(b.current(), secs(256));
        assert_eq!(b.next(), secs(256));
        assert_eq!(b.next(), secs(256));
    }

    #[test]
    fn test_single_value_schedule() {
        let mut b = Backoffs::seconds(&[5]);
        assert_eq!(b.next(), secs(5));
        assert_eq!(b.next(), secs(5));
    }

    #[test]
    fn test_empty_schedule() {
        let mut b = Backoffs::new(vec![]);
        assert_eq!(b.next(), Duration::ZERO);
        assert_eq!(b.current(), Duration::ZERO);
    }
}
