use std::time::Duration;

use tokio::time::Instant;

/// One-shot dead-stream deadline.
///
/// Pure bookkeeping: the controller's driver task sleeps until
/// [`Watchdog::deadline`] and then calls [`Watchdog::expire`]. Once it has
/// fired, or has been cancelled, it stays disarmed until the next `arm`.
#[derive(Debug, Clone)]
pub struct Watchdog {
    timeout: Duration,
    deadline: Option<Instant>,
}

impl Watchdog {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            deadline: None,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Start (or restart) the countdown from `now`.
    pub fn arm(&mut self, now: Instant) {
        self.deadline = Some(now + self.timeout);
    }

    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Returns `true` exactly once, when an armed deadline has passed.
    pub fn expire(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) if now >= deadline => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fires_once_after_deadline() {
        let start = Instant::now();
        let mut watchdog = Watchdog::new(Duration::from_secs(15));
        watchdog.arm(start);

        assert!(!watchdog.expire(start + Duration::from_millis(14_999)));
        assert!(watchdog.is_armed());
        assert!(watchdog.expire(start + Duration::from_secs(15)));
        assert!(!watchdog.is_armed());
        assert!(!watchdog.expire(start + Duration::from_secs(30)));
    }

    #[test]
    fn test_cancelled_never_fires() {
        let start = Instant::now();
        let mut watchdog = Watchdog::new(Duration::from_secs(1));
        watchdog.arm(start);
        watchdog.cancel();
        assert!(watchdog.deadline().is_none());
        assert!(!watchdog.expire(start + Duration::from_secs(5)));
    }

    #[test]
    fn test_rearm_moves_deadline() {
        let start = Instant::now();
        let mut watchdog = Watchdog::new(Duration::from_secs(2));
        watchdog.arm(start);
        watchdog.arm(start + Duration::from_secs(1));
        assert_eq!(watchdog.deadline(), Some(start + Duration::from_secs(3)));
        assert!(!watchdog.expire(start + Duration::from_secs(2)));
    }
}
