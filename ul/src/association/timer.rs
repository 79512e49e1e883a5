//! The Association Request/Reject/Release timer (ARTIM).
use std::time::{Duration, Instant};

/// The default ARTIM timeout.
pub const DEFAULT_ARTIM_TIMEOUT: Duration = Duration::from_secs(30);

/// A one-shot deadline, started when the association
/// begins to wait on the remote node and stopped when it no longer does.
#[derive(Debug, Clone)]
pub struct Artim {
    timeout: Duration,
    deadline: Option<Instant>,
}

impl Default for Artim {
    fn default() -> Self {
        Artim::new(DEFAULT_ARTIM_TIMEOUT)
    }
}

impl Artim {
    pub fn new(timeout: Duration) -> Self {
        Artim {
            timeout,
            deadline: None,
        }
    }

    /// The configured timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// (Re)start the timer.
    pub fn start(&mut self) {
        self.deadline = Some(Instant::now() + self.timeout);
    }

    pub fn stop(&mut self) {
        self.deadline = None;
    }

    pub fn is_running(&self) -> bool {
        self.deadline.is_some()
    }

    /// The time left before expiry,
    /// or `None` if the timer is not running.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    pub fn is_expired(&self) -> bool {
        self.remaining() == Some(Duration::ZERO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stopped_timer_never_expires() {
        let mut artim = Artim::new(Duration::ZERO);
        assert!(!artim.is_running());
        assert!(!artim.is_expired());
        assert_eq!(artim.remaining(), None);

        artim.start();
        assert!(artim.is_running());
        assert!(artim.is_expired());

        artim.stop();
        assert!(!artim.is_expired());
    }

    #[test]
    fn remaining_time_is_bounded_by_timeout() {
        let mut artim = Artim::new(Duration::from_secs(60));
        artim.start();
        let remaining = artim.remaining().unwrap();
        assert!(remaining <= Duration::from_secs(60));
        assert!(remaining > Duration::from_secs(50));
        assert!(!artim.is_expired());
    }
}
