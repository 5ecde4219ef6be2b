//! Rate-limited warnings for per-message events

use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

struct State {
    last_logged: Option<Instant>,
    suppressed: u64,
}

/// Allows one log line per window and counts what it swallowed in between
pub(crate) struct LogThrottle {
    window: Duration,
    state: Mutex<State>,
}

impl LogThrottle {
    pub(crate) fn new(window: Duration) -> Self {
        Self {
            window,
            state: Mutex::new(State {
                last_logged: None,
                suppressed: 0,
            }),
        }
    }

    /// Record an event; `Some(n)` means log now, with `n` events suppressed since the last line
    pub(crate) fn hit(&self) -> Option<u64> {
        self.hit_at(Instant::now())
    }

    fn hit_at(&self, now: Instant) -> Option<u64> {
        let mut state = self.state.lock();
        match state.last_logged {
            Some(at) if now.saturating_duration_since(at) < self.window => {
                state.suppressed += 1;
                None
            }
            _ => {
                state.last_logged = Some(now);
                Some(std::mem::take(&mut state.suppressed))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_one_line_per_window() {
        let throttle = LogThrottle::new(Duration::from_secs(10));
        let start = Instant::now();

        assert_eq!(throttle.hit_at(start), Some(0));
        for i in 1..=5 {
            assert_eq!(throttle.hit_at(start + Duration::from_secs(i)), None);
        }
        assert_eq!(throttle.hit_at(start + Duration::from_secs(10)), Some(5));
        assert_eq!(throttle.hit_at(start + Duration::from_secs(11)), None);
        assert_eq!(throttle.hit_at(start + Duration::from_secs(30)), Some(1));
    }

    #[test]
    fn test_zero_window_logs_everything() {
        let throttle = LogThrottle::new(Duration::ZERO);
        let now = Instant::now();
        assert_eq!(throttle.hit_at(now), Some(0));
        assert_eq!(throttle.hit_at(now), Some(0));
    }
}
