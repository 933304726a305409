use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Externally visible breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Requests pass through
    Closed,
    /// Failing fast until the cool-down elapses
    Open,
    /// Cool-down elapsed, probing whether the backend recovered
    HalfOpen,
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit
    pub failure_threshold: usize,
    /// Time spent open before a probe is let through
    pub cooldown: Duration,
    /// Consecutive probe successes needed to close again
    pub success_threshold: usize,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            cooldown: Duration::from_secs(30),
            success_threshold: 1,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Phase {
    Closed { failures: usize },
    Open { since: Instant },
    HalfOpen { successes: usize },
}

impl Phase {
    fn state(&self) -> CircuitState {
        match self {
            Phase::Closed { .. } => CircuitState::Closed,
            Phase::Open { .. } => CircuitState::Open,
            Phase::HalfOpen { .. } => CircuitState::HalfOpen,
        }
    }
}

/// Fails translation calls fast while the backend is known to be down,
/// so a dead API does not add retry latency to every run.
#[derive(Clone)]
pub struct CircuitBreaker {
    phase: Arc<Mutex<Phase>>,
    config: CircuitBreakerConfig,
}

impl CircuitBreaker {
    pub fn new() -> Self {
        Self::with_config(CircuitBreakerConfig::default())
    }

    pub fn with_config(config: CircuitBreakerConfig) -> Self {
        Self {
            phase: Arc::new(Mutex::new(Phase::Closed { failures: 0 })),
            config,
        }
    }

    /// Whether a request may go out now. Moves Open to HalfOpen once the
    /// cool-down has elapsed.
    pub fn allow_request(&self) -> bool {
        let mut phase = self.phase.lock();
        match *phase {
            Phase::Closed { .. } | Phase::HalfOpen { .. } => true,
            Phase::Open { since } if since.elapsed() >= self.config.cooldown => {
                *phase = Phase::HalfOpen { successes: 0 };
                true
            }
            Phase::Open { .. } => false,
        }
    }

    pub fn record_success(&self) {
        let mut phase = self.phase.lock();
        *phase = match *phase {
            Phase::HalfOpen { successes } if successes + 1 < self.config.success_threshold => {
                Phase::HalfOpen {
                    successes: successes + 1,
                }
            }
            _ => Phase::Closed { failures: 0 },
        };
    }

    /// Record a failed request. Returns true when this failure tripped the
    /// circuit open.
    pub fn record_failure(&self) -> bool {
        let mut phase = self.phase.lock();
        match *phase {
            Phase::Closed { failures } if failures + 1 >= self.config.failure_threshold => {
                *phase = Phase::Open {
                    since: Instant::now(),
                };
                true
            }
            Phase::Closed { failures } => {
                *phase = Phase::Closed {
                    failures: failures + 1,
                };
                false
            }
            Phase::HalfOpen { .. } => {
                *phase = Phase::Open {
                    since: Instant::now(),
                };
                true
            }
            Phase::Open { .. } => false,
        }
    }

    pub fn state(&self) -> CircuitState {
        self.phase.lock().state()
    }

    pub fn reset(&self) {
        *self.phase.lock() = Phase::Closed { failures: 0 };
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(failures: usize, cooldown_ms: u64, successes: usize) -> CircuitBreaker {
        CircuitBreaker::with_config(CircuitBreakerConfig {
            failure_threshold: failures,
            cooldown: Duration::from_millis(cooldown_ms),
            success_threshold: successes,
        })
    }

    #[test]
    fn test_opens_after_threshold() {
        let b = breaker(3, 1000, 1);
        assert!(b.allow_request());
        assert!(!b.record_failure());
        assert!(!b.record_failure());
        assert!(b.record_failure());
        assert_eq!(b.state(), CircuitState::Open);
        assert!(!b.allow_request());
    }

    #[test]
    fn test_success_resets_failure_count() {
        let b = breaker(2, 1000, 1);
        b.record_failure();
        b.record_success();
        assert!(!b.record_failure());
        assert_eq!(b.state(), CircuitState::Closed);
    }

    #[test]
    fn test_probe_then_close() {
        let b = breaker(1, 50, 2);
        b.record_failure();
        std::thread::sleep(Duration::from_millis(80));

        assert!(b.allow_request());
        assert_eq!(b.state(), CircuitState::HalfOpen);
        b.record_success();
        assert_eq!(b.state(), CircuitState::HalfOpen);
        b.record_success();
        assert_eq!(b.state(), CircuitState::Closed);
    }

    #[test]
    fn test_failed_probe_reopens() {
        let b = breaker(1, 50, 1);
        b.record_failure();
        std::thread::sleep(Duration::from_millis(80));
        assert!(b.allow_request());
        assert!(b.record_failure());
        assert_eq!(b.state(), CircuitState::Open);
        assert!(!b.allow_request());
    }

    #[test]
    fn test_reset() {
        let b = breaker(1, 60_000, 1);
        b.record_failure();
        b.reset();
        assert_eq!(b.state(), CircuitState::Closed);
        assert!(b.allow_request());
    }
}
