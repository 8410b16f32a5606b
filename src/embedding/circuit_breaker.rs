//! Circuit breaker guarding embedding providers
//!
//! Tracked per provider key. After `failure_threshold` consecutive failed
//! batches the breaker opens and batches skip the provider entirely (they
//! degrade straight to zero vectors). Once `reset_timeout` has passed a single
//! probe is let through in the half-open state.

use crate::config::EmbeddingConfig;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone)]
struct BreakerEntry {
    state: BreakerState,
    consecutive_failures: usize,
    last_failure: Option<Instant>,
    opened_at: Option<Instant>,
}

impl BreakerEntry {
    fn new() -> Self {
        Self {
            state: BreakerState::Closed,
            consecutive_failures: 0,
            last_failure: None,
            opened_at: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: usize,
    pub reset_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(30),
        }
    }
}

impl From<&EmbeddingConfig> for CircuitBreakerConfig {
    fn from(config: &EmbeddingConfig) -> Self {
        Self {
            failure_threshold: config.circuit_breaker_failures.max(1),
            reset_timeout: config.breaker_reset_timeout(),
        }
    }
}

pub struct CircuitBreaker {
    entries: Mutex<HashMap<String, BreakerEntry>>,
    config: CircuitBreakerConfig,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            config,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, BreakerEntry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Whether calls to `provider` should be skipped right now
    pub fn is_open(&self, provider: &str) -> bool {
        let mut entries = self.lock();
        let entry = entries
            .entry(provider.to_string())
            .or_insert_with(BreakerEntry::new);

        match entry.state {
            BreakerState::Closed | BreakerState::HalfOpen => false,
            BreakerState::Open => match entry.opened_at {
                Some(opened_at) if opened_at.elapsed() >= self.config.reset_timeout => {
                    info!("Embedding circuit half-open, probing: provider={}", provider);
                    entry.state = BreakerState::HalfOpen;
                    false
                }
                _ => true,
            },
        }
    }

    pub fn mark_success(&self, provider: &str) {
        let mut entries = self.lock();
        let entry = entries
            .entry(provider.to_string())
            .or_insert_with(BreakerEntry::new);
        if entry.state != BreakerState::Closed {
            info!("Embedding circuit closed: provider={}", provider);
        }
        *entry = BreakerEntry::new();
    }

    pub fn mark_failure(&self, provider: &str) {
        let mut entries = self.lock();
        let entry = entries
            .entry(provider.to_string())
            .or_insert_with(BreakerEntry::new);

        let now = Instant::now();
        entry.consecutive_failures += 1;
        entry.last_failure = Some(now);

        // a failed probe reopens immediately
        let reopen = entry.state == BreakerState::HalfOpen
            || entry.consecutive_failures >= self.config.failure_threshold;
        if reopen && entry.state != BreakerState::Open {
            warn!(
                "Embedding circuit opened: provider={}, failures={}",
                provider, entry.consecutive_failures
            );
            entry.state = BreakerState::Open;
            entry.opened_at = Some(now);
        }
    }

    pub fn state(&self, provider: &str) -> BreakerState {
        self.lock()
            .get(provider)
            .map(|e| e.state)
            .unwrap_or(BreakerState::Closed)
    }

    pub fn stats(&self, provider: &str) -> BreakerStats {
        match self.lock().get(provider) {
            Some(entry) => BreakerStats {
                state: entry.state,
                consecutive_failures: entry.consecutive_failures,
                last_failure: entry.last_failure,
            },
            None => BreakerStats {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                last_failure: None,
            },
        }
    }

    pub fn reset(&self, provider: &str) {
        self.lock().remove(provider);
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

#[derive(Debug, Clone)]
pub struct BreakerStats {
    pub state: BreakerState,
    pub consecutive_failures: usize,
    pub last_failure: Option<Instant>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(threshold: usize, reset: Duration) -> CircuitBreaker {
        CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: threshold,
            reset_timeout: reset,
        })
    }

    #[test]
    fn test_closed_by_default() {
        let breaker = CircuitBreaker::default();
        assert!(!breaker.is_open("openai"));
        assert_eq!(breaker.state("openai"), BreakerState::Closed);
    }

    #[test]
    fn test_opens_after_threshold() {
        let breaker = breaker(3, Duration::from_secs(30));
        breaker.mark_failure("openai");
        breaker.mark_failure("openai");
        assert!(!breaker.is_open("openai"));
        breaker.mark_failure("openai");
        assert!(breaker.is_open("openai"));
        // other providers unaffected
        assert!(!breaker.is_open("local"));
    }

    #[test]
    fn test_success_resets_failures() {
        let breaker = breaker(3, Duration::from_secs(30));
        breaker.mark_failure("openai");
        breaker.mark_failure("openai");
        breaker.mark_success("openai");

        let stats = breaker.stats("openai");
        assert_eq!(stats.state, BreakerState::Closed);
        assert_eq!(stats.consecutive_failures, 0);
        assert!(stats.last_failure.is_none());
    }

    #[test]
    fn test_half_open_probe_and_reopen() {
        let breaker = breaker(2, Duration::from_millis(50));
        breaker.mark_failure("openai");
        breaker.mark_failure("openai");
        assert!(breaker.is_open("openai"));

        std::thread::sleep(Duration::from_millis(80));
        assert!(!breaker.is_open("openai"));
        assert_eq!(breaker.state("openai"), BreakerState::HalfOpen);

        breaker.mark_failure("openai");
        assert_eq!(breaker.state("openai"), BreakerState::Open);
        assert!(breaker.is_open("openai"));
    }

    #[test]
    fn test_reset() {
        let breaker = breaker(1, Duration::from_secs(30));
        breaker.mark_failure("openai");
        assert!(breaker.is_open("openai"));
        breaker.reset("openai");
        assert!(!breaker.is_open("openai"));
    }
}
