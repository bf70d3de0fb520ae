//! Bounded polling and injected delays.
//!
//! Cross-node propagation is not observable synchronously, so the harness
//! waits between steps. All waiting goes through a [`Sleeper`] so tests can
//! run without real delays and inspect the requested pauses.

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tracing::trace;

use crate::error::Result;

/// Strategy for pausing the control thread.
#[async_trait]
pub trait Sleeper: Send + Sync {
    /// Pauses for `duration`.
    async fn sleep(&self, duration: Duration);
}

/// Real delays on the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        if !duration.is_zero() {
            tokio::time::sleep(duration).await;
        }
    }
}

/// Records requested pauses without waiting.
#[derive(Debug, Clone, Default)]
pub struct RecordingSleeper {
    calls: Arc<Mutex<Vec<Duration>>>,
}

impl RecordingSleeper {
    /// Creates an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns every pause requested so far.
    #[must_use]
    pub fn calls(&self) -> Vec<Duration> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Returns the sum of all requested pauses.
    #[must_use]
    pub fn total(&self) -> Duration {
        self.calls().iter().sum()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(duration);
        }
    }
}

/// Outcome of a polling loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Polled<T> {
    /// The probe produced a value after `attempts` probes.
    Ready {
        /// The produced value.
        value: T,
        /// Number of probes, including the successful one.
        attempts: u32,
    },
    /// The budget ran out; every probe returned nothing.
    Exhausted {
        /// Number of probes made (equal to the budget).
        attempts: u32,
    },
}

/// Fixed-interval retry budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of probes.
    pub max_attempts: u32,
    /// Pause after each unsuccessful probe.
    pub interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            interval: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Creates a policy with the given budget and interval.
    #[must_use]
    pub const fn new(max_attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts,
            interval,
        }
    }

    /// Probes until it yields `Some`, pausing `interval` after every miss.
    ///
    /// A probe error aborts the loop immediately. The probe is called at most
    /// `max_attempts` times.
    pub async fn poll<T, F, Fut>(&self, sleeper: &dyn Sleeper, mut probe: F) -> Result<Polled<T>>
    where
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = Result<Option<T>>> + Send,
    {
        let mut remaining = self.max_attempts;
        let mut attempts = 0;

        while remaining > 0 {
            attempts += 1;
            if let Some(value) = probe().await? {
                return Ok(Polled::Ready { value, attempts });
            }
            trace!(attempts, remaining, "probe not ready");
            sleeper.sleep(self.interval).await;
            remaining -= 1;
        }

        Ok(Polled::Exhausted { attempts })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_poll_ready_within_budget() {
        let sleeper = RecordingSleeper::new();
        let policy = RetryPolicy::new(10, Duration::from_secs(1));
        let probes = AtomicU32::new(0);

        let polled = policy
            .poll(&sleeper, || {
                let n = probes.fetch_add(1, Ordering::SeqCst) + 1;
                async move { Ok((n == 4).then_some(n)) }
            })
            .await
            .unwrap();

        assert_eq!(
            polled,
            Polled::Ready {
                value: 4,
                attempts: 4
            }
        );
        assert_eq!(sleeper.calls().len(), 3);
        assert_eq!(sleeper.total(), Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_poll_exhausts_exactly_at_budget() {
        let sleeper = RecordingSleeper::new();
        let policy = RetryPolicy::new(10, Duration::from_millis(250));
        let probes = AtomicU32::new(0);

        let polled: Polled<()> = policy
            .poll(&sleeper, || {
                probes.fetch_add(1, Ordering::SeqCst);
                async { Ok(None) }
            })
            .await
            .unwrap();

        assert_eq!(polled, Polled::Exhausted { attempts: 10 });
        assert_eq!(probes.load(Ordering::SeqCst), 10);
        assert_eq!(sleeper.calls().len(), 10);
    }

    #[tokio::test]
    async fn test_poll_last_attempt_succeeds() {
        let sleeper = RecordingSleeper::new();
        let policy = RetryPolicy::new(3, Duration::from_secs(1));
        let probes = AtomicU32::new(0);

        let polled = policy
            .poll(&sleeper, || {
                let n = probes.fetch_add(1, Ordering::SeqCst) + 1;
                async move { Ok((n == 3).then_some("ready")) }
            })
            .await
            .unwrap();

        assert_eq!(
            polled,
            Polled::Ready {
                value: "ready",
                attempts: 3
            }
        );
    }

    #[tokio::test]
    async fn test_poll_zero_budget_never_probes() {
        let sleeper = RecordingSleeper::new();
        let policy = RetryPolicy::new(0, Duration::from_secs(1));

        let probes = AtomicU32::new(0);

        let polled: Polled<()> = policy
            .poll(&sleeper, || {
                probes.fetch_add(1, Ordering::SeqCst);
                async { Ok(None) }
            })
            .await
            .unwrap();

        assert_eq!(polled, Polled::Exhausted { attempts: 0 });
        assert_eq!(probes.load(Ordering::SeqCst), 0);
        assert!(sleeper.calls().is_empty());
    }

    #[tokio::test]
    async fn test_poll_propagates_probe_error() {
        let sleeper = RecordingSleeper::new();
        let policy = RetryPolicy::default();

        let result: Result<Polled<()>> = policy
            .poll(&sleeper, || async {
                Err::<Option<()>, _>(crate::error::HarnessError::parse("bad nhmac"))
            })
            .await;

        assert!(result.is_err());
        assert!(sleeper.calls().is_empty());
    }
}
