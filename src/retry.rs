// Polling retrier for supplier endpoints that answer "not ready yet"
// while they compute a result (room pricing, multi-phase search).

use std::future::Future;
use std::time::Duration;

use tracing::debug;

use crate::error::{EngineError, EngineResult};

/// Outcome of one polling attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum Attempt<T> {
    Ready(T),
    Pending,
}

/// The i-th delay is slept before the i-th attempt, so the schedule length is
/// also the attempt budget.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DelaySchedule {
    delays: Vec<Duration>,
}

impl DelaySchedule {
    pub fn new(delays: Vec<Duration>) -> Self {
        Self { delays }
    }

    pub fn from_millis(delays: &[u64]) -> Self {
        Self::new(delays.iter().copied().map(Duration::from_millis).collect())
    }

    /// Exponential schedule with jitter, capped at `max`.
    pub fn exponential(
        attempts: usize,
        initial: Duration,
        multiplier: f64,
        max: Duration,
        jitter_factor: f64,
    ) -> Self {
        let delays = (0..attempts)
            .map(|attempt| {
                let base_ms = (initial.as_millis() as f64 * multiplier.powf(attempt as f64))
                    .min(max.as_millis() as f64);
                let jitter = rand::random::<f64>() * jitter_factor * base_ms;
                let delay_ms = base_ms * (1.0 - jitter_factor / 2.0) + jitter;
                Duration::from_millis(delay_ms as u64)
            })
            .collect();
        Self::new(delays)
    }

    pub fn delays(&self) -> &[Duration] {
        &self.delays
    }

    pub fn len(&self) -> usize {
        self.delays.len()
    }

    pub fn is_empty(&self) -> bool {
        self.delays.is_empty()
    }
}

/// Calls `attempt` once per schedule slot until it reports `Ready`.
///
/// Errors returned by `attempt` are hard failures and stop polling at once.
/// Running out of slots yields `EngineError::MaxTriesReached`, which callers
/// treat as "try again on the next run" rather than a broken supplier.
pub async fn poll_until_ready<T, F, Fut>(schedule: &DelaySchedule, mut attempt: F) -> EngineResult<T>
where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = EngineResult<Attempt<T>>>,
{
    for (index, delay) in schedule.delays().iter().enumerate() {
        if !delay.is_zero() {
            tokio::time::sleep(*delay).await;
        }
        if let Attempt::Ready(result) = attempt(index).await? {
            debug!(tries = index + 1, "polled result is ready");
            return Ok(result);
        }
    }
    Err(EngineError::MaxTriesReached {
        attempts: schedule.len(),
    })
}
