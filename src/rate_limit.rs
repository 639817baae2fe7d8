use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::{Semaphore, SemaphorePermit};
use tokio::time::Instant;

use crate::config::ThrottleSettings;
use crate::error::KiraError;

#[derive(Debug)]
pub struct Throttle {
    starts: Mutex<VecDeque<Instant>>,
    limit: usize,
    window: Duration,
    in_flight: Semaphore,
}

impl Throttle {
    pub fn new(settings: &ThrottleSettings) -> Self {
        let limit = settings.requests_per_window.max(1) as usize;
        Self {
            starts: Mutex::new(VecDeque::with_capacity(limit)),
            limit,
            window: settings.window,
            in_flight: Semaphore::new(settings.max_in_flight.max(1)),
        }
    }

    /// Waits for a concurrency slot, then for room in the rolling window.
    /// The returned permit must be held for the duration of the request.
    pub async fn admit(&self) -> Result<SemaphorePermit<'_>, KiraError> {
        let permit = self
            .in_flight
            .acquire()
            .await
            .map_err(|_| KiraError::Cancelled)?;
        while let Some(wait) = self.try_start(Instant::now()) {
            tracing::trace!(wait_ms = wait.as_millis() as u64, "rate window full");
            tokio::time::sleep(wait).await;
        }
        Ok(permit)
    }

    fn try_start(&self, now: Instant) -> Option<Duration> {
        let mut starts = self.starts.lock().unwrap_or_else(PoisonError::into_inner);
        while let Some(oldest) = starts.front() {
            if now.duration_since(*oldest) >= self.window {
                starts.pop_front();
            } else {
                break;
            }
        }
        if starts.len() < self.limit {
            starts.push_back(now);
            return None;
        }
        starts
            .front()
            .map(|oldest| (*oldest + self.window).saturating_duration_since(now))
            .filter(|wait| !wait.is_zero())
            .or(Some(Duration::from_millis(1)))
    }
}
