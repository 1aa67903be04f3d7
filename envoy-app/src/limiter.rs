//! Remote-call throttle.
//!
//! Every Discord API call goes through [`RateLimiter::acquire`]: a FIFO
//! concurrency gate plus a rolling one-minute admission window. Waiters are
//! served in arrival order and a caller that gives up while queued consumes
//! no window budget.

use crate::config::LimitsConfig;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;

const WINDOW: Duration = Duration::from_secs(60);

pub struct RateLimiter {
    concurrency: Arc<Semaphore>,
    window: Mutex<VecDeque<Instant>>,
    max_calls_per_window: usize,
    batch_delay: Duration,
    performed: AtomicU64,
}

/// Proof of admission for one remote call. Holding it bounds concurrency;
/// the window slot it consumed is spent regardless of the call's outcome.
pub struct RatePermit {
    _concurrency: OwnedSemaphorePermit,
}

impl RateLimiter {
    pub fn new(limits: &LimitsConfig) -> Self {
        Self {
            concurrency: Arc::new(Semaphore::new(limits.max_concurrency as usize)),
            window: Mutex::new(VecDeque::new()),
            max_calls_per_window: limits.max_calls_per_minute as usize,
            batch_delay: Duration::from_millis(limits.batch_delay_ms),
            performed: AtomicU64::new(0),
        }
    }

    /// Wait for a concurrency slot and a window slot, in that order.
    ///
    /// The window lock is held across the sleep so queued callers are
    /// admitted in the order they arrived.
    pub async fn acquire(&self) -> RatePermit {
        let concurrency = Arc::clone(&self.concurrency)
            .acquire_owned()
            .await
            .unwrap_or_else(|_| unreachable!("semaphore is never closed"));

        let mut window = self.window.lock().await;
        loop {
            let now = Instant::now();
            while let Some(&oldest) = window.front() {
                if now.duration_since(oldest) >= WINDOW {
                    window.pop_front();
                } else {
                    break;
                }
            }
            if window.len() < self.max_calls_per_window {
                break;
            }
            let oldest = window[0];
            let wake_at = oldest + WINDOW;
            tracing::debug!(
                queued = window.len(),
                wait_ms = wake_at.saturating_duration_since(now).as_millis() as u64,
                "rate window full, waiting"
            );
            tokio::time::sleep_until(wake_at).await;
        }
        window.push_back(Instant::now());
        drop(window);

        self.performed.fetch_add(1, Ordering::Relaxed);
        RatePermit {
            _concurrency: concurrency,
        }
    }

    /// Pause inserted between items of a batch operation.
    pub async fn batch_pause(&self) {
        if !self.batch_delay.is_zero() {
            tokio::time::sleep(self.batch_delay).await;
        }
    }

    /// Total admissions since construction.
    pub fn operations_performed(&self) -> u64 {
        self.performed.load(Ordering::Relaxed)
    }
}
