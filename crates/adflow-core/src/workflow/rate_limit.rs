//! Sliding-window rate limiter for outbound platform calls.
//!
//! Keeps the instants of recent calls in a `VecDeque`. A caller that finds
//! the window full sleeps until the oldest call leaves it and then checks
//! again, so any trailing window of `window` length never holds more than
//! `max_calls` acquisitions. One limiter is shared by every workflow.

use std::collections::VecDeque;
use std::time::Duration;

use adflow_types::config::RateLimitConfig;
use tokio::sync::Mutex;
use tokio::time::Instant;

#[derive(Debug)]
pub struct RateLimiter {
    max_calls: usize,
    window: Duration,
    calls: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new(max_calls: usize, window: Duration) -> Self {
        Self {
            // A zero ceiling would block forever.
            max_calls: max_calls.max(1),
            window,
            calls: Mutex::new(VecDeque::new()),
        }
    }

    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(config.max_calls, config.window())
    }

    /// Wait until a call slot is free, then take it.
    pub async fn acquire(&self) {
        loop {
            let wait_until = {
                let mut calls = self.calls.lock().await;
                let now = Instant::now();
                self.prune(&mut calls, now);
                if calls.len() < self.max_calls {
                    calls.push_back(now);
                    return;
                }
                match calls.front() {
                    Some(oldest) => *oldest + self.window,
                    None => now,
                }
            };

            tracing::debug!(
                wait_ms = wait_until
                    .saturating_duration_since(Instant::now())
                    .as_millis() as u64,
                "rate limit window full, waiting"
            );
            tokio::time::sleep_until(wait_until).await;
        }
    }

    /// Take a slot if one is free right now.
    pub async fn try_acquire(&self) -> bool {
        let mut calls = self.calls.lock().await;
        let now = Instant::now();
        self.prune(&mut calls, now);
        if calls.len() < self.max_calls {
            calls.push_back(now);
            true
        } else {
            false
        }
    }

    /// Slots available in the current window.
    pub async fn headroom(&self) -> usize {
        let mut calls = self.calls.lock().await;
        self.prune(&mut calls, Instant::now());
        self.max_calls - calls.len()
    }

    fn prune(&self, calls: &mut VecDeque<Instant>, now: Instant) {
        while let Some(oldest) = calls.front() {
            if now.duration_since(*oldest) >= self.window {
                calls.pop_front();
            } else {
                break;
            }
        }
    }
}
