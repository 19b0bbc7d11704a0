//! Send pacing for one campaign.
//!
//! Two constraints apply before every send:
//! - at least `delay` since the previous send
//! - at most `hourly_limit` sends in any rolling 60-minute window
//!
//! The throttle only computes waits; the caller sleeps. Time is passed in
//! explicitly so the arithmetic is testable without a clock.

use std::collections::VecDeque;

use chrono::{DateTime, Duration, Utc};

fn window() -> Duration {
    Duration::hours(1)
}

#[derive(Debug, Clone)]
pub struct Throttle {
    delay: Duration,
    hourly_limit: Option<usize>,
    /// Send timestamps inside the current window, oldest first.
    recent: VecDeque<DateTime<Utc>>,
}

impl Throttle {
    /// Non-positive limits are treated as "no limit"; negative delays as zero.
    pub fn new(delay_seconds: i32, speed_limit_per_hour: Option<i32>) -> Self {
        Self {
            delay: Duration::seconds(i64::from(delay_seconds.max(0))),
            hourly_limit: speed_limit_per_hour
                .filter(|limit| *limit > 0)
                .map(|limit| limit as usize),
            recent: VecDeque::new(),
        }
    }

    /// Prime the window with sends that happened before this throttle
    /// existed, e.g. after a pause/resume or a process restart.
    pub fn seed<I>(&mut self, sends: I)
    where
        I: IntoIterator<Item = DateTime<Utc>>,
    {
        let mut sends: Vec<_> = sends.into_iter().collect();
        sends.sort();
        for at in sends {
            self.record(at);
        }
    }

    fn prune(&mut self, now: DateTime<Utc>) {
        while let Some(oldest) = self.recent.front() {
            if now - *oldest >= window() {
                self.recent.pop_front();
            } else {
                break;
            }
        }
    }

    /// How long to wait from `now` before the next send is allowed.
    pub fn wait_time(&mut self, now: DateTime<Utc>) -> Duration {
        self.prune(now);

        let mut wait = Duration::zero();

        if let Some(last) = self.recent.back() {
            let since_last = now - *last;
            if since_last < self.delay {
                wait = self.delay - since_last;
            }
        }

        if let Some(limit) = self.hourly_limit {
            if self.recent.len() >= limit {
                // The send that frees a slot is the one `limit` positions
                // from the end of the window.
                let freeing = self.recent[self.recent.len() - limit];
                let until_free = freeing + window() - now;
                if until_free > wait {
                    wait = until_free;
                }
            }
        }

        wait
    }

    pub fn record(&mut self, at: DateTime<Utc>) {
        self.recent.push_back(at);
        // Older entries beyond what the limit needs can never matter.
        let keep = self.hourly_limit.unwrap_or(1).max(1);
        while self.recent.len() > keep {
            self.recent.pop_front();
        }
    }
}

/// Exponential backoff between attempts of one delivery.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay_secs: u64) -> Self {
        let max_delay = Duration::hours(1);
        let base_delay = i64::try_from(base_delay_secs)
            .ok()
            .and_then(Duration::try_seconds)
            .map_or(max_delay, |base| base.min(max_delay));
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
        }
    }

    /// Delay before the retry that follows attempt number `attempts`
    /// (1-based), or `None` once attempts are exhausted.
    pub fn backoff(&self, attempts: u32) -> Option<Duration> {
        if attempts >= self.max_attempts {
            return None;
        }
        let exponent = attempts.saturating_sub(1).min(20);
        let delay = self.base_delay * 2i32.pow(exponent);
        Some(delay.min(self.max_delay))
    }
}
