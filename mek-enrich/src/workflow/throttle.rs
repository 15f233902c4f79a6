//! Process-wide per-source call spacing
//!
//! One `governor` direct limiter per source kind, built once per run and
//! shared by every worker. A zero interval means the source is not throttled.

use crate::types::SourceKind;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use std::collections::HashMap;
use std::time::Duration;

#[derive(Default)]
pub struct SourceThrottle {
    limiters: HashMap<SourceKind, DefaultDirectRateLimiter>,
}

impl SourceThrottle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from (source, minimum spacing) pairs
    pub fn from_intervals<I>(intervals: I) -> Self
    where
        I: IntoIterator<Item = (SourceKind, Duration)>,
    {
        let mut throttle = Self::new();
        for (source, interval) in intervals {
            throttle.set_interval(source, interval);
        }
        throttle
    }

    pub fn set_interval(&mut self, source: SourceKind, interval: Duration) {
        // Quota::with_period rejects a zero period; zero means unlimited
        match Quota::with_period(interval) {
            Some(quota) => {
                self.limiters.insert(source, RateLimiter::direct(quota));
            }
            None => {
                self.limiters.remove(&source);
            }
        }
    }

    pub fn is_limited(&self, source: SourceKind) -> bool {
        self.limiters.contains_key(&source)
    }

    /// Wait until a call to `source` is allowed
    pub async fn acquire(&self, source: SourceKind) {
        if let Some(limiter) = self.limiters.get(&source) {
            limiter.until_ready().await;
        }
    }
}
