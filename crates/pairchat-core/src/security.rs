use std::{
    collections::HashMap,
    time::{Duration, Instant},
};

use crate::domain::UserId;

// ============== Admin Check ==============

/// Admin commands are refused outright when no admins are configured.
pub fn is_admin(user_id: Option<UserId>, admin_ids: &[i64]) -> bool {
    let Some(user_id) = user_id else {
        return false;
    };
    admin_ids.contains(&user_id.0)
}

// ============== Relay Flood Control (Token Bucket) ==============

#[derive(Clone, Debug)]
struct Bucket {
    tokens: f64,
    last_update: Instant,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum RateDecision {
    Allowed,
    Limited { retry_after: Duration },
}

/// Per-user token bucket applied to relayed messages.
#[derive(Clone, Debug)]
pub struct RelayLimiter {
    enabled: bool,
    max_tokens: f64,
    refill_per_sec: f64,
    buckets: HashMap<UserId, Bucket>,
}

impl RelayLimiter {
    /// `max_messages` per `window`, refilled continuously.
    pub fn new(enabled: bool, max_messages: u32, window: Duration) -> Self {
        let max_tokens = max_messages as f64;
        let window_secs = window.as_secs_f64().max(1e-9);

        Self {
            enabled,
            max_tokens,
            refill_per_sec: max_tokens / window_secs,
            buckets: HashMap::new(),
        }
    }

    pub fn check(&mut self, user_id: UserId) -> RateDecision {
        self.check_at(user_id, Instant::now())
    }

    pub fn check_at(&mut self, user_id: UserId, now: Instant) -> RateDecision {
        if !self.enabled {
            return RateDecision::Allowed;
        }

        let bucket = self.buckets.entry(user_id).or_insert_with(|| Bucket {
            tokens: self.max_tokens,
            last_update: now,
        });

        let elapsed = now.duration_since(bucket.last_update).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.refill_per_sec).min(self.max_tokens);
        bucket.last_update = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            return RateDecision::Allowed;
        }

        let secs = (1.0 - bucket.tokens) / self.refill_per_sec;
        RateDecision::Limited {
            retry_after: Duration::from_secs_f64(secs.max(0.0)),
        }
    }

    /// Drop buckets that have refilled completely; they carry no information.
    pub fn prune_at(&mut self, now: Instant) {
        let (max, rate) = (self.max_tokens, self.refill_per_sec);
        self.buckets.retain(|_, b| {
            let elapsed = now.duration_since(b.last_update).as_secs_f64();
            b.tokens + elapsed * rate < max
        });
    }

    pub fn tracked_users(&self) -> usize {
        self.buckets.len()
    }
}
