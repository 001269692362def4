use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::config::env_parse;
use crate::errors::AppError;

#[derive(Debug, Clone, Copy)]
pub struct ThrottleConfig {
    pub max_attempts: u32,
    pub decay: Duration,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            decay: Duration::from_secs(60),
        }
    }
}

impl ThrottleConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let defaults = Self::default();
        let max_attempts = env_parse("LOGIN_MAX_ATTEMPTS", defaults.max_attempts)?;
        let decay = env_parse("LOGIN_DECAY_SECONDS", defaults.decay.as_secs()).map(Duration::from_secs)?;

        if max_attempts == 0 {
            return Err(AppError::configuration("LOGIN_MAX_ATTEMPTS must be at least 1"));
        }

        Ok(Self { max_attempts, decay })
    }
}

/// Throttle bucket key: lowercased email and client address.
pub fn throttle_key(email: &str, client: &str) -> String {
    format!("{}|{}", email.trim().to_lowercase(), client)
}

/// Bucket count above which a failed attempt first sweeps expired buckets.
const PRUNE_THRESHOLD: usize = 1024;

#[derive(Debug, Clone, Copy)]
struct Bucket {
    attempts: u32,
    window_started: Instant,
}

/// Counts failed logins per key within a fixed decay window.
#[derive(Debug)]
pub struct LoginThrottle {
    config: ThrottleConfig,
    buckets: DashMap<String, Bucket>,
}

impl LoginThrottle {
    pub fn new(config: ThrottleConfig) -> Self {
        Self {
            config,
            buckets: DashMap::new(),
        }
    }

    pub fn config(&self) -> ThrottleConfig {
        self.config
    }

    /// Time left until `key` may try again, if it is currently locked out.
    pub fn too_many_attempts(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        let bucket = *self.buckets.get(key)?;

        let elapsed = now.duration_since(bucket.window_started);
        if elapsed >= self.config.decay {
            self.buckets.remove(key);
            return None;
        }

        (bucket.attempts >= self.config.max_attempts).then(|| self.config.decay - elapsed)
    }

    /// Records one failure and returns the attempt count within the window.
    pub fn hit(&self, key: &str) -> u32 {
        if self.buckets.len() >= PRUNE_THRESHOLD {
            self.prune();
        }

        let now = Instant::now();
        let decay = self.config.decay;

        let mut bucket = self.buckets.entry(key.to_string()).or_insert(Bucket {
            attempts: 0,
            window_started: now,
        });

        if now.duration_since(bucket.window_started) >= decay {
            bucket.attempts = 0;
            bucket.window_started = now;
        }
        bucket.attempts += 1;
        bucket.attempts
    }

    pub fn clear(&self, key: &str) {
        self.buckets.remove(key);
    }

    /// Drops every bucket whose window has elapsed.
    pub fn prune(&self) {
        let decay = self.config.decay;
        let before = self.buckets.len();
        self.buckets.retain(|_, bucket| bucket.window_started.elapsed() < decay);

        let removed = before.saturating_sub(self.buckets.len());
        if removed > 0 {
            tracing::debug!(removed, remaining = self.buckets.len(), "pruned expired login throttle buckets");
        }
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn throttle(max_attempts: u32, decay: Duration) -> LoginThrottle {
        LoginThrottle::new(ThrottleConfig { max_attempts, decay })
    }

    #[test]
    fn keys_ignore_email_case() {
        assert_eq!(throttle_key(" Ada@Example.com", "10.0.0.1"), "ada@example.com|10.0.0.1");
    }

    #[test]
    fn locks_after_max_attempts() {
        let t = throttle(3, Duration::from_secs(60));
        let key = throttle_key("ada@example.com", "127.0.0.1");

        for _ in 0..2 {
            t.hit(&key);
            assert!(t.too_many_attempts(&key).is_none());
        }
        t.hit(&key);

        let retry = t.too_many_attempts(&key).expect("should be locked");
        assert!(retry <= Duration::from_secs(60));
        assert!(t.too_many_attempts(&throttle_key("ada@example.com", "127.0.0.2")).is_none());
    }

    #[test]
    fn clear_resets_the_bucket() {
        let t = throttle(1, Duration::from_secs(60));
        t.hit("k");
        assert!(t.too_many_attempts("k").is_some());
        t.clear("k");
        assert!(t.too_many_attempts("k").is_none());
    }

    #[test]
    fn window_expiry_unlocks() {
        let t = throttle(1, Duration::from_millis(0));
        t.hit("k");
        assert!(t.too_many_attempts("k").is_none());
        assert_eq!(t.hit("k"), 1);
    }

    #[test]
    fn prune_drops_only_expired_buckets() {
        let expired = throttle(5, Duration::from_millis(0));
        expired.hit("a");
        expired.hit("b");
        expired.prune();
        assert!(expired.is_empty());

        let live = throttle(5, Duration::from_secs(60));
        live.hit("a");
        live.prune();
        assert_eq!(live.len(), 1);
    }

    #[test]
    fn sprayed_failures_do_not_grow_without_bound() {
        let t = throttle(5, Duration::from_millis(0));
        for i in 0..PRUNE_THRESHOLD * 3 {
            t.hit(&throttle_key(&format!("user{}@example.com", i), "10.0.0.1"));
        }
        assert!(t.len() <= PRUNE_THRESHOLD, "{} buckets kept", t.len());
    }
}
