use std::time::Duration;
use tokio::time::Instant;

/// Per-endpoint request budget.
///
/// Refills continuously at `refill_rate` tokens per second up to `capacity`. A rate of zero
/// disables limiting for the endpoint.
#[derive(Debug, Clone)]
pub struct TokenBucket {
    capacity: f64,
    refill_rate: f64,
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    #[must_use]
    pub fn new(capacity: u32, refill_rate: f64) -> Self {
        let capacity = f64::from(capacity.max(1));
        Self { capacity, refill_rate, tokens: capacity, last_refill: Instant::now() }
    }

    #[must_use]
    pub fn is_unlimited(&self) -> bool {
        self.refill_rate <= 0.0
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill);
        let tokens_to_add = (elapsed.as_secs_f64() * self.refill_rate).min(self.capacity);

        if tokens_to_add > 0.0 {
            self.tokens = (self.tokens + tokens_to_add).min(self.capacity);
            self.last_refill = now;
        }
    }

    /// Takes one token if available.
    pub fn try_acquire(&mut self, now: Instant) -> bool {
        if self.is_unlimited() {
            return true;
        }
        self.refill(now);

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Tokens currently available, after refilling up to `now`.
    pub fn available(&mut self, now: Instant) -> f64 {
        if self.is_unlimited() {
            return self.capacity;
        }
        self.refill(now);
        self.tokens
    }

    /// Time until one token is available. Zero if one is available now.
    pub fn time_until_ready(&mut self, now: Instant) -> Duration {
        if self.is_unlimited() {
            return Duration::ZERO;
        }
        self.refill(now);
        if self.tokens >= 1.0 {
            Duration::ZERO
        } else {
            // Rounded up so a caller sleeping this long always finds a whole token.
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let millis = ((1.0 - self.tokens) / self.refill_rate * 1000.0).ceil() as u64;
            Duration::from_millis(millis)
        }
    }

    /// Empties the bucket, used when the endpoint itself reports a rate limit.
    pub fn drain(&mut self, now: Instant) {
        self.refill(now);
        self.tokens = 0.0;
        self.last_refill = now;
    }
}
