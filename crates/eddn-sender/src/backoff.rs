use std::time::Duration;

use eddn_core::RelayConfig;

/// Exponential backoff schedule for transiently failed deliveries.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter_factor: f64,
}

impl RetryPolicy {
    pub fn from_config(config: &RelayConfig) -> Self {
        Self {
            base_delay: config.base_delay(),
            max_delay: config.max_delay(),
            jitter_factor: config.jitter_factor,
        }
    }

    /// Delay before the next attempt after `failures` consecutive failures
    /// (1-based). A server-suggested delay (Retry-After) wins outright.
    pub fn delay_for(&self, failures: u32, suggested: Option<Duration>) -> Duration {
        if let Some(delay) = suggested {
            return delay;
        }

        // Exponential backoff: base * 2^(failures - 1)
        let exponent = failures.saturating_sub(1).min(31);
        let exp_delay = self.base_delay.as_millis() as f64 * 2.0_f64.powi(exponent as i32);
        let capped = exp_delay.min(self.max_delay.as_millis() as f64);

        // Add jitter: delay * (1 +/- jitter_factor)
        let jitter_range = capped * self.jitter_factor;
        let jitter = (random_u64() % (jitter_range as u64 * 2 + 1)) as f64 - jitter_range;
        let final_ms = (capped + jitter).max(0.0);

        Duration::from_millis(final_ms as u64)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RelayConfig::default())
    }
}

/// Simple non-cryptographic random u64 using thread-local state.
fn random_u64() -> u64 {
    use std::cell::Cell;
    use std::time::SystemTime;

    thread_local! {
        static STATE: Cell<u64> = Cell::new(
            SystemTime::now()
                .duration_since(SystemTime::UNIX_EPOCH)
                .unwrap_or_default()
                .as_nanos() as u64
                | 1
        );
    }

    STATE.with(|s| {
        // xorshift64
        let mut x = s.get();
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        s.set(x);
        x
    })
}
