// src/crm/retry.rs
use crate::crm::error::CrmError;
use rand::Rng;
use std::time::Duration;

#[derive(Debug, Clone, Copy)]
pub enum Backoff {
    /// delay = base × 2^(attempt-1), capped.
    Exponential,
    /// Same delay every attempt, for callers where growth is undesired.
    Fixed,
}

/// Reusable retry wrapper for fallible CRM calls. Retries transient errors
/// only; validation, auth and structural failures pass straight through.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub backoff: Backoff,
}

const MAX_BACKOFF: Duration = Duration::from_secs(10);
const JITTER_MAX_MS: u64 = 500;

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            backoff: Backoff::Exponential,
        }
    }
}

impl RetryPolicy {
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay: delay,
            backoff: Backoff::Fixed,
        }
    }

    /// Runs the operation, sleeping between failed attempts and re-raising
    /// the last error once attempts are exhausted.
    pub fn run<T, F>(&self, what: &str, mut op: F) -> Result<T, CrmError>
    where
        F: FnMut() -> Result<T, CrmError>,
    {
        let mut last_err = None;

        for attempt in 1..=self.max_attempts.max(1) {
            match op() {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() => {
                    eprintln!(
                        "⚠️ {what} failed (attempt {attempt}/{}): {e}",
                        self.max_attempts
                    );
                    last_err = Some(e);
                    if attempt < self.max_attempts {
                        std::thread::sleep(self.delay_for(attempt));
                    }
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_err.unwrap_or_else(|| CrmError::Transient(format!("{what}: no attempts made"))))
    }

    fn delay_for(&self, attempt: u32) -> Duration {
        let base = match self.backoff {
            Backoff::Fixed => self.base_delay,
            Backoff::Exponential => {
                let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
                self.base_delay.saturating_mul(factor).min(MAX_BACKOFF)
            }
        };
        let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..=JITTER_MAX_MS));
        base + jitter
    }
}
