use std::thread;
use std::time::Duration;

use tracing::debug;

use crate::error::ResolverError;

/// Exponential backoff: `base`, `2*base`, `4*base`, ... capped at `max_delay`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub attempt: u32,
    pub next_delay: Duration,
}

impl RetryPolicy {
    pub fn no_delay(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    pub fn start(&self) -> Backoff {
        Backoff {
            attempt: 1,
            next_delay: self.base_delay.min(self.max_delay),
        }
    }

    pub fn advance(&self, state: Backoff) -> Option<Backoff> {
        if state.attempt >= self.max_attempts.max(1) {
            return None;
        }
        Some(Backoff {
            attempt: state.attempt + 1,
            next_delay: state.next_delay.saturating_mul(2).min(self.max_delay),
        })
    }

    pub fn schedule(&self) -> Vec<Duration> {
        let mut delays = Vec::new();
        let mut state = self.start();
        while let Some(next) = self.advance(state) {
            delays.push(state.next_delay);
            state = next;
        }
        delays
    }

    pub fn run<T, F>(&self, label: &str, mut op: F) -> Result<T, ResolverError>
    where
        F: FnMut(u32) -> Result<T, ResolverError>,
    {
        let mut state = self.start();
        loop {
            match op(state.attempt) {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() => match self.advance(state) {
                    Some(next) => {
                        debug!(
                            op = label,
                            attempt = state.attempt,
                            delay_ms = state.next_delay.as_millis() as u64,
                            error = %err,
                            "transient failure, retrying"
                        );
                        thread::sleep(state.next_delay);
                        state = next;
                    }
                    None => return Err(err),
                },
                Err(err) => return Err(err),
            }
        }
    }
}
