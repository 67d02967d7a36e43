use std::thread;
use std::time::Duration;
use tracing::warn;

use crate::error::Result;

/// Blocking delay between attempts, injectable so tests never sleep.
pub trait Sleeper {
    fn sleep(&self, delay: Duration);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, delay: Duration) {
        thread::sleep(delay);
    }
}

/// Bounded retry with a fixed delay between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one. Always at least one.
    pub max_attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Sleep for the delay, then run attempt number `next_attempt`.
    RetryAfter { delay: Duration, next_attempt: u32 },
    GiveUp,
}

/// Attempt counter driven by a [`RetryPolicy`].
#[derive(Debug, Clone)]
pub struct RetryState {
    policy: RetryPolicy,
    attempt: u32,
}

impl RetryState {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy, attempt: 1 }
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Record a failed attempt and decide what happens next.
    pub fn on_failure(&mut self) -> Step {
        if self.attempt >= self.policy.max_attempts {
            return Step::GiveUp;
        }
        self.attempt += 1;
        Step::RetryAfter {
            delay: self.policy.delay,
            next_attempt: self.attempt,
        }
    }
}

#[derive(Debug)]
pub struct RetryOutcome<T> {
    pub attempts: u32,
    pub result: Result<T>,
}

/// Run `op` until it succeeds or the policy is exhausted. `op` receives the
/// 1-based attempt number.
pub fn run_with_retry<T, F>(
    policy: RetryPolicy,
    sleeper: &dyn Sleeper,
    mut op: F,
) -> RetryOutcome<T>
where
    F: FnMut(u32) -> Result<T>,
{
    let mut state = RetryState::new(policy);
    loop {
        match op(state.attempt()) {
            Ok(value) => {
                return RetryOutcome {
                    attempts: state.attempt(),
                    result: Ok(value),
                }
            }
            Err(err) => {
                let failed = state.attempt();
                match state.on_failure() {
                    Step::RetryAfter { delay, next_attempt } => {
                        warn!(
                            "Attempt {}/{} failed: {}; retrying in {}ms (attempt {})",
                            failed,
                            policy.max_attempts,
                            err,
                            delay.as_millis(),
                            next_attempt
                        );
                        sleeper.sleep(delay);
                    }
                    Step::GiveUp => {
                        warn!("Attempt {}/{} failed: {}", failed, policy.max_attempts, err);
                        return RetryOutcome {
                            attempts: failed,
                            result: Err(err),
                        };
                    }
                }
            }
        }
    }
}
