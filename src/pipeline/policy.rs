//! Retry and fallback decisions for a single stage.
//!
//! The policy is pure: given the failure of an attempt and where the stage
//! stands (attempt number, position in the fallback chain) it says whether to
//! repeat the attempt, degrade to the next option set, or give up. It never
//! authorizes another attempt for a failure that is not retryable.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::stages::{StageError, StageOptions};

/// Delay between attempts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Backoff {
    None,
    Fixed {
        delay_ms: u64,
    },
    Exponential {
        initial_ms: u64,
        max_ms: u64,
        #[serde(default = "default_multiplier")]
        multiplier: f64,
    },
}

fn default_multiplier() -> f64 {
    2.0
}

impl Default for Backoff {
    fn default() -> Self {
        Backoff::Exponential {
            initial_ms: 500,
            max_ms: 8_000,
            multiplier: default_multiplier(),
        }
    }
}

impl Backoff {
    /// Delay to wait after the given (1-based) failed attempt.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        match self {
            Backoff::None => Duration::ZERO,
            Backoff::Fixed { delay_ms } => Duration::from_millis(*delay_ms),
            Backoff::Exponential {
                initial_ms,
                max_ms,
                multiplier,
            } => {
                let exponent = attempt.saturating_sub(1) as i32;
                let millis = (*initial_ms as f64) * multiplier.max(1.0).powi(exponent);
                Duration::from_millis(millis.min(*max_ms as f64) as u64)
            }
        }
    }
}

/// Why a stage stopped retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Escalation {
    /// The failure can never succeed on retry.
    NotRetryable,
    /// `max_attempts` was reached.
    AttemptsExhausted,
    /// The failure asked for degraded options and none are left.
    FallbackExhausted,
}

impl std::fmt::Display for Escalation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Escalation::NotRetryable => "not retryable",
            Escalation::AttemptsExhausted => "retry budget exhausted",
            Escalation::FallbackExhausted => "fallback chain exhausted",
        };
        f.write_str(s)
    }
}

/// What to do after a failed attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum RetryDecision {
    /// Same options again.
    Retry { delay: Duration },
    /// Next entry of the fallback chain.
    Fallback {
        options: StageOptions,
        delay: Duration,
    },
    Escalate(Escalation),
}

/// Where a stage stands between attempts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryState {
    /// Number of attempts made so far.
    pub attempts: u32,
    /// Index of the option set used by the last attempt.
    pub chain_position: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    #[serde(default)]
    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Backoff::default(),
        }
    }
}

/// A policy bound to one stage's fallback chain.
#[derive(Debug, Clone, PartialEq)]
pub struct StagePolicy {
    retry: RetryPolicy,
    chain: Vec<StageOptions>,
}

impl StagePolicy {
    /// An empty chain behaves like a single default option set.
    pub fn new(retry: RetryPolicy, chain: Vec<StageOptions>) -> Self {
        let chain = if chain.is_empty() {
            vec![StageOptions::default()]
        } else {
            chain
        };
        Self { retry, chain }
    }

    pub fn max_attempts(&self) -> u32 {
        self.retry.max_attempts.max(1)
    }

    pub fn chain(&self) -> &[StageOptions] {
        &self.chain
    }

    /// Options of the first attempt.
    pub fn initial_options(&self) -> &StageOptions {
        &self.chain[0]
    }

    pub fn options_at(&self, position: usize) -> Option<&StageOptions> {
        self.chain.get(position)
    }

    pub fn decide(&self, state: &RetryState, failure: &StageError) -> RetryDecision {
        if !failure.is_retryable() {
            return RetryDecision::Escalate(Escalation::NotRetryable);
        }

        if failure.wants_fallback() && state.chain_position + 1 >= self.chain.len() {
            return RetryDecision::Escalate(Escalation::FallbackExhausted);
        }

        if state.attempts >= self.max_attempts() {
            return RetryDecision::Escalate(Escalation::AttemptsExhausted);
        }

        let delay = self.retry.backoff.delay_after(state.attempts);
        if failure.wants_fallback() {
            RetryDecision::Fallback {
                options: self.chain[state.chain_position + 1].clone(),
                delay,
            }
        } else {
            RetryDecision::Retry { delay }
        }
    }
}
