//! Supervision policy for projection failures.
//!
//! The dispatcher never swallows a projection error; it returns it with
//! context. The worker hosting the dispatch loop asks a [`Supervisor`] what to
//! do about it. [`DecisionTable`] is the default, data-driven policy:
//!
//! | failure kind                | strategy                     |
//! |-----------------------------|------------------------------|
//! | Validation, Business        | resume (skip the entry)      |
//! | Corruption, Serialization   | restart (reset, then resume) |
//! | Storage, Concurrency        | retry with backoff, then resume |
//! | Misuse                      | stop                         |

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use chronicle_core::FailureKind;

use crate::projections::DispatchError;

/// What the host should do after a failed dispatch.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Directive {
    /// Skip the failed entry and continue with the next one.
    Resume,
    /// Reset the failing projection's state, then continue with the next entry.
    Restart,
    /// Dispatch the same entry again after the delay.
    RetryAfter(Duration),
    /// Stop the dispatch loop; the failed entry is re-read by the next worker.
    Stop,
}

/// Decides a directive for a dispatch failure.
///
/// `attempt` is 1 on the first failure of a given entry and increases while
/// the same entry keeps failing under `RetryAfter`.
pub trait Supervisor: Send + Sync {
    fn decide(&self, failure: &DispatchError, attempt: u32) -> Directive;
}

/// Backoff strategy for retry delays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Same delay every attempt.
    Fixed,
    /// Delay doubles each attempt: base * 2^(attempt-1).
    Exponential,
}

/// Bounded retry with backoff.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of retry attempts (0 = no retries)
    pub max_attempts: u32,
    /// Base delay between retries
    pub base_delay: Duration,
    /// Maximum delay cap
    pub max_delay: Duration,
    pub strategy: BackoffStrategy,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(60),
            strategy: BackoffStrategy::Exponential,
        }
    }
}

impl RetryPolicy {
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 0,
            ..Default::default()
        }
    }

    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay: delay,
            max_delay: delay,
            strategy: BackoffStrategy::Fixed,
        }
    }

    pub fn exponential(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
            strategy: BackoffStrategy::Exponential,
        }
    }

    /// Delay before the given attempt (1-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let delay = match self.strategy {
            BackoffStrategy::Fixed => self.base_delay,
            BackoffStrategy::Exponential => {
                let factor = 2u32.saturating_pow(attempt - 1);
                self.base_delay.saturating_mul(factor)
            }
        };
        delay.min(self.max_delay)
    }

    pub fn allows(&self, attempt: u32) -> bool {
        attempt <= self.max_attempts
    }
}

/// Table entry: how a failure kind is handled.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    Resume,
    Restart,
    Retry,
    Stop,
}

/// Data-driven supervisor: `FailureKind -> Strategy`, plus a retry policy.
#[derive(Debug, Clone)]
pub struct DecisionTable {
    rules: HashMap<FailureKind, Strategy>,
    retry: RetryPolicy,
}

impl Default for DecisionTable {
    fn default() -> Self {
        let rules = HashMap::from([
            (FailureKind::Validation, Strategy::Resume),
            (FailureKind::Business, Strategy::Resume),
            (FailureKind::Corruption, Strategy::Restart),
            (FailureKind::Serialization, Strategy::Restart),
            (FailureKind::Storage, Strategy::Retry),
            (FailureKind::Concurrency, Strategy::Retry),
            (FailureKind::Misuse, Strategy::Stop),
        ]);

        Self {
            rules,
            retry: RetryPolicy::default(),
        }
    }
}

impl DecisionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rule(mut self, kind: FailureKind, strategy: Strategy) -> Self {
        self.rules.insert(kind, strategy);
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn strategy_for(&self, kind: FailureKind) -> Strategy {
        self.rules.get(&kind).copied().unwrap_or(Strategy::Resume)
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Directive for a failure kind at the given attempt.
    pub fn directive_for(&self, kind: FailureKind, attempt: u32) -> Directive {
        match self.strategy_for(kind) {
            Strategy::Resume => Directive::Resume,
            Strategy::Restart => Directive::Restart,
            Strategy::Stop => Directive::Stop,
            // Retries exhausted: give up on the entry and move on.
            Strategy::Retry if !self.retry.allows(attempt) => Directive::Resume,
            Strategy::Retry => Directive::RetryAfter(self.retry.delay_for_attempt(attempt)),
        }
    }
}

impl Supervisor for DecisionTable {
    fn decide(&self, failure: &DispatchError, attempt: u32) -> Directive {
        self.directive_for(failure.kind(), attempt)
    }
}
