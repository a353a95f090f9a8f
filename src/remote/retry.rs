//! Per-page retry state machine
//!
//! ```text
//! Pending ──attempt──▶ Succeeded
//!    │
//!    └─transient──▶ Retrying(1) ──transient──▶ Retrying(2) … ──▶ FailedTerminal
//!                        │                                          ▲
//!                        └──────────────fatal───────────────────────┘
//! ```
//!
//! `Retrying(n)` means `n` attempts have failed and another is due after
//! [`backoff_delay`]. The number of attempts never exceeds
//! [`RetryPolicy::max_attempts`].

use crate::config::RetryPolicy;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageState {
    Pending,
    Retrying(u32),
    Succeeded,
    FailedTerminal,
}

/// Classified result of one attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    Success,
    Transient,
    Fatal,
}

impl PageState {
    /// Number of attempts already made
    pub fn failed_attempts(&self) -> u32 {
        match self {
            Self::Retrying(n) => *n,
            _ => 0,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::FailedTerminal)
    }

    /// Transition after an attempt
    pub fn advance(self, outcome: AttemptOutcome, policy: &RetryPolicy) -> PageState {
        match (self, outcome) {
            (Self::Succeeded, _) | (Self::FailedTerminal, _) => self,
            (_, AttemptOutcome::Success) => Self::Succeeded,
            (_, AttemptOutcome::Fatal) => Self::FailedTerminal,
            (state, AttemptOutcome::Transient) => {
                let failed = state.failed_attempts() + 1;
                if failed >= policy.max_attempts {
                    Self::FailedTerminal
                } else {
                    Self::Retrying(failed)
                }
            }
        }
    }
}

/// Delay before the next attempt after `failed_attempts` failures:
/// `base * 2^(failed_attempts - 1)`, capped at `max_delay`.
pub fn backoff_delay(policy: &RetryPolicy, failed_attempts: u32) -> Duration {
    if failed_attempts == 0 {
        return Duration::ZERO;
    }
    let factor = 1u32
        .checked_shl(failed_attempts - 1)
        .unwrap_or(u32::MAX);
    policy
        .base_delay
        .checked_mul(factor)
        .unwrap_or(policy.max_delay)
        .min(policy.max_delay)
}
