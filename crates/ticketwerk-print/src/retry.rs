// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Retry policy for device delivery: exponential backoff with jitter.
//
// Errors are classified into Transient (auto-retry), UserAction (wait for
// someone to fix the device) and Permanent (give up). What the delivery
// loop does next also depends on whether the printer is still there.

use std::time::Duration;

use tracing::debug;

use ticketwerk_core::config::DeliveryConfig;
use ticketwerk_core::{ErrorClass, LifecycleState, TicketwerkError};

/// Backoff settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Failed attempts after which a job is given up.
    pub max_attempts: u32,
    /// Delay before the first retry; doubles per attempt.
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&DeliveryConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &DeliveryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            base_delay: Duration::from_millis(config.backoff_base_ms),
            max_delay: Duration::from_millis(config.backoff_max_ms),
        }
    }

    /// Backoff before retrying after failed attempt number `attempt`
    /// (1-based).
    ///
    /// delay = min(base * 2^(attempt-1) + jitter, max_delay), with jitter
    /// in [0, base).
    pub fn delay(&self, attempt: u32) -> Duration {
        let base_ms = self.base_delay.as_millis() as u64;
        let exp_ms = base_ms.saturating_mul(1u64 << attempt.saturating_sub(1).min(10));
        let total_ms = exp_ms.saturating_add(jitter(base_ms, attempt));
        Duration::from_millis(total_ms.min(self.max_delay.as_millis() as u64))
    }
}

/// What to do with a job after a failed device write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Try again within this tick after the delay.
    RetryAfter(Duration),
    /// Leave the job pending and end the tick; later jobs wait behind it.
    Defer,
    /// The ledger marked the job failed; report it.
    GiveUp(ErrorClass),
}

/// Classify an error for retry decisions.
pub fn classify_error(err: &TicketwerkError) -> ErrorClass {
    match err {
        TicketwerkError::DeviceBusy(_)
        | TicketwerkError::Timeout(_)
        | TicketwerkError::DeviceLost { .. }
        | TicketwerkError::Probe(_)
        | TicketwerkError::Transport(_)
        | TicketwerkError::Backend { .. } => ErrorClass::Transient,

        TicketwerkError::PermissionDenied { .. }
        | TicketwerkError::CredentialRejected(_)
        | TicketwerkError::MissingCredential
        | TicketwerkError::Config(_) => ErrorClass::UserAction,

        TicketwerkError::InvalidTemplate(_)
        | TicketwerkError::Serialization(_)
        | TicketwerkError::AlreadySettled { .. }
        | TicketwerkError::AlreadyFailed(_)
        | TicketwerkError::StaleAttempt { .. }
        | TicketwerkError::UnknownJob(_)
        | TicketwerkError::NotAmbiguous { .. }
        | TicketwerkError::Ledger(_) => ErrorClass::Permanent,

        TicketwerkError::Io(io_err) => match io_err.kind() {
            std::io::ErrorKind::PermissionDenied => ErrorClass::UserAction,
            _ => ErrorClass::Transient,
        },
    }
}

/// Decide the next step after a write failed with `err` and the ledger
/// recorded the failure as `state`.
pub fn decide(
    err: &TicketwerkError,
    state: LifecycleState,
    attempt: u32,
    policy: &RetryPolicy,
) -> RetryDecision {
    let class = classify_error(err);
    if state == LifecycleState::Failed {
        return RetryDecision::GiveUp(class);
    }
    match err {
        // The printer is there but slow or taken; it is worth waiting.
        TicketwerkError::DeviceBusy(_) | TicketwerkError::Timeout(_) => {
            let delay = policy.delay(attempt);
            debug!(attempt, delay_ms = delay.as_millis() as u64, "scheduling retry");
            RetryDecision::RetryAfter(delay)
        }
        _ => RetryDecision::Defer,
    }
}

/// Deterministic jitter spread across [0, base).
fn jitter(base_ms: u64, attempt: u32) -> u64 {
    let hash = (attempt as u64).wrapping_mul(6364136223846793005);
    hash % base_ms.max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(120),
        }
    }

    #[test]
    fn device_hiccups_are_transient() {
        assert_eq!(
            classify_error(&TicketwerkError::Timeout("30 s".into())),
            ErrorClass::Transient
        );
        assert_eq!(
            classify_error(&TicketwerkError::DeviceLost {
                bytes_sent: 0,
                detail: "gone".into()
            }),
            ErrorClass::Transient
        );
    }

    #[test]
    fn permission_denied_needs_user_action() {
        let err = TicketwerkError::PermissionDenied {
            path: "/dev/usb/lp0".into(),
        };
        assert_eq!(classify_error(&err), ErrorClass::UserAction);
    }

    #[test]
    fn broken_template_is_permanent() {
        let err = TicketwerkError::InvalidTemplate("missing price".into());
        assert_eq!(classify_error(&err), ErrorClass::Permanent);
    }

    #[test]
    fn busy_printer_is_retried_in_place() {
        let err = TicketwerkError::DeviceBusy("held".into());
        assert!(matches!(
            decide(&err, LifecycleState::Pending, 1, &policy()),
            RetryDecision::RetryAfter(_)
        ));
    }

    #[test]
    fn lost_printer_defers_the_job() {
        let err = TicketwerkError::DeviceLost {
            bytes_sent: 10,
            detail: "unplugged".into(),
        };
        assert_eq!(decide(&err, LifecycleState::Pending, 1, &policy()), RetryDecision::Defer);
    }

    #[test]
    fn exhausted_job_is_given_up() {
        let err = TicketwerkError::Timeout("30 s".into());
        assert_eq!(
            decide(&err, LifecycleState::Failed, 5, &policy()),
            RetryDecision::GiveUp(ErrorClass::Transient)
        );
    }

    #[test]
    fn delay_increases_with_attempts() {
        let policy = policy();
        let d1 = policy.delay(1);
        let d2 = policy.delay(2);
        let d3 = policy.delay(3);
        assert!(d1 >= Duration::from_secs(2));
        assert!(d2 > d1);
        assert!(d3 > d2);
    }

    #[test]
    fn delay_capped_at_max() {
        let policy = RetryPolicy {
            max_delay: Duration::from_secs(10),
            ..policy()
        };
        assert!(policy.delay(20) <= Duration::from_secs(10));
    }

    #[test]
    fn policy_follows_delivery_config() {
        let policy = RetryPolicy::from_config(&DeliveryConfig {
            max_attempts: 3,
            backoff_base_ms: 50,
            backoff_max_ms: 400,
        });
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.base_delay, Duration::from_millis(50));
        assert!(policy.delay(10) <= Duration::from_millis(400));
    }
}
