//! Retry controller.
//!
//! Only transient failures are retried. Permanent and precondition failures
//! end the attempt sequence immediately without consuming further attempts.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};
use wavegate_types::{Classify, ErrorClass, RetryPolicy, ServiceUnit};

/// What to do after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Wait, then attempt again.
    RetryAfter(Duration),
    /// Stop; the failure is final.
    GiveUp(GiveUpReason),
}

/// Why retrying stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GiveUpReason {
    /// All attempts used.
    Exhausted { attempts: u32 },
    /// The error class is never retried.
    NotRetryable(ErrorClass),
}

/// Final failure of a retried operation.
#[derive(Debug, Clone)]
pub struct RetryFailure<E> {
    pub error: E,
    pub attempts: u32,
    pub reason: GiveUpReason,
}

impl<E: Display> Display for RetryFailure<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.reason {
            GiveUpReason::Exhausted { attempts } => {
                write!(f, "{} (gave up after {} attempts)", self.error, attempts)
            }
            GiveUpReason::NotRetryable(class) => {
                write!(f, "{} ({:?}, not retried)", self.error, class)
            }
        }
    }
}

/// Applies retry policies with exponential backoff.
#[derive(Debug, Clone, Default)]
pub struct RetryController {
    defaults: RetryPolicy,
}

impl RetryController {
    pub fn new(defaults: RetryPolicy) -> Self {
        Self { defaults }
    }

    pub fn defaults(&self) -> &RetryPolicy {
        &self.defaults
    }

    /// The unit's own policy, or the run default.
    pub fn policy_for(&self, unit: &ServiceUnit) -> RetryPolicy {
        unit.retry.clone().unwrap_or_else(|| self.defaults.clone())
    }

    /// Decides after `attempts_made` attempts, the last failing with `class`.
    pub fn decide(&self, policy: &RetryPolicy, attempts_made: u32, class: ErrorClass) -> RetryDecision {
        if !class.is_retryable() {
            return RetryDecision::GiveUp(GiveUpReason::NotRetryable(class));
        }
        if !policy.allows_another(attempts_made) {
            return RetryDecision::GiveUp(GiveUpReason::Exhausted {
                attempts: attempts_made,
            });
        }
        RetryDecision::RetryAfter(policy.delay_before_retry(attempts_made))
    }

    /// Runs `op` until it succeeds or the policy gives up.
    ///
    /// `op` receives the 1-based attempt number.
    pub async fn run<T, E, F, Fut>(
        &self,
        policy: &RetryPolicy,
        operation: &str,
        mut op: F,
    ) -> Result<T, RetryFailure<E>>
    where
        E: Classify + Display,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let error = match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };

            match self.decide(policy, attempt, error.class()) {
                RetryDecision::RetryAfter(delay) => {
                    debug!(
                        operation,
                        attempt,
                        delay_secs = delay.as_secs(),
                        error = %error,
                        "Retrying after transient failure"
                    );
                    tokio::time::sleep(delay).await;
                }
                RetryDecision::GiveUp(reason) => {
                    warn!(operation, attempt, error = %error, ?reason, "Giving up");
                    return Err(RetryFailure {
                        error,
                        attempts: attempt,
                        reason,
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;
    use wavegate_cluster::ClusterError;

    #[test]
    fn permanent_errors_are_not_retried() {
        let controller = RetryController::default();
        let policy = RetryPolicy::default();
        assert_eq!(
            controller.decide(&policy, 1, ErrorClass::Permanent),
            RetryDecision::GiveUp(GiveUpReason::NotRetryable(ErrorClass::Permanent))
        );
        assert_eq!(
            controller.decide(&policy, 1, ErrorClass::Precondition),
            RetryDecision::GiveUp(GiveUpReason::NotRetryable(ErrorClass::Precondition))
        );
    }

    #[test]
    fn transient_errors_back_off_until_exhausted() {
        let controller = RetryController::default();
        let policy = RetryPolicy::default();
        assert_eq!(
            controller.decide(&policy, 1, ErrorClass::Transient),
            RetryDecision::RetryAfter(Duration::from_secs(5))
        );
        assert_eq!(
            controller.decide(&policy, 2, ErrorClass::Transient),
            RetryDecision::RetryAfter(Duration::from_secs(10))
        );
        assert_eq!(
            controller.decide(&policy, 3, ErrorClass::Transient),
            RetryDecision::GiveUp(GiveUpReason::Exhausted { attempts: 3 })
        );
    }

    #[test]
    fn unit_override_wins() {
        let controller = RetryController::default();
        let custom = RetryPolicy {
            max_attempts: 7,
            ..RetryPolicy::default()
        };
        let unit = ServiceUnit::new("a", "primary", "a.yaml").with_retry(custom.clone());
        assert_eq!(controller.policy_for(&unit), custom);
        assert_eq!(
            controller.policy_for(&ServiceUnit::new("b", "primary", "b.yaml")),
            RetryPolicy::default()
        );
    }

    #[tokio::test(start_paused = true)]
    async fn run_succeeds_after_transient_failures() {
        let controller = RetryController::default();
        let calls = AtomicU32::new(0);
        let started = Instant::now();

        let result = controller
            .run(&RetryPolicy::default(), "apply", |attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt < 3 {
                        Err(ClusterError::Throttled("429".into()))
                    } else {
                        Ok(attempt)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(started.elapsed(), Duration::from_secs(15));
    }

    #[tokio::test(start_paused = true)]
    async fn run_stops_on_permanent_failure() {
        let controller = RetryController::default();
        let failure = controller
            .run(&RetryPolicy::default(), "apply", |_| async {
                Err::<(), _>(ClusterError::SchemaValidation("unknown field".into()))
            })
            .await
            .unwrap_err();

        assert_eq!(failure.attempts, 1);
        assert_eq!(
            failure.reason,
            GiveUpReason::NotRetryable(ErrorClass::Permanent)
        );
    }
}
