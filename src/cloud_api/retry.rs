use rand::Rng;
use retry::{retry, OperationResult};
use std::ops::Range;
use std::time::Duration;

/// How a failed attempt should be treated by [`retry_with_policy`].
pub enum RetryClass {
    /// Transient (throttling); sleep a jittered interval and try again.
    Retry,
    /// Permanent; propagate immediately without consuming a retry.
    Fatal,
}

/// `(max_retries, jitter range)`. Replaces what used to be three
/// independently-capped retry loops (register: 6, deregister: 3, update: 5)
/// with one policy, parameterized per call site.
#[derive(Clone)]
pub struct RetryPolicy {
    pub max_retries: usize,
    pub jitter: Range<Duration>,
}

impl RetryPolicy {
    pub fn new(max_retries: usize) -> Self {
        RetryPolicy {
            max_retries,
            jitter: Duration::from_secs(3)..Duration::from_secs(10),
        }
    }
}

struct JitterIter {
    jitter: Range<Duration>,
}

impl Iterator for JitterIter {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        let lo = self.jitter.start.as_millis() as u64;
        let hi = self.jitter.end.as_millis().max(lo as u128 + 1) as u64;
        let millis = rand::rng().random_range(lo..hi);
        Some(Duration::from_millis(millis))
    }
}

/// Centralized retry helper: runs `operation`, and on failure consults
/// `classify` to decide whether to sleep-and-retry (bounded by
/// `policy.max_retries`) or propagate immediately.
pub fn retry_with_policy<T, E, O, C>(mut operation: O, classify: C, policy: RetryPolicy) -> Result<T, E>
where
    O: FnMut() -> Result<T, E>,
    C: Fn(&E) -> RetryClass,
{
    let schedule = JitterIter { jitter: policy.jitter }.take(policy.max_retries);

    retry(schedule, || match operation() {
        Ok(value) => OperationResult::Ok(value),
        Err(err) => match classify(&err) {
            RetryClass::Retry => OperationResult::Retry(err),
            RetryClass::Fatal => OperationResult::Err(err),
        },
    })
    .map_err(|e| e.error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn retries_until_success_within_budget() {
        let attempts = Cell::new(0);
        let policy = RetryPolicy {
            max_retries: 5,
            jitter: Duration::from_millis(1)..Duration::from_millis(2),
        };
        let result: Result<&str, &str> = retry_with_policy(
            || {
                let n = attempts.get() + 1;
                attempts.set(n);
                if n < 3 {
                    Err("throttled")
                } else {
                    Ok("done")
                }
            },
            |_| RetryClass::Retry,
            policy,
        );
        assert_eq!(result, Ok("done"));
        assert_eq!(attempts.get(), 3);
    }

    #[test]
    fn fatal_errors_propagate_immediately() {
        let attempts = Cell::new(0);
        let policy = RetryPolicy {
            max_retries: 5,
            jitter: Duration::from_millis(1)..Duration::from_millis(2),
        };
        let result: Result<&str, &str> = retry_with_policy(
            || {
                attempts.set(attempts.get() + 1);
                Err("not found")
            },
            |_| RetryClass::Fatal,
            policy,
        );
        assert_eq!(result, Err("not found"));
        assert_eq!(attempts.get(), 1);
    }

    #[test]
    fn exhausting_retries_returns_last_error() {
        let policy = RetryPolicy {
            max_retries: 2,
            jitter: Duration::from_millis(1)..Duration::from_millis(2),
        };
        let result: Result<&str, &str> = retry_with_policy(|| Err("throttled"), |_| RetryClass::Retry, policy);
        assert_eq!(result, Err("throttled"));
    }
}
