//! Centralized retry policy: one retryable-error classifier and one retry
//! combinator, shared by every flow instead of per-flow loops.

use std::future::Future;
use std::time::Duration;

use crate::clock::Clock;
use crate::errors::{ErrorKind, WalletError};

#[derive(Debug, Clone, Copy)]
pub enum Backoff {
    Fixed(Duration),
    Exponential { initial: Duration, max: Duration },
}

impl Backoff {
    fn delay(&self, attempt: u32) -> Duration {
        match self {
            Backoff::Fixed(d) => *d,
            Backoff::Exponential { initial, max } => {
                let scaled = initial.saturating_mul(1u32 << attempt.min(16));
                scaled.min(*max)
            }
        }
    }
}

/// Transient failures worth retrying: network-level faults, focus loss during
/// a ceremony, a pending concurrent request, or a timeout.
pub fn is_retryable(err: &WalletError) -> bool {
    if matches!(
        err.kind(),
        ErrorKind::BroadcastRpcError | ErrorKind::RelayHttpError
    ) {
        return true;
    }
    let message = err.message().to_ascii_lowercase();
    ["timeout", "timed out", "network", "focus", "pending request", "temporarily"]
        .iter()
        .any(|needle| message.contains(needle))
}

/// Run `op` up to `attempts` times, sleeping `backoff` between attempts while
/// the failure is retryable. The final attempt's error surfaces unchanged.
pub async fn retry<T, F, Fut>(
    clock: &dyn Clock,
    attempts: u32,
    backoff: Backoff,
    mut op: F,
) -> Result<T, WalletError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, WalletError>>,
{
    let attempts = attempts.max(1);
    let mut last_err = None;
    for attempt in 0..attempts {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) => {
                let final_attempt = attempt + 1 == attempts;
                if final_attempt || !is_retryable(&err) {
                    return Err(err);
                }
                log::debug!("retryable failure (attempt {}): {}", attempt + 1, err);
                last_err = Some(err);
                clock.sleep(backoff.delay(attempt)).await;
            }
        }
    }
    Err(last_err.unwrap_or_else(|| WalletError::internal("retry loop exhausted")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::TestClock;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn retries_transient_failures_then_succeeds() {
        let clock = TestClock::new(0);
        let calls = AtomicU32::new(0);
        let result = retry(&clock, 3, Backoff::Fixed(Duration::from_millis(10)), |_| {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(WalletError::broadcast("network unreachable"))
                } else {
                    Ok(n)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retryable_errors_surface_immediately() {
        let clock = TestClock::new(0);
        let calls = AtomicU32::new(0);
        let result: Result<(), _> =
            retry(&clock, 5, Backoff::Fixed(Duration::from_millis(1)), |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(WalletError::validation("bad input")) }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
