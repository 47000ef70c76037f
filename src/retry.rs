use std::{future::Future, time::Duration};

use tokio::time::sleep;

/// Fixed-delay retry helper for fallible async operations.
///
/// Runs `operation` up to `max_attempts` times, sleeping `delay` between
/// attempts for as long as `is_retryable` holds for the error. Returns the
/// first success, or the final error together with the number of attempts
/// actually made. A non-retryable error short-circuits immediately with the
/// attempt count so far.
pub async fn retry_fixed<F, Fut, T, E>(
    max_attempts: u32,
    delay: Duration,
    mut operation: F,
    is_retryable: impl Fn(&E) -> bool,
) -> Result<T, (u32, E)>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt < max_attempts && is_retryable(&err) => {
                sleep(delay).await;
            }
            Err(err) => return Err((attempt, err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    #[tokio::test]
    async fn exhausts_exactly_max_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<(), (u32, &str)> = retry_fixed(
            10,
            Duration::from_millis(1),
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err("boom") }
            },
            |_| true,
        )
        .await;
        let (attempts, _) = result.unwrap_err();
        assert_eq!(attempts, 10);
        assert_eq!(calls.load(Ordering::SeqCst), 10);
    }

    #[tokio::test]
    async fn stops_on_first_success() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, (u32, &str)> = retry_fixed(
            10,
            Duration::from_millis(1),
            || {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                async move {
                    if n < 3 {
                        Err("transient")
                    } else {
                        Ok(n)
                    }
                }
            },
            |_| true,
        )
        .await;
        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retryable_errors_short_circuit() {
        let calls = AtomicU32::new(0);
        let result: Result<(), (u32, &str)> = retry_fixed(
            10,
            Duration::from_millis(1),
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err("fatal") }
            },
            |_| false,
        )
        .await;
        let (attempts, _) = result.unwrap_err();
        assert_eq!(attempts, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
