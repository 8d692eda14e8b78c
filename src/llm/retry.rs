//! Single-retry policy for classifier calls.
//!
//! Network failures and timeouts get exactly one more attempt; auth and
//! malformed-response errors fail immediately.

use std::future::Future;

use crate::error::ClassifierError;

/// Run `op`, retrying once if the first attempt fails with a retryable
/// error.
pub(crate) async fn retry_once<T, F, Fut>(op_name: &str, op: F) -> Result<T, ClassifierError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, ClassifierError>>,
{
    match op().await {
        Ok(value) => Ok(value),
        Err(err) if err.is_retryable() => {
            tracing::warn!(op = op_name, error = %err, "Classifier call failed, retrying once");
            op().await
        }
        Err(err) => Err(err),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    #[tokio::test]
    async fn retries_transport_failure_once() {
        let attempts = AtomicU32::new(0);
        let result = retry_once("test", || {
            let n = attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err(ClassifierError::RequestFailed {
                        provider: "test".into(),
                        reason: "connection reset".into(),
                    })
                } else {
                    Ok(42)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn does_not_retry_auth_failure() {
        let attempts = AtomicU32::new(0);
        let result: Result<u32, _> = retry_once("test", || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async {
                Err(ClassifierError::AuthFailed {
                    provider: "test".into(),
                })
            }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn gives_up_after_second_failure() {
        let attempts = AtomicU32::new(0);
        let result: Result<u32, _> = retry_once("test", || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async {
                Err(ClassifierError::RequestFailed {
                    provider: "test".into(),
                    reason: "still down".into(),
                })
            }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }
}
