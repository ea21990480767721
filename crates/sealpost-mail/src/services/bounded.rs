//! CPU-bound engine work with a deadline.
//!
//! Key generation and PGP operations run on the blocking pool so they never
//! stall the async runtime. A timed-out task keeps running on its thread
//! until it finishes; its result is dropped.

use std::time::{Duration, Instant};

use tracing::warn;

use sealpost_core::{Error, Result};

/// Deadlines for the two classes of engine work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkLimits {
    pub keygen: Duration,
    pub crypto: Duration,
}

impl WorkLimits {
    pub fn new(keygen: Duration, crypto: Duration) -> Self {
        Self { keygen, crypto }
    }
}

/// Run `work` on the blocking pool, failing with [`Error::Timeout`] after
/// `limit`.
pub async fn run_bounded<T, E, F>(op: &'static str, limit: Duration, work: F) -> Result<T>
where
    F: FnOnce() -> std::result::Result<T, E> + Send + 'static,
    T: Send + 'static,
    E: Into<Error> + Send + 'static,
{
    let start = Instant::now();
    match tokio::time::timeout(limit, tokio::task::spawn_blocking(work)).await {
        Ok(Ok(result)) => result.map_err(Into::into),
        Ok(Err(join_err)) => Err(Error::Internal(format!("{} task failed: {}", op, join_err))),
        Err(_) => {
            warn!(
                subsystem = "crypto",
                component = "bounded",
                op,
                limit_ms = limit.as_millis() as u64,
                duration_ms = start.elapsed().as_millis() as u64,
                "Engine work timed out"
            );
            Err(Error::Timeout(format!(
                "{} did not finish within {}ms",
                op,
                limit.as_millis()
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_result_passes_through() {
        let value = run_bounded("add", Duration::from_secs(5), || Ok::<_, Error>(2 + 2))
            .await
            .unwrap();
        assert_eq!(value, 4);
    }

    #[tokio::test]
    async fn test_error_converted() {
        let err = run_bounded("fail", Duration::from_secs(5), || {
            Err::<(), _>(sealpost_crypto::CryptoError::AuthenticationFailed)
        })
        .await
        .unwrap_err();
        assert!(matches!(err, Error::AuthenticationFailed));
    }

    #[tokio::test]
    async fn test_deadline_exceeded() {
        let err = run_bounded("sleep", Duration::from_millis(10), || {
            std::thread::sleep(Duration::from_millis(500));
            Ok::<_, Error>(())
        })
        .await
        .unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));
    }

    #[tokio::test]
    async fn test_panic_is_internal() {
        let err = run_bounded("panic", Duration::from_secs(5), || -> Result<()> {
            panic!("boom")
        })
        .await
        .unwrap_err();
        assert!(matches!(err, Error::Internal(_)));
    }
}
