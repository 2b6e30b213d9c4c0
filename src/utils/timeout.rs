//! Protocol timing and async timeout helpers.

use std::future::Future;
use std::time::Duration;

use tokio::time::timeout;

use crate::error::{ProtocolError, Result};

/// How often play-state connections are sent a keep-alive
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_millis(5_000);

/// How long a keep-alive may stay unacknowledged before the connection is dropped
pub const KEEPALIVE_TIMEOUT: Duration = Duration::from_millis(20_000);

/// Latency updates run at this multiple of the keep-alive interval
pub const LATENCY_INTERVAL_FACTOR: u32 = 2;

/// Time allowed for live connections to drain on shutdown
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Bound on a single socket send or collaborator call
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Period of the latency broadcast for a keep-alive interval
pub fn latency_interval(keepalive_interval: Duration) -> Duration {
    keepalive_interval * LATENCY_INTERVAL_FACTOR
}

/// Await `fut`, failing with [`ProtocolError::Timeout`] once `duration` passes
pub async fn with_timeout_error<F, T>(fut: F, duration: Duration) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match timeout(duration, fut).await {
        Ok(result) => result,
        Err(_) => Err(ProtocolError::Timeout),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn completes_in_time() {
        let value = with_timeout_error(async { Ok(7) }, Duration::from_millis(50)).await;
        assert!(matches!(value, Ok(7)));
    }

    #[tokio::test(start_paused = true)]
    async fn times_out() {
        let result: Result<()> = with_timeout_error(
            async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(())
            },
            Duration::from_secs(1),
        )
        .await;
        assert!(matches!(result, Err(ProtocolError::Timeout)));
    }

    #[test]
    fn latency_runs_at_twice_keepalive() {
        assert_eq!(latency_interval(KEEPALIVE_INTERVAL), Duration::from_secs(10));
    }
}
