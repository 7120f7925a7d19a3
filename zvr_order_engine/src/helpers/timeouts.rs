use std::future::Future;

use tokio::time::Duration;

use crate::traits::GatewayError;

/// Hard ceiling on any single gateway call.
pub const GATEWAY_TIMEOUT: Duration = Duration::from_secs(30);

/// Runs a gateway call under [`GATEWAY_TIMEOUT`]. The inner future is dropped (and so cancelled) on timeout.
pub async fn with_gateway_timeout<T, F>(call: F) -> Result<T, GatewayError>
where F: Future<Output = Result<T, GatewayError>> {
    tokio::time::timeout(GATEWAY_TIMEOUT, call).await.unwrap_or(Err(GatewayError::Timeout))
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn slow_calls_time_out() {
        let result: Result<(), GatewayError> = with_gateway_timeout(async {
            tokio::time::sleep(Duration::from_secs(31)).await;
            Ok(())
        })
        .await;
        assert_eq!(result, Err(GatewayError::Timeout));
        let result = with_gateway_timeout(async { Ok::<_, GatewayError>(5) }).await;
        assert_eq!(result, Ok(5));
    }
}
