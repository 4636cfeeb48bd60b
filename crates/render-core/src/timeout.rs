use crate::error::RenderError;
use quire_types::RenderMethod;
use std::future::Future;
use std::time::Duration;

/// Runs `fut` with a hard wall-clock limit. Elapsing is reported as
/// `RenderError::Timeout`, never as a generic failure. The future is dropped
/// on timeout, so anything it owns (child processes spawned with
/// `kill_on_drop`, pooled page leases) is released.
pub async fn with_timeout<T, F>(method: RenderMethod, limit: Duration, fut: F) -> Result<T, RenderError>
where
    F: Future<Output = Result<T, RenderError>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => {
            log::warn!("[RENDER] {} render exceeded {:?}", method, limit);
            Err(RenderError::Timeout {
                method,
                after: limit,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn elapsed_limit_is_a_timeout() {
        let result: Result<(), _> = with_timeout(RenderMethod::Browser, Duration::from_secs(1), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        assert!(matches!(
            result,
            Err(RenderError::Timeout { method: RenderMethod::Browser, .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn inner_errors_pass_through() {
        let result: Result<(), _> = with_timeout(RenderMethod::Office, Duration::from_secs(1), async {
            Err(RenderError::failed(RenderMethod::Office, "exit status 1"))
        })
        .await;
        assert!(matches!(result, Err(RenderError::Failed { .. })));
    }
}
