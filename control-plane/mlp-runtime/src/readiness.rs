use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use crate::error::{RuntimeError, RuntimeResult};

#[derive(Debug, Clone)]
pub struct ReadinessConfig {
    /// Overall budget for the readiness loop.
    pub timeout: Duration,
    pub interval: Duration,
    /// Budget for a single probe request.
    pub probe_timeout: Duration,
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            interval: Duration::from_secs(2),
            probe_timeout: Duration::from_secs(5),
        }
    }
}

/// Poll `url` until it answers 2xx or the budget runs out.
pub async fn wait_until_ready(
    client: &reqwest::Client,
    url: &str,
    config: &ReadinessConfig,
) -> RuntimeResult<()> {
    let deadline = Instant::now() + config.timeout;
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match client.get(url).timeout(config.probe_timeout).send().await {
            Ok(resp) if resp.status().is_success() => {
                debug!(%url, attempt, "readiness probe passed");
                return Ok(());
            }
            Ok(resp) => {
                debug!(%url, attempt, status = %resp.status(), "not ready yet");
            }
            Err(e) => {
                debug!(%url, attempt, error = %e, "probe failed");
            }
        }
        if Instant::now() + config.interval >= deadline {
            return Err(RuntimeError::Timeout(format!(
                "{url} not ready after {:?} ({attempt} probes)",
                config.timeout
            )));
        }
        tokio::time::sleep(config.interval).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unreachable_target_times_out() {
        let client = reqwest::Client::new();
        let config = ReadinessConfig {
            timeout: Duration::from_millis(300),
            interval: Duration::from_millis(50),
            probe_timeout: Duration::from_millis(50),
        };
        // port 9 (discard) is closed on test hosts
        let err = wait_until_ready(&client, "http://127.0.0.1:9/health", &config)
            .await
            .unwrap_err();
        assert!(err.is_timeout());
        assert!(err.to_string().contains("after 300ms"), "{err}");
    }
}
