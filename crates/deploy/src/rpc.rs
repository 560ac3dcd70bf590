//! Raw JSON-RPC helpers used to check endpoints before a provider is built.

use std::time::Duration;

use alloy_core::primitives::U64;
use anyhow::Context;
use serde::de::DeserializeOwned;
use serde_json::Value;

/// Default timeout for RPC requests.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default interval between polling attempts when waiting for readiness.
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Create an HTTP client configured for JSON-RPC requests.
pub fn create_client() -> Result<reqwest::Client, anyhow::Error> {
    reqwest::Client::builder()
        .timeout(DEFAULT_TIMEOUT)
        .build()
        .context("Failed to create HTTP client")
}

/// Make a JSON-RPC call and deserialize the result.
///
/// Errors never include `url`, which may embed an API key.
pub async fn json_rpc_call<T: DeserializeOwned>(
    client: &reqwest::Client,
    url: &str,
    method: &str,
    params: Vec<Value>,
) -> Result<T, anyhow::Error> {
    let response = client
        .post(url)
        .json(&serde_json::json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": 1
        }))
        .send()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to send {} request: {}", method, e.without_url()))?;

    let result: Value = response
        .json()
        .await
        .map_err(|e| e.without_url())
        .with_context(|| format!("Failed to parse {} response", method))?;

    extract_result(method, result)
}

fn extract_result<T: DeserializeOwned>(method: &str, result: Value) -> Result<T, anyhow::Error> {
    if let Some(error) = result.get("error") {
        anyhow::bail!(
            "RPC error: {}",
            error
                .get("message")
                .and_then(|m| m.as_str())
                .unwrap_or("unknown")
        );
    }

    let result_value = result
        .get("result")
        .context("No result in response")?
        .clone();

    serde_json::from_value(result_value)
        .with_context(|| format!("Failed to deserialize {} result", method))
}

/// Query `eth_chainId`.
pub async fn chain_id(client: &reqwest::Client, url: &str) -> Result<u64, anyhow::Error> {
    let id: U64 = json_rpc_call(client, url, "eth_chainId", vec![]).await?;
    Ok(id.to::<u64>())
}

/// Wait for a service to be ready by repeatedly calling a check function.
pub async fn wait_until_ready<F, Fut>(
    name: &str,
    timeout_secs: u64,
    check_fn: F,
) -> Result<(), anyhow::Error>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<(), anyhow::Error>>,
{
    wait_until_ready_every(name, Duration::from_secs(timeout_secs), DEFAULT_POLL_INTERVAL, check_fn)
        .await
}

async fn wait_until_ready_every<F, Fut>(
    name: &str,
    max_duration: Duration,
    poll_interval: Duration,
    check_fn: F,
) -> Result<(), anyhow::Error>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<(), anyhow::Error>>,
{
    let start = std::time::Instant::now();

    loop {
        match check_fn().await {
            Ok(()) => return Ok(()),
            Err(e) => {
                tracing::trace!(error = %e, service = %name, "Readiness check failed, retrying...");
            }
        }

        if start.elapsed() > max_duration {
            anyhow::bail!("Timeout waiting for {} to be ready", name);
        }

        tokio::time::sleep(poll_interval).await;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn test_extract_result() {
        let id: U64 = extract_result(
            "eth_chainId",
            serde_json::json!({"jsonrpc": "2.0", "id": 1, "result": "0x7a69"}),
        )
        .unwrap();
        assert_eq!(id.to::<u64>(), 31337);

        let err = extract_result::<U64>(
            "eth_chainId",
            serde_json::json!({"jsonrpc": "2.0", "id": 1, "error": {"code": -32601, "message": "method not found"}}),
        )
        .unwrap_err();
        assert_eq!(err.to_string(), "RPC error: method not found");
    }

    #[tokio::test]
    async fn test_wait_until_ready_retries() {
        let calls = AtomicUsize::new(0);

        wait_until_ready_every("anvil", Duration::from_secs(5), Duration::from_millis(1), || {
            let attempt = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt < 2 {
                    anyhow::bail!("not yet");
                }
                Ok(())
            }
        })
        .await
        .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_wait_until_ready_times_out() {
        let err = wait_until_ready_every("anvil", Duration::from_millis(5), Duration::from_millis(1), || async {
            anyhow::bail!("connection refused")
        })
        .await
        .unwrap_err();

        assert!(err.to_string().contains("Timeout waiting for anvil"));
    }
}
