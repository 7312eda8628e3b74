use std::time::Duration;

use anyhow::Context;
use reqwest::{Client, StatusCode};
use serde_json::Value;

pub struct GatewayClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl GatewayClient {
    pub fn new(
        base_url: &str,
        api_key: Option<String>,
        insecure: bool,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .danger_accept_invalid_certs(insecure)
            .user_agent(concat!("vnstat-gateway-cli/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("building HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    /// GET `path`, retrying transport failures and 503s up to `attempts` times.
    pub async fn fetch_with_retry(
        &self,
        path: &str,
        query: &[(&str, &str)],
        attempts: u32,
    ) -> anyhow::Result<Value> {
        let mut last_err = None;
        for attempt in 1..=attempts.max(1) {
            match self.fetch(path, query).await {
                Ok(v) => return Ok(v),
                Err(FetchError::Fatal(e)) => return Err(e),
                Err(FetchError::Retryable(e)) => {
                    log::debug!("attempt {attempt} for {path} failed: {e:#}");
                    last_err = Some(e);
                    tokio::time::sleep(Duration::from_millis(300)).await;
                }
            }
        }
        Err(last_err
            .unwrap_or_else(|| anyhow::anyhow!("no attempts made"))
            .context(format!("giving up on {path} after {attempts} attempt(s)")))
    }

    async fn fetch(&self, path: &str, query: &[(&str, &str)]) -> Result<Value, FetchError> {
        let url = format!("{}{}", self.base_url, path);
        let mut req = self.client.get(&url).query(query);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| FetchError::Retryable(anyhow::Error::new(e).context(url.clone())))?;
        let status = resp.status();
        let body: Value = resp
            .json()
            .await
            .map_err(|e| FetchError::Fatal(anyhow::Error::new(e).context("decoding response")))?;

        if status.is_success() {
            return Ok(body);
        }

        let err = anyhow::anyhow!(
            "status {}: {} ({})",
            status,
            body["detail"]["message"].as_str().unwrap_or("no detail"),
            body["detail"]["code"].as_str().unwrap_or("unknown"),
        );
        if status == StatusCode::SERVICE_UNAVAILABLE {
            Err(FetchError::Retryable(err))
        } else {
            Err(FetchError::Fatal(err))
        }
    }
}

enum FetchError {
    Retryable(anyhow::Error),
    Fatal(anyhow::Error),
}
