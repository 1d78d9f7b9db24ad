//! HTTP client adapter for a remote inference gateway.
//!
//! Transport failures are retried and counted by the breaker. Error bodies
//! returned by the gateway are decoded back into the serving taxonomy and
//! never retried.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use tracing::{instrument, warn};

use crate::config::AgriConfig;
use crate::error::{ErrorBody, ServingError};
use crate::inference::{CropPrediction, DiseasePrediction};
use crate::resilience::{retry_async, BreakerError, CircuitBreaker, RetryConfig};
use crate::sensor::SensorRecord;
use crate::serving::Serving;

#[derive(Debug, Clone)]
pub struct RemoteServing {
    base_url: String,
    client: Client,
    retry: RetryConfig,
    breaker: Arc<CircuitBreaker>,
}

impl RemoteServing {
    pub fn new(base_url: impl Into<String>, timeout: Duration, retry: RetryConfig, breaker: Arc<CircuitBreaker>) -> anyhow::Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { base_url: base_url.into().trim_end_matches('/').to_string(), client, retry, breaker })
    }

    pub fn from_config(cfg: &AgriConfig) -> anyhow::Result<Self> {
        let breaker = CircuitBreaker::new(cfg.breaker_failures.max(1), Duration::from_secs(cfg.breaker_open_secs), 1);
        Self::new(cfg.gateway_url.clone(), cfg.request_timeout(), cfg.retry(), breaker)
    }

    pub fn base_url(&self) -> &str { &self.base_url }

    /// Last `n` sensor records held by the gateway, oldest first.
    #[instrument(skip(self))]
    pub async fn sensor_tail(&self, n: usize) -> Result<Vec<SensorRecord>, ServingError> {
        let url = format!("{}/sensor", self.base_url);
        self.call(|c| c.get(&url).query(&[("n", n)])).await
    }

    async fn call<T, B>(&self, build: B) -> Result<T, ServingError>
    where
        T: DeserializeOwned,
        B: Fn(&Client) -> RequestBuilder + Send + Sync,
    {
        let sent = self
            .breaker
            .exec(|| retry_async(&self.retry, |_attempt| build(&self.client).send()))
            .await;
        let resp = match sent {
            Ok(resp) => resp,
            Err(BreakerError::Open) => return Err(ServingError::Unreachable("circuit open".into())),
            Err(BreakerError::Inner(e)) => {
                warn!(error = %e, base_url = %self.base_url, "gateway request failed");
                return Err(ServingError::Unreachable(e.to_string()));
            }
        };
        decode(resp).await
    }
}

async fn decode<T: DeserializeOwned>(resp: Response) -> Result<T, ServingError> {
    let status = resp.status();
    if status.is_success() {
        return resp
            .json::<T>()
            .await
            .map_err(|e| ServingError::PredictionFailed(format!("invalid gateway response: {e}")));
    }
    match resp.json::<ErrorBody>().await {
        Ok(body) => Err(body.into()),
        Err(_) => Err(ServingError::PredictionFailed(format!("gateway returned {status}"))),
    }
}

#[async_trait]
impl Serving for RemoteServing {
    #[instrument(skip_all, fields(task = "crop"))]
    async fn predict_crop(&self, raw: &str) -> Result<CropPrediction, ServingError> {
        let url = format!("{}/predict", self.base_url);
        self.call(|c| c.get(&url).query(&[("features", raw)])).await
    }

    #[instrument(skip_all, fields(task = "disease", bytes = image.len()))]
    async fn predict_disease(&self, image: Vec<u8>) -> Result<DiseasePrediction, ServingError> {
        let url = format!("{}/detect_disease/raw", self.base_url);
        self.call(|c| c.post(&url).header(reqwest::header::CONTENT_TYPE, "application/octet-stream").body(image.clone())).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_retry() -> RetryConfig {
        RetryConfig { max_retries: 1, base_delay: Duration::from_millis(1), max_delay: Duration::from_millis(2), jitter: 0.0 }
    }

    #[tokio::test]
    async fn unreachable_gateway_maps_to_unreachable() {
        // port 9 on loopback: nothing listens, connection refused
        let remote = RemoteServing::new("http://127.0.0.1:9/", Duration::from_millis(500), fast_retry(), CircuitBreaker::new(5, Duration::from_secs(30), 1)).unwrap();
        assert_eq!(remote.base_url(), "http://127.0.0.1:9");
        let err = remote.predict_crop("1,2,3").await.unwrap_err();
        assert!(matches!(err, ServingError::Unreachable(_)));
    }

    #[tokio::test]
    async fn open_breaker_skips_the_request() {
        let breaker = CircuitBreaker::new(1, Duration::from_secs(60), 1);
        let remote = RemoteServing::new("http://127.0.0.1:9", Duration::from_millis(500), fast_retry(), breaker).unwrap();
        let _ = remote.sensor_tail(5).await;
        assert_eq!(remote.sensor_tail(5).await.unwrap_err(), ServingError::Unreachable("circuit open".into()));
    }
}
