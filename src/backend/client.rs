use async_trait::async_trait;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, warn};

use super::errors::BackendError;
use super::types::{StartRequest, StartResponse, StatusQuery, StatusResponse};
use super::ScrapeBackend;
use crate::config::BackendConfig;
use crate::jobs::types::{JobKind, StartAck, StatusReport};

/// Longest error body echoed back to the user
const MAX_DETAIL_LEN: usize = 300;

/// HTTP implementation of the scrape backend contract.
///
/// Status polls go through `RetryTransientMiddleware`, so a network blip is
/// retried below the poller. Start requests are sent once: the backend is
/// single-flight per account and a retried start could launch twice.
#[derive(Debug, Clone)]
pub struct HttpScrapeBackend {
    base_url: String,
    start_client: ClientWithMiddleware,
    status_client: ClientWithMiddleware,
}

impl HttpScrapeBackend {
    pub fn new(config: &BackendConfig) -> Result<Self, BackendError> {
        let base_url = config.base_url.trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(BackendError::Configuration("backend.base_url is empty".to_string()));
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .build()
            .map_err(|e| BackendError::Configuration(e.to_string()))?;

        let retry_policy = ExponentialBackoff::builder().build_with_max_retries(config.max_retries);
        let status_client = ClientBuilder::new(client.clone())
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build();
        let start_client = ClientBuilder::new(client).build();

        Ok(Self {
            base_url,
            start_client,
            status_client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn start_url(&self, kind: JobKind, request: &StartRequest) -> Result<String, BackendError> {
        let path = match kind {
            JobKind::WorkOrderScrape => "/api/v1/work-orders/scrape".to_string(),
            JobKind::BatchDispenserScrape => "/api/v1/work-orders/scrape-dispensers".to_string(),
            JobKind::SingleDispenserScrape => {
                let target = request.work_order_id.as_deref().ok_or_else(|| {
                    BackendError::Configuration("single dispenser scrape needs a work order id".to_string())
                })?;
                format!("/api/v1/work-orders/{target}/scrape-dispensers")
            }
        };
        Ok(format!("{}{}", self.base_url, path))
    }

    fn status_url(&self, kind: JobKind, query: &StatusQuery) -> Result<String, BackendError> {
        let owner = &query.owner_id;
        let path = match kind {
            JobKind::WorkOrderScrape => format!("/api/v1/work-orders/scrape/progress/{owner}"),
            JobKind::BatchDispenserScrape => {
                format!("/api/v1/work-orders/scrape-dispensers/progress/{owner}")
            }
            JobKind::SingleDispenserScrape => {
                let target = query.target_id.as_deref().ok_or_else(|| {
                    BackendError::Configuration("single dispenser status needs a work order id".to_string())
                })?;
                format!("/api/v1/work-orders/{target}/scrape-dispensers/progress")
            }
        };
        Ok(format!("{}{}", self.base_url, path))
    }
}

/// Turns a response into `T`, mapping non-success statuses to `Http` errors
async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, BackendError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(BackendError::Http {
            status: status.as_u16(),
            message: error_detail(&body),
        });
    }
    response
        .json::<T>()
        .await
        .map_err(|e| BackendError::Decode(e.to_string()))
}

/// Extracts a readable message from an error body
fn error_detail(body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        for field in ["detail", "message", "error"] {
            if let Some(text) = value.get(field).and_then(|v| v.as_str()) {
                return text.to_string();
            }
        }
    }
    body.trim().chars().take(MAX_DETAIL_LEN).collect()
}

#[async_trait]
impl ScrapeBackend for HttpScrapeBackend {
    async fn start_job(&self, kind: JobKind, request: &StartRequest) -> Result<StartAck, BackendError> {
        let url = self.start_url(kind, request)?;
        debug!(kind = %kind, url = %url, "Sending start request");

        let response = self.start_client.post(&url).json(request).send().await?;
        let ack: StartResponse = decode(response).await?;
        Ok(ack.into())
    }

    async fn job_status(&self, kind: JobKind, query: &StatusQuery) -> Result<StatusReport, BackendError> {
        let url = self.status_url(kind, query)?;
        let mut builder = self.status_client.get(&url);
        if kind == JobKind::SingleDispenserScrape {
            builder = builder.query(&[("user_id", query.owner_id.as_str())]);
        }

        let response = builder.send().await.map_err(|e| {
            warn!(kind = %kind, error = %e, "Status request failed after retries");
            BackendError::from(e)
        })?;
        let status: StatusResponse = decode(response).await?;
        Ok(status.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend() -> HttpScrapeBackend {
        HttpScrapeBackend::new(&BackendConfig {
            base_url: "http://localhost:8000/".to_string(),
            request_timeout_seconds: 5,
            max_retries: 0,
        })
        .unwrap()
    }

    #[test]
    fn test_trailing_slash_is_trimmed() {
        assert_eq!(backend().base_url(), "http://localhost:8000");
    }

    #[test]
    fn test_single_dispenser_urls_embed_work_order() {
        let backend = backend();
        let query = StatusQuery {
            owner_id: "u1".to_string(),
            target_id: Some("WO-9".to_string()),
        };
        assert_eq!(
            backend.status_url(JobKind::SingleDispenserScrape, &query).unwrap(),
            "http://localhost:8000/api/v1/work-orders/WO-9/scrape-dispensers/progress"
        );
        let missing = StatusQuery { owner_id: "u1".to_string(), target_id: None };
        assert!(backend.status_url(JobKind::SingleDispenserScrape, &missing).is_err());
    }

    #[test]
    fn test_error_detail_extraction() {
        assert_eq!(error_detail(r#"{"detail": "No credentials"}"#), "No credentials");
        assert_eq!(error_detail("  plain text  "), "plain text");
        assert_eq!(error_detail(&"x".repeat(1000)).len(), MAX_DETAIL_LEN);
    }

    #[test]
    fn test_empty_base_url_is_rejected() {
        let result = HttpScrapeBackend::new(&BackendConfig {
            base_url: "/".to_string(),
            request_timeout_seconds: 5,
            max_retries: 0,
        });
        assert!(matches!(result, Err(BackendError::Configuration(_))));
    }
}
