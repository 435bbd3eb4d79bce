use crate::api::model::{ApiPage, CrawlPage};
use crate::api::PageSource;
use crate::config;
use crate::error::{AppError, AppResult};
use crate::logging::{log_for, LogLevel};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, Response, StatusCode};
use std::time::Duration;
use tokio::time::sleep;

/// Fetches listing pages for one retailer over HTTP, retrying transient failures.
#[derive(Clone)]
pub struct JsonPageSource {
    client: Client,
    retailer: String,
    base_url: Option<String>,
}

impl JsonPageSource {
    pub fn new<S: Into<String>>(retailer: S, base_url: Option<String>) -> AppResult<Self> {
        let client = Client::builder()
            .user_agent(config::USER_AGENT)
            .timeout(Duration::from_secs(config::HTTP_TIMEOUT_SECONDS))
            .connect_timeout(Duration::from_secs(config::HTTP_CONNECT_TIMEOUT))
            .build()
            .map_err(AppError::from)?;
        Ok(JsonPageSource {
            client,
            retailer: retailer.into(),
            base_url: base_url.map(|b| b.trim_end_matches('/').to_string()),
        })
    }

    /// Plan paths are usually absolute URLs; relative ones are joined to the base URL.
    pub fn resolve_url(&self, path: &str) -> AppResult<String> {
        if path.starts_with("http://") || path.starts_with("https://") {
            return Ok(path.to_string());
        }
        match &self.base_url {
            Some(base) => Ok(format!("{}/{}", base, path.trim_start_matches('/'))),
            None => Err(AppError::Argument(format!(
                "relative path '{}' for retailer '{}' needs a base URL",
                path, self.retailer
            ))),
        }
    }

    async fn fetch_internal(&self, url: &str) -> AppResult<Bytes> {
        let mut last_error: Option<AppError> = None;

        for attempt in 0..=config::MAX_RETRIES {
            let log_prefix = format!("GET {} (Try {})", url, attempt + 1);

            match self.client.get(url).send().await {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        return resp.bytes().await.map_err(|e| {
                            log_for(
                                LogLevel::Warning,
                                &self.retailer,
                                &format!("{} - Error reading response body: {}", log_prefix, e),
                            );
                            AppError::from(e)
                        });
                    }

                    let error = self.handle_http_error(resp, status, url).await;
                    if is_permanent(status) {
                        return Err(error);
                    }
                    log_for(
                        LogLevel::Warning,
                        &self.retailer,
                        &format!("{} Failed: {}", log_prefix, error),
                    );
                    last_error = Some(error);
                }
                Err(e) => {
                    let context_str = if e.is_timeout() {
                        "Timeout"
                    } else if e.is_connect() {
                        "Connection"
                    } else {
                        "Request"
                    };
                    log_for(
                        LogLevel::Warning,
                        &self.retailer,
                        &format!("{} {} Error: {}", log_prefix, context_str, e),
                    );
                    last_error = Some(AppError::from(e));
                }
            }

            if attempt < config::MAX_RETRIES {
                let delay_secs = config::RETRY_DELAY_BASE_SECS * (2.0_f32.powi(attempt as i32));
                sleep(Duration::from_secs_f32(delay_secs)).await;
            }
        }

        Err(last_error.unwrap_or_else(|| {
            AppError::Unexpected(format!(
                "Request failed after {} tries for {}",
                config::MAX_RETRIES + 1,
                url
            ))
        }))
    }

    async fn handle_http_error(&self, resp: Response, status: StatusCode, url: &str) -> AppError {
        if !is_permanent(status) {
            let body = resp
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read error body".to_string());
            log_for(
                LogLevel::Warning,
                &self.retailer,
                &format!(
                    "HTTP {} ({}) for {}. Body: {}...",
                    status,
                    status.canonical_reason().unwrap_or("Unknown Status"),
                    url,
                    body.chars().take(150).collect::<String>()
                ),
            );
        }
        AppError::PageStatus {
            status: status.as_u16(),
            path: url.to_string(),
            retailer: self.retailer.clone(),
        }
    }
}

fn is_permanent(status: StatusCode) -> bool {
    status == StatusCode::NOT_FOUND
        || status == StatusCode::BAD_REQUEST
        || status == StatusCode::FORBIDDEN
        || status == StatusCode::GONE
}

#[async_trait]
impl PageSource for JsonPageSource {
    async fn fetch_page(&self, path: &str) -> AppResult<CrawlPage> {
        let url = self.resolve_url(path)?;
        let bytes = self.fetch_internal(&url).await?;

        let page: ApiPage = serde_json::from_slice(&bytes).map_err(|e| {
            let snippet_len = bytes.len().min(200);
            let snippet = String::from_utf8_lossy(&bytes[..snippet_len]);
            log_for(
                LogLevel::Error,
                &self.retailer,
                &format!("Fail parse page {}: {}. Snippet: '{}'", url, e, snippet),
            );
            AppError::from(e)
        })?;

        let decoded = page.decode_listings();
        if decoded.malformed > 0 {
            log_for(
                LogLevel::Warning,
                &self.retailer,
                &format!("{} malformed listing(s) skipped on {}", decoded.malformed, url),
            );
        }
        Ok(decoded)
    }
}
