use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{header, Client as ReqwestClient, Method, StatusCode};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, instrument};

use crate::domain::errors::QueryError;
use crate::domain::models::ApiConfig;
use crate::domain::ports::{ApiRequest, BaseQuery, HttpMethod};

/// [`BaseQuery`] over HTTP with a shared, pooled reqwest client.
///
/// Response handling:
/// - transport failures and timeouts are network errors
/// - non-2xx statuses are HTTP errors, using the `{ "message": ... }` body
///   when the service sends one
/// - an empty 2xx body is `null`; any other body must be JSON
#[derive(Debug, Clone)]
pub struct HttpBaseQuery {
    http_client: ReqwestClient,
    base_url: String,
}

impl HttpBaseQuery {
    pub fn new(config: &ApiConfig) -> Result<Self> {
        let http_client = ReqwestClient::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .pool_max_idle_per_host(10)
            .tcp_nodelay(true)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            http_client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

#[async_trait]
impl BaseQuery for HttpBaseQuery {
    #[instrument(skip(self, request), fields(method = %request.method, path = %request.path))]
    async fn execute(&self, request: ApiRequest) -> Result<Value, QueryError> {
        let method = match request.method {
            HttpMethod::Get => Method::GET,
            HttpMethod::Post => Method::POST,
            HttpMethod::Put => Method::PUT,
            HttpMethod::Delete => Method::DELETE,
        };

        let mut builder = self
            .http_client
            .request(method, self.url(&request.path))
            .header(header::ACCEPT, "application/json");
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| QueryError::Network(e.to_string()))?;
        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| QueryError::Network(format!("failed to read response body: {e}")))?;
        debug!(status = status.as_u16(), bytes = body.len(), "Response received");

        if !status.is_success() {
            return Err(http_error(status, &body));
        }
        parse_body(&body)
    }
}

fn parse_body(body: &[u8]) -> Result<Value, QueryError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Null);
    }
    serde_json::from_slice(body).map_err(|e| QueryError::Transform(format!("response is not valid JSON: {e}")))
}

fn http_error(status: StatusCode, body: &[u8]) -> QueryError {
    let message = serde_json::from_slice::<Value>(body)
        .ok()
        .and_then(|json| json.get("message").and_then(Value::as_str).map(str::to_owned))
        .or_else(|| {
            let text = String::from_utf8_lossy(body).trim().to_string();
            (!text.is_empty()).then_some(text)
        })
        .unwrap_or_else(|| status.canonical_reason().unwrap_or("request failed").to_string());

    QueryError::http(status.as_u16(), message)
}
