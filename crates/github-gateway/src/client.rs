//! Generic REST and GraphQL request execution.
//!
//! [`ApiClient`] retries a request only while the response status belongs to
//! the request's retry set, sleeping a fixed interval between attempts.
//! Statuses the caller marked as acceptable come back as a sentinel payload
//! (`{"error": <body>, "status": <code>}`) instead of an error.

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::{Method, StatusCode};
use serde_json::{json, Value};
use tracing::{debug, error, info, warn};

use crate::error::{ApiError, Result};

/// Statuses retried when a request does not override its retry set.
pub fn default_retry_statuses() -> Vec<u16> {
    std::iter::once(429).chain(500..600).collect()
}

/// Connection settings shared by every request issued through one client.
#[derive(Debug, Clone)]
pub struct ApiClientConfig {
    /// Per-request timeout enforced by the HTTP client
    pub timeout: Duration,
    /// Pause between attempts of a retried request
    pub retry_interval: Duration,
    /// Headers added to every request
    pub default_headers: Vec<(String, String)>,
    /// Name used in log lines
    pub api_name: String,
}

impl Default for ApiClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            retry_interval: Duration::from_secs(5),
            default_headers: Vec::new(),
            api_name: "GitHub".to_string(),
        }
    }
}

/// One REST call and its retry policy.
#[derive(Debug, Clone)]
pub struct RestRequest {
    pub method: Method,
    pub url: String,
    pub body: Option<Value>,
    pub max_attempts: u32,
    pub retry_statuses: Vec<u16>,
    pub accept_statuses: Vec<u16>,
    pub headers: Vec<(String, String)>,
}

impl RestRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            body: None,
            max_attempts: 1,
            retry_statuses: default_retry_statuses(),
            accept_statuses: Vec::new(),
            headers: Vec::new(),
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::POST, url)
    }

    /// Attach a JSON body.
    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Total attempts including the first one (at least 1).
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// Replace the set of statuses that trigger another attempt.
    pub fn retry_on(mut self, statuses: impl IntoIterator<Item = u16>) -> Self {
        self.retry_statuses = statuses.into_iter().collect();
        self
    }

    /// Statuses >= 400 that should return a sentinel payload instead of failing.
    pub fn accept(mut self, statuses: impl IntoIterator<Item = u16>) -> Self {
        self.accept_statuses = statuses.into_iter().collect();
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

/// Thin HTTP client for REST and GraphQL endpoints.
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    config: ApiClientConfig,
}

impl ApiClient {
    /// Create a new client
    pub fn new(config: ApiClientConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("runson/", env!("CARGO_PKG_VERSION")))
            .timeout(config.timeout)
            .build()?;
        Ok(Self { http, config })
    }

    pub fn config(&self) -> &ApiClientConfig {
        &self.config
    }

    /// Issue `request`, retrying on the statuses in its retry set.
    ///
    /// * 204 yields an empty object.
    /// * A non-JSON success body is wrapped as `{"data": <text>}`.
    /// * Exhausting attempts on a retryable status raises [`ApiError::Status`]
    ///   carrying the last status and body.
    pub async fn rest_request(&self, request: &RestRequest, bearer: Option<&str>) -> Result<Value> {
        let api = &self.config.api_name;
        debug!(api = %api, method = %request.method, endpoint = %request.url, "requesting API");

        let headers = self.headers_for(request)?;
        let mut attempt = 0;
        loop {
            attempt += 1;
            let mut builder = self
                .http
                .request(request.method.clone(), &request.url)
                .headers(headers.clone());
            if let Some(token) = bearer {
                builder = builder.bearer_auth(token);
            }
            if let Some(body) = &request.body {
                builder = builder.json(body);
            }

            let response = builder.send().await.map_err(|e| {
                error!(api = %api, endpoint = %request.url, attempt, error = %e, "API request failed");
                ApiError::from(e)
            })?;

            let status = response.status();
            if status == StatusCode::NO_CONTENT {
                return Ok(json!({}));
            }

            let is_json = response
                .headers()
                .get(CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .is_some_and(|v| v.contains("json"));
            let text = response.text().await?;
            let code = status.as_u16();

            if request.retry_statuses.contains(&code) {
                if attempt < request.max_attempts {
                    warn!(
                        api = %api,
                        endpoint = %request.url,
                        attempt,
                        status = code,
                        "retrying request due to response status"
                    );
                    tokio::time::sleep(self.config.retry_interval).await;
                    continue;
                }
                return Err(ApiError::Status {
                    status: code,
                    message: "Max retry attempts reached".to_string(),
                    body: text,
                    retryable: true,
                });
            }

            if code >= 400 {
                let message = format!("{api} API request failed");
                if request.accept_statuses.contains(&code) {
                    // Body may echo secrets; keep it out of info-level logs.
                    info!(api = %api, status = code, "{message}; response muted");
                    debug!(api = %api, status = code, body = %text, "{message}");
                    return Ok(json!({ "error": text, "status": code }));
                }
                error!(api = %api, endpoint = %request.url, status = code, "{message}");
                return Err(ApiError::Status {
                    status: code,
                    message,
                    body: text,
                    retryable: false,
                });
            }

            let data = if is_json {
                serde_json::from_str(&text)?
            } else {
                warn!(api = %api, endpoint = %request.url, "received non-JSON response");
                json!({ "data": text })
            };
            debug!(api = %api, endpoint = %request.url, attempt, status = code, "API request processed");
            return Ok(data);
        }
    }

    /// POST a `{query, variables}` envelope to `endpoint`.
    ///
    /// Any status other than 200 raises [`ApiError::Status`]; an `errors`
    /// field in the payload raises [`ApiError::GraphQl`].
    pub async fn graphql_query(
        &self,
        endpoint: &str,
        query: &str,
        variables: Value,
        bearer: Option<&str>,
    ) -> Result<Value> {
        let api = &self.config.api_name;
        debug!(api = %api, endpoint = %endpoint, "performing GraphQL request");

        let mut builder = self
            .http
            .post(endpoint)
            .headers(self.headers_for(&RestRequest::post(endpoint))?)
            .json(&json!({ "query": query, "variables": variables }));
        if let Some(token) = bearer {
            builder = builder.bearer_auth(token);
        }

        let response = builder.send().await?;
        let status = response.status();
        let text = response.text().await?;
        if status != StatusCode::OK {
            error!(api = %api, endpoint = %endpoint, status = status.as_u16(), "HTTP error during GraphQL request");
            return Err(ApiError::Status {
                status: status.as_u16(),
                message: "HTTP error during GraphQL request".to_string(),
                body: text,
                retryable: false,
            });
        }

        let data: Value = serde_json::from_str(&text)?;
        match data.get("errors") {
            // Present at all means failure, even when empty.
            Some(Value::Array(errors)) => {
                error!(api = %api, endpoint = %endpoint, errors = ?errors, "GraphQL returned errors");
                Err(ApiError::GraphQl(errors.clone()))
            }
            Some(Value::Null) | None => Ok(data),
            Some(other) => Err(ApiError::GraphQl(vec![other.clone()])),
        }
    }

    fn headers_for(&self, request: &RestRequest) -> Result<HeaderMap> {
        let mut map = HeaderMap::new();
        for (name, value) in self.config.default_headers.iter().chain(&request.headers) {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| ApiError::UnexpectedResponse(format!("invalid header name {name}: {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| ApiError::UnexpectedResponse(format!("invalid header value: {e}")))?;
            map.insert(name, value);
        }
        Ok(map)
    }
}
