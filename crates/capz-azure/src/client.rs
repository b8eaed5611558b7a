//! Azure Resource Manager client
//!
//! [`ArmClient`] is the seam between the reconcile engine and ARM: a GET,
//! the initial request of a PUT/PATCH/DELETE returning a poller, and a
//! single poll step. Waiting between polls belongs to the caller so it can
//! bound the whole call with its own timeout.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use reqwest::{Method, RequestBuilder, StatusCode};
use serde_json::Value;
use tracing::{debug, trace};

#[cfg(test)]
use mockall::automock;

use capz_common::{AzureError, Error, Result, DEFAULT_REQUEUE_AFTER};

use crate::cloud::CloudEnvironment;
use crate::credentials::TokenCredential;
use crate::lro::{
    advance_poller, poller_from_initial_response, retry_after_secs, HttpMethod, PollerState,
};

/// Transport-level timeout for a single HTTP request
const HTTP_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Operations the reconcile engine performs against ARM
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ArmClient: Send + Sync {
    /// GET a resource; a missing resource is a not-found error
    async fn get(&self, resource_id: &str, api_version: &str) -> Result<Value>;

    /// Start a PUT and return its poller
    async fn begin_put(&self, resource_id: &str, api_version: &str, body: Value)
        -> Result<PollerState>;

    /// Start a PATCH and return its poller
    async fn begin_patch(
        &self,
        resource_id: &str,
        api_version: &str,
        body: Value,
    ) -> Result<PollerState>;

    /// Start a DELETE and return its poller
    async fn begin_delete(&self, resource_id: &str, api_version: &str) -> Result<PollerState>;

    /// Poll once; an operation that finished with an error returns that error
    async fn poll(&self, state: PollerState) -> Result<PollerState>;
}

/// reqwest-backed [`ArmClient`]
pub struct HttpArmClient {
    http: reqwest::Client,
    endpoint: String,
    credential: Arc<dyn TokenCredential>,
    scope: String,
}

impl HttpArmClient {
    /// Client for the given cloud using `credential` for bearer tokens
    pub fn new(cloud: &CloudEnvironment, credential: Arc<dyn TokenCredential>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(HTTP_REQUEST_TIMEOUT)
            .build()
            .map_err(|e| Error::internal_with_context("arm-client", e.to_string()))?;
        Ok(Self {
            http,
            endpoint: cloud.resource_manager_endpoint.to_string(),
            credential,
            scope: cloud.token_scope.to_string(),
        })
    }

    /// Send requests to a different endpoint (e.g. a local proxy)
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into().trim_end_matches('/').to_string();
        self
    }

    fn url(&self, resource_id: &str, api_version: &str) -> String {
        format!("{}{resource_id}?api-version={api_version}", self.endpoint)
    }

    async fn request(&self, method: Method, url: &str) -> Result<RequestBuilder> {
        let token = self.credential.get_token(&self.scope).await?;
        Ok(self.http.request(method, url).bearer_auth(token.token))
    }

    /// Send a request, returning status, headers and parsed body for 2xx
    async fn send(&self, req: RequestBuilder) -> Result<(StatusCode, HeaderMap, Option<Value>)> {
        let resp = req.send().await.map_err(transport_error)?;
        let status = resp.status();
        let headers = resp.headers().clone();
        let text = resp.text().await.map_err(transport_error)?;

        if !status.is_success() {
            return Err(parse_error_response(status, &headers, &text).into());
        }

        let body = if text.trim().is_empty() {
            None
        } else {
            Some(serde_json::from_str(&text).map_err(|e| {
                Error::serialization_for_kind("ArmResponse", e.to_string())
            })?)
        };
        Ok((status, headers, body))
    }

    async fn begin_write(
        &self,
        method: HttpMethod,
        resource_id: &str,
        api_version: &str,
        body: Option<Value>,
    ) -> Result<PollerState> {
        let url = self.url(resource_id, api_version);
        let http_method = match method {
            HttpMethod::Put => Method::PUT,
            HttpMethod::Patch => Method::PATCH,
            HttpMethod::Delete => Method::DELETE,
        };
        let mut req = self.request(http_method, &url).await?;
        if let Some(body) = &body {
            req = req.json(body);
        }

        let outcome = self.send(req).await;
        let (status, headers, resp_body) = match outcome {
            // Deleting something already gone is a completed delete.
            Err(e) if method == HttpMethod::Delete && e.is_not_found() => {
                return Ok(PollerState::done(method, url));
            }
            other => other?,
        };
        let poller =
            poller_from_initial_response(method, &url, status, &headers, resp_body.as_ref());
        debug!(
            resource = %resource_id,
            method = ?method,
            status = %status,
            mode = ?poller.poll_mode,
            "started Azure operation"
        );
        Ok(poller)
    }
}

#[async_trait]
impl ArmClient for HttpArmClient {
    async fn get(&self, resource_id: &str, api_version: &str) -> Result<Value> {
        let url = self.url(resource_id, api_version);
        let req = self.request(Method::GET, &url).await?;
        let (_, _, body) = self.send(req).await?;
        Ok(body.unwrap_or(Value::Null))
    }

    async fn begin_put(
        &self,
        resource_id: &str,
        api_version: &str,
        body: Value,
    ) -> Result<PollerState> {
        self.begin_write(HttpMethod::Put, resource_id, api_version, Some(body))
            .await
    }

    async fn begin_patch(
        &self,
        resource_id: &str,
        api_version: &str,
        body: Value,
    ) -> Result<PollerState> {
        self.begin_write(HttpMethod::Patch, resource_id, api_version, Some(body))
            .await
    }

    async fn begin_delete(&self, resource_id: &str, api_version: &str) -> Result<PollerState> {
        self.begin_write(HttpMethod::Delete, resource_id, api_version, None)
            .await
    }

    async fn poll(&self, state: PollerState) -> Result<PollerState> {
        if state.is_done() {
            return Ok(state);
        }
        let req = self.request(Method::GET, state.next_poll_url()).await?;
        let (status, headers, body) = match self.send(req).await {
            Ok(resp) => resp,
            Err(e) if e.is_not_found() && state.method == HttpMethod::Delete => {
                (StatusCode::NOT_FOUND, HeaderMap::new(), None)
            }
            Err(e) => return Err(e),
        };
        let (next, err) = advance_poller(state, status, &headers, body.as_ref());
        trace!(url = %next.next_poll_url(), status = ?next.status, "polled Azure operation");
        next.into_result(err)
    }
}

fn transport_error(e: reqwest::Error) -> Error {
    Error::transient(format!("request to Azure failed: {e}"), DEFAULT_REQUEUE_AFTER)
}

/// Build an [`AzureError`] from a non-2xx ARM response
pub fn parse_error_response(status: StatusCode, headers: &HeaderMap, body: &str) -> AzureError {
    let parsed: Option<Value> = serde_json::from_str(body).ok();
    let err = parsed.as_ref().and_then(|v| v.get("error"));
    let code = err
        .and_then(|e| e.get("code"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| status.canonical_reason().unwrap_or("Unknown").replace(' ', ""));
    let message = err
        .and_then(|e| e.get("message"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| body.trim().to_string());

    let mut azure = AzureError::new(status.as_u16(), code, message);
    if let Some(secs) = retry_after_secs(headers) {
        azure = azure.with_retry_after(Duration::from_secs(secs));
    }
    azure
}
