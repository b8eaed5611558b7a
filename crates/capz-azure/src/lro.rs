//! Long-running operation poller state
//!
//! ARM answers writes with 200/201/202 and, for operations that keep running,
//! a polling URL in `Azure-AsyncOperation` or `Location`. The poller state
//! holds only what is needed to resume polling after a restart: method,
//! resource URL, poll URL, poll mode and the last observed status.

use reqwest::header::{HeaderMap, LOCATION, RETRY_AFTER};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use capz_common::crd::ProvisioningState;
use capz_common::{AzureError, Error, Result, DEFAULT_REQUEUE_AFTER};

/// Schema version written into every persisted poller state
pub const POLLER_STATE_VERSION: u32 = 1;

/// Header carrying the async operation status URL
pub const AZURE_ASYNC_OPERATION: &str = "azure-asyncoperation";

/// HTTP method of the operation being polled
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    /// Create or replace
    Put,
    /// Partial update
    Patch,
    /// Delete
    Delete,
}

/// Where the operation status is read from
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum PollMode {
    /// GET the `Azure-AsyncOperation` URL and read `status`
    AsyncOperation,
    /// GET the `Location` URL until it stops answering 202
    Location,
    /// GET the resource and read `properties.provisioningState`
    Body,
    /// The operation completed in the initial response
    None,
}

/// Last observed status of the operation
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub enum OperationStatus {
    /// Still running
    InProgress,
    /// Finished successfully
    Succeeded,
    /// Finished with an error
    Failed,
    /// Canceled, usually by a competing write
    Canceled,
}

impl OperationStatus {
    /// Whether the operation has finished
    pub fn is_done(&self) -> bool {
        !matches!(self, Self::InProgress)
    }

    fn from_status_str(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "succeeded" => Self::Succeeded,
            "failed" => Self::Failed,
            "canceled" | "cancelled" => Self::Canceled,
            _ => Self::InProgress,
        }
    }
}

/// Resumable state of one long-running operation
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PollerState {
    /// Schema version
    pub version: u32,
    /// Method of the original request
    pub method: HttpMethod,
    /// Full URL of the resource, including `api-version`
    pub resource_url: String,
    /// URL to poll, absent when polling the resource itself
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub poll_url: Option<String>,
    /// Where status is read from
    pub poll_mode: PollMode,
    /// Last observed status
    pub status: OperationStatus,
    /// Server-suggested delay before the next poll, in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<u64>,
}

impl PollerState {
    /// A poller that already finished successfully
    pub fn done(method: HttpMethod, resource_url: impl Into<String>) -> Self {
        Self {
            version: POLLER_STATE_VERSION,
            method,
            resource_url: resource_url.into(),
            poll_url: None,
            poll_mode: PollMode::None,
            status: OperationStatus::Succeeded,
            retry_after_secs: None,
        }
    }

    /// Whether the operation has finished
    pub fn is_done(&self) -> bool {
        self.status.is_done()
    }

    /// The URL the next poll should GET
    pub fn next_poll_url(&self) -> &str {
        self.poll_url.as_deref().unwrap_or(&self.resource_url)
    }

    /// Server-suggested delay before the next poll
    pub fn retry_after(&self) -> Option<std::time::Duration> {
        self.retry_after_secs.map(std::time::Duration::from_secs)
    }

    /// Convert a finished-with-error state into the matching error
    pub fn into_result(self, error: Option<AzureError>) -> Result<Self> {
        match self.status {
            OperationStatus::Failed => Err(error
                .unwrap_or_else(|| AzureError::new(0, "OperationFailed", "operation failed"))
                .into()),
            OperationStatus::Canceled => Err(Error::transient(
                format!("operation on {} was canceled", self.resource_url),
                DEFAULT_REQUEUE_AFTER,
            )),
            OperationStatus::InProgress | OperationStatus::Succeeded => Ok(self),
        }
    }
}

// =============================================================================
// Response interpretation
// =============================================================================

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
}

/// `Retry-After` in seconds, if present and numeric
pub fn retry_after_secs(headers: &HeaderMap) -> Option<u64> {
    header_str(headers, RETRY_AFTER.as_str()).and_then(|v| v.trim().parse().ok())
}

fn provisioning_state(body: Option<&Value>) -> Option<ProvisioningState> {
    body.and_then(|b| b.pointer("/properties/provisioningState"))
        .and_then(Value::as_str)
        .map(|s| s.parse().unwrap_or_default())
}

fn status_from_provisioning_state(state: Option<ProvisioningState>) -> OperationStatus {
    match state {
        None | Some(ProvisioningState::Succeeded) => OperationStatus::Succeeded,
        Some(ProvisioningState::Failed) => OperationStatus::Failed,
        Some(ProvisioningState::Canceled) => OperationStatus::Canceled,
        Some(_) => OperationStatus::InProgress,
    }
}

/// Build the poller for the successful initial response of a write
pub fn poller_from_initial_response(
    method: HttpMethod,
    resource_url: &str,
    status: StatusCode,
    headers: &HeaderMap,
    body: Option<&Value>,
) -> PollerState {
    let retry_after_secs = retry_after_secs(headers);
    let mut poller = PollerState {
        version: POLLER_STATE_VERSION,
        method,
        resource_url: resource_url.to_string(),
        poll_url: None,
        poll_mode: PollMode::None,
        status: OperationStatus::InProgress,
        retry_after_secs,
    };

    if let Some(url) = header_str(headers, AZURE_ASYNC_OPERATION) {
        poller.poll_mode = PollMode::AsyncOperation;
        poller.poll_url = Some(url.to_string());
        return poller;
    }
    if let Some(url) = header_str(headers, LOCATION.as_str()) {
        poller.poll_mode = PollMode::Location;
        poller.poll_url = Some(url.to_string());
        return poller;
    }

    match (method, status) {
        (HttpMethod::Delete, _) => {
            poller.status = if status == StatusCode::ACCEPTED {
                poller.poll_mode = PollMode::Body;
                OperationStatus::InProgress
            } else {
                OperationStatus::Succeeded
            };
        }
        (_, StatusCode::ACCEPTED) => {
            poller.poll_mode = PollMode::Body;
        }
        _ => {
            poller.status = status_from_provisioning_state(provisioning_state(body));
            if !poller.status.is_done() {
                poller.poll_mode = PollMode::Body;
            }
        }
    }
    poller
}

/// Advance the poller from the response to a poll GET
///
/// Errors reported inside an async operation body are returned alongside
/// the new state so the caller can classify them.
pub fn advance_poller(
    mut poller: PollerState,
    status: StatusCode,
    headers: &HeaderMap,
    body: Option<&Value>,
) -> (PollerState, Option<AzureError>) {
    poller.retry_after_secs = retry_after_secs(headers).or(poller.retry_after_secs);

    match poller.poll_mode {
        PollMode::None => (poller, None),
        PollMode::AsyncOperation => {
            let op_status = body
                .and_then(|b| b.get("status"))
                .and_then(Value::as_str)
                .map(OperationStatus::from_status_str)
                .unwrap_or(OperationStatus::InProgress);
            poller.status = op_status;
            let err = (op_status == OperationStatus::Failed).then(|| operation_error(body));
            (poller, err)
        }
        PollMode::Location => {
            if status == StatusCode::ACCEPTED {
                if let Some(url) = header_str(headers, LOCATION.as_str()) {
                    poller.poll_url = Some(url.to_string());
                }
                poller.status = OperationStatus::InProgress;
            } else {
                poller.status = OperationStatus::Succeeded;
            }
            (poller, None)
        }
        PollMode::Body => {
            if poller.method == HttpMethod::Delete {
                poller.status = if status == StatusCode::NOT_FOUND {
                    OperationStatus::Succeeded
                } else {
                    OperationStatus::InProgress
                };
                return (poller, None);
            }
            poller.status = status_from_provisioning_state(provisioning_state(body));
            let err = (poller.status == OperationStatus::Failed).then(|| operation_error(body));
            (poller, err)
        }
    }
}

/// Error described by an async operation or resource body
pub fn operation_error(body: Option<&Value>) -> AzureError {
    let err = body.and_then(|b| b.get("error"));
    let code = err
        .and_then(|e| e.get("code"))
        .and_then(Value::as_str)
        .unwrap_or("OperationFailed");
    let message = err
        .and_then(|e| e.get("message"))
        .and_then(Value::as_str)
        .unwrap_or("long-running operation failed");
    AzureError::new(0, code, message)
}
