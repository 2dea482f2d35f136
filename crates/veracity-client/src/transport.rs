//! Getting a JSON-RPC batch to one node and its answers back.
//!
//! The transport is untrusted plumbing. It does not look at results; the
//! client verifies everything it returns.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use veracity_core::{RpcRequest, RpcResponse};

use crate::error::TransportError;

#[async_trait]
pub trait Transport: Send + Sync {
    /// Post `requests` as one batch to `url`. Answers may come back in any
    /// order.
    async fn send(
        &self,
        url: &str,
        requests: &[RpcRequest],
        timeout: Duration,
    ) -> Result<Vec<RpcResponse>, TransportError>;
}

/// JSON over HTTP POST.
#[derive(Clone, Debug, Default)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

fn request_error(url: &str, timeout: Duration, error: reqwest::Error) -> TransportError {
    if error.is_timeout() {
        TransportError::Timeout {
            url: url.to_string(),
            timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        }
    } else {
        TransportError::Request {
            url: url.to_string(),
            reason: error.to_string(),
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(
        &self,
        url: &str,
        requests: &[RpcRequest],
        timeout: Duration,
    ) -> Result<Vec<RpcResponse>, TransportError> {
        let response = self
            .client
            .post(url)
            .timeout(timeout)
            .json(requests)
            .send()
            .await
            .map_err(|e| request_error(url, timeout, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        let body: Value = response
            .json()
            .await
            .map_err(|e| request_error(url, timeout, e))?;
        parse_batch(url, body)
    }
}

/// A batch answer, or a single object from nodes that unwrap one-element
/// batches.
pub(crate) fn parse_batch(url: &str, body: Value) -> Result<Vec<RpcResponse>, TransportError> {
    let items = match body {
        Value::Array(items) => items,
        single => vec![single],
    };
    items
        .into_iter()
        .map(|item| {
            serde_json::from_value(item).map_err(|e| TransportError::InvalidResponse {
                url: url.to_string(),
                reason: e.to_string(),
            })
        })
        .collect()
}
