// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Mock `JsonRpcClient` for tests: canned responses per RPC method.
//!
//! Responses queue per method and drain in order; the last queued response
//! for a method is sticky so polling loops keep receiving it. Queued
//! error responses surface as JSON-RPC errors, which lets tests exercise
//! the send loop's broadcast-error classification.

use async_trait::async_trait;
use ethers::providers::{HttpClientError, JsonRpcClient, JsonRpcError};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::fmt::Debug;
use std::sync::{Arc, Mutex};

type MockResponse = Result<Value, JsonRpcError>;

#[derive(Clone, Debug, Default)]
pub struct EthMockProvider {
    responses: Arc<Mutex<HashMap<String, VecDeque<MockResponse>>>>,
}

impl EthMockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a successful response for `method`.
    pub fn add_response(&self, method: &str, response: Value) {
        self.responses
            .lock()
            .unwrap()
            .entry(method.to_string())
            .or_default()
            .push_back(Ok(response));
    }

    /// Queue a JSON-RPC error response for `method`.
    pub fn add_error_response(&self, method: &str, code: i64, message: &str) {
        self.responses
            .lock()
            .unwrap()
            .entry(method.to_string())
            .or_default()
            .push_back(Err(JsonRpcError {
                code,
                message: message.to_string(),
                data: None,
            }));
    }

    fn next_response(&self, method: &str) -> Option<MockResponse> {
        let mut responses = self.responses.lock().unwrap();
        let queue = responses.get_mut(method)?;
        if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        }
    }
}

#[async_trait]
impl JsonRpcClient for EthMockProvider {
    type Error = HttpClientError;

    async fn request<T: Serialize + Send + Sync + Debug, R: DeserializeOwned + Send>(
        &self,
        method: &str,
        _params: T,
    ) -> Result<R, HttpClientError> {
        let response = self.next_response(method).ok_or_else(|| {
            HttpClientError::JsonRpcError(JsonRpcError {
                code: -32601,
                message: format!("no mocked response for method {method}"),
                data: None,
            })
        })?;

        match response {
            Ok(value) => serde_json::from_value(value.clone()).map_err(|err| {
                HttpClientError::SerdeJson {
                    err,
                    text: value.to_string(),
                }
            }),
            Err(err) => Err(HttpClientError::JsonRpcError(err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_responses_drain_in_order_and_last_sticks() {
        let provider = EthMockProvider::new();
        provider.add_response("eth_blockNumber", json!("0x1"));
        provider.add_response("eth_blockNumber", json!("0x2"));

        let a: String = provider.request("eth_blockNumber", ()).await.unwrap();
        let b: String = provider.request("eth_blockNumber", ()).await.unwrap();
        let c: String = provider.request("eth_blockNumber", ()).await.unwrap();
        assert_eq!(a, "0x1");
        assert_eq!(b, "0x2");
        // Sticky last response for polling callers.
        assert_eq!(c, "0x2");
    }

    #[tokio::test]
    async fn test_unmocked_method_errors() {
        let provider = EthMockProvider::new();
        let result: Result<String, _> = provider.request("eth_gasPrice", ()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_error_response_surfaces_message() {
        let provider = EthMockProvider::new();
        provider.add_error_response("eth_sendRawTransaction", -32000, "already known");
        let result: Result<String, _> = provider.request("eth_sendRawTransaction", ()).await;
        let err = result.unwrap_err();
        assert!(err.to_string().contains("already known"));
    }
}
