// SPDX-FileCopyrightText: 2026 Qbot Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Access-token bootstrap.
//!
//! [`TokenClient`] fetches a token from the local issuing endpoint and
//! resolves a [`TokenCell`]; the socket transport waits on the cell before
//! its first connection attempt and re-reads it on every reconnect.

use std::time::Duration;

use qbot_core::QbotError;
use qbot_core::wire::IssuedToken;
use serde::Deserialize;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Shared, resolve-once token slot.
///
/// Cloning yields another handle to the same slot.
#[derive(Debug, Clone)]
pub struct TokenCell {
    tx: watch::Sender<Option<String>>,
}

impl TokenCell {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self { tx }
    }

    /// A cell that is already resolved.
    pub fn resolved(token: impl Into<String>) -> Self {
        let cell = Self::new();
        cell.set(token);
        cell
    }

    /// Stores a token and wakes every waiter.
    pub fn set(&self, token: impl Into<String>) {
        let token = token.into();
        self.tx.send_replace(Some(token));
    }

    /// Current token, if one has been issued.
    pub fn get(&self) -> Option<String> {
        self.tx.borrow().clone()
    }

    /// Waits until a token is available.
    pub async fn wait(&self) -> String {
        let mut rx = self.tx.subscribe();
        loop {
            if let Some(token) = rx.borrow_and_update().clone() {
                return token;
            }
            // The sender lives in `self`, so `changed` cannot fail while we hold it.
            if rx.changed().await.is_err() {
                continue;
            }
        }
    }
}

impl Default for TokenCell {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    data: Option<TokenData>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct TokenData {
    #[serde(default, rename = "apiResponse")]
    api_response: Option<ApiResponse>,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default, rename = "Token")]
    token: Option<String>,
    #[serde(default, rename = "ExpireTime")]
    expire_time: Option<i64>,
}

/// HTTP client for the token-issuing endpoint.
#[derive(Debug, Clone)]
pub struct TokenClient {
    client: reqwest::Client,
    endpoint: String,
}

impl TokenClient {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, QbotError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| QbotError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }

    /// Requests a fresh token.
    pub async fn fetch(&self) -> Result<IssuedToken, QbotError> {
        debug!(endpoint = %self.endpoint, "requesting access token");
        let response = self
            .client
            .get(&self.endpoint)
            .send()
            .await
            .map_err(|e| QbotError::Token {
                message: format!("token request failed: {e}"),
                source: Some(Box::new(e)),
            })?;

        let status = response.status();
        let body: TokenResponse = response.json().await.map_err(|e| QbotError::Token {
            message: format!("token response from {status} was not JSON: {e}"),
            source: Some(Box::new(e)),
        })?;

        if let Some(error) = body.error {
            let message = error
                .as_str()
                .map(str::to_string)
                .unwrap_or_else(|| error.to_string());
            return Err(QbotError::Token {
                message: format!("token endpoint returned error: {message}"),
                source: None,
            });
        }

        let api = body.data.and_then(|d| d.api_response);
        match api {
            Some(ApiResponse {
                token: Some(token),
                expire_time,
            }) if !token.is_empty() => Ok(IssuedToken {
                token,
                expire_time: expire_time.unwrap_or_default(),
            }),
            _ => Err(QbotError::Token {
                message: format!("token endpoint returned {status} without a token"),
                source: None,
            }),
        }
    }

    /// Fetches a token and resolves `cell` with it.
    ///
    /// On failure the cell stays empty and the error is logged and returned.
    pub async fn bootstrap(&self, cell: &TokenCell) -> Result<IssuedToken, QbotError> {
        match self.fetch().await {
            Ok(issued) => {
                info!(expire_time = issued.expire_time, "access token issued");
                cell.set(issued.token.clone());
                Ok(issued)
            }
            Err(e) => {
                warn!(error = %e, "token bootstrap failed, socket stays idle");
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn client_for(server: &MockServer) -> TokenClient {
        TokenClient::new(
            format!("{}/getDemoToken", server.uri()),
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn fetch_parses_api_response() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/getDemoToken"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": {"apiResponse": {"Token": "tok-1", "ExpireTime": 1700000000}}
            })))
            .mount(&server)
            .await;

        let issued = client_for(&server).await.fetch().await.unwrap();
        assert_eq!(issued.token, "tok-1");
        assert_eq!(issued.expire_time, 1_700_000_000);
    }

    #[tokio::test]
    async fn error_body_becomes_token_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500).set_body_json(serde_json::json!({
                "error": "Missing required configuration"
            })))
            .mount(&server)
            .await;

        let err = client_for(&server).await.fetch().await.unwrap_err();
        assert!(matches!(err, QbotError::Token { ref message, .. } if message.contains("Missing required")));
    }

    #[tokio::test]
    async fn bootstrap_resolves_cell_only_on_success() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": {"apiResponse": {}}
            })))
            .mount(&server)
            .await;

        let cell = TokenCell::new();
        assert!(client_for(&server).await.bootstrap(&cell).await.is_err());
        assert!(cell.get().is_none());
    }

    #[tokio::test]
    async fn waiters_wake_when_token_arrives() {
        let cell = TokenCell::new();
        let waiter = {
            let cell = cell.clone();
            tokio::spawn(async move { cell.wait().await })
        };
        tokio::task::yield_now().await;
        cell.set("late-token");
        assert_eq!(waiter.await.unwrap(), "late-token");
    }

    #[tokio::test]
    async fn resolved_cell_returns_immediately() {
        let cell = TokenCell::resolved("ready");
        assert_eq!(cell.wait().await, "ready");
    }
}
