use log::debug;
use reqwest::{Client, Response};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::Semaphore;
use url::Url;

use crate::error::{PipePulseError, Result};

const USER_AGENT: &str = concat!("PipePulse/", env!("CARGO_PKG_VERSION"));

/// REST client for the dashboard backend.
///
/// Requests share a semaphore so a cycle fanning out over many pipelines
/// never has more than `max_concurrent` requests in flight.
pub struct BackendClient {
    client: Client,
    base_url: Url,
    semaphore: Arc<Semaphore>,
}

impl BackendClient {
    pub fn new(base_url: &str, max_concurrent: usize) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| PipePulseError::Config(format!("Failed to create HTTP client: {e}")))?;

        let mut base_url = Url::parse(base_url)
            .map_err(|e| PipePulseError::Config(format!("Invalid backend URL: {e}")))?;

        if base_url.cannot_be_a_base() {
            return Err(PipePulseError::Config(format!(
                "Backend URL cannot be used as a base: {base_url}"
            )));
        }

        // Url::join drops the last segment unless the path ends with a slash
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        Ok(Self {
            client,
            base_url,
            semaphore: Arc::new(Semaphore::new(max_concurrent.max(1))),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub(super) fn client(&self) -> &Client {
        &self.client
    }

    pub(super) fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .map_err(|e| PipePulseError::Config(format!("Invalid endpoint URL '{path}': {e}")))
    }

    /// Sends a request, turning any non-2xx status into `PipePulseError::Api`.
    pub(super) async fn send(&self, request: reqwest::RequestBuilder) -> Result<Response> {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|e| PipePulseError::Config(format!("Request limiter closed: {e}")))?;

        let response = request.send().await?;
        let status = response.status();
        debug!("{} -> {status}", response.url());

        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read error response".to_string());
            return Err(PipePulseError::Api {
                status: status.as_u16(),
                message,
            });
        }

        Ok(response)
    }

    pub(super) async fn get_json(&self, url: Url) -> Result<Value> {
        let response = self.send(self.client.get(url)).await?;
        Ok(response.json().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn appends_trailing_slash_to_base_path() {
        let client = BackendClient::new("http://localhost:8000/dashboard", 4).unwrap();
        assert_eq!(client.base_url().as_str(), "http://localhost:8000/dashboard/");
        assert_eq!(
            client.endpoint("api/pipelines").unwrap().as_str(),
            "http://localhost:8000/dashboard/api/pipelines"
        );
    }

    #[test]
    fn keeps_root_base_url() {
        let client = BackendClient::new("http://localhost:8000", 4).unwrap();
        assert_eq!(
            client.endpoint("api/failed-builds").unwrap().as_str(),
            "http://localhost:8000/api/failed-builds"
        );
    }

    #[test]
    fn rejects_invalid_url() {
        let result = BackendClient::new("not a url", 4);
        assert!(matches!(result, Err(PipePulseError::Config(_))));
    }

    #[tokio::test]
    async fn maps_non_success_status_to_api_error() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/api/pipelines")
            .with_status(500)
            .with_body("boom")
            .create_async()
            .await;

        let client = BackendClient::new(&server.url(), 4).unwrap();
        let url = client.endpoint("api/pipelines").unwrap();
        let result = client.get_json(url).await;

        mock.assert_async().await;
        match result {
            Err(PipePulseError::Api { status, message }) => {
                assert_eq!(status, 500);
                assert_eq!(message, "boom");
            }
            other => panic!("expected API error, got {other:?}"),
        }
    }
}
