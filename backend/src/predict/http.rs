//! HTTP transport abstraction for the prediction service and image fetches.
//!
//! The trait exists so the pipeline and client can be exercised against a
//! scripted transport in tests; production code uses [`ReqwestHttp`].

use std::future::Future;
use std::time::Duration;

#[derive(Debug, Clone, thiserror::Error)]
pub enum NetworkError {
    #[error("failed to build HTTP client: {0}")]
    Client(String),
    #[error("invalid image reference {0:?}")]
    InvalidUrl(String),
    #[error("request to {url} failed: {detail}")]
    Transport { url: String, detail: String },
    #[error("HTTP {status} from {url}")]
    Status { status: u16, url: String },
}

pub trait HttpClient: Send + Sync {
    /// Plain GET, returning the response body on a 2xx status.
    fn get(&self, url: &str) -> impl Future<Output = Result<Vec<u8>, NetworkError>> + Send;

    /// GET with Bearer token authentication.
    fn get_with_bearer(
        &self,
        url: &str,
        token: &str,
    ) -> impl Future<Output = Result<Vec<u8>, NetworkError>> + Send;

    /// POST with a JSON body and Bearer token authentication.
    fn post_json(
        &self,
        url: &str,
        token: &str,
        body: &serde_json::Value,
    ) -> impl Future<Output = Result<Vec<u8>, NetworkError>> + Send;
}

/// Production transport backed by reqwest.
#[derive(Clone)]
pub struct ReqwestHttp {
    client: reqwest::Client,
}

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

impl ReqwestHttp {
    pub fn new() -> Result<Self, NetworkError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| NetworkError::Client(e.to_string()))?;
        Ok(Self { client })
    }

    async fn read_body(
        url: &str,
        response: Result<reqwest::Response, reqwest::Error>,
    ) -> Result<Vec<u8>, NetworkError> {
        let response = response.map_err(|e| NetworkError::Transport {
            url: url.to_string(),
            detail: e.to_string(),
        })?;
        let status = response.status();
        if !status.is_success() {
            return Err(NetworkError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }
        response
            .bytes()
            .await
            .map(|b| b.to_vec())
            .map_err(|e| NetworkError::Transport {
                url: url.to_string(),
                detail: e.to_string(),
            })
    }
}

impl HttpClient for ReqwestHttp {
    async fn get(&self, url: &str) -> Result<Vec<u8>, NetworkError> {
        let response = self.client.get(url).send().await;
        Self::read_body(url, response).await
    }

    async fn get_with_bearer(&self, url: &str, token: &str) -> Result<Vec<u8>, NetworkError> {
        let response = self
            .client
            .get(url)
            .header("Authorization", format!("Bearer {token}"))
            .send()
            .await;
        Self::read_body(url, response).await
    }

    async fn post_json(
        &self,
        url: &str,
        token: &str,
        body: &serde_json::Value,
    ) -> Result<Vec<u8>, NetworkError> {
        let response = self
            .client
            .post(url)
            .header("Authorization", format!("Bearer {token}"))
            .json(body)
            .send()
            .await;
        Self::read_body(url, response).await
    }
}
