use std::time::Duration;

use homeboard_domain::HomeboardError;
use reqwest::{Client as ReqwestClient, Method, RequestBuilder, Response, StatusCode};
use tracing::debug;

use crate::errors::{status_error, InfraError};

const DEFAULT_USER_AGENT: &str = concat!("homeboard/", env!("CARGO_PKG_VERSION"));

/// HTTP client with a per-request timeout.
///
/// Requests are sent exactly once. A failed fetch is retried by the next
/// scheduled cycle, never inside the current one.
#[derive(Clone)]
pub struct HttpClient {
    client: ReqwestClient,
}

impl HttpClient {
    /// Start building a new HTTP client.
    pub fn builder() -> HttpClientBuilder {
        HttpClientBuilder::default()
    }

    /// Convenience constructor with default configuration.
    pub fn new() -> Result<Self, HomeboardError> {
        Self::builder().build()
    }

    /// Create a request builder using the underlying reqwest client.
    pub fn request<U>(&self, method: Method, url: U) -> RequestBuilder
    where
        U: reqwest::IntoUrl,
    {
        self.client.request(method, url)
    }

    /// Execute the provided request builder and return the response whatever
    /// its status.
    pub async fn send(&self, builder: RequestBuilder) -> Result<Response, HomeboardError> {
        let request = builder.build().map_err(|err| HomeboardError::from(InfraError::from(err)))?;

        let method = request.method().clone();
        let url = request.url().clone();
        debug!(%method, %url, "sending HTTP request");

        match self.client.execute(request).await {
            Ok(response) => {
                debug!(%method, %url, status = %response.status(), "received HTTP response");
                Ok(response)
            }
            Err(err) => {
                debug!(%method, %url, error = %err, "HTTP request failed");
                Err(InfraError::from(err).into())
            }
        }
    }

    /// Like [`HttpClient::send`], but non-success statuses become errors.
    ///
    /// `304 Not Modified` is passed through so conditional requests can be
    /// handled by the caller.
    pub async fn send_checked(&self, builder: RequestBuilder) -> Result<Response, HomeboardError> {
        let response = self.send(builder).await?;
        let status = response.status();
        if status.is_success() || status == StatusCode::NOT_MODIFIED {
            Ok(response)
        } else {
            Err(status_error(status))
        }
    }
}

/// Builder for [`HttpClient`].
#[derive(Debug)]
pub struct HttpClientBuilder {
    timeout: Duration,
    user_agent: Option<String>,
    default_headers: Option<reqwest::header::HeaderMap>,
}

impl Default for HttpClientBuilder {
    fn default() -> Self {
        Self { timeout: Duration::from_secs(30), user_agent: None, default_headers: None }
    }
}

impl HttpClientBuilder {
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn user_agent(mut self, agent: impl Into<String>) -> Self {
        self.user_agent = Some(agent.into());
        self
    }

    pub fn default_headers(mut self, headers: reqwest::header::HeaderMap) -> Self {
        self.default_headers = Some(headers);
        self
    }

    pub fn build(self) -> Result<HttpClient, HomeboardError> {
        let agent = self.user_agent.unwrap_or_else(|| DEFAULT_USER_AGENT.to_string());
        let mut builder = ReqwestClient::builder().timeout(self.timeout).user_agent(agent).no_proxy();

        if let Some(headers) = self.default_headers {
            builder = builder.default_headers(headers);
        }

        let client = builder.build().map_err(|err| HomeboardError::from(InfraError::from(err)))?;

        Ok(HttpClient { client })
    }
}
