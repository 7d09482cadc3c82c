use std::time::Duration;

use futures_util::StreamExt;

use super::{ByteStream, ChatBackend};
use crate::config::ClientConfig;
use crate::error::ChatError;
use crate::protocol::{ChatRequestBody, FallbackResponse};

pub const REQUEST_ID_HEADER: &str = "x-request-id";
const ERROR_BODY_MAX_CHARS: usize = 512;

fn build_reqwest_client(
    timeout: Duration,
    connect_timeout: Duration,
) -> Result<reqwest::Client, ChatError> {
    reqwest::Client::builder()
        .tcp_nodelay(true)
        .connect_timeout(connect_timeout)
        .redirect(reqwest::redirect::Policy::none())
        .timeout(timeout)
        .build()
        .map_err(|err| ChatError::Transport(format!("Failed to build HTTP client: {err}")))
}

/// HTTP client for the streaming and non-streaming chat endpoints.
pub struct HttpBackend {
    client: reqwest::Client,
    stream_url: url::Url,
    fallback_url: url::Url,
}

impl HttpBackend {
    /// # Errors
    ///
    /// Returns [`ChatError::Config`] when the configured endpoints do not parse
    /// and [`ChatError::Transport`] when the HTTP client cannot be built.
    pub fn new(config: &ClientConfig) -> Result<Self, ChatError> {
        let stream_url = parse_endpoint(&config.stream_url())?;
        let fallback_url = parse_endpoint(&config.fallback_url())?;
        let client = build_reqwest_client(config.request_timeout(), config.connect_timeout())?;
        Ok(Self {
            client,
            stream_url,
            fallback_url,
        })
    }

    #[must_use]
    pub fn stream_url(&self) -> &url::Url {
        &self.stream_url
    }

    #[must_use]
    pub fn fallback_url(&self) -> &url::Url {
        &self.fallback_url
    }

    async fn post(
        &self,
        url: &url::Url,
        body: &ChatRequestBody,
        request_uuid: uuid::Uuid,
    ) -> Result<reqwest::Response, ChatError> {
        let payload = serde_json::to_vec(body)
            .map_err(|err| ChatError::Internal(format!("Failed to encode request: {err}")))?;
        let response = self
            .client
            .post(url.clone())
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .header(REQUEST_ID_HEADER, request_uuid.to_string())
            .body(payload)
            .send()
            .await
            .map_err(|err| ChatError::Transport(err.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let text = response.text().await.unwrap_or_default();
        tracing::debug!(
            url = %url,
            status = status.as_u16(),
            "backend returned non-success status"
        );
        Err(ChatError::Upstream {
            status: status.as_u16(),
            message: truncate_chars(&text, ERROR_BODY_MAX_CHARS).to_string(),
        })
    }
}

impl ChatBackend for HttpBackend {
    async fn open_stream(
        &self,
        body: &ChatRequestBody,
        request_uuid: uuid::Uuid,
    ) -> Result<ByteStream, ChatError> {
        let response = self.post(&self.stream_url, body, request_uuid).await?;
        let stream = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(ChatError::from));
        Ok(Box::pin(stream))
    }

    async fn complete(
        &self,
        body: &ChatRequestBody,
        request_uuid: uuid::Uuid,
    ) -> Result<FallbackResponse, ChatError> {
        let response = self.post(&self.fallback_url, body, request_uuid).await?;
        let bytes = response.bytes().await.map_err(ChatError::from)?;
        serde_json::from_slice(&bytes)
            .map_err(|err| ChatError::Decode(format!("Invalid fallback response: {err}")))
    }
}

fn parse_endpoint(raw: &str) -> Result<url::Url, ChatError> {
    url::Url::parse(raw).map_err(|err| ChatError::Config(format!("Invalid endpoint '{raw}': {err}")))
}

fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
