mod http_transport;

pub use http_transport::HttpBackend;

use std::future::Future;
use std::pin::Pin;

use bytes::Bytes;
use futures_util::Stream;

use crate::error::ChatError;
use crate::protocol::{ChatRequestBody, FallbackResponse};

/// Response body of the streaming endpoint, chunked as the transport delivers it.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, ChatError>> + Send>>;

/// The two backend calls a chat request can make.
///
/// `HttpBackend` is the production implementation; tests substitute
/// scripted backends.
pub trait ChatBackend: Send + Sync + 'static {
    /// Open the streaming endpoint. A non-success status is an error.
    fn open_stream(
        &self,
        body: &ChatRequestBody,
        request_uuid: uuid::Uuid,
    ) -> impl Future<Output = Result<ByteStream, ChatError>> + Send;

    /// One non-streaming call with the same payload.
    fn complete(
        &self,
        body: &ChatRequestBody,
        request_uuid: uuid::Uuid,
    ) -> impl Future<Output = Result<FallbackResponse, ChatError>> + Send;
}
