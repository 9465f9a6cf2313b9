//! One network round trip per call, in blocking or async flavour.
//!
//! Transports never follow redirects, consult caches or decode bodies; the
//! pipeline owns all of that.

mod child;
mod reqwest_client;
mod thread;

pub use child::ChildProcessConfig;
pub use child::ChildProcessTransport;
pub use child::DEFAULT_MAX_OUTPUT_BYTES;
pub use df_net::envelope::ChildRequest;
pub use df_net::envelope::Envelope;
pub use df_net::envelope::FETCH_REQUEST_FLAG;
pub use df_net::envelope::IncomingMessage;
pub use reqwest_client::ReqwestTransport;
pub use thread::ThreadTransport;

use crate::request::StreamBody;
use df_core::FetchError;
use df_core::FetchResult;
use df_net::HeaderList;
use df_net::HttpMethod;
use df_net::HttpResponse;
use df_net::NetworkUrl;
use df_net::http::HttpRequest;
use std::future::Future;
use url::Url;

#[derive(Debug, Clone, Default)]
pub enum WireBody {
    #[default]
    Empty,
    Buffered(Vec<u8>),
    Stream(StreamBody),
}

impl WireBody {
    /// Buffered bytes, or a not-supported error for streamed bodies.
    pub fn into_buffered(self, transport: &str) -> FetchResult<Vec<u8>> {
        match self {
            Self::Empty => Ok(Vec::new()),
            Self::Buffered(bytes) => Ok(bytes),
            Self::Stream(_) => Err(FetchError::not_supported(
                "fetch.transport.stream_body",
                format!("the {transport} transport cannot send a streaming request body"),
            )),
        }
    }
}

/// A fully resolved hop: final headers, body and TLS strictness.
#[derive(Debug, Clone)]
pub struct WireRequest {
    pub method: HttpMethod,
    pub url: Url,
    pub headers: HeaderList,
    pub body: WireBody,
    pub strict_tls: bool,
}

impl WireRequest {
    /// The HTTP/1.1 message for this hop plus its TLS strictness.
    pub fn into_http(self, transport: &str) -> FetchResult<(HttpRequest, bool)> {
        let body = self.body.into_buffered(transport)?;
        let url = NetworkUrl::from_url(&self.url)?;
        let request = HttpRequest::builder(self.method, url)
            .headers(&self.headers)
            .body(body)
            .build()?;
        Ok((request, self.strict_tls))
    }
}

/// Status, headers and still content-encoded body of one hop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    pub status: u16,
    pub status_text: String,
    pub headers: HeaderList,
    pub body: Vec<u8>,
}

impl From<HttpResponse> for RawResponse {
    fn from(response: HttpResponse) -> Self {
        Self {
            status: response.status.as_u16(),
            status_text: response.status_text,
            headers: response.headers,
            body: response.body,
        }
    }
}

pub trait BlockingTransport: Send + Sync {
    /// Blocks the calling thread until the hop completes.
    fn round_trip(&self, request: WireRequest) -> FetchResult<RawResponse>;
}

pub trait AsyncTransport: Send + Sync {
    fn round_trip(
        &self,
        request: WireRequest,
    ) -> impl Future<Output = FetchResult<RawResponse>> + Send;
}
