//! JSON documents exchanged with the per-hop child process.
//!
//! The parent passes a [`ChildRequest`] after [`FETCH_REQUEST_FLAG`] and the
//! child prints exactly one [`Envelope`] on stdout. Field names and the
//! base64 body encoding are the wire format; do not rename them.

use crate::http::HeaderList;
use crate::http::HttpMethod;
use crate::http::HttpRequest;
use crate::http::HttpResponse;
use crate::http::HttpStatusCode;
use crate::http::HttpVersion;
use crate::url::NetworkUrl;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use df_core::FetchError;
use df_core::FetchResult;
use serde::Deserialize;
use serde::Serialize;
use url::Url;

pub const FETCH_REQUEST_FLAG: &str = "--fetch-request";

/// Hop description handed to the child on its command line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChildRequest {
    pub method: String,
    pub url: String,
    /// Flat `[name, value, ...]` pairs.
    pub headers: Vec<String>,
    /// Base64 encoded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    pub strict_tls: bool,
}

impl ChildRequest {
    pub fn new(
        method: HttpMethod,
        url: &Url,
        headers: &HeaderList,
        body: &[u8],
        strict_tls: bool,
    ) -> Self {
        Self {
            method: method.as_str().to_owned(),
            url: url.to_string(),
            headers: headers.to_raw(),
            body: (!body.is_empty()).then(|| STANDARD.encode(body)),
            strict_tls,
        }
    }

    /// The HTTP/1.1 message to send plus its TLS strictness.
    pub fn into_http(self) -> FetchResult<(HttpRequest, bool)> {
        let method = self.method.parse::<HttpMethod>()?;
        let url = Url::parse(&self.url).map_err(|error| {
            FetchError::invalid_input(
                "net.envelope.url_invalid",
                format!("failed to parse URL `{}`: {error}", self.url),
            )
        })?;
        let headers = HeaderList::from_raw(&self.headers)?;
        let body = match self.body {
            Some(encoded) => decode_base64(&encoded)?,
            None => Vec::new(),
        };

        let request = HttpRequest::builder(method, NetworkUrl::from_url(&url)?)
            .headers(&headers)
            .body(body)
            .build()?;
        Ok((request, self.strict_tls))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncomingMessage {
    pub status_code: u16,
    pub status_message: String,
    pub raw_headers: Vec<String>,
    /// Base64 encoded, still content-encoded.
    pub data: String,
}

/// The single JSON document a child prints on stdout.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub incoming_message: Option<IncomingMessage>,
}

impl Envelope {
    pub fn success(response: &HttpResponse) -> Self {
        Self {
            error: None,
            incoming_message: Some(IncomingMessage {
                status_code: response.status.as_u16(),
                status_message: response.status_text.clone(),
                raw_headers: response.headers.to_raw(),
                data: STANDARD.encode(&response.body),
            }),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            incoming_message: None,
        }
    }

    /// The child's response, or a network error carrying its message.
    pub fn into_response(self) -> FetchResult<HttpResponse> {
        if let Some(message) = self.error {
            return Err(FetchError::network(
                "net.envelope.child_failed",
                format!("fetch failed: {message}"),
            ));
        }

        let Some(message) = self.incoming_message else {
            return Err(FetchError::network(
                "net.envelope.empty",
                "fetch failed: child reported neither a response nor an error",
            ));
        };
        Ok(HttpResponse {
            version: HttpVersion::Http11,
            status: HttpStatusCode::new(message.status_code)?,
            status_text: message.status_message,
            headers: HeaderList::from_raw(&message.raw_headers)?,
            body: decode_base64(&message.data)?,
        })
    }
}

fn decode_base64(encoded: &str) -> FetchResult<Vec<u8>> {
    STANDARD.decode(encoded).map_err(|error| {
        FetchError::network(
            "net.envelope.base64_invalid",
            format!("child payload is not valid base64: {error}"),
        )
    })
}
