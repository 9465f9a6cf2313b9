use super::AsyncTransport;
use super::RawResponse;
use super::WireBody;
use super::WireRequest;
use df_core::FetchError;
use df_core::FetchResult;
use df_net::HeaderList;
use df_net::SocketOptions;
use reqwest::Body;
use reqwest::Client;
use reqwest::Method;
use reqwest::redirect::Policy;

/// Async transport on `reqwest`. Redirects are never followed and bodies are
/// returned still content-encoded; the pipeline does both.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    strict: Client,
    relaxed: Client,
}

impl ReqwestTransport {
    pub fn new() -> FetchResult<Self> {
        Self::with_socket_options(SocketOptions::default())
    }

    pub fn with_socket_options(options: SocketOptions) -> FetchResult<Self> {
        Ok(Self {
            strict: build_client(true, options)?,
            relaxed: build_client(false, options)?,
        })
    }
}

fn build_client(strict_tls: bool, options: SocketOptions) -> FetchResult<Client> {
    let mut builder = Client::builder()
        .redirect(Policy::none())
        .danger_accept_invalid_certs(!strict_tls)
        .connect_timeout(options.connect_timeout);
    if let Some(timeout) = options.io_timeout {
        builder = builder.read_timeout(timeout);
    }

    builder.build().map_err(|error| {
        FetchError::network(
            "fetch.reqwest.client_init_failed",
            format!("failed to build HTTP client: {error}"),
        )
    })
}

fn transport_error(error: reqwest::Error) -> FetchError {
    FetchError::network("fetch.reqwest.failed", format!("fetch failed: {error}"))
}

impl AsyncTransport for ReqwestTransport {
    async fn round_trip(&self, request: WireRequest) -> FetchResult<RawResponse> {
        let client = if request.strict_tls {
            &self.strict
        } else {
            &self.relaxed
        };
        let method = Method::from_bytes(request.method.as_str().as_bytes()).map_err(|error| {
            FetchError::not_supported(
                "fetch.reqwest.method_unsupported",
                format!("unsupported method {}: {error}", request.method),
            )
        })?;

        let mut builder = client.request(method, request.url.clone());
        for header in &request.headers {
            builder = builder.header(header.name.as_str(), header.value.as_str());
        }
        builder = match request.body {
            WireBody::Empty => builder,
            WireBody::Buffered(bytes) => builder.body(bytes),
            WireBody::Stream(body) => {
                let stream = body.take().ok_or_else(|| {
                    FetchError::network(
                        "fetch.reqwest.stream_consumed",
                        "streaming request body was already consumed",
                    )
                })?;
                builder.body(Body::wrap_stream(stream))
            }
        };

        log::debug!("{} {}", request.method, request.url);
        let response = builder.send().await.map_err(transport_error)?;

        let status = response.status();
        let mut headers = HeaderList::new();
        for (name, value) in response.headers() {
            headers.append(name.as_str(), &String::from_utf8_lossy(value.as_bytes()))?;
        }
        let body = response.bytes().await.map_err(transport_error)?;

        Ok(RawResponse {
            status: status.as_u16(),
            status_text: status.canonical_reason().unwrap_or_default().to_owned(),
            headers,
            body: body.to_vec(),
        })
    }
}
