//! Network layer for the fetch engine: URLs and origins, HTTP/1.1 messages,
//! a blocking HTTP/1.1 client with TLS and content decoding.

pub mod client;
pub mod codec;
pub mod dns;
pub mod envelope;
pub mod http;
pub mod pool;
pub mod response;
pub mod tls;
pub mod tls_backend;
pub mod transport;
pub mod url;

use client::Http11Client;
use df_core::FetchResult;
use http::HttpRequest;
use tls::StrictTlsPolicy;
use tls::TlsHandshakeConfig;

pub use codec::decode_body;
pub use http::Header;
pub use http::HeaderList;
pub use http::HttpMethod;
pub use http::HttpResponse;
pub use http::HttpStatusCode;
pub use http::HttpVersion;
pub use response::Response;
pub use transport::SocketOptions;
pub use crate::url::NetworkUrl;
pub use crate::url::Origin;
pub use crate::url::Scheme;
pub use crate::url::same_origin;

/// Request paired with the TLS handshake it needs, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedRequest {
    pub request: HttpRequest,
    pub tls: Option<TlsHandshakeConfig>,
}

/// Owns one HTTP/1.1 client per TLS strictness so pooled connections are
/// never shared across the two modes.
#[derive(Default)]
pub struct NetStack {
    strict: Option<Http11Client>,
    relaxed: Option<Http11Client>,
    socket_options: SocketOptions,
}

impl NetStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_socket_options(socket_options: SocketOptions) -> Self {
        Self {
            socket_options,
            ..Self::default()
        }
    }

    /// One exchange over the wire. The response body is returned exactly
    /// as received; redirects are not followed.
    pub fn round_trip(
        &mut self,
        request: HttpRequest,
        strict_tls: bool,
    ) -> FetchResult<HttpResponse> {
        let client = self.client(strict_tls)?;
        let tls = client.tls_policy().handshake_config_for(&request.url)?;
        log::debug!("{} {}", request.method, request.url.as_str());
        client.execute(PreparedRequest { request, tls })
    }

    fn client(&mut self, strict_tls: bool) -> FetchResult<&mut Http11Client> {
        let slot = if strict_tls {
            &mut self.strict
        } else {
            &mut self.relaxed
        };

        if slot.is_none() {
            let mut client = Http11Client::new(StrictTlsPolicy::for_strictness(strict_tls))?;
            client.set_socket_options(self.socket_options);
            *slot = Some(client);
        }

        match slot {
            Some(client) => Ok(client),
            None => Err(df_core::FetchError::network(
                "net.stack.client_missing",
                "HTTP client could not be initialized",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::NetStack;
    use crate::http::HttpMethod;
    use crate::http::HttpRequest;
    use crate::url::NetworkUrl;
    use df_core::ErrorKind;
    use std::net::TcpListener;

    #[test]
    fn unreachable_host_is_a_network_error() {
        // Bind then drop to find a port nobody listens on.
        let port = match TcpListener::bind("127.0.0.1:0").and_then(|l| l.local_addr()) {
            Ok(address) => address.port(),
            Err(error) => panic!("{error}"),
        };
        let url = match NetworkUrl::parse(&format!("http://127.0.0.1:{port}/")) {
            Ok(value) => value,
            Err(error) => panic!("{error}"),
        };
        let request = match HttpRequest::builder(HttpMethod::Get, url).build() {
            Ok(value) => value,
            Err(error) => panic!("{error}"),
        };

        let mut stack = NetStack::new();
        match stack.round_trip(request, true) {
            Ok(_) => panic!("connected to a closed port"),
            Err(error) => assert_eq!(error.kind, ErrorKind::Network),
        }
    }
}
