//! Blocking HTTP/1.1 client.
//!
//! One `execute` call is one request/response exchange. Redirects and
//! `Content-Encoding` are left to the caller.

use crate::PreparedRequest;
use crate::dns::DnsResolver;
use crate::dns::SystemDnsResolver;
use crate::http::HeaderList;
use crate::http::HttpMethod;
use crate::http::HttpRequest;
use crate::http::HttpResponse;
use crate::http::HttpStatusCode;
use crate::http::HttpVersion;
use crate::pool::ConnectionKey;
use crate::pool::ConnectionPool;
use crate::pool::InMemoryConnectionPool;
use crate::pool::PoolStats;
use crate::tls::StrictTlsPolicy;
use crate::tls_backend::RustlsTlsAdapter;
use crate::tls_backend::TlsBackendAdapter;
use crate::transport::BoxedIoStream;
use crate::transport::SocketOptions;
use crate::transport::TcpTransport;
use crate::transport::Transport;
use crate::transport::connect_first_available;
use df_core::FetchError;
use df_core::FetchResult;
use std::io::Read;
use std::io::Write;

const MAX_RESPONSE_HEAD_BYTES: usize = 128 * 1024;
const MAX_CHUNK_LINE_BYTES: usize = 8 * 1024;

pub struct Http11Client<
    R = SystemDnsResolver,
    T = TcpTransport,
    P = InMemoryConnectionPool,
    A = RustlsTlsAdapter,
> where
    R: DnsResolver,
    T: Transport,
    P: ConnectionPool,
    A: TlsBackendAdapter,
{
    dns: R,
    transport: T,
    pool: P,
    tls_adapter: A,
    tls_policy: StrictTlsPolicy,
    socket_options: SocketOptions,
}

impl Http11Client {
    pub fn new(tls_policy: StrictTlsPolicy) -> FetchResult<Self> {
        Self::with_parts(
            SystemDnsResolver,
            TcpTransport,
            InMemoryConnectionPool::default(),
            RustlsTlsAdapter,
            tls_policy,
        )
    }
}

impl<R, T, P, A> Http11Client<R, T, P, A>
where
    R: DnsResolver,
    T: Transport,
    P: ConnectionPool,
    A: TlsBackendAdapter,
{
    pub fn with_parts(
        dns: R,
        transport: T,
        pool: P,
        tls_adapter: A,
        tls_policy: StrictTlsPolicy,
    ) -> FetchResult<Self> {
        tls_policy.validate()?;
        Ok(Self {
            dns,
            transport,
            pool,
            tls_adapter,
            tls_policy,
            socket_options: SocketOptions::default(),
        })
    }

    pub fn tls_policy(&self) -> &StrictTlsPolicy {
        &self.tls_policy
    }

    pub fn set_socket_options(&mut self, options: SocketOptions) {
        self.socket_options = options;
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    /// Sends the request and reads the full response.
    ///
    /// A pooled connection the server already closed surfaces as a write
    /// error or an empty head; the exchange is then retried once on a
    /// fresh connection.
    pub fn execute(&mut self, prepared: PreparedRequest) -> FetchResult<HttpResponse> {
        validate_prepared_request(&prepared)?;

        let key = ConnectionKey::from_url(&prepared.request.url, self.tls_policy.strict);
        if let Some(mut pooled) = self.pool.checkout(&key) {
            match exchange(&mut *pooled, &prepared.request) {
                Ok(outcome) => return Ok(self.finish(key, pooled, outcome)),
                Err(error) if is_stale_connection(&error) => {
                    log::debug!(
                        "pooled connection to {} went away, reconnecting",
                        prepared.request.url.authority()
                    );
                }
                Err(error) => return Err(error),
            }
        }

        let mut stream = self.open_stream(&prepared)?;
        let outcome = exchange(&mut *stream, &prepared.request)?;
        Ok(self.finish(key, stream, outcome))
    }

    fn finish(
        &mut self,
        key: ConnectionKey,
        stream: BoxedIoStream,
        outcome: ResponseReadOutcome,
    ) -> HttpResponse {
        if outcome.reusable {
            self.pool.checkin(key, stream);
        }
        outcome.response
    }

    fn open_stream(&self, prepared: &PreparedRequest) -> FetchResult<BoxedIoStream> {
        let url = &prepared.request.url;
        let addresses = self.dns.resolve(url.host(), url.port())?;
        let stream = connect_first_available(&self.transport, &addresses, &self.socket_options)?;

        match &prepared.tls {
            Some(handshake) => self
                .tls_adapter
                .connect_tls(stream, handshake, &self.tls_policy),
            None => Ok(Box::new(stream)),
        }
    }
}

fn exchange<S: Read + Write + ?Sized>(
    stream: &mut S,
    request: &HttpRequest,
) -> FetchResult<ResponseReadOutcome> {
    write_request(stream, request)?;
    read_response(stream, request)
}

fn is_stale_connection(error: &FetchError) -> bool {
    matches!(
        error.code,
        "net.http.write_failed" | "net.http.flush_failed" | "net.http.unexpected_eof"
    )
}

fn validate_prepared_request(prepared: &PreparedRequest) -> FetchResult<()> {
    match (prepared.request.url.is_secure(), prepared.tls.is_some()) {
        (true, false) => Err(FetchError::network(
            "net.http.tls_missing",
            "HTTPS request is missing TLS handshake configuration",
        )),
        (false, true) => Err(FetchError::network(
            "net.http.tls_unexpected",
            "non-HTTPS request must not include TLS handshake configuration",
        )),
        _ => Ok(()),
    }
}

fn write_request<W: Write + ?Sized>(stream: &mut W, request: &HttpRequest) -> FetchResult<()> {
    let mut encoded = Vec::new();
    encoded.extend_from_slice(request.method.as_str().as_bytes());
    encoded.push(b' ');
    encoded.extend_from_slice(request.request_target().as_bytes());
    encoded.push(b' ');
    encoded.extend_from_slice(request.version.as_str().as_bytes());
    encoded.extend_from_slice(b"\r\n");

    for header in &request.headers {
        encoded.extend_from_slice(header.name.as_bytes());
        encoded.extend_from_slice(b": ");
        encoded.extend_from_slice(header.value.as_bytes());
        encoded.extend_from_slice(b"\r\n");
    }
    encoded.extend_from_slice(b"\r\n");
    encoded.extend_from_slice(&request.body);

    stream.write_all(&encoded).map_err(|error| {
        FetchError::network(
            "net.http.write_failed",
            format!("failed to write HTTP request bytes: {error}"),
        )
    })?;
    stream.flush().map_err(|error| {
        FetchError::network(
            "net.http.flush_failed",
            format!("failed to flush HTTP request bytes: {error}"),
        )
    })?;

    Ok(())
}

struct ResponseReadOutcome {
    response: HttpResponse,
    reusable: bool,
}

fn read_response<S: Read + ?Sized>(
    mut stream: &mut S,
    request: &HttpRequest,
) -> FetchResult<ResponseReadOutcome> {
    let mut buffer = Vec::new();
    let mut chunk = [0_u8; 4096];
    let mut header_end: Option<usize> = None;

    while header_end.is_none() {
        let read = stream.read(&mut chunk).map_err(|error| {
            FetchError::network(
                "net.http.read_head_failed",
                format!("failed while reading HTTP response head: {error}"),
            )
        })?;

        if read == 0 {
            return Err(FetchError::network(
                "net.http.unexpected_eof",
                "unexpected EOF before response head completed",
            ));
        }

        buffer.extend_from_slice(&chunk[..read]);
        if buffer.len() > MAX_RESPONSE_HEAD_BYTES {
            return Err(FetchError::network(
                "net.http.head_too_large",
                format!("HTTP response head exceeds {MAX_RESPONSE_HEAD_BYTES} bytes"),
            ));
        }

        header_end = find_header_end(&buffer);
    }

    let header_end = match header_end {
        Some(value) => value,
        None => {
            return Err(FetchError::network(
                "net.http.header_terminator_missing",
                "response head terminator not found",
            ));
        }
    };

    let head_bytes = &buffer[..header_end];
    let mut body_bytes = buffer[header_end..].to_vec();
    let head_text = std::str::from_utf8(head_bytes).map_err(|error| {
        FetchError::network(
            "net.http.head_invalid_utf8",
            format!("HTTP response head is not valid UTF-8 text: {error}"),
        )
    })?;

    let mut lines = head_text.split("\r\n");
    let status_line = lines.next().ok_or_else(|| {
        FetchError::network("net.http.status_line_missing", "missing HTTP status line")
    })?;
    let (version, status, status_text) = parse_status_line(status_line)?;

    let mut headers = HeaderList::new();
    for line in lines {
        if line.is_empty() {
            continue;
        }

        let (name, value) = line.split_once(':').ok_or_else(|| {
            FetchError::network(
                "net.http.header_invalid",
                format!("invalid HTTP header line `{line}`"),
            )
        })?;
        headers.append(name.trim(), value.trim())?;
    }

    let has_transfer_encoding = headers.contains("transfer-encoding");
    let has_chunked_transfer = headers.has_token("transfer-encoding", "chunked");
    if has_transfer_encoding && !has_chunked_transfer {
        return Err(FetchError::network(
            "net.http.transfer_encoding_unsupported",
            "only chunked transfer encoding is currently supported",
        ));
    }

    let content_length = if has_chunked_transfer {
        None
    } else {
        parse_content_length(&headers)?
    };
    let has_no_body =
        request.method == HttpMethod::Head || status_disallows_body(status.as_u16());

    let reusable = if has_no_body {
        true
    } else if has_chunked_transfer {
        body_bytes = read_chunked_body(&mut stream, body_bytes)?;
        true
    } else if let Some(len) = content_length {
        if body_bytes.len() < len {
            let remaining = len - body_bytes.len();
            let mut rest = vec![0_u8; remaining];
            stream.read_exact(&mut rest).map_err(|error| {
                FetchError::network(
                    "net.http.read_body_failed",
                    format!("failed to read HTTP body bytes: {error}"),
                )
            })?;
            body_bytes.extend_from_slice(&rest);
        } else if body_bytes.len() > len {
            body_bytes.truncate(len);
        }

        true
    } else if headers.has_token("connection", "close") {
        let mut tail = Vec::new();
        stream.read_to_end(&mut tail).map_err(|error| {
            FetchError::network(
                "net.http.read_body_failed",
                format!("failed while draining connection-close response body: {error}"),
            )
        })?;
        body_bytes.extend_from_slice(&tail);
        false
    } else {
        return Err(FetchError::network(
            "net.http.body_length_unknown",
            "response body length is unknown without Content-Length or Connection: close",
        ));
    };

    let response = HttpResponse {
        version,
        status,
        status_text,
        headers,
        body: if has_no_body { Vec::new() } else { body_bytes },
    };

    Ok(ResponseReadOutcome {
        reusable: reusable && is_keep_alive(request, &response),
        response,
    })
}

struct PrefixedStreamReader<'a> {
    prefetched: Vec<u8>,
    offset: usize,
    stream: &'a mut dyn Read,
}

impl<'a> PrefixedStreamReader<'a> {
    fn new(stream: &'a mut dyn Read, prefetched: Vec<u8>) -> Self {
        Self {
            prefetched,
            offset: 0,
            stream,
        }
    }

    fn read_exact_into(
        &mut self,
        out: &mut [u8],
        code: &'static str,
        detail: &str,
    ) -> FetchResult<()> {
        let available = self.prefetched.len().saturating_sub(self.offset);
        let prefix_take = available.min(out.len());

        if prefix_take > 0 {
            out[..prefix_take]
                .copy_from_slice(&self.prefetched[self.offset..self.offset + prefix_take]);
            self.offset += prefix_take;
        }

        if prefix_take < out.len() {
            self.stream
                .read_exact(&mut out[prefix_take..])
                .map_err(|error| FetchError::network(code, format!("{detail}: {error}")))?;
        }

        Ok(())
    }
}

fn read_chunked_body(stream: &mut dyn Read, prefetched: Vec<u8>) -> FetchResult<Vec<u8>> {
    let mut reader = PrefixedStreamReader::new(stream, prefetched);
    let mut decoded = Vec::new();

    loop {
        let size_line = read_crlf_line(&mut reader)?;
        if size_line.is_empty() {
            continue;
        }

        let size_token = size_line.split(';').next().unwrap_or_default().trim();
        let chunk_size = usize::from_str_radix(size_token, 16).map_err(|error| {
            FetchError::network(
                "net.http.chunk_size_invalid",
                format!("invalid chunk size `{size_token}`: {error}"),
            )
        })?;

        if chunk_size == 0 {
            drain_chunk_trailers(&mut reader)?;
            break;
        }

        let start = decoded.len();
        decoded.resize(start + chunk_size, 0);
        reader.read_exact_into(
            &mut decoded[start..],
            "net.http.read_body_failed",
            "failed while reading chunked HTTP body bytes",
        )?;

        let mut terminator = [0_u8; 2];
        reader.read_exact_into(
            &mut terminator,
            "net.http.read_body_failed",
            "failed while reading chunked body terminator",
        )?;
        if terminator != *b"\r\n" {
            return Err(FetchError::network(
                "net.http.chunk_terminator_invalid",
                "chunk data is missing trailing CRLF",
            ));
        }
    }

    Ok(decoded)
}

fn drain_chunk_trailers(reader: &mut PrefixedStreamReader<'_>) -> FetchResult<()> {
    loop {
        let line = read_crlf_line(reader)?;
        if line.is_empty() {
            break;
        }

        if line.split_once(':').is_none() {
            return Err(FetchError::network(
                "net.http.chunk_trailer_invalid",
                format!("invalid chunk trailer line `{line}`"),
            ));
        }
    }

    Ok(())
}

fn read_crlf_line(reader: &mut PrefixedStreamReader<'_>) -> FetchResult<String> {
    let mut line = Vec::new();

    loop {
        let mut byte = [0_u8; 1];
        reader.read_exact_into(
            &mut byte,
            "net.http.read_body_failed",
            "failed while reading chunked transfer line",
        )?;
        line.push(byte[0]);

        if line.len() > MAX_CHUNK_LINE_BYTES {
            return Err(FetchError::network(
                "net.http.chunk_line_too_large",
                format!("chunk metadata line exceeds {MAX_CHUNK_LINE_BYTES} bytes"),
            ));
        }

        if line.len() >= 2 && line[line.len() - 2..] == *b"\r\n" {
            line.truncate(line.len() - 2);
            return String::from_utf8(line).map_err(|error| {
                FetchError::network(
                    "net.http.chunk_line_invalid_utf8",
                    format!("chunk metadata line is not valid UTF-8: {error}"),
                )
            });
        }
    }
}

fn find_header_end(buffer: &[u8]) -> Option<usize> {
    buffer
        .windows(4)
        .position(|window| window == b"\r\n\r\n")
        .map(|idx| idx + 4)
}

fn parse_status_line(line: &str) -> FetchResult<(HttpVersion, HttpStatusCode, String)> {
    let mut parts = line.splitn(3, ' ');
    let version = parts.next().ok_or_else(|| {
        FetchError::network(
            "net.http.status_line_invalid",
            format!("missing HTTP version in status line `{line}`"),
        )
    })?;

    let code_text = parts.next().ok_or_else(|| {
        FetchError::network(
            "net.http.status_line_invalid",
            format!("missing status code in status line `{line}`"),
        )
    })?;

    let version = match version {
        "HTTP/1.0" => HttpVersion::Http10,
        "HTTP/1.1" => HttpVersion::Http11,
        "HTTP/2" => HttpVersion::Http2,
        other => {
            return Err(FetchError::network(
                "net.http.version_unsupported",
                format!("unsupported response version `{other}`"),
            ));
        }
    };

    let code_value = code_text.parse::<u16>().map_err(|error| {
        FetchError::network(
            "net.http.status_line_invalid",
            format!("invalid status code `{code_text}`: {error}"),
        )
    })?;

    let code = HttpStatusCode::new(code_value)?;
    let reason = match parts.next().map(str::trim) {
        Some(reason) if !reason.is_empty() => reason.to_owned(),
        _ => code.canonical_reason().to_owned(),
    };
    Ok((version, code, reason))
}

fn parse_content_length(headers: &HeaderList) -> FetchResult<Option<usize>> {
    let mut value: Option<usize> = None;
    for raw in headers.get_all("content-length") {
        let parsed = raw.trim().parse::<usize>().map_err(|error| {
            FetchError::network(
                "net.http.content_length_invalid",
                format!("invalid Content-Length `{raw}`: {error}"),
            )
        })?;

        match value {
            Some(existing) if existing != parsed => {
                return Err(FetchError::network(
                    "net.http.content_length_conflict",
                    "conflicting Content-Length headers in response",
                ));
            }
            _ => value = Some(parsed),
        }
    }

    Ok(value)
}

fn status_disallows_body(status_code: u16) -> bool {
    (100..200).contains(&status_code) || status_code == 204 || status_code == 304
}

fn is_keep_alive(request: &HttpRequest, response: &HttpResponse) -> bool {
    if request
        .header("Connection")
        .is_some_and(|value| value.eq_ignore_ascii_case("close"))
    {
        return false;
    }

    if response.headers.has_token("connection", "close") {
        return false;
    }

    match response.version {
        HttpVersion::Http10 => response.headers.has_token("connection", "keep-alive"),
        HttpVersion::Http11 => true,
        HttpVersion::Http2 => true,
    }
}

#[cfg(test)]
mod tests {
    use super::Http11Client;
    use super::find_header_end;
    use super::parse_status_line;
    use super::read_chunked_body;
    use super::read_response;
    use super::status_disallows_body;
    use crate::PreparedRequest;
    use crate::http::HttpMethod;
    use crate::http::HttpRequest;
    use crate::tls::StrictTlsPolicy;
    use crate::url::NetworkUrl;
    use std::io::Cursor;
    use std::io::Read;
    use std::io::Write;
    use std::net::TcpListener;

    fn request(method: HttpMethod, input: &str) -> HttpRequest {
        let url = match NetworkUrl::parse(input) {
            Ok(value) => value,
            Err(error) => panic!("{error}"),
        };
        match HttpRequest::builder(method, url).build() {
            Ok(value) => value,
            Err(error) => panic!("{error}"),
        }
    }

    fn read_raw(method: HttpMethod, raw: &[u8]) -> super::ResponseReadOutcome {
        let request = request(method, "http://example.com/");
        let mut stream = Cursor::new(raw.to_vec());
        match read_response(&mut stream, &request) {
            Ok(value) => value,
            Err(error) => panic!("{error}"),
        }
    }

    #[test]
    fn header_terminator_is_detected() {
        let data = b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n";
        assert_eq!(find_header_end(data), Some(data.len()));
        assert_eq!(find_header_end(b"HTTP/1.1 200 OK\r\n"), None);
    }

    #[test]
    fn status_line_keeps_reason_phrase_or_falls_back() {
        let custom = parse_status_line("HTTP/1.1 404 Nothing Here");
        assert_eq!(
            custom.map(|(_, code, reason)| (code.as_u16(), reason)),
            Ok((404, "Nothing Here".to_owned()))
        );

        let bare = parse_status_line("HTTP/1.0 304");
        assert_eq!(
            bare.map(|(_, _, reason)| reason),
            Ok("Not Modified".to_owned())
        );

        assert!(parse_status_line("SPDY/3 200 OK").is_err());
    }

    #[test]
    fn detects_bodyless_status_codes() {
        assert!(status_disallows_body(101));
        assert!(status_disallows_body(204));
        assert!(status_disallows_body(304));
        assert!(!status_disallows_body(200));
    }

    #[test]
    fn decodes_chunked_body_with_trailers() {
        let prefetched = b"4;ext=1\r\nWiki\r\n5\r\npedia\r\n0\r\nX-Trailer: yes\r\n\r\n".to_vec();
        let mut stream = Cursor::new(Vec::<u8>::new());
        let decoded = read_chunked_body(&mut stream, prefetched);
        assert_eq!(decoded, Ok(b"Wikipedia".to_vec()));
    }

    #[test]
    fn chunked_decode_reports_invalid_size() {
        let mut stream = Cursor::new(Vec::<u8>::new());
        let decoded = read_chunked_body(&mut stream, b"Z\r\nx\r\n0\r\n\r\n".to_vec());
        assert!(decoded.is_err_and(|error| error.code == "net.http.chunk_size_invalid"));
    }

    #[test]
    fn chunked_response_stays_reusable() {
        let outcome = read_raw(
            HttpMethod::Get,
            b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n3\r\nabc\r\n0\r\n\r\n",
        );
        assert_eq!(outcome.response.body, b"abc");
        assert!(outcome.reusable);
    }

    #[test]
    fn http10_response_is_not_reused_without_keep_alive() {
        let outcome = read_raw(HttpMethod::Get, b"HTTP/1.0 200 OK\r\nContent-Length: 2\r\n\r\nok");
        assert_eq!(outcome.response.body, b"ok");
        assert!(!outcome.reusable);
    }

    #[test]
    fn head_response_ignores_content_length() {
        let outcome = read_raw(HttpMethod::Head, b"HTTP/1.1 200 OK\r\nContent-Length: 512\r\n\r\n");
        assert!(outcome.response.body.is_empty());
        assert_eq!(outcome.response.headers.get("content-length"), Some("512"));
    }

    #[test]
    fn content_encoded_body_is_returned_verbatim() {
        let outcome = read_raw(
            HttpMethod::Get,
            b"HTTP/1.1 200 OK\r\nContent-Encoding: gzip\r\nContent-Length: 4\r\n\r\n\x1f\x8b\x08\x00",
        );
        assert_eq!(outcome.response.body, b"\x1f\x8b\x08\x00");
        assert_eq!(outcome.response.headers.get("content-encoding"), Some("gzip"));
    }

    #[test]
    fn rejects_unsupported_transfer_encoding() {
        let request = request(HttpMethod::Get, "http://example.com/");
        let raw = b"HTTP/1.1 200 OK\r\nTransfer-Encoding: gzip\r\nConnection: close\r\n\r\nbody";
        let mut stream = Cursor::new(raw.to_vec());
        let outcome = read_response(&mut stream, &request);
        assert!(outcome.is_err_and(|error| error.code == "net.http.transfer_encoding_unsupported"));
    }

    #[test]
    fn executes_against_local_server() {
        let listener = match TcpListener::bind("127.0.0.1:0") {
            Ok(value) => value,
            Err(error) => panic!("{error}"),
        };
        let port = match listener.local_addr() {
            Ok(address) => address.port(),
            Err(error) => panic!("{error}"),
        };

        let server = std::thread::spawn(move || {
            let (mut socket, _) = match listener.accept() {
                Ok(value) => value,
                Err(error) => panic!("{error}"),
            };
            let mut head = Vec::new();
            let mut byte = [0_u8; 1];
            while !head.ends_with(b"\r\n\r\n") {
                match socket.read(&mut byte) {
                    Ok(0) => break,
                    Ok(_) => head.push(byte[0]),
                    Err(error) => panic!("{error}"),
                }
            }
            let reply = b"HTTP/1.1 201 Created\r\nContent-Length: 5\r\nConnection: close\r\n\r\nhello";
            assert!(socket.write_all(reply).is_ok());
            String::from_utf8_lossy(&head).into_owned()
        });

        let mut client = match Http11Client::new(StrictTlsPolicy::default()) {
            Ok(value) => value,
            Err(error) => panic!("{error}"),
        };
        let prepared = PreparedRequest {
            request: request(HttpMethod::Get, &format!("http://127.0.0.1:{port}/thing?x=1")),
            tls: None,
        };
        let response = match client.execute(prepared) {
            Ok(value) => value,
            Err(error) => panic!("{error}"),
        };
        assert_eq!(response.status.as_u16(), 201);
        assert_eq!(response.body, b"hello");
        assert_eq!(client.pool_stats().idle_connections, 0);

        let head = match server.join() {
            Ok(value) => value,
            Err(_) => panic!("server thread panicked"),
        };
        assert!(head.starts_with("GET /thing?x=1 HTTP/1.1\r\n"));
    }

    #[test]
    fn https_request_without_handshake_is_rejected() {
        let mut client = match Http11Client::new(StrictTlsPolicy::default()) {
            Ok(value) => value,
            Err(error) => panic!("{error}"),
        };
        let prepared = PreparedRequest {
            request: request(HttpMethod::Get, "https://example.com/"),
            tls: None,
        };
        assert!(client.execute(prepared).is_err_and(|error| error.code == "net.http.tls_missing"));
    }
}
