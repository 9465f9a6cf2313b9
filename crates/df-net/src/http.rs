//! HTTP method, header and message contracts.

use crate::url::NetworkUrl;
use df_core::FetchError;
use df_core::FetchResult;
use std::fmt;
use std::str::FromStr;

/// Supported outbound HTTP methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    Get,
    Head,
    Post,
    Put,
    Patch,
    Delete,
    Options,
}

impl HttpMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Head => "HEAD",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
            Self::Options => "OPTIONS",
        }
    }

    /// GET and HEAD never carry a request body.
    pub fn allows_body(self) -> bool {
        !matches!(self, Self::Get | Self::Head)
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HttpMethod {
    type Err = FetchError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let method = match value.trim().to_ascii_uppercase().as_str() {
            "GET" => Self::Get,
            "HEAD" => Self::Head,
            "POST" => Self::Post,
            "PUT" => Self::Put,
            "PATCH" => Self::Patch,
            "DELETE" => Self::Delete,
            "OPTIONS" => Self::Options,
            _ => {
                return Err(FetchError::not_supported(
                    "net.http.method_unsupported",
                    format!("unsupported HTTP method `{value}`"),
                ));
            }
        };
        Ok(method)
    }
}

/// HTTP protocol version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpVersion {
    Http10,
    Http11,
    Http2,
}

impl HttpVersion {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Http10 => "HTTP/1.0",
            Self::Http11 => "HTTP/1.1",
            Self::Http2 => "HTTP/2",
        }
    }
}

/// Single HTTP header with validated wire-safe name/value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub name: String,
    pub value: String,
}

impl Header {
    pub fn new(name: &str, value: &str) -> FetchResult<Self> {
        if !is_valid_header_name(name) {
            return Err(FetchError::invalid_input(
                "net.http.header_name_invalid",
                format!("invalid HTTP header name `{name}`"),
            ));
        }

        if value.bytes().any(|byte| matches!(byte, b'\r' | b'\n' | 0)) {
            return Err(FetchError::invalid_input(
                "net.http.header_value_invalid",
                format!("invalid characters found in HTTP header `{name}`"),
            ));
        }

        Ok(Self {
            name: name.to_owned(),
            value: value.trim().to_owned(),
        })
    }

    pub fn is(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
    }
}

/// Ordered header list with case-insensitive name lookup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderList {
    entries: Vec<Header>,
}

impl HeaderList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a list from flat `[name, value, name, value, ...]` pairs.
    pub fn from_raw(raw: &[String]) -> FetchResult<Self> {
        if raw.len() % 2 != 0 {
            return Err(FetchError::network(
                "net.http.raw_headers_odd",
                "raw header list must contain name/value pairs",
            ));
        }

        let mut list = Self::new();
        for pair in raw.chunks(2) {
            list.append(&pair[0], &pair[1])?;
        }
        Ok(list)
    }

    pub fn to_raw(&self) -> Vec<String> {
        self.entries
            .iter()
            .flat_map(|header| [header.name.clone(), header.value.clone()])
            .collect()
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|header| header.is(name))
            .map(|header| header.value.as_str())
    }

    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.entries
            .iter()
            .filter(move |header| header.is(name))
            .map(|header| header.value.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|header| header.is(name))
    }

    /// True when any comma-separated token of `name` equals `token`.
    pub fn has_token(&self, name: &str, token: &str) -> bool {
        self.get_all(name).any(|value| {
            value
                .split(',')
                .any(|part| part.trim().eq_ignore_ascii_case(token))
        })
    }

    /// Replaces every value of `name` with a single value.
    pub fn set(&mut self, name: &str, value: &str) -> FetchResult<()> {
        let header = Header::new(name, value)?;
        self.remove(name);
        self.entries.push(header);
        Ok(())
    }

    pub fn append(&mut self, name: &str, value: &str) -> FetchResult<()> {
        self.entries.push(Header::new(name, value)?);
        Ok(())
    }

    /// Sets `name` only when it is not already present.
    pub fn set_default(&mut self, name: &str, value: &str) -> FetchResult<()> {
        if self.contains(name) {
            return Ok(());
        }
        self.append(name, value)
    }

    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|header| !header.is(name));
        before != self.entries.len()
    }

    pub fn retain(&mut self, keep: impl FnMut(&Header) -> bool) {
        self.entries.retain(keep);
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Header> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<'a> IntoIterator for &'a HeaderList {
    type Item = &'a Header;
    type IntoIter = std::slice::Iter<'a, Header>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

impl From<Vec<Header>> for HeaderList {
    fn from(entries: Vec<Header>) -> Self {
        Self { entries }
    }
}

/// Outgoing HTTP request as written on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: NetworkUrl,
    pub version: HttpVersion,
    pub headers: HeaderList,
    pub body: Vec<u8>,
}

impl HttpRequest {
    pub fn builder(method: HttpMethod, url: NetworkUrl) -> HttpRequestBuilder {
        HttpRequestBuilder {
            method,
            url,
            version: HttpVersion::Http11,
            headers: HeaderList::new(),
            body: Vec::new(),
        }
    }

    pub fn request_target(&self) -> String {
        self.url.path_and_query()
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }
}

/// Builder for `HttpRequest`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequestBuilder {
    method: HttpMethod,
    url: NetworkUrl,
    version: HttpVersion,
    headers: HeaderList,
    body: Vec<u8>,
}

impl HttpRequestBuilder {
    pub fn version(mut self, version: HttpVersion) -> Self {
        self.version = version;
        self
    }

    pub fn header(mut self, name: &str, value: &str) -> FetchResult<Self> {
        self.headers.append(name, value)?;
        Ok(self)
    }

    pub fn headers(mut self, headers: &HeaderList) -> Self {
        for header in headers {
            self.headers.entries.push(header.clone());
        }
        self
    }

    pub fn body(mut self, body: Vec<u8>) -> Self {
        self.body = body;
        self
    }

    pub fn build(mut self) -> FetchResult<HttpRequest> {
        if !self.method.allows_body() && !self.body.is_empty() {
            return Err(FetchError::invalid_input(
                "net.http.body_disallowed",
                format!("{} requests must not include a body", self.method.as_str()),
            ));
        }

        ensure_singleton_header(&self.headers, "host")?;
        ensure_singleton_header(&self.headers, "content-length")?;

        if !self.headers.contains("host") {
            let host = self.url.authority();
            self.headers.append("Host", &host)?;
        }

        // Bodies are framed by length; POST-like methods send `0` for an empty body.
        if self.method.allows_body() && !self.headers.contains("content-length") {
            let len = self.body.len().to_string();
            self.headers.append("Content-Length", &len)?;
        }

        Ok(HttpRequest {
            method: self.method,
            url: self.url,
            version: self.version,
            headers: self.headers,
            body: self.body,
        })
    }
}

/// HTTP status code wrapper.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct HttpStatusCode(u16);

impl HttpStatusCode {
    pub fn new(code: u16) -> FetchResult<Self> {
        if (100..=599).contains(&code) {
            return Ok(Self(code));
        }

        Err(FetchError::network(
            "net.http.status_invalid",
            format!("status code must be 100-599, got `{code}`"),
        ))
    }

    pub fn as_u16(self) -> u16 {
        self.0
    }

    pub fn is_success(self) -> bool {
        (200..=299).contains(&self.0)
    }

    pub fn canonical_reason(self) -> &'static str {
        reason_phrase(self.0)
    }
}

/// Incoming HTTP response as read from the wire (body still content-encoded).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub version: HttpVersion,
    pub status: HttpStatusCode,
    pub status_text: String,
    pub headers: HeaderList,
    pub body: Vec<u8>,
}

/// Canonical reason phrase for well-known status codes.
pub fn reason_phrase(code: u16) -> &'static str {
    match code {
        100 => "Continue",
        101 => "Switching Protocols",
        200 => "OK",
        201 => "Created",
        202 => "Accepted",
        203 => "Non-Authoritative Information",
        204 => "No Content",
        206 => "Partial Content",
        300 => "Multiple Choices",
        301 => "Moved Permanently",
        302 => "Found",
        303 => "See Other",
        304 => "Not Modified",
        307 => "Temporary Redirect",
        308 => "Permanent Redirect",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        409 => "Conflict",
        410 => "Gone",
        412 => "Precondition Failed",
        429 => "Too Many Requests",
        500 => "Internal Server Error",
        501 => "Not Implemented",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        504 => "Gateway Timeout",
        _ => "",
    }
}

fn ensure_singleton_header(headers: &HeaderList, name: &str) -> FetchResult<()> {
    if headers.get_all(name).count() <= 1 {
        return Ok(());
    }

    Err(FetchError::invalid_input(
        "net.http.duplicate_header",
        format!("header `{name}` must appear at most once"),
    ))
}

fn is_valid_header_name(name: &str) -> bool {
    if name.is_empty() {
        return false;
    }

    name.bytes().all(is_token_char)
}

fn is_token_char(byte: u8) -> bool {
    byte.is_ascii_alphanumeric()
        || matches!(
            byte,
            b'!' | b'#'
                | b'$'
                | b'%'
                | b'&'
                | b'\''
                | b'*'
                | b'+'
                | b'-'
                | b'.'
                | b'^'
                | b'_'
                | b'`'
                | b'|'
                | b'~'
        )
}
