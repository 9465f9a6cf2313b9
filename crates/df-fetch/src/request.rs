//! Request values handed to the fetch engine.
//!
//! A `Request` never changes after `build()`. Redirects, revalidation and
//! preflight probes derive new values from it inside the engine.

use crate::headers::is_forbidden_request_header;
use df_core::FetchError;
use df_core::FetchResult;
use df_net::HeaderList;
use df_net::HttpMethod;
use futures::Stream;
use futures::StreamExt;
use futures::stream::BoxStream;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::Mutex;
use url::Url;

const TEXT_CONTENT_TYPE: &str = "text/plain;charset=UTF-8";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RedirectMode {
    #[default]
    Follow,
    Error,
    Manual,
}

impl RedirectMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Follow => "follow",
            Self::Error => "error",
            Self::Manual => "manual",
        }
    }
}

impl FromStr for RedirectMode {
    type Err = FetchError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "follow" => Ok(Self::Follow),
            "error" => Ok(Self::Error),
            "manual" => Ok(Self::Manual),
            other => Err(FetchError::not_supported(
                "fetch.request.redirect_mode_unsupported",
                format!("redirect mode `{other}` is not supported"),
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CredentialsMode {
    Omit,
    #[default]
    SameOrigin,
    Include,
}

impl CredentialsMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Omit => "omit",
            Self::SameOrigin => "same-origin",
            Self::Include => "include",
        }
    }
}

impl FromStr for CredentialsMode {
    type Err = FetchError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "omit" => Ok(Self::Omit),
            "same-origin" => Ok(Self::SameOrigin),
            "include" => Ok(Self::Include),
            other => Err(FetchError::invalid_input(
                "fetch.request.credentials_invalid",
                format!("unknown credentials mode `{other}`"),
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RequestMode {
    #[default]
    Cors,
    NoCors,
    SameOrigin,
}

impl RequestMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Cors => "cors",
            Self::NoCors => "no-cors",
            Self::SameOrigin => "same-origin",
        }
    }
}

impl FromStr for RequestMode {
    type Err = FetchError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "cors" => Ok(Self::Cors),
            "no-cors" => Ok(Self::NoCors),
            "same-origin" => Ok(Self::SameOrigin),
            "navigate" | "websocket" => Err(FetchError::invalid_input(
                "fetch.request.mode_forbidden",
                format!("request mode `{value}` cannot be used to construct a request"),
            )),
            other => Err(FetchError::invalid_input(
                "fetch.request.mode_invalid",
                format!("unknown request mode `{other}`"),
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ReferrerPolicy {
    NoReferrer,
    NoReferrerWhenDowngrade,
    SameOrigin,
    Origin,
    StrictOrigin,
    OriginWhenCrossOrigin,
    #[default]
    StrictOriginWhenCrossOrigin,
    UnsafeUrl,
}

impl ReferrerPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NoReferrer => "no-referrer",
            Self::NoReferrerWhenDowngrade => "no-referrer-when-downgrade",
            Self::SameOrigin => "same-origin",
            Self::Origin => "origin",
            Self::StrictOrigin => "strict-origin",
            Self::OriginWhenCrossOrigin => "origin-when-cross-origin",
            Self::StrictOriginWhenCrossOrigin => "strict-origin-when-cross-origin",
            Self::UnsafeUrl => "unsafe-url",
        }
    }

    pub fn from_token(token: &str) -> Option<Self> {
        let policy = match token.trim().to_ascii_lowercase().as_str() {
            "no-referrer" => Self::NoReferrer,
            "no-referrer-when-downgrade" => Self::NoReferrerWhenDowngrade,
            "same-origin" => Self::SameOrigin,
            "origin" => Self::Origin,
            "strict-origin" => Self::StrictOrigin,
            "origin-when-cross-origin" => Self::OriginWhenCrossOrigin,
            "strict-origin-when-cross-origin" => Self::StrictOriginWhenCrossOrigin,
            "unsafe-url" => Self::UnsafeUrl,
            _ => return None,
        };
        Some(policy)
    }
}

impl FromStr for ReferrerPolicy {
    type Err = FetchError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        if value.trim().is_empty() {
            return Ok(Self::default());
        }
        Self::from_token(value).ok_or_else(|| {
            FetchError::invalid_input(
                "fetch.request.referrer_policy_invalid",
                format!("unknown referrer policy `{value}`"),
            )
        })
    }
}

/// Where the `Referer` header comes from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Referrer {
    /// The calling document's URL.
    #[default]
    Client,
    NoReferrer,
    Url(Url),
}

#[derive(Debug, Default)]
struct AbortState {
    aborted: bool,
    reason: Option<String>,
}

/// Read side of an [`AbortController`]. Clones observe the same state.
#[derive(Debug, Clone, Default)]
pub struct AbortSignal {
    state: Arc<Mutex<AbortState>>,
}

impl AbortSignal {
    pub fn is_aborted(&self) -> bool {
        self.lock().aborted
    }

    pub fn reason(&self) -> Option<String> {
        self.lock().reason.clone()
    }

    /// Fails with an abort error carrying the reason once the signal fired.
    pub fn check(&self) -> FetchResult<()> {
        let state = self.lock();
        if !state.aborted {
            return Ok(());
        }

        let message = match &state.reason {
            Some(reason) => format!("the operation was aborted: {reason}"),
            None => "the operation was aborted".to_owned(),
        };
        Err(FetchError::abort("fetch.aborted", message))
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, AbortState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct AbortController {
    signal: AbortSignal,
}

impl AbortController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn signal(&self) -> AbortSignal {
        self.signal.clone()
    }

    /// The first abort wins; later calls keep the original reason.
    pub fn abort(&self, reason: Option<&str>) {
        let mut state = self.signal.lock();
        if state.aborted {
            return;
        }
        state.aborted = true;
        state.reason = reason.map(ToOwned::to_owned);
    }
}

pub type BodyStream = BoxStream<'static, FetchResult<Vec<u8>>>;

/// Streaming request body. It can be consumed once; clones share it.
#[derive(Clone)]
pub struct StreamBody {
    inner: Arc<Mutex<Option<BodyStream>>>,
}

impl StreamBody {
    pub fn new<S>(stream: S) -> Self
    where
        S: Stream<Item = FetchResult<Vec<u8>>> + Send + 'static,
    {
        Self {
            inner: Arc::new(Mutex::new(Some(stream.boxed()))),
        }
    }

    pub fn take(&self) -> Option<BodyStream> {
        match self.inner.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        }
    }
}

impl fmt::Debug for StreamBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("StreamBody(..)")
    }
}

#[derive(Debug, Clone, Default)]
pub enum RequestBody {
    #[default]
    Empty,
    Bytes(Vec<u8>),
    Stream(StreamBody),
}

impl RequestBody {
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Empty => true,
            Self::Bytes(bytes) => bytes.is_empty(),
            Self::Stream(_) => false,
        }
    }

    pub fn is_stream(&self) -> bool {
        matches!(self, Self::Stream(_))
    }
}

#[derive(Debug, Clone)]
pub struct Request {
    pub(crate) method: HttpMethod,
    pub(crate) url: Url,
    pub(crate) headers: HeaderList,
    pub(crate) body: RequestBody,
    pub(crate) signal: Option<AbortSignal>,
    pub(crate) redirect: RedirectMode,
    pub(crate) credentials: CredentialsMode,
    pub(crate) mode: RequestMode,
    pub(crate) referrer: Referrer,
    pub(crate) referrer_policy: ReferrerPolicy,
    pub(crate) content_type: Option<String>,
    pub(crate) content_length: Option<u64>,
}

impl Request {
    pub fn builder(method: HttpMethod, url: &str) -> RequestBuilder {
        RequestBuilder {
            method,
            url: url.to_owned(),
            headers: Vec::new(),
            body: RequestBody::Empty,
            text_body: false,
            signal: None,
            redirect: RedirectMode::default(),
            credentials: CredentialsMode::default(),
            mode: RequestMode::default(),
            referrer: None,
            referrer_policy: ReferrerPolicy::default(),
        }
    }

    pub fn get(url: &str) -> FetchResult<Self> {
        Self::builder(HttpMethod::Get, url).build()
    }

    pub fn method(&self) -> HttpMethod {
        self.method
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn headers(&self) -> &HeaderList {
        &self.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    pub fn body(&self) -> &RequestBody {
        &self.body
    }

    pub fn signal(&self) -> Option<&AbortSignal> {
        self.signal.as_ref()
    }

    pub fn redirect_mode(&self) -> RedirectMode {
        self.redirect
    }

    pub fn credentials(&self) -> CredentialsMode {
        self.credentials
    }

    pub fn mode(&self) -> RequestMode {
        self.mode
    }

    pub fn referrer(&self) -> &Referrer {
        &self.referrer
    }

    pub fn referrer_policy(&self) -> ReferrerPolicy {
        self.referrer_policy
    }

    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    pub fn content_length(&self) -> Option<u64> {
        self.content_length
    }

    pub(crate) fn check_aborted(&self) -> FetchResult<()> {
        match &self.signal {
            Some(signal) => signal.check(),
            None => Ok(()),
        }
    }

    /// Engine-side header write that bypasses the forbidden-name filter.
    pub(crate) fn set_header(&mut self, name: &str, value: &str) -> FetchResult<()> {
        self.headers.set(name, value)
    }

    /// Drops the body together with its derived content headers.
    pub(crate) fn drop_body(&mut self) {
        self.body = RequestBody::Empty;
        self.content_type = None;
        self.content_length = None;
        self.headers.remove("content-type");
        self.headers.remove("content-length");
    }
}

pub struct RequestBuilder {
    method: HttpMethod,
    url: String,
    headers: Vec<(String, String)>,
    body: RequestBody,
    text_body: bool,
    signal: Option<AbortSignal>,
    redirect: RedirectMode,
    credentials: CredentialsMode,
    mode: RequestMode,
    referrer: Option<String>,
    referrer_policy: ReferrerPolicy,
}

impl RequestBuilder {
    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_owned(), value.to_owned()));
        self
    }

    pub fn body(mut self, body: Vec<u8>) -> Self {
        self.body = RequestBody::Bytes(body);
        self.text_body = false;
        self
    }

    /// UTF-8 body; `Content-Type` defaults to `text/plain;charset=UTF-8`.
    pub fn text(mut self, body: impl Into<String>) -> Self {
        self.body = RequestBody::Bytes(body.into().into_bytes());
        self.text_body = true;
        self
    }

    pub fn stream_body(mut self, body: StreamBody) -> Self {
        self.body = RequestBody::Stream(body);
        self.text_body = false;
        self
    }

    pub fn signal(mut self, signal: AbortSignal) -> Self {
        self.signal = Some(signal);
        self
    }

    pub fn redirect(mut self, mode: RedirectMode) -> Self {
        self.redirect = mode;
        self
    }

    pub fn credentials(mut self, mode: CredentialsMode) -> Self {
        self.credentials = mode;
        self
    }

    pub fn mode(mut self, mode: RequestMode) -> Self {
        self.mode = mode;
        self
    }

    /// `""` sends no referrer, `about:client` uses the document URL.
    pub fn referrer(mut self, referrer: &str) -> Self {
        self.referrer = Some(referrer.to_owned());
        self
    }

    pub fn referrer_policy(mut self, policy: ReferrerPolicy) -> Self {
        self.referrer_policy = policy;
        self
    }

    pub fn build(self) -> FetchResult<Request> {
        let url = Url::parse(&self.url).map_err(|error| {
            FetchError::invalid_input(
                "fetch.request.url_invalid",
                format!("failed to parse URL `{}`: {error}", self.url),
            )
        })?;
        if !matches!(url.scheme(), "http" | "https" | "data") {
            return Err(FetchError::not_supported(
                "fetch.request.scheme_unsupported",
                format!("URL scheme `{}` is not supported", url.scheme()),
            ));
        }

        if !self.method.allows_body() && !self.body.is_empty() {
            return Err(FetchError::invalid_input(
                "fetch.request.body_not_allowed",
                format!("{} requests cannot have a body", self.method),
            ));
        }

        let mut headers = HeaderList::new();
        for (name, value) in &self.headers {
            if is_forbidden_request_header(name) {
                log::debug!("dropping forbidden request header `{name}`");
                continue;
            }
            headers.set(name, value)?;
        }

        let referrer = match self.referrer.as_deref() {
            None | Some("about:client") => Referrer::Client,
            Some("") => Referrer::NoReferrer,
            Some(raw) => Referrer::Url(Url::parse(raw).map_err(|error| {
                FetchError::invalid_input(
                    "fetch.request.referrer_invalid",
                    format!("failed to parse referrer `{raw}`: {error}"),
                )
            })?),
        };

        let content_type = match headers.get("content-type") {
            Some(value) => Some(value.to_owned()),
            None if self.text_body => Some(TEXT_CONTENT_TYPE.to_owned()),
            None => None,
        };
        let content_length = match &self.body {
            RequestBody::Bytes(bytes) => Some(bytes.len() as u64),
            RequestBody::Empty if self.method.allows_body() => Some(0),
            RequestBody::Empty | RequestBody::Stream(_) => None,
        };

        Ok(Request {
            method: self.method,
            url,
            headers,
            body: self.body,
            signal: self.signal,
            redirect: self.redirect,
            credentials: self.credentials,
            mode: self.mode,
            referrer,
            referrer_policy: self.referrer_policy,
            content_type,
            content_length,
        })
    }
}
