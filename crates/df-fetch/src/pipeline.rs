//! The fetch algorithm as a sans-IO state machine.
//!
//! A [`Pipeline`] never performs I/O. [`Pipeline::resume`] either asks the
//! driver to put one [`WireRequest`] on the wire or hands back the final
//! response. Requests the algorithm issues on its own behalf (conditional
//! revalidation, CORS preflight) are child frames on an explicit stack;
//! redirects replace the request of the current frame. The blocking and
//! async engines drive the same machine, so every rule lives here once.

use crate::console::Console;
use crate::cors;
use crate::data_url::DataUrlDecoder;
use crate::headers::outgoing_headers;
use crate::headers::scrub_response_headers;
use crate::interceptor::Interceptor;
use crate::redirect;
use crate::redirect::RedirectOutcome;
use crate::request::Request;
use crate::request::RequestBody;
use crate::request::RequestMode;
use crate::settings::BrowsingContext;
use crate::settings::FetchSettings;
use crate::transport::RawResponse;
use crate::transport::WireBody;
use crate::transport::WireRequest;
use crate::virtual_path::VirtualFile;
use crate::virtual_path::VirtualPathResolver;
use df_cache::CacheControl;
use df_cache::CacheEntry;
use df_cache::CacheKey;
use df_cache::CacheLookup;
use df_cache::PreflightKey;
use df_cache::freshness::is_storable;
use df_core::FetchError;
use df_core::FetchResult;
use df_net::HeaderList;
use df_net::HttpMethod;
use df_net::Origin;
use df_net::Response;
use df_net::decode_body;
use std::path::PathBuf;
use std::sync::Arc;

/// Everything a pipeline consults besides the request itself.
pub(crate) struct Environment {
    pub settings: FetchSettings,
    pub context: BrowsingContext,
    pub interceptor: Arc<dyn Interceptor>,
    pub console: Arc<dyn Console>,
    pub data_urls: Arc<dyn DataUrlDecoder>,
    pub virtual_paths: Arc<dyn VirtualPathResolver>,
}

#[derive(Debug)]
pub(crate) enum Action {
    Transmit(WireRequest),
    Finished(Response),
}

/// Work done for one caller request, including every nested hop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct PipelineStats {
    pub round_trips: u32,
    pub redirects: u32,
    pub preflights: u32,
    pub revalidations: u32,
    pub background_refreshes: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    Caller,
    Revalidation,
    Preflight,
    Refresh,
}

impl Role {
    fn uses_cache(self) -> bool {
        self == Self::Caller
    }

    fn enforces_cors(self) -> bool {
        self == Self::Caller
    }

    fn writes_cache(self) -> bool {
        matches!(self, Self::Caller | Self::Refresh)
    }

    fn runs_hooks(self) -> bool {
        self == Self::Caller
    }
}

enum Stage {
    Start,
    /// Policy checks passed; the next step is the round trip.
    Send,
    AwaitNetwork,
    AwaitRevalidation { key: CacheKey, entry: Box<CacheEntry> },
    AwaitPreflight { key: PreflightKey, origin: String },
}

struct Frame {
    role: Role,
    request: Request,
    /// Redirects followed so far.
    hops: u32,
    stage: Stage,
}

impl Frame {
    fn new(role: Role, request: Request, hops: u32) -> Self {
        Self {
            role,
            request,
            hops,
            stage: Stage::Start,
        }
    }
}

enum Step {
    Continue,
    Transmit(WireRequest),
    Respond(Response),
}

pub(crate) struct Pipeline {
    env: Arc<Environment>,
    frames: Vec<Frame>,
    stats: PipelineStats,
    background: Vec<Request>,
}

impl Pipeline {
    pub fn new(env: Arc<Environment>, request: Request) -> Self {
        Self::with_root(env, Frame::new(Role::Caller, request, 0))
    }

    /// Pipeline for a detached stale-while-revalidate refresh.
    pub fn refresh(env: Arc<Environment>, request: Request) -> Self {
        Self::with_root(env, Frame::new(Role::Refresh, request, 0))
    }

    fn with_root(env: Arc<Environment>, root: Frame) -> Self {
        Self {
            env,
            frames: vec![root],
            stats: PipelineStats::default(),
            background: Vec::new(),
        }
    }

    pub fn stats(&self) -> PipelineStats {
        self.stats
    }

    /// Refreshes scheduled while serving stale entries. The caller must not wait on them.
    pub fn take_background(&mut self) -> Vec<Request> {
        std::mem::take(&mut self.background)
    }

    /// Advances until the next round trip or the final response.
    ///
    /// `response` answers the previous [`Action::Transmit`] and is `None`
    /// on the first call.
    pub fn resume(&mut self, response: Option<RawResponse>) -> FetchResult<Action> {
        let mut pending = response;
        loop {
            let stage = match self.frames.last() {
                Some(frame) => &frame.stage,
                None => return Err(internal("pipeline already finished")),
            };
            let step = match stage {
                Stage::Start => self.start_hop()?,
                Stage::Send => self.transmit()?,
                Stage::AwaitNetwork => match pending.take() {
                    Some(raw) => self.receive(raw)?,
                    None => return Err(internal("no response for the pending round trip")),
                },
                Stage::AwaitRevalidation { .. } | Stage::AwaitPreflight { .. } => {
                    return Err(internal("waiting frame has no child"));
                }
            };

            match step {
                Step::Continue => {}
                Step::Transmit(wire) => return Ok(Action::Transmit(wire)),
                Step::Respond(response) => {
                    if let Some(done) = self.finish_frame(response)? {
                        log::debug!("{} finished with {}", done.url, done.status);
                        return Ok(Action::Finished(done));
                    }
                }
            }
        }
    }

    fn top(&mut self) -> FetchResult<&mut Frame> {
        self.frames
            .last_mut()
            .ok_or_else(|| internal("pipeline already finished"))
    }

    fn start_hop(&mut self) -> FetchResult<Step> {
        let env = Arc::clone(&self.env);
        let frame = self.top()?;
        frame.request.check_aborted()?;
        apply_header_rules(&env.settings, &mut frame.request)?;

        if frame.role.runs_hooks() {
            if let Some(response) = env.interceptor.before_request(&frame.request) {
                log::debug!("{} answered by interceptor", frame.request.url());
                return Ok(Step::Respond(response));
            }
        }

        if frame.request.url().scheme() == "data" {
            let data = env.data_urls.decode(frame.request.url())?;
            let mut headers = HeaderList::new();
            headers.set("Content-Type", &data.media_type)?;
            let response = Response::new(200, frame.request.url().clone())
                .with_headers(headers)
                .with_body(data.body);
            return Ok(Step::Respond(after_response(&env, frame, response)));
        }

        let document_url = &env.context.document_url;
        if document_url.scheme() == "https" && frame.request.url().scheme() == "http" {
            return Err(FetchError::security(
                "fetch.mixed_content",
                format!(
                    "mixed content: {} was requested from the secure document {document_url}",
                    frame.request.url()
                ),
            ));
        }

        if frame.role.uses_cache() && !env.settings.disable_cache {
            if let Some(step) = self.consult_cache()? {
                return Ok(step);
            }
        }

        let frame = self.top()?;
        if let Some(path) = env.virtual_paths.resolve(frame.request.url()) {
            return serve_virtual(&env, frame, path).map(Step::Respond);
        }

        self.enforce_cors()
    }

    fn consult_cache(&mut self) -> FetchResult<Option<Step>> {
        let env = Arc::clone(&self.env);
        let frame = self.top()?;
        let method = frame.request.method();
        if !matches!(method, HttpMethod::Get | HttpMethod::Head) {
            return Ok(None);
        }
        let directives = CacheControl::from_headers(frame.request.headers());
        if directives.no_store || directives.no_cache {
            return Ok(None);
        }

        let key = CacheKey::new(method, frame.request.url());
        let entry = match env.context.response_cache.lookup(&key, frame.request.headers()) {
            CacheLookup::Miss => {
                log::debug!("cache miss for {key}");
                return Ok(None);
            }
            CacheLookup::Fresh(entry) => {
                log::debug!("cache hit for {key}");
                return Ok(Some(Step::Respond(served_from_cache(entry, frame.hops))));
            }
            CacheLookup::Stale(entry) => entry,
        };

        if entry.allows_background_refresh() {
            log::debug!("serving stale {key} while refreshing in the background");
            let mut refresh = frame.request.clone();
            refresh.signal = None;
            self.background.push(refresh);
            self.stats.background_refreshes += 1;
            let hops = self.top()?.hops;
            return Ok(Some(Step::Respond(served_from_cache(entry, hops))));
        }

        let mut conditional = frame.request.clone();
        if let Some(etag) = &entry.etag {
            conditional.set_header("If-None-Match", etag)?;
        }
        if let Some(last_modified) = &entry.last_modified {
            conditional.set_header("If-Modified-Since", last_modified)?;
        }
        log::debug!("revalidating stale {key}");

        let hops = frame.hops;
        frame.stage = Stage::AwaitRevalidation {
            key,
            entry: Box::new(entry),
        };
        self.stats.revalidations += 1;
        self.frames
            .push(Frame::new(Role::Revalidation, conditional, hops));
        Ok(Some(Step::Continue))
    }

    fn enforce_cors(&mut self) -> FetchResult<Step> {
        let env = Arc::clone(&self.env);
        let frame = self.top()?;
        let document_url = &env.context.document_url;

        let exempt = !frame.role.enforces_cors()
            || env.settings.disable_same_origin_policy
            || !cors::is_cross_origin(document_url, frame.request.url());
        if exempt {
            frame.stage = Stage::Send;
            return Ok(Step::Continue);
        }

        match frame.request.mode() {
            RequestMode::SameOrigin => {
                return Err(FetchError::security(
                    "fetch.cors.same_origin_mode",
                    format!(
                        "request to {} violates its same-origin mode",
                        frame.request.url()
                    ),
                ));
            }
            RequestMode::NoCors => {
                frame.stage = Stage::Send;
                return Ok(Step::Continue);
            }
            RequestMode::Cors => {}
        }

        let origin = Origin::of(document_url).serialize();
        let key = PreflightKey::new(&origin, frame.request.url());
        let cached = env.context.preflight_cache.lookup(&key);
        if cached.is_some_and(|entry| entry.permits(&origin, frame.request.method())) {
            log::debug!("preflight cache permits {}", frame.request.url());
            frame.stage = Stage::Send;
            return Ok(Step::Continue);
        }

        let probe = cors::preflight_request(&frame.request, &origin)?;
        frame.stage = Stage::AwaitPreflight { key, origin };
        self.stats.preflights += 1;
        self.frames.push(Frame::new(Role::Preflight, probe, 0));
        Ok(Step::Continue)
    }

    fn transmit(&mut self) -> FetchResult<Step> {
        let env = Arc::clone(&self.env);
        let frame = self.top()?;
        let request = &frame.request;
        let headers = outgoing_headers(request, &env.settings, &env.context.document_url)?;
        let body = match request.body() {
            RequestBody::Empty => WireBody::Empty,
            RequestBody::Bytes(bytes) => WireBody::Buffered(bytes.clone()),
            RequestBody::Stream(stream) => WireBody::Stream(stream.clone()),
        };
        let wire = WireRequest {
            method: request.method(),
            url: request.url().clone(),
            headers,
            body,
            strict_tls: env.settings.strict_tls,
        };

        frame.stage = Stage::AwaitNetwork;
        self.stats.round_trips += 1;
        Ok(Step::Transmit(wire))
    }

    fn receive(&mut self, raw: RawResponse) -> FetchResult<Step> {
        let env = Arc::clone(&self.env);
        let frame = self.top()?;

        let outcome = redirect::resolve(
            &frame.request,
            raw.status,
            &raw.headers,
            frame.hops,
            env.settings.max_redirects,
            &env.context.document_url,
        )?;
        if let RedirectOutcome::Follow(next) = outcome {
            log::debug!("{} redirected to {}", frame.request.url(), next.url());
            frame.request = next;
            frame.hops += 1;
            frame.stage = Stage::Start;
            self.stats.redirects += 1;
            return Ok(Step::Continue);
        }

        let mut headers = raw.headers;
        scrub_response_headers(&mut headers);
        let mut response = Response::new(raw.status, frame.request.url().clone()).with_headers(headers);
        if !raw.status_text.is_empty() {
            response.status_text = raw.status_text;
        }
        response.redirected = frame.hops > 0;

        let method = frame.request.method();
        let cache = &env.context.response_cache;
        let storable = frame.role.writes_cache()
            && !env.settings.disable_cache
            && !response.redirected
            && is_storable(method, frame.request.headers(), &response);
        let key = CacheKey::new(method, frame.request.url());

        // A refresh keeps the stale entry until the new body has decoded.
        if frame.role == Role::Refresh {
            response.body = decode_body(method, raw.status, &response.headers, raw.body)?;
            if storable {
                cache.store(key, frame.request.headers(), response.clone());
            }
            return Ok(Step::Respond(after_response(&env, frame, response)));
        }

        let ticket = if storable {
            cache.begin_write(key, frame.request.headers(), &response)
        } else {
            None
        };
        let body = match decode_body(method, raw.status, &response.headers, raw.body) {
            Ok(body) => body,
            Err(error) => {
                if let Some(ticket) = ticket {
                    cache.abandon(ticket);
                }
                return Err(error);
            }
        };
        if let Some(ticket) = ticket {
            cache.complete(ticket, body.clone());
        }
        response.body = body;

        Ok(Step::Respond(after_response(&env, frame, response)))
    }

    /// Pops the finished top frame and hands its response to the parent.
    /// Returns the caller's response once the stack is empty.
    fn finish_frame(&mut self, response: Response) -> FetchResult<Option<Response>> {
        let mut response = response;
        loop {
            let frame = self
                .frames
                .pop()
                .ok_or_else(|| internal("finished frame is missing"))?;
            if frame.role == Role::Caller && !response.ok() {
                self.env.console.error(&format!(
                    "{} {} {} {}",
                    frame.request.method(),
                    response.url,
                    response.status,
                    response.status_text
                ));
            }

            let Some(parent) = self.frames.last_mut() else {
                return Ok(Some(response));
            };
            match std::mem::replace(&mut parent.stage, Stage::Start) {
                Stage::AwaitRevalidation { key, entry } => {
                    response = self.revalidated(key, *entry, response)?;
                }
                Stage::AwaitPreflight { key, origin } => {
                    self.preflighted(key, &origin, &response)?;
                    return Ok(None);
                }
                _ => return Err(internal("parent frame was not waiting for a child")),
            }
        }
    }

    fn revalidated(
        &mut self,
        key: CacheKey,
        entry: CacheEntry,
        response: Response,
    ) -> FetchResult<Response> {
        let env = Arc::clone(&self.env);
        let parent = self.top()?;
        let cache = &env.context.response_cache;

        if response.status == 304 {
            log::debug!("{key} not modified");
            let refreshed = cache
                .refresh_not_modified(&key, &response.headers)
                .unwrap_or(entry);
            return Ok(served_from_cache(refreshed, parent.hops));
        }

        let storable = !env.settings.disable_cache
            && !response.redirected
            && is_storable(key.method(), parent.request.headers(), &response);
        if storable {
            cache.store(key, parent.request.headers(), response.clone());
        } else {
            cache.remove(&key);
        }
        Ok(response)
    }

    fn preflighted(&mut self, key: PreflightKey, origin: &str, probe: &Response) -> FetchResult<()> {
        let env = Arc::clone(&self.env);
        let parent = self.top()?;

        match cors::evaluate_preflight(probe, origin, parent.request.method()) {
            Ok(grant) => {
                log::debug!("preflight granted for {}", parent.request.url());
                env.context.preflight_cache.insert(key, grant);
                parent.stage = Stage::Send;
                Ok(())
            }
            Err(reason) => {
                let message = format!(
                    "Cross-origin request to {} from {origin} was blocked: {reason}",
                    parent.request.url()
                );
                env.console.warn(&message);
                Err(FetchError::security("fetch.cors.denied", message))
            }
        }
    }
}

fn internal(message: &str) -> FetchError {
    FetchError::network("fetch.pipeline.internal", message)
}

/// Header rules overwrite caller headers on every hop they match.
fn apply_header_rules(settings: &FetchSettings, request: &mut Request) -> FetchResult<()> {
    for rule in &settings.header_rules {
        if !rule.matches(request.url()) {
            continue;
        }
        for (name, value) in &rule.headers {
            request.set_header(name, value)?;
        }
    }
    Ok(())
}

fn after_response(env: &Environment, frame: &Frame, response: Response) -> Response {
    if !frame.role.runs_hooks() {
        return response;
    }
    match env.interceptor.after_response(&frame.request, &response) {
        Some(replaced) => replaced,
        None => response,
    }
}

fn served_from_cache(entry: CacheEntry, hops: u32) -> Response {
    let mut response = entry.response;
    response.redirected = hops > 0;
    response
}

fn serve_virtual(env: &Environment, frame: &Frame, path: PathBuf) -> FetchResult<Response> {
    let url = frame.request.url().clone();
    let method = frame.request.method();

    let file = match method {
        HttpMethod::Get => VirtualFile::load(&path),
        _ => None,
    };
    let Some(file) = file else {
        log::info!("virtual path {} not served for {method} {url}", path.display());
        let mut response = Response::new(404, url);
        response.virtual_path = Some(path);
        return Ok(after_response(env, frame, response));
    };

    let mut headers = HeaderList::new();
    headers.set("Content-Type", file.content_type())?;
    headers.set("Content-Length", &file.body.len().to_string())?;
    headers.set(
        "Cache-Control",
        &format!("max-age={}", env.settings.virtual_path_max_age.as_secs()),
    )?;
    if let Some(modified) = file.modified {
        headers.set("Last-Modified", &httpdate::fmt_http_date(modified))?;
    }

    let mut response = Response::new(200, url)
        .with_headers(headers)
        .with_body(file.body);
    response.redirected = frame.hops > 0;
    response.virtual_path = Some(file.path);

    if frame.role.writes_cache() && !env.settings.disable_cache {
        env.context.response_cache.store(
            CacheKey::new(method, frame.request.url()),
            frame.request.headers(),
            response.clone(),
        );
    }
    Ok(after_response(env, frame, response))
}
