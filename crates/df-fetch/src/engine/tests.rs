use super::FetchEngine;
use crate::console::Console;
use crate::interceptor::Interceptor;
use crate::request::AbortController;
use crate::request::RedirectMode;
use crate::request::Request;
use crate::request::RequestBuilder;
use crate::request::RequestMode;
use crate::settings::BrowsingContext;
use crate::settings::FetchSettings;
use crate::settings::RequestHeaderRule;
use crate::transport::AsyncTransport;
use crate::transport::BlockingTransport;
use crate::transport::RawResponse;
use crate::transport::WireBody;
use crate::transport::WireRequest;
use crate::virtual_path::VirtualServerMap;
use df_cache::CacheKey;
use df_cache::CacheLookup;
use df_core::ErrorKind;
use df_core::FetchResult;
use df_net::HeaderList;
use df_net::HttpMethod;
use df_net::Response;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::time::Duration;
use std::time::Instant;
use url::Url;

const DOCUMENT: &str = "https://app.example/";

type Route = dyn Fn(&WireRequest) -> RawResponse + Send + Sync;

/// In-memory server: answers every hop from `route` and records what was sent.
struct Scripted {
    route: Box<Route>,
    sent: Mutex<Vec<WireRequest>>,
}

impl Scripted {
    fn new(route: impl Fn(&WireRequest) -> RawResponse + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self {
            route: Box::new(route),
            sent: Mutex::new(Vec::new()),
        })
    }

    fn answer(&self, request: WireRequest) -> RawResponse {
        let response = (self.route)(&request);
        match self.sent.lock() {
            Ok(mut sent) => sent.push(request),
            Err(error) => panic!("{error}"),
        }
        response
    }

    fn sent(&self) -> Vec<WireRequest> {
        match self.sent.lock() {
            Ok(sent) => sent.clone(),
            Err(error) => panic!("{error}"),
        }
    }

    fn count(&self) -> usize {
        self.sent().len()
    }
}

impl BlockingTransport for Arc<Scripted> {
    fn round_trip(&self, request: WireRequest) -> FetchResult<RawResponse> {
        Ok(self.answer(request))
    }
}

impl AsyncTransport for Arc<Scripted> {
    async fn round_trip(&self, request: WireRequest) -> FetchResult<RawResponse> {
        Ok(self.answer(request))
    }
}

#[derive(Default)]
struct RecordingConsole {
    warnings: Mutex<Vec<String>>,
    errors: Mutex<Vec<String>>,
}

impl RecordingConsole {
    fn warnings(&self) -> Vec<String> {
        match self.warnings.lock() {
            Ok(lines) => lines.clone(),
            Err(error) => panic!("{error}"),
        }
    }

    fn errors(&self) -> Vec<String> {
        match self.errors.lock() {
            Ok(lines) => lines.clone(),
            Err(error) => panic!("{error}"),
        }
    }
}

impl Console for RecordingConsole {
    fn warn(&self, message: &str) {
        if let Ok(mut lines) = self.warnings.lock() {
            lines.push(message.to_owned());
        }
    }

    fn error(&self, message: &str) {
        if let Ok(mut lines) = self.errors.lock() {
            lines.push(message.to_owned());
        }
    }
}

type TestEngine = FetchEngine<Arc<Scripted>, Arc<Scripted>>;

fn reply(status: u16, pairs: &[(&str, &str)], body: &[u8]) -> RawResponse {
    let mut headers = HeaderList::new();
    for (name, value) in pairs {
        assert!(headers.append(name, value).is_ok());
    }
    RawResponse {
        status,
        status_text: String::new(),
        headers,
        body: body.to_vec(),
    }
}

fn context(document: &str) -> BrowsingContext {
    match BrowsingContext::parse(document) {
        Ok(value) => value,
        Err(error) => panic!("{error}"),
    }
}

fn engine_with(
    context: BrowsingContext,
    settings: FetchSettings,
    transport: &Arc<Scripted>,
    console: &Arc<RecordingConsole>,
) -> TestEngine {
    let console: Arc<dyn Console> = console.clone();
    match FetchEngine::builder(context)
        .settings(settings)
        .console(console)
        .build_with(Arc::clone(transport), Arc::clone(transport))
    {
        Ok(value) => value,
        Err(error) => panic!("{error}"),
    }
}

fn engine(transport: &Arc<Scripted>) -> TestEngine {
    engine_with(
        context(DOCUMENT),
        FetchSettings::default(),
        transport,
        &Arc::new(RecordingConsole::default()),
    )
}

fn build(builder: RequestBuilder) -> Request {
    match builder.build() {
        Ok(value) => value,
        Err(error) => panic!("{error}"),
    }
}

fn get(url: &str) -> Request {
    build(Request::builder(HttpMethod::Get, url))
}

fn ok(result: FetchResult<Response>) -> Response {
    match result {
        Ok(value) => value,
        Err(error) => panic!("{error}"),
    }
}

fn url(raw: &str) -> Url {
    match Url::parse(raw) {
        Ok(value) => value,
        Err(error) => panic!("{error}"),
    }
}

fn gzip(data: &[u8]) -> Vec<u8> {
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use std::io::Write;

    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    assert!(encoder.write_all(data).is_ok());
    match encoder.finish() {
        Ok(value) => value,
        Err(error) => panic!("{error}"),
    }
}

#[test]
fn not_modified_revalidation_serves_cached_body_and_refreshes_entry() {
    let transport = Scripted::new(|request| {
        if request.headers.get("if-none-match") == Some("\"v1\"") {
            reply(304, &[("Cache-Control", "max-age=3600"), ("ETag", "\"v1\"")], b"")
        } else {
            reply(200, &[("Cache-Control", "max-age=0"), ("ETag", "\"v1\"")], b"original")
        }
    });
    let engine = engine(&transport);

    let first = ok(engine.send(get("https://app.example/data")));
    assert_eq!(first.text(), "original");

    let second = ok(engine.send(get("https://app.example/data")));
    assert_eq!(second.status, 200);
    assert_eq!(second.text(), "original");
    let sent = transport.sent();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[1].headers.get("if-none-match"), Some("\"v1\""));

    // The 304 restarted the freshness clock with the new max-age.
    let third = ok(engine.send(get("https://app.example/data")));
    assert_eq!(third.text(), "original");
    assert_eq!(transport.count(), 2);
}

#[test]
fn changed_revalidation_replaces_the_entry() {
    let calls = AtomicUsize::new(0);
    let transport = Scripted::new(move |_| {
        if calls.fetch_add(1, Ordering::SeqCst) == 0 {
            reply(200, &[("Cache-Control", "max-age=0"), ("ETag", "\"v1\"")], b"old")
        } else {
            reply(200, &[("Cache-Control", "max-age=3600"), ("ETag", "\"v2\"")], b"new")
        }
    });
    let engine = engine(&transport);

    assert_eq!(ok(engine.send(get("https://app.example/doc"))).text(), "old");
    assert_eq!(ok(engine.send(get("https://app.example/doc"))).text(), "new");
    assert_eq!(ok(engine.send(get("https://app.example/doc"))).text(), "new");
    assert_eq!(transport.count(), 2);
}

#[test]
fn unsafe_redirects_downgrade_to_get_without_body() {
    for status in [301_u16, 302, 303] {
        let transport = Scripted::new(move |request| match request.url.path() {
            "/submit" => reply(status, &[("Location", "/done")], b""),
            _ => reply(200, &[], b"done"),
        });
        let engine = engine(&transport);

        let request = build(
            Request::builder(HttpMethod::Post, "https://app.example/submit")
                .header("Content-Type", "application/json")
                .body(b"{\"a\":1}".to_vec()),
        );
        let response = ok(engine.send(request));
        assert!(response.redirected);
        assert_eq!(response.url.path(), "/done");

        let sent = transport.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].method, HttpMethod::Post);
        assert_eq!(sent[1].method, HttpMethod::Get, "status {status}");
        assert!(matches!(sent[1].body, WireBody::Empty));
        assert!(!sent[1].headers.contains("content-type"));
        assert!(!sent[1].headers.contains("content-length"));
    }
}

#[test]
fn temporary_redirect_preserves_method_and_body() {
    let transport = Scripted::new(|request| match request.url.path() {
        "/old" => reply(307, &[("Location", "/new")], b""),
        _ => reply(200, &[], b""),
    });
    let engine = engine(&transport);

    let request = build(Request::builder(HttpMethod::Put, "https://app.example/old").body(b"x".to_vec()));
    assert!(ok(engine.send(request)).redirected);

    let sent = transport.sent();
    assert_eq!(sent[1].method, HttpMethod::Put);
    assert!(matches!(sent[1].body, WireBody::Buffered(ref bytes) if bytes == b"x"));
}

#[test]
fn redirect_budget_is_enforced() {
    let endless = Scripted::new(|_| reply(302, &[("Location", "/again")], b""));
    let settings = FetchSettings {
        max_redirects: 3,
        ..FetchSettings::default()
    };
    let console = Arc::new(RecordingConsole::default());
    let engine = engine_with(context(DOCUMENT), settings.clone(), &endless, &console);

    let result = engine.send(get("https://app.example/start"));
    assert!(result.is_err_and(|error| error.kind == ErrorKind::Network
        && error.code == "fetch.redirect.limit"
        && error.message == "maximum redirects reached (3)"));
    assert_eq!(endless.count(), 4);

    let chain = Scripted::new(|request| match request.url.path() {
        "/r0" => reply(302, &[("Location", "/r1")], b""),
        "/r1" => reply(302, &[("Location", "/r2")], b""),
        "/r2" => reply(302, &[("Location", "/r3")], b""),
        _ => reply(200, &[], b"end"),
    });
    let engine = engine_with(context(DOCUMENT), settings, &chain, &console);
    let response = ok(engine.send(get("https://app.example/r0")));
    assert_eq!(response.text(), "end");
    assert_eq!(chain.count(), 4);
}

fn preflighting_api() -> Arc<Scripted> {
    Scripted::new(|request| {
        if request.method != HttpMethod::Options {
            return reply(200, &[], b"items");
        }
        let methods = match request.headers.get("access-control-request-method") {
            Some("PUT") => "GET, PUT",
            _ => "GET",
        };
        reply(
            204,
            &[
                ("Access-Control-Allow-Origin", "https://app.example"),
                ("Access-Control-Allow-Methods", methods),
                ("Access-Control-Max-Age", "600"),
            ],
            b"",
        )
    })
}

fn options_sent(transport: &Scripted) -> usize {
    transport
        .sent()
        .iter()
        .filter(|request| request.method == HttpMethod::Options)
        .count()
}

#[test]
fn preflight_outcomes_are_cached_per_origin_and_url() {
    let transport = preflighting_api();
    let engine = engine(&transport);

    assert_eq!(ok(engine.send(get("https://api.example/items"))).text(), "items");
    assert_eq!(ok(engine.send(get("https://api.example/items"))).text(), "items");
    assert_eq!(options_sent(&transport), 1);
    assert_eq!(transport.count(), 3);

    let probe = &transport.sent()[0];
    assert_eq!(probe.headers.get("origin"), Some("https://app.example"));
    assert_eq!(probe.headers.get("access-control-request-method"), Some("GET"));

    // The cached grant does not cover PUT, so a new probe goes out.
    let put = build(Request::builder(HttpMethod::Put, "https://api.example/items").body(b"{}".to_vec()));
    assert!(ok(engine.send(put)).ok());
    assert_eq!(options_sent(&transport), 2);
}

#[test]
fn denied_preflight_is_a_security_error_with_console_warning() {
    let transport = Scripted::new(|_| reply(200, &[], b""));
    let console = Arc::new(RecordingConsole::default());
    let engine = engine_with(context(DOCUMENT), FetchSettings::default(), &transport, &console);

    let result = engine.send(get("https://api.example/secret"));
    assert!(result.is_err_and(|error| error.kind == ErrorKind::Security
        && error.code == "fetch.cors.denied"));
    assert_eq!(transport.count(), 1);
    let warnings = console.warnings();
    assert_eq!(warnings.len(), 1);
    assert!(warnings[0].contains("https://api.example/secret"));
}

#[test]
fn cross_origin_modes() {
    let transport = Scripted::new(|_| reply(200, &[], b"opaque"));
    let engine = engine(&transport);

    let same_origin_only = build(
        Request::builder(HttpMethod::Get, "https://other.example/").mode(RequestMode::SameOrigin),
    );
    assert!(engine
        .send(same_origin_only)
        .is_err_and(|error| error.code == "fetch.cors.same_origin_mode"));
    assert_eq!(transport.count(), 0);

    let no_cors =
        build(Request::builder(HttpMethod::Get, "https://other.example/").mode(RequestMode::NoCors));
    assert_eq!(ok(engine.send(no_cors)).text(), "opaque");
    assert_eq!(options_sent(&transport), 0);

    let relaxed = engine_with(
        context(DOCUMENT),
        FetchSettings {
            disable_same_origin_policy: true,
            ..FetchSettings::default()
        },
        &transport,
        &Arc::new(RecordingConsole::default()),
    );
    assert!(ok(relaxed.send(get("https://other.example/"))).ok());
    assert_eq!(options_sent(&transport), 0);
    assert_eq!(transport.count(), 2);
}

#[test]
fn bodyless_exchanges_are_not_decoded() {
    let transport = Scripted::new(|request| match request.url.path() {
        "/empty" => reply(204, &[("Content-Encoding", "gzip")], b"junk"),
        _ => reply(200, &[("Content-Encoding", "gzip")], b"junk"),
    });
    let engine = engine(&transport);

    let head = build(Request::builder(HttpMethod::Head, "https://app.example/file"));
    assert_eq!(ok(engine.send(head)).body, b"junk");
    assert_eq!(ok(engine.send(get("https://app.example/empty"))).status, 204);
}

#[test]
fn gzip_bodies_are_decoded() {
    let transport = Scripted::new(|_| reply(200, &[("Content-Encoding", "gzip")], &gzip(b"hello")));
    let engine = engine(&transport);
    assert_eq!(ok(engine.send(get("https://app.example/z"))).text(), "hello");
}

#[test]
fn decode_failure_is_an_encoding_error_and_not_cached() {
    let transport = Scripted::new(|_| {
        reply(
            200,
            &[("Content-Encoding", "gzip"), ("Cache-Control", "max-age=600")],
            b"definitely not gzip",
        )
    });
    let engine = engine(&transport);

    let result = engine.send(get("https://app.example/broken"));
    assert!(result.is_err_and(|error| error.kind == ErrorKind::Encoding));
    assert!(engine.context().response_cache.is_empty());
}

#[test]
fn mixed_content_is_blocked_before_the_cache() {
    let transport = Scripted::new(|_| reply(200, &[], b""));
    let engine = engine(&transport);

    let target = url("http://cdn.example/lib.js");
    let mut headers = HeaderList::new();
    assert!(headers.set("Cache-Control", "max-age=600").is_ok());
    let cached = Response::new(200, target.clone())
        .with_headers(headers)
        .with_body(b"cached".to_vec());
    let stored = engine.context().response_cache.store(
        CacheKey::new(HttpMethod::Get, &target),
        &HeaderList::new(),
        cached,
    );
    assert!(stored);

    let result = engine.send(get("http://cdn.example/lib.js"));
    assert!(result.is_err_and(|error| error.kind == ErrorKind::Security
        && error.code == "fetch.mixed_content"));
    assert_eq!(transport.count(), 0);
}

#[test]
fn data_urls_never_touch_the_network() {
    let transport = Scripted::new(|_| reply(500, &[], b""));
    let engine = engine(&transport);

    let response = ok(engine.send(get("data:text/plain,hello%20world")));
    assert_eq!(response.status, 200);
    assert_eq!(response.text(), "hello world");
    assert_eq!(response.header("content-type"), Some("text/plain"));
    assert_eq!(transport.count(), 0);
}

struct Rewriter;

impl Interceptor for Rewriter {
    fn before_request(&self, request: &Request) -> Option<Response> {
        (request.url().path() == "/mock")
            .then(|| Response::new(200, request.url().clone()).with_body(b"mocked".to_vec()))
    }

    fn after_response(&self, _request: &Request, response: &Response) -> Option<Response> {
        let mut replaced = response.clone();
        replaced.headers.set("X-Intercepted", "1").ok()?;
        Some(replaced)
    }
}

#[test]
fn interceptor_hooks_short_circuit_and_rewrite() {
    let transport = Scripted::new(|_| reply(200, &[], b"live"));
    let engine = match FetchEngine::builder(context(DOCUMENT))
        .interceptor(Arc::new(Rewriter))
        .build_with(Arc::clone(&transport), Arc::clone(&transport))
    {
        Ok(value) => value,
        Err(error) => panic!("{error}"),
    };

    let mocked = ok(engine.send(get("https://app.example/mock")));
    assert_eq!(mocked.text(), "mocked");
    assert_eq!(mocked.header("x-intercepted"), None);
    assert_eq!(transport.count(), 0);

    let live = ok(engine.send(get("https://app.example/live")));
    assert_eq!(live.text(), "live");
    assert_eq!(live.header("x-intercepted"), Some("1"));
}

#[test]
fn aborted_requests_fail_with_the_reason() {
    let transport = Scripted::new(|_| reply(200, &[], b""));
    let engine = engine(&transport);

    let controller = AbortController::new();
    controller.abort(Some("navigated away"));
    let request = build(Request::builder(HttpMethod::Get, "https://app.example/").signal(controller.signal()));

    let result = engine.send(request);
    assert!(result.is_err_and(|error| error.kind == ErrorKind::Abort
        && error.message.contains("navigated away")));
    assert_eq!(transport.count(), 0);
}

#[test]
fn virtual_paths_are_served_from_disk_and_cached() {
    let dir = match tempfile::tempdir() {
        Ok(value) => value,
        Err(error) => panic!("{error}"),
    };
    assert!(std::fs::write(dir.path().join("index.html"), "<h1>hi</h1>").is_ok());
    assert!(std::fs::write(dir.path().join("app.js"), "run()").is_ok());

    let mut map = VirtualServerMap::new();
    assert!(map.mount("https://app.example/static/", dir.path()).is_ok());
    let console = Arc::new(RecordingConsole::default());
    let console_sink: Arc<dyn Console> = console.clone();
    let transport = Scripted::new(|_| reply(500, &[], b""));
    let engine = match FetchEngine::builder(context(DOCUMENT))
        .virtual_paths(Arc::new(map))
        .console(console_sink)
        .build_with(Arc::clone(&transport), Arc::clone(&transport))
    {
        Ok(value) => value,
        Err(error) => panic!("{error}"),
    };

    let index = ok(engine.send(get("https://app.example/static/")));
    assert_eq!(index.text(), "<h1>hi</h1>");
    assert_eq!(index.header("content-type"), Some("text/html; charset=utf-8"));
    assert_eq!(index.header("cache-control"), Some("max-age=60"));
    assert!(index.virtual_path.is_some());

    let script = ok(engine.send(get("https://app.example/static/app.js")));
    assert_eq!(script.text(), "run()");
    // The second read comes from the response cache.
    assert!(std::fs::remove_file(dir.path().join("app.js")).is_ok());
    assert_eq!(ok(engine.send(get("https://app.example/static/app.js"))).text(), "run()");

    let post = build(Request::builder(HttpMethod::Post, "https://app.example/static/app.js"));
    let refused = ok(engine.send(post));
    assert_eq!(refused.status, 404);
    assert!(refused.virtual_path.is_some());
    assert_eq!(
        console.errors(),
        vec!["POST https://app.example/static/app.js 404 Not Found".to_owned()]
    );
    assert_eq!(transport.count(), 0);
}

#[test]
fn stale_while_revalidate_serves_stale_and_refreshes_in_background() {
    let calls = AtomicUsize::new(0);
    let transport = Scripted::new(move |_| {
        let body = format!("v{}", calls.fetch_add(1, Ordering::SeqCst) + 1);
        reply(
            200,
            &[("Cache-Control", "max-age=0, stale-while-revalidate=60")],
            body.as_bytes(),
        )
    });
    let engine = engine(&transport);

    assert_eq!(ok(engine.send(get("https://app.example/feed"))).text(), "v1");
    assert_eq!(ok(engine.send(get("https://app.example/feed"))).text(), "v1");

    let key = CacheKey::new(HttpMethod::Get, &url("https://app.example/feed"));
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let body = match engine.context().response_cache.lookup(&key, &HeaderList::new()) {
            CacheLookup::Fresh(entry) | CacheLookup::Stale(entry) => entry.response.body,
            CacheLookup::Miss => Vec::new(),
        };
        if body == b"v2" {
            break;
        }
        assert!(Instant::now() < deadline, "background refresh never landed");
        std::thread::sleep(Duration::from_millis(10));
    }
    assert_eq!(transport.count(), 2);
}

#[test]
fn failed_background_refresh_keeps_the_stale_entry() {
    let calls = AtomicUsize::new(0);
    let transport = Scripted::new(move |_| {
        let headers = [("Cache-Control", "max-age=0, stale-while-revalidate=60")];
        if calls.fetch_add(1, Ordering::SeqCst) == 0 {
            reply(200, &headers, b"v1")
        } else {
            reply(200, &[headers[0], ("Content-Encoding", "gzip")], b"not gzip")
        }
    });
    let engine = engine(&transport);

    assert_eq!(ok(engine.send(get("https://app.example/feed"))).text(), "v1");
    assert_eq!(ok(engine.send(get("https://app.example/feed"))).text(), "v1");

    let deadline = Instant::now() + Duration::from_secs(5);
    while transport.count() < 2 {
        assert!(Instant::now() < deadline, "background refresh never started");
        std::thread::sleep(Duration::from_millis(10));
    }
    std::thread::sleep(Duration::from_millis(200));

    let key = CacheKey::new(HttpMethod::Get, &url("https://app.example/feed"));
    match engine.context().response_cache.lookup(&key, &HeaderList::new()) {
        CacheLookup::Stale(entry) => assert_eq!(entry.response.body, b"v1"),
        CacheLookup::Fresh(_) => panic!("failed refresh replaced the entry"),
        CacheLookup::Miss => panic!("failed refresh dropped the stale entry"),
    }
}

#[test]
fn redirected_responses_are_not_cached() {
    let transport = Scripted::new(|request| match request.url.path() {
        "/a" => reply(302, &[("Location", "/b")], b""),
        _ => reply(200, &[("Cache-Control", "max-age=3600")], b"b"),
    });
    let engine = engine(&transport);

    let response = ok(engine.send(get("https://app.example/a")));
    assert!(response.redirected);
    assert_eq!(response.text(), "b");
    assert!(engine.context().response_cache.is_empty());

    let direct = ok(engine.send(get("https://app.example/b")));
    assert!(!direct.redirected);
    assert_eq!(transport.count(), 3);
    assert_eq!(engine.context().response_cache.len(), 1);
}

#[test]
fn manual_and_error_redirect_modes() {
    let transport = Scripted::new(|_| reply(302, &[("Location", "/next")], b""));
    let engine = engine(&transport);

    let manual = build(Request::builder(HttpMethod::Get, "https://app.example/a").redirect(RedirectMode::Manual));
    let response = ok(engine.send(manual));
    assert_eq!(response.status, 302);
    assert!(!response.redirected);

    let strict = build(Request::builder(HttpMethod::Get, "https://app.example/a").redirect(RedirectMode::Error));
    assert!(engine
        .send(strict)
        .is_err_and(|error| error.kind == ErrorKind::Abort));
    assert_eq!(transport.count(), 2);
}

#[test]
fn header_rules_overwrite_matching_hops() {
    let transport = Scripted::new(|_| reply(200, &[], b""));
    let rule = match RequestHeaderRule::new(
        Some(r"^https://app\.example/api/"),
        vec![("X-Api-Key".to_owned(), "secret".to_owned())],
    ) {
        Ok(value) => value,
        Err(error) => panic!("{error}"),
    };
    let engine = engine_with(
        context(DOCUMENT),
        FetchSettings::default().with_header_rule(rule),
        &transport,
        &Arc::new(RecordingConsole::default()),
    );

    let request = build(Request::builder(HttpMethod::Get, "https://app.example/api/v1").header("X-Api-Key", "mine"));
    assert!(ok(engine.send(request)).ok());
    assert!(ok(engine.send(get("https://app.example/page"))).ok());

    let sent = transport.sent();
    assert_eq!(sent[0].headers.get("x-api-key"), Some("secret"));
    assert_eq!(sent[1].headers.get("x-api-key"), None);
    assert!(sent[1].headers.contains("user-agent"));
}

#[test]
fn set_cookie_never_reaches_callers() {
    let transport = Scripted::new(|_| reply(200, &[("Set-Cookie", "sid=1"), ("X-Other", "kept")], b""));
    let engine = engine(&transport);

    let response = ok(engine.send(get("https://app.example/login")));
    assert_eq!(response.header("set-cookie"), None);
    assert_eq!(response.header("x-other"), Some("kept"));
}

#[test]
fn failed_responses_are_reported_to_the_console() {
    let transport = Scripted::new(|_| reply(500, &[], b"boom"));
    let console = Arc::new(RecordingConsole::default());
    let engine = engine_with(context(DOCUMENT), FetchSettings::default(), &transport, &console);

    let response = ok(engine.send(get("https://app.example/fail")));
    assert!(!response.ok());
    assert_eq!(
        console.errors(),
        vec!["GET https://app.example/fail 500 Internal Server Error".to_owned()]
    );
}

#[test]
fn default_engine_builds_and_rejects_bad_settings() {
    assert!(FetchEngine::new(context(DOCUMENT), FetchSettings::default()).is_ok());

    let settings = FetchSettings {
        user_agent: "bad\r\nagent".to_owned(),
        ..FetchSettings::default()
    };
    assert!(FetchEngine::new(context(DOCUMENT), settings).is_err_and(|error| error.kind == ErrorKind::InvalidInput));
}

#[cfg(unix)]
#[test]
fn silent_child_process_is_a_network_error() {
    use crate::transport::ChildProcessConfig;
    use crate::transport::ChildProcessTransport;

    let mut config = ChildProcessConfig::new("/bin/sh");
    config.extra_args = vec!["-c".to_owned(), "exit 0".to_owned(), "domfetch-child".to_owned()];
    let unused = Scripted::new(|_| reply(500, &[], b""));
    let engine = match FetchEngine::builder(context(DOCUMENT))
        .build_with(ChildProcessTransport::new(config), Arc::clone(&unused))
    {
        Ok(value) => value,
        Err(error) => panic!("{error}"),
    };

    let result = engine.send(get("https://app.example/"));
    assert!(result.is_err_and(|error| error.kind == ErrorKind::Network && error.message == "fetch failed"));
}

#[tokio::test]
async fn async_send_follows_redirects_and_preflights() {
    let transport = Scripted::new(|request| {
        if request.method == HttpMethod::Options {
            return reply(204, &[("Access-Control-Allow-Origin", "*")], b"");
        }
        match request.url.path() {
            "/moved" => reply(308, &[("Location", "/here")], b""),
            _ => reply(200, &[], b"async"),
        }
    });
    let engine = engine(&transport);

    let response = ok(engine.send_async(get("https://api.example/moved")).await);
    assert_eq!(response.text(), "async");
    assert!(response.redirected);
    assert_eq!(response.url.as_str(), "https://api.example/here");
    // One probe per distinct URL.
    assert_eq!(options_sent(&transport), 2);
    assert_eq!(transport.count(), 4);
}

#[tokio::test(flavor = "multi_thread")]
async fn async_stale_while_revalidate_refreshes_on_the_runtime() {
    let calls = AtomicUsize::new(0);
    let transport = Scripted::new(move |_| {
        let body = format!("v{}", calls.fetch_add(1, Ordering::SeqCst) + 1);
        reply(
            200,
            &[("Cache-Control", "max-age=0, stale-while-revalidate=60")],
            body.as_bytes(),
        )
    });
    let engine = engine(&transport);

    assert_eq!(ok(engine.send_async(get("https://app.example/feed")).await).text(), "v1");
    assert_eq!(ok(engine.send_async(get("https://app.example/feed")).await).text(), "v1");

    let deadline = Instant::now() + Duration::from_secs(5);
    while transport.count() < 2 {
        assert!(Instant::now() < deadline, "background refresh never ran");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
