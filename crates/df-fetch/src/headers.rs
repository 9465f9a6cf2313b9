//! Header policy: caller header filtering, wire defaults, referrer
//! computation and response header scrubbing.

use crate::request::Referrer;
use crate::request::ReferrerPolicy;
use crate::request::Request;
use crate::request::RequestMode;
use crate::settings::FetchSettings;
use df_core::FetchResult;
use df_net::HeaderList;
use df_net::HttpMethod;
use df_net::Origin;
use df_net::same_origin;
use url::Url;

const FORBIDDEN_REQUEST_HEADERS: [&str; 21] = [
    "accept-charset",
    "accept-encoding",
    "access-control-request-headers",
    "access-control-request-method",
    "connection",
    "content-length",
    "cookie",
    "cookie2",
    "date",
    "dnt",
    "expect",
    "host",
    "keep-alive",
    "origin",
    "referer",
    "set-cookie",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "via",
];

const FORBIDDEN_RESPONSE_HEADERS: [&str; 2] = ["set-cookie", "set-cookie2"];

pub const DEFAULT_ACCEPT: &str = "*/*";
pub const DEFAULT_ACCEPT_ENCODING: &str = "gzip, deflate, br";

/// Names callers may not set; the engine owns them.
pub fn is_forbidden_request_header(name: &str) -> bool {
    let name = name.trim().to_ascii_lowercase();
    name.starts_with("proxy-")
        || name.starts_with("sec-")
        || FORBIDDEN_REQUEST_HEADERS.contains(&name.as_str())
}

/// Caller headers plus the defaults the engine adds when they are absent.
pub fn outgoing_headers(
    request: &Request,
    settings: &FetchSettings,
    document_url: &Url,
) -> FetchResult<HeaderList> {
    let mut headers = request.headers().clone();
    headers.set_default("Accept", DEFAULT_ACCEPT)?;
    headers.set_default("Accept-Encoding", DEFAULT_ACCEPT_ENCODING)?;
    headers.set_default("User-Agent", &settings.user_agent)?;

    let referrer_source = match request.referrer() {
        Referrer::Client => Some(document_url),
        Referrer::NoReferrer => None,
        Referrer::Url(url) => Some(url),
    };
    if let Some(source) = referrer_source {
        if let Some(referer) = compute_referrer(request.referrer_policy(), source, request.url()) {
            headers.set_default("Referer", &referer)?;
        }
    }

    if needs_origin_header(request, document_url) {
        headers.set_default("Origin", &Origin::of(document_url).serialize())?;
    }

    if let Some(content_type) = request.content_type() {
        headers.set_default("Content-Type", content_type)?;
    }
    if let Some(length) = request.content_length() {
        headers.set("Content-Length", &length.to_string())?;
    }

    Ok(headers)
}

fn needs_origin_header(request: &Request, document_url: &Url) -> bool {
    let cross_origin_cors =
        request.mode() == RequestMode::Cors && !same_origin(document_url, request.url());
    let unsafe_method = !matches!(request.method(), HttpMethod::Get | HttpMethod::Head);
    cross_origin_cors || unsafe_method
}

/// `Referer` value for a request from `referrer` to `target`, or `None`
/// when the policy withholds it.
pub fn compute_referrer(policy: ReferrerPolicy, referrer: &Url, target: &Url) -> Option<String> {
    if !matches!(referrer.scheme(), "http" | "https") {
        return None;
    }

    let mut full = referrer.clone();
    full.set_fragment(None);
    // Both setters only fail for URLs that cannot carry credentials.
    let _ = full.set_username("");
    let _ = full.set_password(None);
    let full = String::from(full);
    let origin_only = format!("{}/", Origin::of(referrer).serialize());

    let downgrade = referrer.scheme() == "https" && target.scheme() != "https";
    let same = same_origin(referrer, target);

    match policy {
        ReferrerPolicy::NoReferrer => None,
        ReferrerPolicy::UnsafeUrl => Some(full),
        ReferrerPolicy::Origin => Some(origin_only),
        ReferrerPolicy::StrictOrigin => (!downgrade).then_some(origin_only),
        ReferrerPolicy::NoReferrerWhenDowngrade => (!downgrade).then_some(full),
        ReferrerPolicy::SameOrigin => same.then_some(full),
        ReferrerPolicy::OriginWhenCrossOrigin => Some(if same { full } else { origin_only }),
        ReferrerPolicy::StrictOriginWhenCrossOrigin => {
            if same {
                Some(full)
            } else if downgrade {
                None
            } else {
                Some(origin_only)
            }
        }
    }
}

/// Policy named by a `Referrer-Policy` response header. The last
/// recognised token wins; unknown tokens are skipped.
pub fn parse_referrer_policy(headers: &HeaderList) -> Option<ReferrerPolicy> {
    headers
        .get_all("referrer-policy")
        .flat_map(|value| value.split(','))
        .filter_map(ReferrerPolicy::from_token)
        .last()
}

/// Removes headers that must never reach callers.
pub fn scrub_response_headers(headers: &mut HeaderList) {
    headers.retain(|header| {
        !FORBIDDEN_RESPONSE_HEADERS
            .iter()
            .any(|name| header.is(name))
    });
}
