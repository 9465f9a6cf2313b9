//! CORS preflight construction and evaluation.

use crate::request::CredentialsMode;
use crate::request::RedirectMode;
use crate::request::Request;
use crate::request::RequestBody;
use crate::request::RequestMode;
use df_cache::PreflightEntry;
use df_core::FetchResult;
use df_net::HeaderList;
use df_net::HttpMethod;
use df_net::Response;
use df_net::same_origin;
use std::time::Duration;
use url::Url;

pub fn is_cross_origin(document_url: &Url, target: &Url) -> bool {
    !same_origin(document_url, target)
}

/// Lower-cased, sorted, comma-joined header names (no space after the
/// comma) so equivalent header sets always produce the same value.
pub fn access_control_request_headers(headers: &HeaderList) -> Option<String> {
    if headers.is_empty() {
        return None;
    }

    let mut names: Vec<String> = headers
        .iter()
        .map(|header| header.name.to_ascii_lowercase())
        .collect();
    names.sort();
    names.dedup();
    Some(names.join(","))
}

/// The `OPTIONS` probe asking whether `request` may be sent from `caller_origin`.
pub fn preflight_request(request: &Request, caller_origin: &str) -> FetchResult<Request> {
    let mut probe = Request {
        method: HttpMethod::Options,
        url: request.url().clone(),
        headers: HeaderList::new(),
        body: RequestBody::Empty,
        signal: request.signal().cloned(),
        redirect: RedirectMode::Manual,
        credentials: CredentialsMode::Omit,
        mode: RequestMode::NoCors,
        referrer: request.referrer().clone(),
        referrer_policy: request.referrer_policy(),
        content_type: None,
        content_length: None,
    };

    probe.set_header("Access-Control-Request-Method", request.method().as_str())?;
    probe.set_header("Origin", caller_origin)?;
    if let Some(names) = access_control_request_headers(request.headers()) {
        probe.set_header("Access-Control-Request-Headers", &names)?;
    }
    Ok(probe)
}

/// Turns a probe response into a cacheable grant, or the denial reason.
pub fn evaluate_preflight(
    response: &Response,
    caller_origin: &str,
    method: HttpMethod,
) -> Result<PreflightEntry, String> {
    if !response.ok() {
        return Err(format!(
            "preflight responded {} {}",
            response.status, response.status_text
        ));
    }

    let allow_origin = match response.header("access-control-allow-origin") {
        Some(value) => value.trim(),
        None => return Err("preflight response has no Access-Control-Allow-Origin".to_owned()),
    };
    if allow_origin != "*" && allow_origin != caller_origin {
        return Err(format!(
            "Access-Control-Allow-Origin `{allow_origin}` does not match `{caller_origin}`"
        ));
    }

    let allow_methods: Vec<String> = response
        .headers
        .get_all("access-control-allow-methods")
        .flat_map(|value| value.split(','))
        .map(|method| method.trim().to_ascii_uppercase())
        .filter(|method| !method.is_empty())
        .collect();
    let wildcard = allow_methods.iter().any(|method| method == "*");
    if !allow_methods.is_empty()
        && !wildcard
        && !allow_methods.iter().any(|allowed| allowed == method.as_str())
    {
        return Err(format!(
            "method {method} is not in Access-Control-Allow-Methods"
        ));
    }

    let max_age = response
        .header("access-control-max-age")
        .and_then(|value| value.trim().parse::<u64>().ok())
        .map(Duration::from_secs);

    let stored_methods = if wildcard { Vec::new() } else { allow_methods };
    Ok(PreflightEntry::new(allow_origin, stored_methods, max_age))
}
