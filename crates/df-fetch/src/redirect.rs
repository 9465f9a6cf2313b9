//! Redirect decisions.

use crate::headers::parse_referrer_policy;
use crate::request::CredentialsMode;
use crate::request::RedirectMode;
use crate::request::Request;
use df_core::FetchError;
use df_core::FetchResult;
use df_net::HeaderList;
use df_net::HttpMethod;
use df_net::same_origin;
use url::Url;

const CREDENTIAL_HEADERS: [&str; 4] = ["authorization", "www-authenticate", "cookie", "cookie2"];

pub fn is_redirect_status(status: u16) -> bool {
    matches!(status, 301 | 302 | 303 | 307 | 308)
}

#[derive(Debug)]
pub enum RedirectOutcome {
    /// Hand the response back unchanged.
    Deliver,
    /// Issue this request as the next hop.
    Follow(Request),
}

/// Decides what a redirect response means for `request`.
///
/// `hops` is the number of redirects already followed for this request.
pub fn resolve(
    request: &Request,
    status: u16,
    headers: &HeaderList,
    hops: u32,
    max_redirects: u32,
    document_url: &Url,
) -> FetchResult<RedirectOutcome> {
    if !is_redirect_status(status) {
        return Ok(RedirectOutcome::Deliver);
    }

    match request.redirect_mode() {
        RedirectMode::Error => {
            return Err(FetchError::abort(
                "fetch.redirect.disallowed",
                format!(
                    "redirect from {} was rejected by redirect mode `error`",
                    request.url()
                ),
            ));
        }
        RedirectMode::Manual => return Ok(RedirectOutcome::Deliver),
        RedirectMode::Follow => {}
    }

    let Some(location) = headers.get("location") else {
        return Ok(RedirectOutcome::Deliver);
    };
    let mut target = request.url().join(location.trim()).map_err(|error| {
        FetchError::uri_mismatch(
            "fetch.redirect.location_invalid",
            format!("cannot resolve redirect location `{location}`: {error}"),
        )
    })?;
    if !matches!(target.scheme(), "http" | "https") {
        return Err(FetchError::network(
            "fetch.redirect.scheme_invalid",
            format!("redirect to `{target}` leaves HTTP(S)"),
        ));
    }
    // A Location without a fragment inherits the current one.
    if target.fragment().is_none() {
        target.set_fragment(request.url().fragment());
    }

    if hops >= max_redirects {
        return Err(FetchError::network(
            "fetch.redirect.limit",
            format!("maximum redirects reached ({max_redirects})"),
        ));
    }

    let mut next = request.clone();
    next.url = target;

    let downgrade_to_get = status == 303
        || matches!(status, 301 | 302) && request.method() == HttpMethod::Post;
    if downgrade_to_get {
        next.method = HttpMethod::Get;
        next.drop_body();
    } else if next.body().is_stream() {
        return Err(FetchError::network(
            "fetch.redirect.stream_body",
            "cannot replay a streamed request body on redirect",
        ));
    }

    let strip_credentials = match request.credentials() {
        CredentialsMode::Omit => true,
        CredentialsMode::SameOrigin => !same_origin(document_url, &next.url),
        CredentialsMode::Include => false,
    };
    if strip_credentials {
        for name in CREDENTIAL_HEADERS {
            next.headers.remove(name);
        }
    }

    if let Some(policy) = parse_referrer_policy(headers) {
        next.referrer_policy = policy;
    }

    Ok(RedirectOutcome::Follow(next))
}
