//! `Cache-Control` parsing and read-time freshness evaluation.

use df_net::HeaderList;
use df_net::HttpMethod;
use df_net::Response;
use std::time::Duration;
use std::time::SystemTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    Fresh,
    Stale,
}

/// Directives this cache acts on. Unknown directives are ignored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheControl {
    pub no_store: bool,
    pub no_cache: bool,
    pub must_revalidate: bool,
    pub stale_while_revalidate: bool,
    pub max_age: Option<Duration>,
}

impl CacheControl {
    /// Merges every `Cache-Control` header in `headers`.
    pub fn from_headers(headers: &HeaderList) -> Self {
        let mut parsed = Self::default();
        for value in headers.get_all("cache-control") {
            parsed.merge(value);
        }
        parsed
    }

    pub fn parse(value: &str) -> Self {
        let mut parsed = Self::default();
        parsed.merge(value);
        parsed
    }

    fn merge(&mut self, value: &str) {
        for directive in value.split(',').map(str::trim) {
            let (name, argument) = match directive.split_once('=') {
                Some((name, argument)) => (name.trim(), Some(argument.trim().trim_matches('"'))),
                None => (directive, None),
            };

            match name.to_ascii_lowercase().as_str() {
                "no-store" => self.no_store = true,
                "no-cache" => self.no_cache = true,
                "must-revalidate" => self.must_revalidate = true,
                "stale-while-revalidate" => self.stale_while_revalidate = true,
                "max-age" => {
                    // First valid max-age wins; malformed values are ignored.
                    if self.max_age.is_none() {
                        self.max_age = argument
                            .and_then(|seconds| seconds.parse::<u64>().ok())
                            .map(Duration::from_secs);
                    }
                }
                _ => {}
            }
        }
    }
}

/// Freshness of a response stored at `stored_at`, evaluated at `now`.
///
/// `no-cache` is always stale. Otherwise `max-age` (offset by any `Age`
/// header) takes precedence over `Expires`; with neither the entry is stale.
pub fn freshness_at(headers: &HeaderList, stored_at: SystemTime, now: SystemTime) -> Freshness {
    let control = CacheControl::from_headers(headers);
    if control.no_cache {
        return Freshness::Stale;
    }

    if let Some(max_age) = control.max_age {
        let initial_age = headers
            .get("age")
            .and_then(|value| value.trim().parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or_default();
        let resident = now.duration_since(stored_at).unwrap_or_default();
        return if initial_age + resident < max_age {
            Freshness::Fresh
        } else {
            Freshness::Stale
        };
    }

    match headers
        .get("expires")
        .and_then(|value| httpdate::parse_http_date(value.trim()).ok())
    {
        Some(expires) if now < expires => Freshness::Fresh,
        _ => Freshness::Stale,
    }
}

/// Whether a request/response pair may be written to the response cache.
pub fn is_storable(method: HttpMethod, request_headers: &HeaderList, response: &Response) -> bool {
    if !matches!(method, HttpMethod::Get | HttpMethod::Head) || !response.ok() {
        return false;
    }

    if CacheControl::from_headers(request_headers).no_store {
        return false;
    }

    let control = CacheControl::from_headers(&response.headers);
    if control.no_store || response.headers.has_token("vary", "*") {
        return false;
    }

    control.max_age.is_some()
        || control.no_cache
        || response.headers.contains("expires")
        || response.headers.contains("etag")
        || response.headers.contains("last-modified")
}
