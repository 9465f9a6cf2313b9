use df_net::HttpMethod;
use std::fmt;
use url::Url;

/// Canonical request identity: upper-case method plus the URL without its fragment.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    method: HttpMethod,
    url: String,
}

impl CacheKey {
    pub fn new(method: HttpMethod, url: &Url) -> Self {
        let mut url = url.clone();
        url.set_fragment(None);
        Self {
            method,
            url: url.into(),
        }
    }

    pub fn method(&self) -> HttpMethod {
        self.method
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.url)
    }
}

#[cfg(test)]
mod tests {
    use super::CacheKey;
    use df_net::HttpMethod;
    use url::Url;

    fn url(input: &str) -> Url {
        match Url::parse(input) {
            Ok(value) => value,
            Err(error) => panic!("{error}"),
        }
    }

    #[test]
    fn fragment_and_host_case_do_not_split_entries() {
        let left = CacheKey::new(HttpMethod::Get, &url("https://Example.com/a?b=1#top"));
        let right = CacheKey::new(HttpMethod::Get, &url("https://example.com:443/a?b=1"));
        assert_eq!(left, right);
        assert_eq!(left.to_string(), "GET https://example.com/a?b=1");
    }

    #[test]
    fn method_participates_in_identity() {
        let target = url("https://example.com/");
        assert_ne!(
            CacheKey::new(HttpMethod::Get, &target),
            CacheKey::new(HttpMethod::Head, &target)
        );
    }
}
