//! Engine configuration and the browsing context that owns the shared stores.

use df_cache::PreflightCacheStore;
use df_cache::ResponseCacheStore;
use df_core::FetchError;
use df_core::FetchResult;
use df_net::Header;
use regex::Regex;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

pub const DEFAULT_USER_AGENT: &str = concat!(
    "Mozilla/5.0 (X11; Linux x86_64) domfetch/",
    env!("CARGO_PKG_VERSION")
);

/// Extra headers forced onto every outgoing hop whose URL matches `url`.
#[derive(Debug, Clone)]
pub struct RequestHeaderRule {
    /// `None` matches every URL.
    pub url: Option<Regex>,
    pub headers: Vec<(String, String)>,
}

impl RequestHeaderRule {
    pub fn new(pattern: Option<&str>, headers: Vec<(String, String)>) -> FetchResult<Self> {
        let url = pattern
            .map(|pattern| {
                Regex::new(pattern).map_err(|error| {
                    FetchError::invalid_input(
                        "fetch.settings.header_rule_pattern_invalid",
                        format!("invalid header rule pattern `{pattern}`: {error}"),
                    )
                })
            })
            .transpose()?;

        let rule = Self { url, headers };
        rule.validate()?;
        Ok(rule)
    }

    pub fn matches(&self, url: &Url) -> bool {
        self.url
            .as_ref()
            .is_none_or(|pattern| pattern.is_match(url.as_str()))
    }

    fn validate(&self) -> FetchResult<()> {
        for (name, value) in &self.headers {
            Header::new(name, value)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct FetchSettings {
    pub user_agent: String,
    /// Redirects followed before a redirect response becomes a network error.
    pub max_redirects: u32,
    /// Off accepts invalid server certificates.
    pub strict_tls: bool,
    pub disable_same_origin_policy: bool,
    pub disable_cache: bool,
    pub header_rules: Vec<RequestHeaderRule>,
    /// Freshness lifetime given to files served from virtual paths.
    pub virtual_path_max_age: Duration,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            max_redirects: 20,
            strict_tls: true,
            disable_same_origin_policy: false,
            disable_cache: false,
            header_rules: Vec::new(),
            virtual_path_max_age: Duration::from_secs(60),
        }
    }
}

impl FetchSettings {
    pub fn validate(&self) -> FetchResult<()> {
        Header::new("User-Agent", &self.user_agent)?;
        for rule in &self.header_rules {
            rule.validate()?;
        }
        Ok(())
    }

    pub fn with_header_rule(mut self, rule: RequestHeaderRule) -> Self {
        self.header_rules.push(rule);
        self
    }
}

/// State shared by every request issued from one document.
#[derive(Debug, Clone)]
pub struct BrowsingContext {
    pub document_url: Url,
    pub response_cache: Arc<ResponseCacheStore>,
    pub preflight_cache: Arc<PreflightCacheStore>,
}

impl BrowsingContext {
    pub fn new(document_url: Url) -> Self {
        Self {
            document_url,
            response_cache: Arc::new(ResponseCacheStore::new()),
            preflight_cache: Arc::new(PreflightCacheStore::new()),
        }
    }

    pub fn parse(document_url: &str) -> FetchResult<Self> {
        let url = Url::parse(document_url).map_err(|error| {
            FetchError::invalid_input(
                "fetch.settings.document_url_invalid",
                format!("failed to parse document URL `{document_url}`: {error}"),
            )
        })?;
        Ok(Self::new(url))
    }
}
