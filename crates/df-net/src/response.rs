//! Fully materialized response handed back to fetch callers.

use crate::http::HeaderList;
use crate::http::reason_phrase;
use std::path::PathBuf;
use url::Url;

/// Value-type response: status, final URL, headers and the decoded body.
///
/// `ok` is derived from the status and never stored separately.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub status_text: String,
    pub url: Url,
    pub redirected: bool,
    pub headers: HeaderList,
    pub body: Vec<u8>,
    /// Local file this response was served from, when the URL mapped to a virtual path.
    pub virtual_path: Option<PathBuf>,
}

impl Response {
    pub fn new(status: u16, url: Url) -> Self {
        Self {
            status,
            status_text: reason_phrase(status).to_owned(),
            url,
            redirected: false,
            headers: HeaderList::new(),
            body: Vec::new(),
            virtual_path: None,
        }
    }

    pub fn with_headers(mut self, headers: HeaderList) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_body(mut self, body: Vec<u8>) -> Self {
        self.body = body;
        self
    }

    pub fn ok(&self) -> bool {
        (200..=299).contains(&self.status)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::Response;
    use url::Url;

    #[test]
    fn ok_tracks_2xx_range() {
        let url = match Url::parse("https://example.com/") {
            Ok(value) => value,
            Err(error) => panic!("{error}"),
        };
        assert!(Response::new(204, url.clone()).ok());
        assert!(!Response::new(304, url.clone()).ok());
        assert_eq!(Response::new(404, url).status_text, "Not Found");
    }
}
