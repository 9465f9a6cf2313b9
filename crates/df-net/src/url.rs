//! URL, origin and same-origin contracts.

use df_core::FetchError;
use df_core::FetchResult;
use url::Url;

/// Application-level URL schemes the network layer can dial.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scheme {
    Http,
    Https,
}

impl Scheme {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Https => "https",
        }
    }

    pub fn is_secure(self) -> bool {
        matches!(self, Self::Https)
    }
}

/// Canonical dialable URL used by the HTTP/1.1 client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkUrl {
    parsed: Url,
    scheme: Scheme,
    host: String,
    port: u16,
}

impl NetworkUrl {
    pub fn parse(input: &str) -> FetchResult<Self> {
        let parsed = Url::parse(input).map_err(|error| {
            FetchError::invalid_input(
                "net.url.invalid",
                format!("failed to parse URL `{input}`: {error}"),
            )
        })?;
        Self::from_url(&parsed)
    }

    pub fn from_url(url: &Url) -> FetchResult<Self> {
        let mut parsed = url.clone();
        if parsed.cannot_be_a_base() {
            return Err(FetchError::invalid_input(
                "net.url.invalid_base",
                format!("URL `{url}` cannot be dialed"),
            ));
        }

        let scheme = match parsed.scheme() {
            "http" => Scheme::Http,
            "https" => Scheme::Https,
            other => {
                return Err(FetchError::not_supported(
                    "net.url.scheme_unsupported",
                    format!("unsupported scheme `{other}`"),
                ));
            }
        };

        let host = parsed
            .host_str()
            .ok_or_else(|| {
                FetchError::invalid_input("net.url.host_missing", "URL must include a host")
            })?
            .to_ascii_lowercase();

        let port = parsed.port_or_known_default().ok_or_else(|| {
            FetchError::invalid_input(
                "net.url.port_missing",
                "unable to determine effective port for URL",
            )
        })?;

        // Fragments are client-side only and never sent on the wire.
        parsed.set_fragment(None);

        Ok(Self {
            parsed,
            scheme,
            host,
            port,
        })
    }

    pub fn as_str(&self) -> &str {
        self.parsed.as_str()
    }

    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn is_secure(&self) -> bool {
        self.scheme.is_secure()
    }

    pub fn authority(&self) -> String {
        if self.port == default_port(self.scheme) {
            self.host.clone()
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    pub fn path_and_query(&self) -> String {
        let path = if self.parsed.path().is_empty() {
            "/"
        } else {
            self.parsed.path()
        };

        match self.parsed.query() {
            Some(query) => format!("{path}?{query}"),
            None => path.to_owned(),
        }
    }
}

/// Serialized `scheme://host[:port]` tuple used for same-origin decisions.
///
/// Non-hierarchical URLs (`data:`, `about:`) get an opaque origin that never
/// equals any other origin, itself included.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Origin {
    Tuple {
        scheme: String,
        host: String,
        port: u16,
    },
    Opaque,
}

impl Origin {
    pub fn of(url: &Url) -> Self {
        let (Some(host), Some(port)) = (url.host_str(), url.port_or_known_default()) else {
            return Self::Opaque;
        };
        if !matches!(url.scheme(), "http" | "https" | "ws" | "wss" | "file") {
            return Self::Opaque;
        }

        Self::Tuple {
            scheme: url.scheme().to_owned(),
            host: host.to_ascii_lowercase(),
            port,
        }
    }

    pub fn same_as(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Opaque, _) | (_, Self::Opaque) => false,
            (left, right) => left == right,
        }
    }

    /// ASCII serialization as sent in the `Origin` header.
    pub fn serialize(&self) -> String {
        match self {
            Self::Opaque => "null".to_owned(),
            Self::Tuple { scheme, host, port } => {
                let default = match scheme.as_str() {
                    "http" | "ws" => Some(80),
                    "https" | "wss" => Some(443),
                    _ => None,
                };
                if default == Some(*port) {
                    format!("{scheme}://{host}")
                } else {
                    format!("{scheme}://{host}:{port}")
                }
            }
        }
    }
}

pub fn same_origin(left: &Url, right: &Url) -> bool {
    Origin::of(left).same_as(&Origin::of(right))
}

fn default_port(scheme: Scheme) -> u16 {
    match scheme {
        Scheme::Http => 80,
        Scheme::Https => 443,
    }
}

#[cfg(test)]
mod tests {
    use super::NetworkUrl;
    use super::Origin;
    use super::same_origin;
    use url::Url;

    fn url(input: &str) -> Url {
        match Url::parse(input) {
            Ok(value) => value,
            Err(error) => panic!("{error}"),
        }
    }

    #[test]
    fn parses_https_url() {
        let parsed = match NetworkUrl::parse("https://example.com/path?q=1") {
            Ok(value) => value,
            Err(error) => panic!("{error}"),
        };

        assert_eq!(parsed.host(), "example.com");
        assert_eq!(parsed.port(), 443);
        assert_eq!(parsed.path_and_query(), "/path?q=1");
        assert!(parsed.is_secure());
    }

    #[test]
    fn removes_fragment_from_canonical_url() {
        let parsed = match NetworkUrl::parse("https://example.com/path#section") {
            Ok(value) => value,
            Err(error) => panic!("{error}"),
        };
        assert_eq!(parsed.as_str(), "https://example.com/path");
    }

    #[test]
    fn rejects_unsupported_scheme() {
        assert!(NetworkUrl::parse("ftp://example.com/file.txt").is_err());
    }

    #[test]
    fn origin_ignores_path_and_default_port() {
        assert!(same_origin(
            &url("https://example.com/a"),
            &url("https://EXAMPLE.com:443/b?c")
        ));
        assert!(!same_origin(
            &url("https://example.com/"),
            &url("http://example.com/")
        ));
        assert!(!same_origin(
            &url("https://example.com/"),
            &url("https://example.com:8443/")
        ));
    }

    #[test]
    fn data_urls_have_opaque_origin() {
        let data = url("data:text/plain,hi");
        assert_eq!(Origin::of(&data), Origin::Opaque);
        assert!(!same_origin(&data, &data));
        assert_eq!(Origin::of(&data).serialize(), "null");
    }

    #[test]
    fn origin_serialization_keeps_explicit_port() {
        assert_eq!(
            Origin::of(&url("http://localhost:8080/x")).serialize(),
            "http://localhost:8080"
        );
        assert_eq!(
            Origin::of(&url("https://example.com/x")).serialize(),
            "https://example.com"
        );
    }
}
