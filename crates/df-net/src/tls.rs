//! TLS policy contracts.

use crate::url::NetworkUrl;
use crate::url::Scheme;
use df_core::FetchError;
use df_core::FetchResult;
use std::net::IpAddr;

/// Supported TLS protocol versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TlsVersion {
    V1_2,
    V1_3,
}

impl TlsVersion {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::V1_2 => "TLS1.2",
            Self::V1_3 => "TLS1.3",
        }
    }
}

/// Controls which trust anchors are used for server certificate verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrustStoreMode {
    /// Use only the embedded Mozilla/WebPKI roots.
    WebPkiOnly,
    /// Use WebPKI roots and merge operating-system roots (enterprise/local CAs).
    WebPkiAndOs,
}

/// TLS handshake requirements for one HTTPS request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsHandshakeConfig {
    pub server_name: String,
    pub minimum_version: TlsVersion,
    pub maximum_version: TlsVersion,
    pub alpn_protocols: Vec<String>,
    pub require_sni: bool,
    pub require_ocsp_stapling: bool,
    pub verify_certificates: bool,
}

/// Policy deciding how HTTPS connections are verified.
///
/// `strict` is the environment's strict-TLS toggle: when it is off, server
/// certificates are accepted without verification (self-signed fixtures,
/// local development servers).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StrictTlsPolicy {
    pub minimum_version: TlsVersion,
    pub maximum_version: TlsVersion,
    pub strict: bool,
    pub require_sni: bool,
    pub require_ocsp_stapling: bool,
    pub trust_store_mode: TrustStoreMode,
}

impl Default for StrictTlsPolicy {
    fn default() -> Self {
        Self {
            minimum_version: TlsVersion::V1_2,
            maximum_version: TlsVersion::V1_3,
            strict: true,
            require_sni: true,
            require_ocsp_stapling: false,
            trust_store_mode: TrustStoreMode::WebPkiOnly,
        }
    }
}

impl StrictTlsPolicy {
    pub fn for_strictness(strict: bool) -> Self {
        Self {
            strict,
            // Raw-IP test servers cannot present an SNI name.
            require_sni: strict,
            ..Self::default()
        }
    }

    pub fn with_trust_store_mode(mut self, mode: TrustStoreMode) -> Self {
        self.trust_store_mode = mode;
        self
    }

    pub fn with_ocsp_stapling_required(mut self, required: bool) -> Self {
        self.require_ocsp_stapling = required;
        self
    }

    pub fn validate(&self) -> FetchResult<()> {
        if self.minimum_version > self.maximum_version {
            return Err(FetchError::invalid_input(
                "net.tls.invalid_version_range",
                "minimum TLS version cannot be greater than maximum version",
            ));
        }

        if !self.strict && self.require_ocsp_stapling {
            return Err(FetchError::invalid_input(
                "net.tls.ocsp_without_verification",
                "OCSP stapling cannot be required while certificate verification is off",
            ));
        }

        Ok(())
    }

    pub fn handshake_config_for(&self, url: &NetworkUrl) -> FetchResult<Option<TlsHandshakeConfig>> {
        self.validate()?;

        match url.scheme() {
            Scheme::Http => Ok(None),
            Scheme::Https => {
                if self.require_sni && is_ip_address(url.host()) {
                    return Err(FetchError::network(
                        "net.tls.sni_host_invalid",
                        "SNI requires a DNS host, not a raw IP address",
                    ));
                }

                Ok(Some(TlsHandshakeConfig {
                    server_name: url.host().to_owned(),
                    minimum_version: self.minimum_version,
                    maximum_version: self.maximum_version,
                    alpn_protocols: vec!["http/1.1".to_owned()],
                    require_sni: self.require_sni,
                    require_ocsp_stapling: self.require_ocsp_stapling,
                    verify_certificates: self.strict,
                }))
            }
        }
    }
}

fn is_ip_address(host: &str) -> bool {
    host.trim_matches(|ch| ch == '[' || ch == ']')
        .parse::<IpAddr>()
        .is_ok()
}
