//! Host name resolution.

use df_core::FetchError;
use df_core::FetchResult;
use std::net::IpAddr;
use std::net::SocketAddr;
use std::net::ToSocketAddrs;

pub trait DnsResolver {
    fn resolve(&self, host: &str, port: u16) -> FetchResult<Vec<SocketAddr>>;
}

/// Operating-system resolver. IPv4 answers are tried before IPv6 ones.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemDnsResolver;

impl DnsResolver for SystemDnsResolver {
    fn resolve(&self, host: &str, port: u16) -> FetchResult<Vec<SocketAddr>> {
        let bare = host.trim_matches(|ch| ch == '[' || ch == ']');
        if let Ok(ip) = bare.parse::<IpAddr>() {
            return Ok(vec![SocketAddr::new(ip, port)]);
        }

        let mut addresses: Vec<SocketAddr> = (bare, port)
            .to_socket_addrs()
            .map_err(|error| {
                FetchError::network(
                    "net.dns.resolve_failed",
                    format!("failed to resolve `{host}`: {error}"),
                )
            })?
            .collect();

        if addresses.is_empty() {
            return Err(FetchError::network(
                "net.dns.no_results",
                format!("resolver returned no addresses for `{host}`"),
            ));
        }

        addresses.sort_by_key(SocketAddr::is_ipv6);
        addresses.dedup();
        Ok(addresses)
    }
}
