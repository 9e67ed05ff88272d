//! System resolver using getaddrinfo.
//!
//! Runs the operating system's resolution in `tokio::task::spawn_blocking`
//! so the async runtime is never blocked.

use super::{Addrs, Name, Resolve, Resolving};
use crate::base::context::IoResultExt;
use crate::base::neterror::NetError;
use std::{
    io,
    net::{IpAddr, SocketAddr, ToSocketAddrs},
    sync::Arc,
};

/// System resolver using `getaddrinfo` in a thread pool.
#[derive(Clone, Debug, Default)]
pub struct GaiResolver;

impl GaiResolver {
    pub fn new() -> Self {
        Self
    }
}

impl Resolve for GaiResolver {
    fn resolve(&self, name: Name) -> Resolving {
        Box::pin(async move {
            let host = name.as_str().to_string();
            let domain = host.clone();

            let result = tokio::task::spawn_blocking(move || {
                tracing::debug!(host = %host, "resolving via getaddrinfo");
                (host.as_str(), 0u16).to_socket_addrs().map(|iter| iter.collect::<Vec<_>>())
            })
            .await;

            let addrs = result
                .map_err(|e| {
                    tracing::error!(error = %e, "resolution task failed");
                    NetError::NameNotResolved
                })?
                .dns_context(&domain)?;

            if addrs.is_empty() {
                return Err(NetError::NameNotResolvedFor {
                    domain,
                    source: Arc::new(io::Error::new(
                        io::ErrorKind::NotFound,
                        "No addresses returned by getaddrinfo",
                    )),
                });
            }

            tracing::debug!(domain = %domain, count = addrs.len(), "resolution complete");
            Ok(Box::new(addrs.into_iter()) as Addrs)
        })
    }
}

/// Parse `host` as an IP literal, bypassing resolution.
///
/// Accepts bracketed IPv6 (`[::1]`) as produced by host:port joining.
pub fn try_parse_ip(host: &str, port: u16) -> Option<SocketAddr> {
    let bare = host.strip_prefix('[').and_then(|h| h.strip_suffix(']')).unwrap_or(host);
    bare.parse::<IpAddr>().ok().map(|ip| SocketAddr::new(ip, port))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, Ipv6Addr};

    #[test]
    fn test_try_parse_ipv4() {
        assert_eq!(
            try_parse_ip("127.0.0.1", 8080),
            Some(SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 8080))
        );
    }

    #[test]
    fn test_try_parse_ipv6() {
        let expected = Some(SocketAddr::new(IpAddr::V6(Ipv6Addr::LOCALHOST), 443));
        assert_eq!(try_parse_ip("::1", 443), expected);
        assert_eq!(try_parse_ip("[::1]", 443), expected);
    }

    #[test]
    fn test_try_parse_hostname() {
        assert!(try_parse_ip("dns.example.com", 443).is_none());
    }

    #[tokio::test]
    async fn test_gai_resolver_localhost() {
        let resolver = GaiResolver::new();
        let addrs: Vec<_> = resolver.resolve(Name::new("localhost")).await.unwrap().collect();
        assert!(!addrs.is_empty());
    }
}
