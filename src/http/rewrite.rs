//! Destination rewriting.
//!
//! A DoH endpoint is addressed by one logical hostname but reached through
//! physical addresses chosen elsewhere. [`RequestRewriter`] points every
//! request at the fixed physical address while keeping the hostname in the
//! `Host` header, so SNI and virtual hosting still see the logical name.

use crate::base::neterror::NetError;
use crate::http::roundtrip::{failed, Performing, RequestBody, RoundTrip};
use http::header::HOST;
use http::uri::{Authority, PathAndQuery, Scheme};
use http::{HeaderValue, Request, Uri};

/// Fixed `(hostname, addr, path)` a [`RequestRewriter`] applies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewriteTarget {
    pub hostname: String,
    pub addr: String,
    pub path: Option<String>,
}

impl RewriteTarget {
    pub fn new(hostname: impl Into<String>, addr: impl Into<String>) -> Self {
        Self { hostname: hostname.into(), addr: addr.into(), path: None }
    }

    /// Canonical resource path forced on every request, e.g. `/dns-query`.
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        let path = path.into();
        self.path = if path.is_empty() { None } else { Some(path) };
        self
    }
}

/// Decorator rewriting each request's destination before delegating.
#[derive(Debug)]
pub struct RequestRewriter<T> {
    inner: T,
    target: RewriteTarget,
    authority: Authority,
    host: HeaderValue,
}

impl<T: RoundTrip> RequestRewriter<T> {
    /// Validates the target once so per-request rewriting cannot fail on it.
    pub fn new(inner: T, target: RewriteTarget) -> Result<Self, NetError> {
        let authority = Authority::try_from(target.addr.as_str())
            .map_err(|_| NetError::AddressInvalid(target.addr.clone()))?;
        let host = HeaderValue::from_str(&target.hostname).map_err(|_| NetError::InvalidUrl)?;
        if let Some(path) = &target.path {
            if !path.starts_with('/') || PathAndQuery::try_from(path.as_str()).is_err() {
                return Err(NetError::InvalidUrl);
            }
        }
        Ok(Self { inner, target, authority, host })
    }

    pub fn target(&self) -> &RewriteTarget {
        &self.target
    }

    pub fn inner(&self) -> &T {
        &self.inner
    }

    /// Point `req` at the fixed address, hostname and path.
    pub fn rewrite<B>(&self, req: &mut Request<B>) -> Result<(), NetError> {
        let original = req.uri().path_and_query();
        let path_and_query = match (&self.target.path, original) {
            (Some(path), Some(pq)) => match pq.query() {
                Some(query) => format!("{}?{}", path, query),
                None => path.clone(),
            },
            (Some(path), None) => path.clone(),
            (None, Some(pq)) => pq.as_str().to_string(),
            (None, None) => "/".to_string(),
        };

        let uri = Uri::builder()
            .scheme(Scheme::HTTPS)
            .authority(self.authority.clone())
            .path_and_query(path_and_query)
            .build()
            .map_err(|_| NetError::InvalidUrl)?;

        *req.uri_mut() = uri;
        req.headers_mut().insert(HOST, self.host.clone());
        Ok(())
    }
}

impl<T: RoundTrip> RoundTrip for RequestRewriter<T> {
    fn perform(&self, mut req: Request<RequestBody>) -> Performing {
        if let Err(e) = self.rewrite(&mut req) {
            return failed(e);
        }
        self.inner.perform(req)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::ResponseBody;
    use http::Response;
    use std::sync::{Arc, Mutex};

    /// Captures the request it receives and answers 200.
    #[derive(Default)]
    struct Capture {
        seen: Mutex<Option<(Uri, Option<HeaderValue>)>>,
    }

    impl RoundTrip for Capture {
        fn perform(&self, req: Request<RequestBody>) -> Performing {
            *self.seen.lock().unwrap() = Some((req.uri().clone(), req.headers().get(HOST).cloned()));
            Box::pin(async { Ok(Response::new(ResponseBody::from_bytes("ok"))) })
        }
    }

    fn cloudflare(inner: Arc<Capture>) -> RequestRewriter<Arc<Capture>> {
        let target =
            RewriteTarget::new("cloudflare-dns.com", "1.1.1.1:443").with_path("/dns-query");
        RequestRewriter::new(inner, target).unwrap()
    }

    #[tokio::test]
    async fn test_rewrites_destination_host_and_path() {
        let capture = Arc::new(Capture::default());
        let rewriter = cloudflare(capture.clone());

        let req = Request::builder()
            .uri("https://elsewhere.example:8443/some/other/path")
            .body(RequestBody::default())
            .unwrap();
        let resp = rewriter.perform(req).await.unwrap();
        assert_eq!(resp.status(), 200);

        let (uri, host) = capture.seen.lock().unwrap().clone().unwrap();
        assert_eq!(uri.authority().unwrap().as_str(), "1.1.1.1:443");
        assert_eq!(uri.scheme_str(), Some("https"));
        assert_eq!(uri.path(), "/dns-query");
        assert_eq!(host.unwrap(), "cloudflare-dns.com");
    }

    #[test]
    fn test_query_survives_path_override() {
        let rewriter = cloudflare(Arc::new(Capture::default()));
        let mut req = Request::builder().uri("/resolve?dns=AAABAAAB").body(()).unwrap();
        rewriter.rewrite(&mut req).unwrap();
        assert_eq!(req.uri().to_string(), "https://1.1.1.1:443/dns-query?dns=AAABAAAB");
    }

    #[test]
    fn test_path_kept_without_override() {
        let target = RewriteTarget::new("dns.example.com", "[2001:db8::1]:443");
        let rewriter = RequestRewriter::new(Arc::new(Capture::default()), target).unwrap();
        let mut req = Request::builder().uri("http://x/q?a=1").body(()).unwrap();
        rewriter.rewrite(&mut req).unwrap();
        assert_eq!(req.uri().to_string(), "https://[2001:db8::1]:443/q?a=1");
        assert_eq!(req.headers()[HOST], "dns.example.com");
    }

    #[test]
    fn test_empty_path_means_no_override() {
        assert_eq!(RewriteTarget::new("h", "a:443").with_path("").path, None);
    }

    #[test]
    fn test_invalid_targets_rejected() {
        let inner = Arc::new(Capture::default());
        let bad_addr = RewriteTarget::new("dns.example.com", "not an authority");
        assert!(matches!(
            RequestRewriter::new(inner.clone(), bad_addr),
            Err(NetError::AddressInvalid(_))
        ));
        let bad_path = RewriteTarget::new("dns.example.com", "1.1.1.1:443").with_path("dns-query");
        assert!(RequestRewriter::new(inner, bad_path).is_err());
    }
}
