use crate::base::neterror::NetError;
use crate::http::ResponseBody;
use bytes::Bytes;
use http::{Request, Response};
use http_body_util::Full;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Body of every outbound request. DoH messages are small and complete.
pub type RequestBody = Full<Bytes>;

/// Alias for the `Future` returned by [`RoundTrip::perform`].
pub type Performing = Pin<Box<dyn Future<Output = Result<Response<ResponseBody>, NetError>> + Send>>;

/// Performs a single HTTP exchange.
///
/// This is the one contract shared by every layer of a transport chain
/// (rewriting, tracing, pooling): each decorator wraps exactly one inner
/// `RoundTrip`, so a caller can plug any layer into a larger HTTP client
/// without knowing what it does internally.
pub trait RoundTrip: Send + Sync {
    /// Send `req` and resolve once response headers arrive or the exchange
    /// fails. Cancellation is driven by the request's
    /// [`RequestContext`](crate::base::cancel::RequestContext).
    fn perform(&self, req: Request<RequestBody>) -> Performing;
}

impl<T: RoundTrip + ?Sized> RoundTrip for Arc<T> {
    fn perform(&self, req: Request<RequestBody>) -> Performing {
        (**self).perform(req)
    }
}

impl<T: RoundTrip + ?Sized> RoundTrip for Box<T> {
    fn perform(&self, req: Request<RequestBody>) -> Performing {
        (**self).perform(req)
    }
}

/// A `Performing` that has already failed.
pub(crate) fn failed(err: NetError) -> Performing {
    Box::pin(std::future::ready(Err(err)))
}
