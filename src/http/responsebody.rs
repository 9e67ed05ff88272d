//! Response body streaming.
//! Mirrors Chromium's HttpStream::ReadResponseBody.

use crate::base::neterror::NetError;
use bytes::Bytes;
use http_body::{Body, Frame, SizeHint};
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use std::any::Any;
use std::pin::Pin;
use std::task::{Context, Poll};

/// Response body returned by every [`RoundTrip`](super::RoundTrip) layer.
///
/// A body read from a pooled connection keeps that connection busy until
/// the body ends or is dropped.
pub struct ResponseBody {
    inner: BoxBody<Bytes, hyper::Error>,
    in_flight: Option<Box<dyn Any + Send + Sync>>,
}

impl ResponseBody {
    /// Wrap a body received from an HTTP/2 connection.
    pub fn new(inner: Incoming) -> Self {
        Self { inner: inner.boxed(), in_flight: None }
    }

    /// Hold `guard` until the body is finished.
    pub(crate) fn with_in_flight(mut self, guard: impl Any + Send + Sync) -> Self {
        self.in_flight = Some(Box::new(guard));
        self
    }

    pub(crate) fn is_in_flight(&self) -> bool {
        self.in_flight.is_some()
    }

    /// A complete in-memory body.
    pub fn from_bytes(bytes: impl Into<Bytes>) -> Self {
        Self {
            inner: Full::new(bytes.into()).map_err(|never| match never {}).boxed(),
            in_flight: None,
        }
    }

    /// Read entire body as bytes.
    pub async fn bytes(self) -> Result<Bytes, NetError> {
        let Self { inner, in_flight } = self;
        let collected = inner.collect().await.map_err(|e| {
            tracing::debug!(error = %e, "response body read failed");
            NetError::HttpBodyError
        });
        drop(in_flight);
        Ok(collected?.to_bytes())
    }
}

impl Body for ResponseBody {
    type Data = Bytes;
    type Error = hyper::Error;

    fn poll_frame(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let polled = Pin::new(&mut self.inner).poll_frame(cx);
        if matches!(polled, Poll::Ready(None | Some(Err(_)))) {
            self.in_flight = None;
        }
        polled
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

impl std::fmt::Debug for ResponseBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseBody")
            .field("in_flight", &self.is_in_flight())
            .finish_non_exhaustive()
    }
}
