//! Per-request cancellation.
//!
//! A [`RequestContext`] travels in the request's extensions and is the only
//! cancellation channel a transport honours: it can be cancelled explicitly
//! through a [`CancelHandle`], expire at a deadline, or both. Dropping the
//! future that performs the request aborts it as well.

use crate::base::neterror::NetError;
use std::future::{pending, Future};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

/// Cancellation signal and deadline attached to one request.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    cancel: Option<watch::Receiver<bool>>,
    deadline: Option<Instant>,
}

/// Cancels every [`RequestContext`] derived from it.
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }
}

impl RequestContext {
    /// A context that is never cancelled and has no deadline.
    pub fn background() -> Self {
        Self::default()
    }

    /// A cancellable context and the handle that cancels it.
    pub fn with_cancel() -> (Self, CancelHandle) {
        let (tx, rx) = watch::channel(false);
        (Self { cancel: Some(rx), deadline: None }, CancelHandle { tx })
    }

    /// Bound the context by `timeout` from now. An earlier deadline wins.
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(current) if current < deadline => current,
            _ => deadline,
        });
        self
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// The error the context has already failed with, if any.
    pub fn err(&self) -> Option<NetError> {
        if self.cancel.as_ref().is_some_and(|rx| *rx.borrow()) {
            return Some(NetError::Cancelled);
        }
        match self.deadline {
            Some(deadline) if deadline <= Instant::now() => Some(NetError::TimedOut),
            _ => None,
        }
    }

    /// Resolves once the context is cancelled or its deadline passes.
    /// Never resolves for a background context.
    pub async fn done(&self) -> NetError {
        let cancelled = async {
            if let Some(rx) = &self.cancel {
                let mut rx = rx.clone();
                if rx.wait_for(|cancelled| *cancelled).await.is_ok() {
                    return NetError::Cancelled;
                }
            }
            // Handle dropped without cancelling: this side can never fire.
            pending::<NetError>().await
        };
        let expired = async {
            match self.deadline {
                Some(deadline) => {
                    tokio::time::sleep_until(deadline).await;
                    NetError::TimedOut
                }
                None => pending::<NetError>().await,
            }
        };
        tokio::select! {
            err = cancelled => err,
            err = expired => err,
        }
    }

    /// Drive `fut` to completion unless the context fails first, in which
    /// case `fut` is dropped and the context's error is returned.
    pub async fn run<F, T>(&self, fut: F) -> Result<T, NetError>
    where
        F: Future<Output = Result<T, NetError>>,
    {
        if let Some(err) = self.err() {
            return Err(err);
        }
        tokio::select! {
            biased;
            err = self.done() => Err(err),
            res = fut => res,
        }
    }

    /// Context carried by `req`, or a background context.
    pub fn from_request<B>(req: &http::Request<B>) -> Self {
        req.extensions().get::<RequestContext>().cloned().unwrap_or_default()
    }

    /// Attach this context to `req`, replacing any previous one.
    pub fn attach<B>(self, req: &mut http::Request<B>) {
        req.extensions_mut().insert(self);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_background_never_fails() {
        let ctx = RequestContext::background();
        assert!(ctx.err().is_none());
        let res = ctx.run(async { Ok::<_, NetError>(7) }).await;
        assert_eq!(res.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_cancel_aborts_pending_work() {
        let (ctx, handle) = RequestContext::with_cancel();
        let task = tokio::spawn(async move {
            ctx.run(pending::<Result<(), NetError>>()).await
        });
        handle.cancel();
        let res = task.await.unwrap();
        assert!(matches!(res, Err(NetError::Cancelled)));
        assert!(handle.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_expires() {
        let ctx = RequestContext::background().with_timeout(Duration::from_millis(50));
        let res = ctx.run(pending::<Result<(), NetError>>()).await;
        assert!(matches!(res, Err(NetError::TimedOut)));
        assert!(matches!(ctx.err(), Some(NetError::TimedOut)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_earlier_deadline_wins() {
        let ctx = RequestContext::background()
            .with_timeout(Duration::from_secs(1))
            .with_timeout(Duration::from_secs(10));
        let remaining = ctx.deadline().unwrap() - Instant::now();
        assert!(remaining <= Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_already_cancelled_short_circuits() {
        let (ctx, handle) = RequestContext::with_cancel();
        handle.cancel();
        let res = ctx.run(async { Ok::<_, NetError>(()) }).await;
        assert!(matches!(res, Err(NetError::Cancelled)));
    }

    #[test]
    fn test_attach_and_extract() {
        let (ctx, _handle) = RequestContext::with_cancel();
        let mut req = http::Request::new(());
        ctx.with_timeout(Duration::from_secs(5)).attach(&mut req);
        assert!(RequestContext::from_request(&req).deadline().is_some());
        assert!(RequestContext::from_request(&http::Request::new(())).deadline().is_none());
    }
}
