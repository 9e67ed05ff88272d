use super::{ConnectInfo, ConnectInfoRecorder};
use crate::http::roundtrip::{Performing, RequestBody, RoundTrip};
use http::Request;
use std::sync::Arc;

/// Receives the diagnostic record of every freshly established connection.
pub trait OnConnect: Send + Sync {
    fn on_connect(&self, info: &ConnectInfo);
}

impl<F> OnConnect for F
where
    F: Fn(&ConnectInfo) + Send + Sync,
{
    fn on_connect(&self, info: &ConnectInfo) {
        self(info)
    }
}

/// Decorator reporting new connections to an [`OnConnect`] callback.
///
/// Every call gets its own [`ConnectInfoRecorder`]. The callback runs once,
/// after the inner call returns, and only when that call dialed a new TCP
/// connection: requests served by a pooled connection are not reported.
pub struct ConnectTracer<T> {
    inner: T,
    on_connect: Arc<dyn OnConnect>,
}

impl<T> ConnectTracer<T> {
    pub fn new(inner: T, on_connect: Arc<dyn OnConnect>) -> Self {
        Self { inner, on_connect }
    }

    pub fn inner(&self) -> &T {
        &self.inner
    }
}

impl<T: RoundTrip> RoundTrip for ConnectTracer<T> {
    fn perform(&self, mut req: Request<RequestBody>) -> Performing {
        let recorder = ConnectInfoRecorder::attach(&mut req);
        let fut = self.inner.perform(req);
        let on_connect = self.on_connect.clone();
        Box::pin(async move {
            let result = fut.await;
            let info = recorder.seal();
            if info.is_fresh_connection() {
                on_connect.on_connect(&info);
            }
            result
        })
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for ConnectTracer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectTracer").field("inner", &self.inner).finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::neterror::NetError;
    use crate::http::ResponseBody;
    use crate::trace::{GotConnInfo, TraceHook};
    use http::Response;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Inner transport that plays back a fixed connection outcome.
    enum Script {
        Fresh,
        Reused,
        RefusedEverywhere,
    }

    impl RoundTrip for Script {
        fn perform(&self, req: Request<RequestBody>) -> Performing {
            let hook = TraceHook::from_request(&req).unwrap();
            let trace = hook.trace();
            let addr = "192.0.2.7:443";
            let conn = |reused| GotConnInfo {
                remote_addr: Some(addr.parse().unwrap()),
                reused,
                was_idle: reused,
                idle_time: Duration::ZERO,
            };
            let result = match self {
                Script::Fresh => {
                    trace.connect_start(addr);
                    trace.connect_done(addr, None);
                    trace.got_conn(&conn(false));
                    Ok(Response::new(ResponseBody::from_bytes("")))
                }
                Script::Reused => {
                    trace.got_conn(&conn(true));
                    Ok(Response::new(ResponseBody::from_bytes("")))
                }
                Script::RefusedEverywhere => {
                    trace.connect_start(addr);
                    trace.connect_done(addr, Some(&NetError::ConnectionTimedOut));
                    Err(NetError::ConnectionTimedOut)
                }
            };
            Box::pin(std::future::ready(result))
        }
    }

    fn traced(script: Script) -> (ConnectTracer<Script>, Arc<Mutex<Vec<ConnectInfo>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let tracer = ConnectTracer::new(
            script,
            Arc::new(move |info: &ConnectInfo| sink.lock().unwrap().push(info.clone())),
        );
        (tracer, seen)
    }

    fn request() -> Request<RequestBody> {
        Request::new(RequestBody::default())
    }

    #[tokio::test]
    async fn test_fresh_connection_reported_once() {
        let (tracer, seen) = traced(Script::Fresh);
        tracer.perform(request()).await.unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].connect_status, "ok");
        assert_eq!(seen[0].server_addr, "192.0.2.7:443");
    }

    #[tokio::test]
    async fn test_reused_connection_not_reported() {
        let (tracer, seen) = traced(Script::Reused);
        tracer.perform(request()).await.unwrap();
        tracer.perform(request()).await.unwrap();
        assert!(seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_connect_not_reported() {
        let (tracer, seen) = traced(Script::RefusedEverywhere);
        let err = tracer.perform(request()).await.unwrap_err();
        assert!(matches!(err, NetError::ConnectionTimedOut));
        assert!(seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_each_call_gets_its_own_record() {
        let (tracer, seen) = traced(Script::Fresh);
        tracer.perform(request()).await.unwrap();
        tracer.perform(request()).await.unwrap();
        assert_eq!(seen.lock().unwrap().len(), 2);
    }
}
