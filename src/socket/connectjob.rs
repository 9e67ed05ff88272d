use crate::base::cancel::RequestContext;
use crate::base::neterror::NetError;
use crate::socket::parallel::ParallelDialer;
use crate::socket::tls::{connection_state, TlsConnector};
use crate::trace::{ClientTrace, TlsConnectionState};
use std::net::SocketAddr;
use tokio::net::TcpStream;
use tokio_boring::SslStream;

/// A TLS connection ready for the HTTP/2 handshake.
pub struct Established {
    pub stream: SslStream<TcpStream>,
    pub remote_addr: Option<SocketAddr>,
    /// Candidate address that won the dial.
    pub candidate: String,
}

impl std::fmt::Debug for Established {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Established")
            .field("remote_addr", &self.remote_addr)
            .field("candidate", &self.candidate)
            .finish_non_exhaustive()
    }
}

/// Establishes one connection: parallel TCP dial, then TLS.
///
/// Trace hooks fire around each phase. Both phases run under the caller's
/// [`RequestContext`].
pub struct ConnectJob<'a> {
    pub dialer: &'a ParallelDialer,
    pub tls: &'a TlsConnector,
    pub addrs: &'a [String],
}

impl ConnectJob<'_> {
    pub async fn connect(
        &self,
        ctx: &RequestContext,
        trace: Option<&dyn ClientTrace>,
    ) -> Result<Established, NetError> {
        let label = self.addrs.join(",");
        if let Some(t) = trace {
            t.connect_start(&label);
        }
        let (stream, candidate) = match self.dialer.dial_parallel(ctx, self.addrs).await {
            Ok(won) => won,
            Err(e) => {
                if let Some(t) = trace {
                    t.connect_done(&label, Some(&e));
                }
                return Err(e);
            }
        };
        if let Some(t) = trace {
            t.connect_done(&candidate, None);
        }
        let remote_addr = stream.peer_addr().ok();

        if let Some(t) = trace {
            t.tls_handshake_start();
        }
        let stream = match ctx.run(self.tls.handshake(stream)).await {
            Ok(stream) => stream,
            Err(e) => {
                if let Some(t) = trace {
                    t.tls_handshake_done(&TlsConnectionState::default(), Some(&e));
                }
                return Err(e);
            }
        };

        let state = connection_state(stream.ssl());
        let alpn =
            (state.alpn_protocol != "h2").then_some(NetError::AlpnNegotiationFailed);
        if let Some(t) = trace {
            t.tls_handshake_done(&state, alpn.as_ref());
        }
        if let Some(e) = alpn {
            tracing::debug!(
                host = %self.tls.hostname(),
                alpn = %state.alpn_protocol,
                "server did not select h2"
            );
            return Err(e);
        }

        tracing::debug!(
            host = %self.tls.hostname(),
            candidate = %candidate,
            version = %crate::trace::tls_version_name(state.version),
            "connection established"
        );
        Ok(Established { stream, remote_addr, candidate })
    }
}
