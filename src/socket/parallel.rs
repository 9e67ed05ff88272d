//! Parallel dialing.
//!
//! The candidate set handed to a [`ParallelDialer`] is small and already
//! curated (typically one bootstrap address per provider anycast range), so
//! every candidate is dialed at once with no stagger. The first TCP
//! connection to complete wins; every other attempt is aborted and any
//! connection it produced is closed before the winner is returned.

use crate::base::cancel::RequestContext;
use crate::base::context::IoResultExt;
use crate::base::neterror::{DialErrors, DialFailure, NetError};
use crate::dns::{try_parse_ip, Name, Resolve};
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::task::JoinSet;

/// Alias for the `Future` returned by [`TcpConnect::connect`].
pub type Connecting = Pin<Box<dyn Future<Output = Result<TcpStream, NetError>> + Send>>;

/// Raw TCP connect to one `host:port` candidate.
pub trait TcpConnect: Send + Sync {
    fn connect(&self, addr: &str) -> Connecting;
}

impl<T: TcpConnect + ?Sized> TcpConnect for Arc<T> {
    fn connect(&self, addr: &str) -> Connecting {
        (**self).connect(addr)
    }
}

/// Split `host:port`, accepting bracketed IPv6 hosts.
pub fn split_host_port(addr: &str) -> Result<(String, u16), NetError> {
    let invalid = || NetError::AddressInvalid(addr.to_string());
    let (host, port) = addr.rsplit_once(':').ok_or_else(invalid)?;
    let port = port.parse::<u16>().map_err(|_| invalid())?;
    let host = match host.strip_prefix('[') {
        Some(rest) => rest.strip_suffix(']').ok_or_else(invalid)?,
        None if host.contains(':') => return Err(invalid()),
        None => host,
    };
    if host.is_empty() {
        return Err(invalid());
    }
    Ok((host.to_string(), port))
}

/// Default [`TcpConnect`]: resolves hostnames, then connects.
///
/// The resolved addresses of a single candidate are tried one after another.
/// There is deliberately no address-family race here; racing happens across
/// candidates in [`ParallelDialer`].
#[derive(Clone)]
pub struct TcpConnector {
    resolver: Arc<dyn Resolve>,
    connect_timeout: Option<Duration>,
}

impl TcpConnector {
    pub fn new(resolver: Arc<dyn Resolve>) -> Self {
        Self { resolver, connect_timeout: None }
    }

    /// Bound each individual TCP connect.
    pub fn with_connect_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.connect_timeout = timeout;
        self
    }

    async fn connect_one(target: SocketAddr, timeout: Option<Duration>) -> io::Result<TcpStream> {
        match timeout {
            Some(limit) => tokio::time::timeout(limit, TcpStream::connect(target))
                .await
                .unwrap_or_else(|_| Err(io::Error::from(io::ErrorKind::TimedOut))),
            None => TcpStream::connect(target).await,
        }
    }
}

impl TcpConnect for TcpConnector {
    fn connect(&self, addr: &str) -> Connecting {
        let resolver = self.resolver.clone();
        let timeout = self.connect_timeout;
        let addr = addr.to_string();

        Box::pin(async move {
            let (host, port) = split_host_port(&addr)?;
            let targets: Vec<SocketAddr> = match try_parse_ip(&host, port) {
                Some(target) => vec![target],
                None => resolver
                    .resolve(Name::from(host.as_str()))
                    .await?
                    .map(|mut target| {
                        target.set_port(port);
                        target
                    })
                    .collect(),
            };

            let mut last_err = NetError::NameNotResolved;
            for target in targets {
                match Self::connect_one(target, timeout).await.connection_context(&host, port) {
                    Ok(stream) => return Ok(stream),
                    Err(e) => {
                        tracing::trace!(%target, error = %e, "tcp connect failed");
                        last_err = e;
                    }
                }
            }
            Err(last_err)
        })
    }
}

impl std::fmt::Debug for TcpConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpConnector")
            .field("connect_timeout", &self.connect_timeout)
            .finish_non_exhaustive()
    }
}

type Attempt = (usize, String, Result<TcpStream, NetError>);

/// Races TCP connects to every candidate address.
#[derive(Clone)]
pub struct ParallelDialer {
    connector: Arc<dyn TcpConnect>,
}

impl ParallelDialer {
    pub fn new(connector: Arc<dyn TcpConnect>) -> Self {
        Self { connector }
    }

    /// Dial all `addrs` concurrently and return the first connection with
    /// the candidate that produced it.
    ///
    /// Fails with [`NetError::AllAttemptsFailed`] when every candidate fails,
    /// or with the context's error when `ctx` is cancelled first. Either way
    /// no connection from this race is left open.
    pub async fn dial_parallel(
        &self,
        ctx: &RequestContext,
        addrs: &[String],
    ) -> Result<(TcpStream, String), NetError> {
        if addrs.is_empty() {
            return Err(NetError::NoCandidateAddresses);
        }
        if let Some(err) = ctx.err() {
            return Err(err);
        }

        let mut attempts: JoinSet<Attempt> = JoinSet::new();
        for (index, addr) in addrs.iter().enumerate() {
            let connector = self.connector.clone();
            let addr = addr.clone();
            attempts.spawn(async move {
                let result = connector.connect(&addr).await;
                (index, addr, result)
            });
        }
        tracing::debug!(candidates = addrs.len(), "dialing in parallel");

        let mut failures: Vec<Option<NetError>> = vec![None; addrs.len()];
        loop {
            let joined = tokio::select! {
                biased;
                err = ctx.done() => Err(err),
                joined = attempts.join_next() => Ok(joined),
            };
            let joined = match joined {
                Ok(joined) => joined,
                Err(err) => {
                    tracing::debug!(error = %err, "parallel dial cancelled");
                    Self::discard(&mut attempts).await;
                    return Err(err);
                }
            };

            match joined {
                None => break,
                Some(Ok((_, addr, Ok(stream)))) => {
                    if let Err(e) = stream.set_nodelay(true) {
                        tracing::trace!(error = %e, "set_nodelay failed");
                    }
                    Self::discard(&mut attempts).await;
                    tracing::debug!(winner = %addr, "parallel dial won");
                    return Ok((stream, addr));
                }
                Some(Ok((index, addr, Err(error)))) => {
                    tracing::debug!(addr = %addr, error = %error, "dial attempt failed");
                    failures[index] = Some(error);
                }
                Some(Err(join_err)) => {
                    tracing::warn!(error = %join_err, "dial attempt task failed");
                }
            }
        }

        let failures = failures
            .into_iter()
            .zip(addrs)
            .map(|(error, addr)| DialFailure {
                addr: addr.clone(),
                error: error.unwrap_or(NetError::ConnectionAborted),
            })
            .collect();
        Err(NetError::AllAttemptsFailed(DialErrors::new(failures)))
    }

    /// Abort the remaining attempts and close whatever they connected.
    async fn discard(attempts: &mut JoinSet<Attempt>) {
        attempts.abort_all();
        while let Some(joined) = attempts.join_next().await {
            if let Ok((_, addr, Ok(stream))) = joined {
                tracing::debug!(addr = %addr, "closing losing connection");
                drop(stream);
            }
        }
    }
}

impl std::fmt::Debug for ParallelDialer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParallelDialer").finish_non_exhaustive()
    }
}
