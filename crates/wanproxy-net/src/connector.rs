//! Accept loop and per-connection lifetime management.
//!
//! An accept loop spawns one task per connection, keeps a shared arena
//! keyed by a small integer id so an external stop signal or diagnostics
//! path can find a specific connection, and races accepting against a
//! cancellation signal via `tokio::select!` rather than a dedicated
//! shutdown message type. The connector owns the destination resolve,
//! dial, and splice wiring; nothing above it needs to know a socket
//! exists.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use xcodec_pipe::{CacheProvider, PipeSession};

use crate::error::SocksError;
use crate::registry::CacheRegistry;
use crate::socks::{self, Handshake, ReplyPolicy, Target};
use crate::splice::{codec_splice, splice};

/// Errors that can end a connection before it ever reaches the splice
/// stage: the SOCKS front-end rejected the request, the requested host
/// didn't resolve, or the dial to the upstream failed.
#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    /// The SOCKS front-end could not parse or rejected the client's request.
    #[error("socks handshake failed: {0}")]
    Socks(#[from] SocksError),
    /// Resolving a SOCKS domain target to a socket address failed.
    #[error("failed to resolve {host}:{port}: {source}")]
    Resolve {
        /// The requested hostname.
        host: String,
        /// The requested port.
        port: u16,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// A domain name resolved to zero addresses.
    #[error("{host}:{port} did not resolve to any address")]
    NoResolution {
        /// The requested hostname.
        host: String,
        /// The requested port.
        port: u16,
    },
    /// Dialing the requested upstream address failed.
    #[error("failed to connect to {addr}: {source}")]
    Dial {
        /// The address the connector attempted to reach.
        addr: SocketAddr,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The relay between client and upstream failed after it was established.
    #[error("relay failed: {0}")]
    Relay(#[from] crate::error::SpliceError),
}

/// A listener abstraction so the accept loop can run against a real
/// `tokio::net::TcpListener` in production and an in-process fake in tests.
/// Generic rather than `dyn`, consistent with keeping the splice's
/// concrete stream types monomorphized on the hot path.
pub trait Listener: Send {
    /// The stream type handed back for each accepted connection.
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    /// Accept the next incoming connection.
    fn accept(
        &mut self,
    ) -> impl Future<Output = std::io::Result<(Self::Stream, SocketAddr)>> + Send;
}

impl Listener for TcpListener {
    type Stream = TcpStream;

    async fn accept(&mut self) -> std::io::Result<(TcpStream, SocketAddr)> {
        TcpListener::accept(self).await
    }
}

/// How an accepted connection picks its upstream target.
#[derive(Debug, Clone)]
pub enum FrontEnd {
    /// SOCKS4/4A/SOCKS5: the client's handshake names the destination.
    Socks(ReplyPolicy),
    /// Plain TCP forwarding: every accepted connection dials the same fixed
    /// upstream, no front-end protocol spoken at all.
    Forward(SocketAddr),
}

/// How a connection's wan-facing leg should be wired.
#[derive(Debug, Clone)]
pub enum PeerCodec {
    /// Relay bytes verbatim; no XCodec framing.
    Plain,
    /// Wrap the wan leg in a codec pipe. This process advertises `self_uuid`
    /// as its cache namespace in `HELLO` and keeps a backref window of
    /// `window_capacity` tags.
    Pipe {
        /// This side's cache namespace.
        self_uuid: Uuid,
        /// Backref window length.
        window_capacity: usize,
    },
}

/// A cooperative stop signal: cancelling it unblocks the accept loop and
/// every in-flight connection racing it.
#[derive(Debug, Clone, Default)]
pub struct Stop(CancellationToken);

impl Stop {
    /// Create a fresh, uncancelled stop signal.
    #[must_use]
    pub fn new() -> Self {
        Self(CancellationToken::new())
    }

    /// Signal the connector and every connection watching this token to
    /// stop. Idempotent.
    pub fn cancel(&self) {
        self.0.cancel();
    }

    /// Whether [`Stop::cancel`] has been called.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.is_cancelled()
    }

    fn token(&self) -> CancellationToken {
        self.0.clone()
    }
}

/// A live connection, kept only so the arena can report who's connected and
/// abort a specific connection by id.
struct ConnectionHandle {
    peer_addr: SocketAddr,
    task: JoinHandle<()>,
}

/// Accept loop plus per-connection SOCKS negotiation, upstream dial, and
/// splice wiring.
///
/// Generic over `L: Listener` so tests can swap in an in-process fake; the
/// `wanproxy` binary instantiates this over `tokio::net::TcpListener`.
pub struct Connector<L: Listener> {
    listener: L,
    stop: Stop,
    front_end: FrontEnd,
    codec: PeerCodec,
    cache_registry: Arc<CacheRegistry>,
    connections: Arc<DashMap<u64, ConnectionHandle>>,
    next_id: AtomicU64,
}

impl<L: Listener> Connector<L> {
    /// Build a connector around an already-bound listener.
    pub fn new(
        listener: L,
        stop: Stop,
        front_end: FrontEnd,
        codec: PeerCodec,
        cache_registry: Arc<CacheRegistry>,
    ) -> Self {
        Self {
            listener,
            stop,
            front_end,
            codec,
            cache_registry,
            connections: Arc::new(DashMap::new()),
            next_id: AtomicU64::new(0),
        }
    }

    /// The stop signal governing this connector, cloneable for callers that
    /// want to trigger shutdown from elsewhere (a signal handler, an admin
    /// endpoint).
    #[must_use]
    pub fn stop(&self) -> Stop {
        self.stop.clone()
    }

    /// Number of connections currently being serviced.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Abort a specific connection by id, if it is still running.
    pub fn abort(&self, id: u64) {
        if let Some((_, handle)) = self.connections.remove(&id) {
            let peer_addr = handle.peer_addr;
            info!(%peer_addr, id, "aborting connection");
            handle.task.abort();
        }
    }

    /// Run the accept loop until the stop signal fires. A per-connection
    /// accept failure is logged and does not stop the loop; nothing short
    /// of cancellation ends `run`.
    pub async fn run(mut self) {
        let token = self.stop.token();
        loop {
            tokio::select! {
                biased;
                () = token.cancelled() => {
                    info!("connector stopping");
                    break;
                }
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, peer_addr)) => self.dispatch(stream, peer_addr),
                        Err(err) => error!(%err, "accept failed"),
                    }
                }
            }
        }
    }

    fn dispatch(&mut self, stream: L::Stream, peer_addr: SocketAddr) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let front_end = self.front_end.clone();
        let codec = self.codec.clone();
        let cache_registry = Arc::clone(&self.cache_registry);
        let connections = Arc::clone(&self.connections);
        let cancel = self.stop.token();

        let task = tokio::spawn(async move {
            debug!(%peer_addr, id, "accepted connection");
            if let Err(err) =
                handle_client(stream, front_end, codec, cache_registry, cancel).await
            {
                warn!(%peer_addr, %err, "connection ended with an error");
            }
            connections.remove(&id);
        });

        self.connections.insert(id, ConnectionHandle { peer_addr, task });
    }
}

/// Drive one accepted socket to an upstream dial, then relay bytes until
/// EOF, error, or `cancel` fires.
///
/// [`FrontEnd::Socks`] negotiates the destination with the client first;
/// [`FrontEnd::Forward`] skips negotiation entirely and dials its fixed
/// target as soon as the connection is accepted.
async fn handle_client<S>(
    mut client: S,
    front_end: FrontEnd,
    codec: PeerCodec,
    cache_registry: Arc<CacheRegistry>,
    cancel: CancellationToken,
) -> Result<(), ConnectError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let upstream = match front_end {
        FrontEnd::Socks(reply_policy) => {
            let handshake = socks::handshake(&mut client).await?;
            let addr = resolve(&handshake).await?;

            let upstream = match TcpStream::connect(addr).await {
                Ok(upstream) => upstream,
                Err(source) => {
                    let _ = socks::reply_failure(&mut client, &handshake).await;
                    return Err(ConnectError::Dial { addr, source });
                }
            };

            let bound = upstream.local_addr().unwrap_or(addr);
            socks::reply_success(&mut client, &handshake, bound, reply_policy).await?;
            upstream
        }
        FrontEnd::Forward(addr) => {
            TcpStream::connect(addr).await.map_err(|source| ConnectError::Dial { addr, source })?
        }
    };

    match codec {
        PeerCodec::Plain => splice(client, upstream, cancel).await?,
        PeerCodec::Pipe { self_uuid, window_capacity } => {
            let provider: Arc<dyn CacheProvider> = cache_registry;
            let session = PipeSession::new(self_uuid, provider, window_capacity);
            codec_splice(client, upstream, session, cancel).await?;
        }
    }

    Ok(())
}

/// Resolve a parsed SOCKS target to a dialable socket address. IP targets
/// pass through unchanged; domain targets go through the standard resolver
/// via `tokio::net::lookup_host`.
async fn resolve(handshake: &Handshake) -> Result<SocketAddr, ConnectError> {
    match &handshake.target {
        Target::Ip(ip, port) => Ok(SocketAddr::new(*ip, *port)),
        Target::Domain(host, port) => {
            let mut addrs = tokio::net::lookup_host((host.as_str(), *port))
                .await
                .map_err(|source| ConnectError::Resolve {
                    host: host.clone(),
                    port: *port,
                    source,
                })?;
            addrs.next().ok_or_else(|| ConnectError::NoResolution {
                host: host.clone(),
                port: *port,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::net::Ipv4Addr;
    use std::sync::Mutex;

    use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream, duplex};
    use tokio::net::TcpListener;

    use super::*;

    /// A fake [`Listener`] that hands out a fixed, pre-seeded queue of
    /// duplex streams instead of binding a real socket.
    struct FakeListener {
        pending: Mutex<VecDeque<(DuplexStream, SocketAddr)>>,
    }

    impl Listener for FakeListener {
        type Stream = DuplexStream;

        async fn accept(&mut self) -> std::io::Result<(DuplexStream, SocketAddr)> {
            loop {
                if let Some(next) = self.pending.get_mut().expect("mutex poisoned").pop_front() {
                    return Ok(next);
                }
                tokio::task::yield_now().await;
            }
        }
    }

    #[tokio::test]
    async fn plain_connect_relays_a_dialed_echo_server() {
        let echo_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let echo_addr = echo_listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut sock, _) = echo_listener.accept().await.unwrap();
            let mut buf = [0u8; 5];
            sock.read_exact(&mut buf).await.unwrap();
            sock.write_all(&buf).await.unwrap();
        });

        let (client_side, server_side) = duplex(4096);
        let peer_addr: SocketAddr = "127.0.0.1:1".parse().unwrap();
        let fake = FakeListener {
            pending: Mutex::new(VecDeque::from([(server_side, peer_addr)])),
        };

        let stop = Stop::new();
        let cache_registry = Arc::new(CacheRegistry::new(0));
        let connector = Connector::new(
            fake,
            stop.clone(),
            FrontEnd::Socks(ReplyPolicy::default()),
            PeerCodec::Plain,
            cache_registry,
        );

        let run = tokio::spawn(connector.run());

        let mut client_side = client_side;
        let mut request = vec![0x04, 0x01];
        request.extend_from_slice(&echo_addr.port().to_be_bytes());
        request.extend_from_slice(&Ipv4Addr::LOCALHOST.octets());
        request.push(0x00);
        client_side.write_all(&request).await.unwrap();

        let mut reply = [0u8; 8];
        client_side.read_exact(&mut reply).await.unwrap();
        assert_eq!(reply[0], 0x00);
        assert_eq!(reply[1], 0x5a);

        client_side.write_all(b"ping!").await.unwrap();
        let mut echoed = [0u8; 5];
        client_side.read_exact(&mut echoed).await.unwrap();
        assert_eq!(&echoed, b"ping!");

        drop(client_side);
        stop.cancel();
        run.await.unwrap();
    }

    #[tokio::test]
    async fn forward_connect_dials_the_fixed_remote_with_no_handshake() {
        let echo_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let echo_addr = echo_listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut sock, _) = echo_listener.accept().await.unwrap();
            let mut buf = [0u8; 5];
            sock.read_exact(&mut buf).await.unwrap();
            sock.write_all(&buf).await.unwrap();
        });

        let (client_side, server_side) = duplex(4096);
        let peer_addr: SocketAddr = "127.0.0.1:1".parse().unwrap();
        let fake = FakeListener {
            pending: Mutex::new(VecDeque::from([(server_side, peer_addr)])),
        };

        let stop = Stop::new();
        let cache_registry = Arc::new(CacheRegistry::new(0));
        let connector = Connector::new(
            fake,
            stop.clone(),
            FrontEnd::Forward(echo_addr),
            PeerCodec::Plain,
            cache_registry,
        );

        let run = tokio::spawn(connector.run());

        let mut client_side = client_side;
        client_side.write_all(b"ping!").await.unwrap();
        let mut echoed = [0u8; 5];
        client_side.read_exact(&mut echoed).await.unwrap();
        assert_eq!(&echoed, b"ping!");

        drop(client_side);
        stop.cancel();
        run.await.unwrap();
    }
}
